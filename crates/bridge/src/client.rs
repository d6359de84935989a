//! Bridge client: the once-initialized handle to every configured chain.
//!
//! Connecting to the network is expensive (RPC handshakes, chain id checks),
//! so [`BridgeClient`] performs it lazily on first use and shares the result
//! between all callers. Concurrent first callers await the same in-flight
//! initialization. A failed initialization is not remembered; the next call
//! tries again.

use std::collections::BTreeMap;
use std::sync::Arc;

use alloy::primitives::{TxHash, U256};
use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::address::{AddressError, ChainAddress, TokenId, UniversalAddress};
use crate::cctp::{CircleAttestation, CircleMessage};
use crate::chain::{Chain, Network, UnknownChain};
use crate::signer::{SignedTransaction, UnsignedTransaction};
use crate::transfer::{CircleTransferRequest, TransferError, TransferRequest};
use crate::wormhole::{MessageId, Vaa};

/// One context per configured chain.
pub type ChainMap = BTreeMap<Chain, Arc<dyn ChainContext>>;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    UnknownChain(#[from] UnknownChain),
    #[error("{chain} RPC at {rpc_url} reports chain id {actual}, expected {expected}")]
    NetworkMismatch {
        chain: Chain,
        rpc_url: String,
        expected: u64,
        actual: u64,
    },
    #[error("RPC error: {0}")]
    Rpc(#[from] alloy::transports::TransportError),
    #[error("Contract error: {0}")]
    Contract(#[from] alloy::contract::Error),
    #[error("Pending transaction error: {0}")]
    PendingTransaction(#[from] alloy::providers::PendingTransactionError),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Solana RPC {method} failed: {message}")]
    SolanaRpc { method: &'static str, message: String },
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error("transaction {tx_hash} reverted")]
    Reverted { tx_hash: TxHash },
    #[error("transaction {tx_hash} has no receipt")]
    ReceiptNotFound { tx_hash: TxHash },
    #[error("transaction {tx_hash} published no bridge message")]
    MessageNotFound { tx_hash: TxHash },
    #[error("transaction {tx_hash} emitted no CCTP MessageSent event")]
    CircleMessageNotFound { tx_hash: TxHash },
    #[error("token {token} has no wrapped asset on {chain}")]
    NotWrapped { token: TokenId, chain: Chain },
    #[error("{operation} is not supported on {chain}")]
    Unsupported {
        chain: Chain,
        operation: &'static str,
    },
    #[error("signed transaction for {actual} sent to {expected}")]
    WrongChain { expected: Chain, actual: Chain },
}

/// Lock-and-mint token bridge operations on one chain.
#[async_trait]
pub trait TokenBridge: Send + Sync {
    /// Unsigned transactions that move `request.amount()` off this chain.
    ///
    /// An allowance top-up is included ahead of the transfer when the
    /// current allowance is short.
    async fn transfer(
        &self,
        request: &TransferRequest,
    ) -> Result<Vec<UnsignedTransaction>, BridgeError>;

    /// Representation of a foreign `original` token on this chain.
    async fn wrapped_asset(&self, original: &TokenId) -> Result<TokenId, BridgeError>;

    /// Account credited with `token` when `owner` receives a transfer.
    ///
    /// On Solana this is the owner's associated token account for the
    /// mint, since the bridge pays into token accounts, never wallets.
    fn recipient_account(
        &self,
        owner: &ChainAddress,
        token: &TokenId,
    ) -> Result<ChainAddress, BridgeError>;

    /// Balance of `owner` in `token`, in the token's smallest unit.
    async fn balance(&self, token: &TokenId, owner: &ChainAddress) -> Result<U256, BridgeError>;

    async fn decimals(&self, token: &TokenId) -> Result<u8, BridgeError>;
}

/// Burn-and-mint (CCTP) operations on one chain.
#[async_trait]
pub trait CircleBridge: Send + Sync {
    /// Unsigned transactions that burn `request.amount()` of USDC.
    async fn transfer(
        &self,
        request: &CircleTransferRequest,
        max_fee: U256,
    ) -> Result<Vec<UnsignedTransaction>, BridgeError>;

    /// Account the minted USDC is credited to when `owner` is the recipient.
    fn mint_recipient(&self, owner: &ChainAddress) -> Result<UniversalAddress, BridgeError>;

    fn usdc(&self) -> TokenId;
}

/// Connected chain.
#[async_trait]
pub trait ChainContext: Send + Sync {
    fn chain(&self) -> Chain;

    fn token_bridge(&self) -> &dyn TokenBridge;

    fn circle_bridge(&self) -> Result<&dyn CircleBridge, BridgeError>;

    /// Broadcasts `transactions` in order, waiting for each to succeed
    /// before sending the next.
    async fn send(&self, transactions: Vec<SignedTransaction>) -> Result<Vec<TxHash>, BridgeError>;

    /// Bridge messages published by `tx_hash`.
    async fn parse_transaction(&self, tx_hash: TxHash) -> Result<Vec<MessageId>, BridgeError>;

    /// CCTP burn message emitted by `tx_hash`.
    async fn parse_circle_transaction(&self, tx_hash: TxHash)
    -> Result<CircleMessage, BridgeError>;
}

// Lets tests call `unwrap_err()` on results carrying chain handles.
#[cfg(test)]
impl std::fmt::Debug for dyn ChainContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainContext")
            .field("chain", &self.chain())
            .finish_non_exhaustive()
    }
}

/// Completes transfers on the destination chain.
///
/// Redemption needs a destination-side signer, which the payer's wallet
/// does not provide; deployments that hold one plug it in here.
#[async_trait]
pub trait Redeemer: Send + Sync {
    /// Submits the VAA to the destination token bridge. Returns the
    /// destination transaction id.
    async fn redeem(&self, vaa: &Vaa) -> Result<String, BridgeError>;

    /// Submits the attested CCTP message for minting.
    async fn receive_message(&self, attestation: &CircleAttestation)
    -> Result<String, BridgeError>;
}

/// The single underlying network initialization.
#[async_trait]
pub trait NetworkConnector: Send + Sync {
    async fn connect(&self, network: Network) -> Result<ChainMap, BridgeError>;
}

pub struct BridgeClient {
    network: Network,
    connector: Arc<dyn NetworkConnector>,
    chains: OnceCell<ChainMap>,
}

impl std::fmt::Debug for BridgeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeClient")
            .field("network", &self.network)
            .field("connected", &self.chains.initialized())
            .finish_non_exhaustive()
    }
}

impl BridgeClient {
    pub fn new(network: Network, connector: Arc<dyn NetworkConnector>) -> Self {
        Self {
            network,
            connector,
            chains: OnceCell::new(),
        }
    }

    pub const fn network(&self) -> Network {
        self.network
    }

    async fn chains(&self) -> Result<&ChainMap, BridgeError> {
        self.chains
            .get_or_try_init(|| async {
                info!(network = %self.network, "Connecting bridge client");
                let chains = self.connector.connect(self.network).await?;
                info!(
                    network = %self.network,
                    chains = ?chains.keys().collect::<Vec<_>>(),
                    "Bridge client connected"
                );
                Ok(chains)
            })
            .await
    }

    /// Context for the chain called `name` (case-insensitive).
    pub async fn get_chain(&self, name: &str) -> Result<Arc<dyn ChainContext>, BridgeError> {
        let chain: Chain = name.parse()?;
        self.get_chain_context(chain).await
    }

    pub async fn get_chain_context(
        &self,
        chain: Chain,
    ) -> Result<Arc<dyn ChainContext>, BridgeError> {
        self.chains()
            .await?
            .get(&chain)
            .cloned()
            .ok_or_else(|| {
                BridgeError::UnknownChain(UnknownChain {
                    name: chain.name().to_string(),
                })
            })
    }

    /// Balance of `owner` in `token`, both on the token's chain.
    pub async fn token_balance(
        &self,
        token: &TokenId,
        owner: &ChainAddress,
    ) -> Result<U256, BridgeError> {
        let context = self.get_chain_context(token.chain()).await?;
        let balance = context.token_bridge().balance(token, owner).await?;
        debug!(%token, %owner, %balance, "Queried token balance");
        Ok(balance)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use solana_sdk::pubkey::Pubkey;

    use super::*;
    use crate::mock::{MockChain, MockConnector};

    fn chains() -> ChainMap {
        let mut chains = ChainMap::new();
        chains.insert(
            Chain::Ethereum,
            Arc::new(MockChain::new(Chain::Ethereum)) as Arc<dyn ChainContext>,
        );
        chains.insert(
            Chain::Solana,
            Arc::new(MockChain::new(Chain::Solana)) as Arc<dyn ChainContext>,
        );
        chains
    }

    #[tokio::test]
    async fn concurrent_first_calls_connect_once() {
        let connector =
            Arc::new(MockConnector::new(chains()).with_delay(Duration::from_millis(50)));
        let client = Arc::new(BridgeClient::new(Network::Testnet, connector.clone()));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let client = Arc::clone(&client);
                tokio::spawn(async move {
                    let name = if i % 2 == 0 { "Ethereum" } else { "Solana" };
                    client.get_chain(name).await.map(|ctx| ctx.chain())
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(connector.connect_calls(), 1);
    }

    #[tokio::test]
    async fn get_chain_is_case_insensitive() {
        let connector = Arc::new(MockConnector::new(chains()));
        let client = BridgeClient::new(Network::Testnet, connector);

        let solana = client.get_chain("solana").await.unwrap();
        assert_eq!(solana.chain(), Chain::Solana);
    }

    #[tokio::test]
    async fn unknown_chain_name_is_rejected() {
        let connector = Arc::new(MockConnector::new(chains()));
        let client = BridgeClient::new(Network::Testnet, connector);

        let err = client.get_chain("Avalanche").await.unwrap_err();

        assert!(
            matches!(err, BridgeError::UnknownChain(UnknownChain { ref name }) if name == "Avalanche"),
            "got {err:?}"
        );
    }

    #[tokio::test]
    async fn unconfigured_chain_is_unknown() {
        let mut only_ethereum = ChainMap::new();
        only_ethereum.insert(
            Chain::Ethereum,
            Arc::new(MockChain::new(Chain::Ethereum)) as Arc<dyn ChainContext>,
        );
        let client = BridgeClient::new(
            Network::Testnet,
            Arc::new(MockConnector::new(only_ethereum)),
        );

        let err = client.get_chain("Solana").await.unwrap_err();
        assert!(matches!(err, BridgeError::UnknownChain(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn failed_initialization_is_retried() {
        let connector = Arc::new(MockConnector::new(chains()).failing_first(1));
        let client = BridgeClient::new(Network::Testnet, connector.clone());

        assert!(client.get_chain("Ethereum").await.is_err());
        let ethereum = client.get_chain("Ethereum").await.unwrap();

        assert_eq!(ethereum.chain(), Chain::Ethereum);
        assert_eq!(connector.connect_calls(), 2);
    }

    #[tokio::test]
    async fn token_balance_routes_to_token_chain() {
        let solana = Arc::new(MockChain::new(Chain::Solana).with_balance(U256::from(42)));
        let mut map = ChainMap::new();
        map.insert(Chain::Solana, solana.clone() as Arc<dyn ChainContext>);
        let client = BridgeClient::new(Network::Testnet, Arc::new(MockConnector::new(map)));

        let token = TokenId::new(ChainAddress::solana(Pubkey::new_unique()));
        let owner = ChainAddress::solana(Pubkey::new_unique());

        let balance = client.token_balance(&token, &owner).await.unwrap();

        assert_eq!(balance, U256::from(42));
        assert_eq!(solana.balance_queries(), vec![(token, owner)]);
    }
}
