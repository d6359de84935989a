//! Solana chain context.
//!
//! Solana is only ever the destination here: the context answers balance,
//! decimals and wrapped-mint queries over JSON-RPC and derives the accounts
//! that receive bridged tokens. Outbound transfers are not supported.

use alloy::primitives::{TxHash, U256};
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use solana_sdk::pubkey::Pubkey;
use tracing::{debug, info};
use url::Url;

use crate::address::{ChainAddress, TokenId, UniversalAddress};
use crate::cctp::CircleMessage;
use crate::chain::{Chain, Network};
use crate::client::{BridgeError, ChainContext, CircleBridge, TokenBridge};
use crate::signer::{SignedTransaction, UnsignedTransaction};
use crate::transfer::{CircleTransferRequest, TransferRequest};
use crate::wormhole::MessageId;

pub const SPL_TOKEN_PROGRAM: Pubkey =
    solana_sdk::pubkey!("TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA");
pub const ASSOCIATED_TOKEN_PROGRAM: Pubkey =
    solana_sdk::pubkey!("ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL");

const WRAPPED_MINT_SEED: &[u8] = b"wrapped";
const ACCOUNT_NOT_FOUND: &str = "could not find account";

/// Program and mint addresses used on Solana.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolanaPrograms {
    pub token_bridge: Pubkey,
    pub usdc_mint: Pubkey,
}

impl SolanaPrograms {
    /// Canonical deployments on mainnet-beta or devnet.
    pub const fn defaults(network: Network) -> Self {
        match network {
            Network::Mainnet => Self {
                token_bridge: solana_sdk::pubkey!("wormDTUJ6AWPNvk59vGQbDvGJmqbDTdgWgAqcLBCgUb"),
                usdc_mint: solana_sdk::pubkey!("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"),
            },
            Network::Testnet => Self {
                token_bridge: solana_sdk::pubkey!("DZnkkTmCiFWfYTfT41X3Rd1kDgozqzxWaHqsw6W4x2oe"),
                usdc_mint: solana_sdk::pubkey!("4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU"),
            },
        }
    }
}

/// Mint the token bridge creates for a token native to `token_chain`.
pub fn wrapped_mint(token_bridge: &Pubkey, token_chain: u16, token_address: &UniversalAddress) -> Pubkey {
    let (mint, _bump) = Pubkey::find_program_address(
        &[
            WRAPPED_MINT_SEED,
            &token_chain.to_be_bytes(),
            token_address.as_bytes(),
        ],
        token_bridge,
    );
    mint
}

/// Associated token account holding `owner`'s balance of `mint`.
pub fn associated_token_address(owner: &Pubkey, mint: &Pubkey) -> Pubkey {
    let (account, _bump) = Pubkey::find_program_address(
        &[owner.as_ref(), SPL_TOKEN_PROGRAM.as_ref(), mint.as_ref()],
        &ASSOCIATED_TOKEN_PROGRAM,
    );
    account
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct WithContext<T> {
    value: T,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenAmount {
    amount: String,
    decimals: u8,
}

#[derive(Deserialize)]
struct Version {
    #[serde(rename = "solana-core")]
    solana_core: String,
}

pub struct SolanaChain {
    network: Network,
    http_client: reqwest::Client,
    rpc_url: Url,
    programs: SolanaPrograms,
}

impl std::fmt::Debug for SolanaChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolanaChain")
            .field("network", &self.network)
            .field("rpc_url", &self.rpc_url.as_str())
            .field("programs", &self.programs)
            .finish_non_exhaustive()
    }
}

impl SolanaChain {
    /// Connects to `rpc_url`, checking that it answers `getVersion`.
    pub async fn connect(
        network: Network,
        http_client: reqwest::Client,
        rpc_url: Url,
        programs: SolanaPrograms,
    ) -> Result<Self, BridgeError> {
        let chain = Self {
            network,
            http_client,
            rpc_url,
            programs,
        };

        let version: Version = chain.rpc("getVersion", json!([])).await?;
        info!(%network, version = version.solana_core, "Connected to Solana");

        Ok(chain)
    }

    pub const fn programs(&self) -> &SolanaPrograms {
        &self.programs
    }

    async fn rpc<T: DeserializeOwned>(
        &self,
        method: &'static str,
        params: serde_json::Value,
    ) -> Result<T, BridgeError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response: RpcResponse<T> = self
            .http_client
            .post(self.rpc_url.clone())
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(error) = response.error {
            return Err(BridgeError::SolanaRpc {
                method,
                message: format!("{} (code {})", error.message, error.code),
            });
        }

        response.result.ok_or_else(|| BridgeError::SolanaRpc {
            method,
            message: "response has neither result nor error".to_string(),
        })
    }

    fn unsupported(operation: &'static str) -> BridgeError {
        BridgeError::Unsupported {
            chain: Chain::Solana,
            operation,
        }
    }
}

#[async_trait]
impl TokenBridge for SolanaChain {
    async fn transfer(
        &self,
        _request: &TransferRequest,
    ) -> Result<Vec<UnsignedTransaction>, BridgeError> {
        Err(Self::unsupported("outbound token bridge transfer"))
    }

    async fn wrapped_asset(&self, original: &TokenId) -> Result<TokenId, BridgeError> {
        if original.chain() == Chain::Solana {
            return Ok(*original);
        }

        let mint = wrapped_mint(
            &self.programs.token_bridge,
            original.chain().wormhole_id(self.network),
            &original.universal(),
        );

        let account: WithContext<Option<serde_json::Value>> = self
            .rpc(
                "getAccountInfo",
                json!([mint.to_string(), { "encoding": "base64" }]),
            )
            .await?;

        if account.value.is_none() {
            return Err(BridgeError::NotWrapped {
                token: *original,
                chain: Chain::Solana,
            });
        }

        debug!(%original, %mint, "Resolved wrapped mint");
        Ok(TokenId::new(ChainAddress::solana(mint)))
    }

    fn recipient_account(
        &self,
        owner: &ChainAddress,
        token: &TokenId,
    ) -> Result<ChainAddress, BridgeError> {
        let account = associated_token_address(&owner.as_solana()?, &token.address().as_solana()?);
        Ok(ChainAddress::solana(account))
    }

    /// A missing token account holds nothing, so it reads as zero.
    async fn balance(&self, token: &TokenId, owner: &ChainAddress) -> Result<U256, BridgeError> {
        let mint = token.address().as_solana()?;
        let account = associated_token_address(&owner.as_solana()?, &mint);

        let result: Result<WithContext<TokenAmount>, _> = self
            .rpc("getTokenAccountBalance", json!([account.to_string()]))
            .await;

        let amount = match result {
            Ok(balance) => balance.value.amount,
            Err(BridgeError::SolanaRpc { message, .. }) if message.contains(ACCOUNT_NOT_FOUND) => {
                debug!(%account, %owner, "Token account does not exist yet");
                return Ok(U256::ZERO);
            }
            Err(err) => return Err(err),
        };

        amount
            .parse::<U256>()
            .map_err(|err| BridgeError::SolanaRpc {
                method: "getTokenAccountBalance",
                message: format!("invalid amount {amount:?}: {err}"),
            })
    }

    async fn decimals(&self, token: &TokenId) -> Result<u8, BridgeError> {
        let mint = token.address().as_solana()?;
        let supply: WithContext<TokenAmount> = self
            .rpc("getTokenSupply", json!([mint.to_string()]))
            .await?;
        Ok(supply.value.decimals)
    }
}

#[async_trait]
impl CircleBridge for SolanaChain {
    async fn transfer(
        &self,
        _request: &CircleTransferRequest,
        _max_fee: U256,
    ) -> Result<Vec<UnsignedTransaction>, BridgeError> {
        Err(Self::unsupported("outbound CCTP burn"))
    }

    /// CCTP mints into the owner's USDC token account, not the wallet.
    fn mint_recipient(&self, owner: &ChainAddress) -> Result<UniversalAddress, BridgeError> {
        let account = associated_token_address(&owner.as_solana()?, &self.programs.usdc_mint);
        Ok(UniversalAddress::from(account))
    }

    fn usdc(&self) -> TokenId {
        TokenId::new(ChainAddress::solana(self.programs.usdc_mint))
    }
}

#[async_trait]
impl ChainContext for SolanaChain {
    fn chain(&self) -> Chain {
        Chain::Solana
    }

    fn token_bridge(&self) -> &dyn TokenBridge {
        self
    }

    fn circle_bridge(&self) -> Result<&dyn CircleBridge, BridgeError> {
        Ok(self)
    }

    async fn send(&self, _transactions: Vec<SignedTransaction>) -> Result<Vec<TxHash>, BridgeError> {
        Err(Self::unsupported("transaction submission"))
    }

    async fn parse_transaction(&self, _tx_hash: TxHash) -> Result<Vec<MessageId>, BridgeError> {
        Err(Self::unsupported("message parsing"))
    }

    async fn parse_circle_transaction(
        &self,
        _tx_hash: TxHash,
    ) -> Result<CircleMessage, BridgeError> {
        Err(Self::unsupported("CCTP message parsing"))
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::address;
    use httpmock::prelude::*;

    use super::*;

    const SEPOLIA_USDC: alloy::primitives::Address =
        address!("0x1c7D4B196Cb0C7B01d743Fbc6116a902379C7238");

    async fn connected(server: &MockServer) -> SolanaChain {
        server.mock(|when, then| {
            when.method(POST).path("/").body_contains("getVersion");
            then.status(200).json_body(serde_json::json!({
                "jsonrpc": "2.0", "id": 1,
                "result": { "solana-core": "2.2.12", "feature-set": 1 }
            }));
        });

        SolanaChain::connect(
            Network::Testnet,
            reqwest::Client::new(),
            Url::parse(&server.url("/")).unwrap(),
            SolanaPrograms::defaults(Network::Testnet),
        )
        .await
        .unwrap()
    }

    fn sepolia_usdc() -> TokenId {
        TokenId::new(ChainAddress::evm(Chain::Ethereum, SEPOLIA_USDC))
    }

    #[test]
    fn wrapped_mint_depends_on_origin_chain() {
        let bridge = SolanaPrograms::defaults(Network::Testnet).token_bridge;
        let token = sepolia_usdc().universal();

        let from_sepolia = wrapped_mint(&bridge, 10002, &token);
        let from_mainnet = wrapped_mint(&bridge, 2, &token);

        assert_eq!(from_sepolia, wrapped_mint(&bridge, 10002, &token));
        assert_ne!(from_sepolia, from_mainnet);
        assert!(!from_sepolia.is_on_curve());
    }

    #[test]
    fn associated_token_account_is_per_mint() {
        let owner = Pubkey::new_unique();
        let programs = SolanaPrograms::defaults(Network::Mainnet);

        let usdc_account = associated_token_address(&owner, &programs.usdc_mint);
        let other_account = associated_token_address(&owner, &Pubkey::new_unique());

        assert_ne!(usdc_account, other_account);
        assert!(!usdc_account.is_on_curve());
    }

    #[tokio::test]
    async fn recipient_is_owner_token_account_for_mint() {
        let server = MockServer::start();
        let chain = connected(&server).await;
        let owner = Pubkey::new_unique();
        let mint = Pubkey::new_unique();

        let account = chain
            .recipient_account(
                &ChainAddress::solana(owner),
                &TokenId::new(ChainAddress::solana(mint)),
            )
            .unwrap();

        assert_eq!(
            account,
            ChainAddress::solana(associated_token_address(&owner, &mint))
        );
        assert_ne!(account, ChainAddress::solana(owner));
    }

    #[tokio::test]
    async fn reads_token_account_balance() {
        let server = MockServer::start();
        let chain = connected(&server).await;
        let balance_mock = server.mock(|when, then| {
            when.method(POST).path("/").body_contains("getTokenAccountBalance");
            then.status(200).json_body(serde_json::json!({
                "jsonrpc": "2.0", "id": 1,
                "result": {
                    "context": { "slot": 1 },
                    "value": { "amount": "500000", "decimals": 6, "uiAmountString": "0.5" }
                }
            }));
        });

        let owner = ChainAddress::solana(Pubkey::new_unique());
        let balance = chain.balance(&chain.usdc(), &owner).await.unwrap();

        assert_eq!(balance, U256::from(500_000));
        balance_mock.assert();
    }

    #[tokio::test]
    async fn missing_token_account_reads_as_zero() {
        let server = MockServer::start();
        let chain = connected(&server).await;
        server.mock(|when, then| {
            when.method(POST).path("/").body_contains("getTokenAccountBalance");
            then.status(200).json_body(serde_json::json!({
                "jsonrpc": "2.0", "id": 1,
                "error": { "code": -32602, "message": "Invalid param: could not find account" }
            }));
        });

        let owner = ChainAddress::solana(Pubkey::new_unique());
        let balance = chain.balance(&chain.usdc(), &owner).await.unwrap();

        assert_eq!(balance, U256::ZERO);
    }

    #[tokio::test]
    async fn other_rpc_errors_propagate() {
        let server = MockServer::start();
        let chain = connected(&server).await;
        server.mock(|when, then| {
            when.method(POST).path("/").body_contains("getTokenAccountBalance");
            then.status(200).json_body(serde_json::json!({
                "jsonrpc": "2.0", "id": 1,
                "error": { "code": -32005, "message": "Node is behind" }
            }));
        });

        let owner = ChainAddress::solana(Pubkey::new_unique());
        let err = chain.balance(&chain.usdc(), &owner).await.unwrap_err();

        assert!(
            matches!(err, BridgeError::SolanaRpc { method: "getTokenAccountBalance", .. }),
            "got {err:?}"
        );
    }

    #[tokio::test]
    async fn unregistered_token_has_no_wrapped_mint() {
        let server = MockServer::start();
        let chain = connected(&server).await;
        server.mock(|when, then| {
            when.method(POST).path("/").body_contains("getAccountInfo");
            then.status(200).json_body(serde_json::json!({
                "jsonrpc": "2.0", "id": 1,
                "result": { "context": { "slot": 1 }, "value": null }
            }));
        });

        let err = chain.wrapped_asset(&sepolia_usdc()).await.unwrap_err();

        assert!(
            matches!(err, BridgeError::NotWrapped { chain: Chain::Solana, .. }),
            "got {err:?}"
        );
    }

    #[tokio::test]
    async fn registered_token_resolves_to_derived_mint() {
        let server = MockServer::start();
        let chain = connected(&server).await;
        server.mock(|when, then| {
            when.method(POST).path("/").body_contains("getAccountInfo");
            then.status(200).json_body(serde_json::json!({
                "jsonrpc": "2.0", "id": 1,
                "result": {
                    "context": { "slot": 1 },
                    "value": { "data": ["", "base64"], "executable": false, "lamports": 1, "owner": SPL_TOKEN_PROGRAM.to_string() }
                }
            }));
        });

        let wrapped = chain.wrapped_asset(&sepolia_usdc()).await.unwrap();
        let expected = wrapped_mint(
            &chain.programs().token_bridge,
            10002,
            &sepolia_usdc().universal(),
        );

        assert_eq!(wrapped.address().as_solana().unwrap(), expected);
    }

    #[tokio::test]
    async fn outbound_transfers_are_unsupported() {
        let server = MockServer::start();
        let chain = connected(&server).await;

        let err = chain.send(Vec::new()).await.unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Unsupported {
                chain: Chain::Solana,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn cctp_mints_into_usdc_token_account() {
        let server = MockServer::start();
        let chain = connected(&server).await;
        let owner = Pubkey::new_unique();

        let recipient = chain
            .mint_recipient(&ChainAddress::solana(owner))
            .unwrap();

        assert_eq!(
            recipient.to_solana(),
            associated_token_address(&owner, &chain.programs().usdc_mint)
        );
    }
}
