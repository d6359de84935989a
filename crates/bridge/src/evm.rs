//! Ethereum chain context.
//!
//! Reads go through an alloy provider. Writes are never signed here: the
//! bridge builds fully populated [`UnsignedTransaction`]s (nonce, EIP-1559
//! fees, chain id, gas limit) and hands them to a
//! [`crate::signer::SignOnlySigner`].

use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, B256, Bytes, TxHash, U256, address};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{Log, TransactionRequest};
use alloy::sol;
use alloy::sol_types::{SolCall, SolEvent};
use async_trait::async_trait;
use tracing::{debug, info, trace};
use url::Url;

use crate::address::{ChainAddress, TokenId, UniversalAddress};
use crate::cctp::{CircleMessage, FAST_TRANSFER_THRESHOLD};
use crate::chain::{Chain, Network};
use crate::client::{BridgeError, ChainContext, CircleBridge, TokenBridge};
use crate::signer::{SignedTransaction, UnsignedTransaction};
use crate::transfer::{CircleTransferRequest, TransferRequest};
use crate::wormhole::MessageId;

sol!(
    #![sol(all_derives = true, rpc)]
    interface IERC20 {
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
        function balanceOf(address account) external view returns (uint256);
        function decimals() external view returns (uint8);
    }
);

sol!(
    #![sol(all_derives = true, rpc)]
    interface ITokenBridge {
        function transferTokens(
            address token,
            uint256 amount,
            uint16 recipientChain,
            bytes32 recipient,
            uint256 arbiterFee,
            uint32 nonce
        ) external payable returns (uint64 sequence);

        function transferTokensWithPayload(
            address token,
            uint256 amount,
            uint16 recipientChain,
            bytes32 recipient,
            uint32 nonce,
            bytes payload
        ) external payable returns (uint64 sequence);

        function wrappedAsset(uint16 tokenChainId, bytes32 tokenAddress) external view returns (address);
    }
);

sol!(
    #![sol(all_derives = true, rpc)]
    interface IWormhole {
        event LogMessagePublished(
            address indexed sender,
            uint64 sequence,
            uint32 nonce,
            bytes payload,
            uint8 consistencyLevel
        );

        function messageFee() external view returns (uint256);
    }
);

sol!(
    #![sol(all_derives = true, rpc)]
    #[allow(clippy::too_many_arguments)]
    interface ITokenMessengerV2 {
        function depositForBurn(
            uint256 amount,
            uint32 destinationDomain,
            bytes32 mintRecipient,
            address burnToken,
            bytes32 destinationCaller,
            uint256 maxFee,
            uint32 minFinalityThreshold
        ) external;

        function depositForBurnWithHook(
            uint256 amount,
            uint32 destinationDomain,
            bytes32 mintRecipient,
            address burnToken,
            bytes32 destinationCaller,
            uint256 maxFee,
            uint32 minFinalityThreshold,
            bytes hookData
        ) external;
    }
);

sol!(
    #![sol(all_derives = true)]
    interface IMessageTransmitterV2 {
        event MessageSent(bytes message);
    }
);

const APPROVE_GAS_LIMIT: u64 = 100_000;
const TRANSFER_GAS_LIMIT: u64 = 500_000;
const BURN_GAS_LIMIT: u64 = 300_000;

/// Wormhole batching nonce. Unused by the token bridge, so always zero.
const MESSAGE_NONCE: u32 = 0;

/// Contract addresses used on Ethereum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvmContracts {
    pub token_bridge: Address,
    pub core_bridge: Address,
    pub usdc: Address,
    pub token_messenger: Address,
    pub message_transmitter: Address,
}

impl EvmContracts {
    /// Canonical deployments on Ethereum mainnet or Sepolia.
    pub const fn defaults(network: Network) -> Self {
        match network {
            Network::Mainnet => Self {
                token_bridge: address!("0x3ee18B2214AFF97000D974cf647E7C347E8fa585"),
                core_bridge: address!("0x98f3c9e6E3fAce36bAAd05FE09d375Ef1464288B"),
                usdc: address!("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"),
                token_messenger: address!("0x28b5a0e9C621a5BadaA536219b3a228C8168cf5d"),
                message_transmitter: address!("0x81D40F21F12A8F0E3252Bccb954D722d4c464B64"),
            },
            Network::Testnet => Self {
                token_bridge: address!("0xDB5492265f6038831E89f495670FF909aDe94bd9"),
                core_bridge: address!("0x4a8bc80Ed5a4067f1CCf107057b8270E0cC11A78"),
                usdc: address!("0x1c7D4B196Cb0C7B01d743Fbc6116a902379C7238"),
                token_messenger: address!("0x8FE6B999Dc680CcFDD5Bf7EB0974218be2542DAA"),
                message_transmitter: address!("0xE737e5cEBEEBa77EFE34D4aa090756590b1CE275"),
            },
        }
    }
}

/// A contract call waiting to be populated into a transaction.
struct PendingCall {
    description: &'static str,
    to: Address,
    input: Bytes,
    value: U256,
    gas_limit: u64,
}

pub struct EvmChain {
    network: Network,
    provider: DynProvider,
    contracts: EvmContracts,
}

impl std::fmt::Debug for EvmChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvmChain")
            .field("network", &self.network)
            .field("contracts", &self.contracts)
            .finish_non_exhaustive()
    }
}

impl EvmChain {
    /// Wraps `provider` after checking it serves the expected chain.
    pub async fn new(
        network: Network,
        provider: DynProvider,
        contracts: EvmContracts,
        rpc_url: &str,
    ) -> Result<Self, BridgeError> {
        let expected = Chain::Ethereum
            .evm_chain_id(network)
            .ok_or(BridgeError::Unsupported {
                chain: Chain::Ethereum,
                operation: "EVM chain id",
            })?;
        let actual = provider.get_chain_id().await?;

        if actual != expected {
            return Err(BridgeError::NetworkMismatch {
                chain: Chain::Ethereum,
                rpc_url: rpc_url.to_string(),
                expected,
                actual,
            });
        }

        info!(%network, chain_id = actual, "Connected to Ethereum");

        Ok(Self {
            network,
            provider,
            contracts,
        })
    }

    pub async fn connect(
        network: Network,
        rpc_url: Url,
        contracts: EvmContracts,
    ) -> Result<Self, BridgeError> {
        let display_url = rpc_url.to_string();
        let provider = ProviderBuilder::new().connect_http(rpc_url).erased();
        Self::new(network, provider, contracts, &display_url).await
    }

    pub const fn contracts(&self) -> &EvmContracts {
        &self.contracts
    }

    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, BridgeError> {
        let allowance = IERC20::new(token, &self.provider)
            .allowance(owner, spender)
            .call()
            .await?;
        trace!(%token, %owner, %spender, %allowance, "Checked allowance");
        Ok(allowance)
    }

    /// Approval call for `spender`, if the current allowance is short.
    async fn approval_if_needed(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
        amount: U256,
    ) -> Result<Option<PendingCall>, BridgeError> {
        let allowance = self.allowance(token, owner, spender).await?;
        if allowance >= amount {
            return Ok(None);
        }

        Ok(Some(PendingCall {
            description: "ERC20.approve",
            to: token,
            input: approve_calldata(spender, amount),
            value: U256::ZERO,
            gas_limit: APPROVE_GAS_LIMIT,
        }))
    }

    /// Populates `calls` with sequential pending nonces and current fees.
    async fn populate(
        &self,
        from: Address,
        calls: Vec<PendingCall>,
    ) -> Result<Vec<UnsignedTransaction>, BridgeError> {
        let chain_id = self.provider.get_chain_id().await?;
        let first_nonce = self.provider.get_transaction_count(from).pending().await?;
        let fees = self.provider.estimate_eip1559_fees().await?;

        Ok(calls
            .into_iter()
            .zip(first_nonce..)
            .map(|(call, nonce)| {
                let request = TransactionRequest::default()
                    .with_from(from)
                    .with_to(call.to)
                    .with_input(call.input)
                    .with_value(call.value)
                    .with_nonce(nonce)
                    .with_chain_id(chain_id)
                    .with_gas_limit(call.gas_limit)
                    .with_max_fee_per_gas(fees.max_fee_per_gas)
                    .with_max_priority_fee_per_gas(fees.max_priority_fee_per_gas);

                UnsignedTransaction::new(Chain::Ethereum, call.description, request)
            })
            .collect())
    }
}

fn approve_calldata(spender: Address, amount: U256) -> Bytes {
    Bytes::from(IERC20::approveCall { spender, amount }.abi_encode())
}

fn transfer_tokens_calldata(
    token: Address,
    amount: U256,
    recipient_chain: u16,
    recipient: UniversalAddress,
    payload: Option<&Bytes>,
) -> Bytes {
    let encoded = match payload {
        Some(payload) => ITokenBridge::transferTokensWithPayloadCall {
            token,
            amount,
            recipientChain: recipient_chain,
            recipient: recipient.0,
            nonce: MESSAGE_NONCE,
            payload: payload.clone(),
        }
        .abi_encode(),
        None => ITokenBridge::transferTokensCall {
            token,
            amount,
            recipientChain: recipient_chain,
            recipient: recipient.0,
            arbiterFee: U256::ZERO,
            nonce: MESSAGE_NONCE,
        }
        .abi_encode(),
    };

    Bytes::from(encoded)
}

fn deposit_for_burn_calldata(
    amount: U256,
    destination_domain: u32,
    mint_recipient: UniversalAddress,
    burn_token: Address,
    max_fee: U256,
    hook_data: Option<&Bytes>,
) -> Bytes {
    // bytes32(0) allows any address to call receiveMessage() on destination.
    let destination_caller = B256::ZERO;

    let encoded = match hook_data {
        Some(hook_data) => ITokenMessengerV2::depositForBurnWithHookCall {
            amount,
            destinationDomain: destination_domain,
            mintRecipient: mint_recipient.0,
            burnToken: burn_token,
            destinationCaller: destination_caller,
            maxFee: max_fee,
            minFinalityThreshold: FAST_TRANSFER_THRESHOLD,
            hookData: hook_data.clone(),
        }
        .abi_encode(),
        None => ITokenMessengerV2::depositForBurnCall {
            amount,
            destinationDomain: destination_domain,
            mintRecipient: mint_recipient.0,
            burnToken: burn_token,
            destinationCaller: destination_caller,
            maxFee: max_fee,
            minFinalityThreshold: FAST_TRANSFER_THRESHOLD,
        }
        .abi_encode(),
    };

    Bytes::from(encoded)
}

/// Wormhole messages published by the core bridge in `logs`.
fn message_ids_from_logs(logs: &[Log], core_bridge: Address, emitter_chain: u16) -> Vec<MessageId> {
    logs.iter()
        .filter(|log| log.address() == core_bridge)
        .filter_map(|log| IWormhole::LogMessagePublished::decode_log(log.as_ref()).ok())
        .map(|event| MessageId {
            chain: emitter_chain,
            emitter: UniversalAddress::from(event.data.sender),
            sequence: event.data.sequence,
        })
        .collect()
}

/// Message bytes of the first CCTP `MessageSent` event in `logs`.
fn circle_message_from_logs(logs: &[Log], message_transmitter: Address) -> Option<Bytes> {
    logs.iter()
        .filter(|log| log.address() == message_transmitter)
        .find_map(|log| IMessageTransmitterV2::MessageSent::decode_log(log.as_ref()).ok())
        .map(|event| event.data.message)
}

impl EvmChain {
    /// Calls making up a token bridge transfer, before nonces and fees.
    async fn token_bridge_calls(
        &self,
        request: &TransferRequest,
    ) -> Result<Vec<PendingCall>, BridgeError> {
        if request.automatic() {
            return Err(BridgeError::Unsupported {
                chain: Chain::Ethereum,
                operation: "automatic token bridge delivery",
            });
        }

        let from = request.from().as_evm()?;
        let token = request.token().address().as_evm()?;
        let recipient_chain = request.to().chain().wormhole_id(self.network);

        let message_fee = IWormhole::new(self.contracts.core_bridge, &self.provider)
            .messageFee()
            .call()
            .await?;

        let mut calls = Vec::with_capacity(2);
        if let Some(approve) = self
            .approval_if_needed(token, from, self.contracts.token_bridge, request.amount())
            .await?
        {
            calls.push(approve);
        }
        calls.push(PendingCall {
            description: "TokenBridge.transferTokens",
            to: self.contracts.token_bridge,
            input: transfer_tokens_calldata(
                token,
                request.amount(),
                recipient_chain,
                request.to().universal(),
                request.payload(),
            ),
            value: message_fee,
            gas_limit: TRANSFER_GAS_LIMIT,
        });

        info!(
            %token,
            amount = %request.amount(),
            to = %request.to(),
            transactions = calls.len(),
            "Built token bridge transfer"
        );

        Ok(calls)
    }
}

#[async_trait]
impl TokenBridge for EvmChain {
    async fn transfer(
        &self,
        request: &TransferRequest,
    ) -> Result<Vec<UnsignedTransaction>, BridgeError> {
        let from = request.from().as_evm()?;
        let calls = self.token_bridge_calls(request).await?;
        self.populate(from, calls).await
    }

    async fn wrapped_asset(&self, original: &TokenId) -> Result<TokenId, BridgeError> {
        if original.chain() == Chain::Ethereum {
            return Ok(*original);
        }

        let wrapped = ITokenBridge::new(self.contracts.token_bridge, &self.provider)
            .wrappedAsset(
                original.chain().wormhole_id(self.network),
                original.universal().0,
            )
            .call()
            .await?;

        if wrapped == Address::ZERO {
            return Err(BridgeError::NotWrapped {
                token: *original,
                chain: Chain::Ethereum,
            });
        }

        Ok(TokenId::new(ChainAddress::evm(Chain::Ethereum, wrapped)))
    }

    /// ERC20 balances live on the owner's address itself.
    fn recipient_account(
        &self,
        owner: &ChainAddress,
        _token: &TokenId,
    ) -> Result<ChainAddress, BridgeError> {
        owner.as_evm()?;
        Ok(*owner)
    }

    async fn balance(&self, token: &TokenId, owner: &ChainAddress) -> Result<U256, BridgeError> {
        let balance = IERC20::new(token.address().as_evm()?, &self.provider)
            .balanceOf(owner.as_evm()?)
            .call()
            .await?;
        Ok(balance)
    }

    async fn decimals(&self, token: &TokenId) -> Result<u8, BridgeError> {
        let decimals = IERC20::new(token.address().as_evm()?, &self.provider)
            .decimals()
            .call()
            .await?;
        Ok(decimals)
    }
}

#[async_trait]
impl CircleBridge for EvmChain {
    /// `request.to()` is the mint recipient account on the destination.
    async fn transfer(
        &self,
        request: &CircleTransferRequest,
        max_fee: U256,
    ) -> Result<Vec<UnsignedTransaction>, BridgeError> {
        let from = request.from().as_evm()?;
        let usdc = self.contracts.usdc;
        let messenger = self.contracts.token_messenger;

        info!(%max_fee, amount = %request.amount(), "Building fast CCTP burn");

        let mut calls = Vec::with_capacity(2);
        if let Some(approve) = self
            .approval_if_needed(usdc, from, messenger, request.amount())
            .await?
        {
            calls.push(approve);
        }
        calls.push(PendingCall {
            description: "TokenMessengerV2.depositForBurn",
            to: messenger,
            input: deposit_for_burn_calldata(
                request.amount(),
                request.to().chain().cctp_domain(),
                request.to().universal(),
                usdc,
                max_fee,
                request.payload(),
            ),
            value: U256::ZERO,
            gas_limit: BURN_GAS_LIMIT,
        });

        self.populate(from, calls).await
    }

    fn mint_recipient(&self, owner: &ChainAddress) -> Result<UniversalAddress, BridgeError> {
        Ok(UniversalAddress::from(owner.as_evm()?))
    }

    fn usdc(&self) -> TokenId {
        TokenId::new(ChainAddress::evm(Chain::Ethereum, self.contracts.usdc))
    }
}

#[async_trait]
impl ChainContext for EvmChain {
    fn chain(&self) -> Chain {
        Chain::Ethereum
    }

    fn token_bridge(&self) -> &dyn TokenBridge {
        self
    }

    fn circle_bridge(&self) -> Result<&dyn CircleBridge, BridgeError> {
        Ok(self)
    }

    async fn send(&self, transactions: Vec<SignedTransaction>) -> Result<Vec<TxHash>, BridgeError> {
        let mut hashes = Vec::with_capacity(transactions.len());

        for tx in transactions {
            if tx.chain != Chain::Ethereum {
                return Err(BridgeError::WrongChain {
                    expected: Chain::Ethereum,
                    actual: tx.chain,
                });
            }

            let receipt = self
                .provider
                .send_raw_transaction(&tx.raw)
                .await?
                .get_receipt()
                .await?;

            if !receipt.status() {
                return Err(BridgeError::Reverted {
                    tx_hash: receipt.transaction_hash,
                });
            }

            debug!(tx_hash = %receipt.transaction_hash, block = ?receipt.block_number, "Transaction confirmed");
            hashes.push(receipt.transaction_hash);
        }

        Ok(hashes)
    }

    async fn parse_transaction(&self, tx_hash: TxHash) -> Result<Vec<MessageId>, BridgeError> {
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await?
            .ok_or(BridgeError::ReceiptNotFound { tx_hash })?;

        let ids = message_ids_from_logs(
            receipt.inner.logs(),
            self.contracts.core_bridge,
            Chain::Ethereum.wormhole_id(self.network),
        );

        if ids.is_empty() {
            return Err(BridgeError::MessageNotFound { tx_hash });
        }

        Ok(ids)
    }

    async fn parse_circle_transaction(
        &self,
        tx_hash: TxHash,
    ) -> Result<CircleMessage, BridgeError> {
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await?
            .ok_or(BridgeError::ReceiptNotFound { tx_hash })?;

        let message =
            circle_message_from_logs(receipt.inner.logs(), self.contracts.message_transmitter)
                .ok_or(BridgeError::CircleMessageNotFound { tx_hash })?;

        Ok(CircleMessage {
            source_domain: Chain::Ethereum.cctp_domain(),
            tx: tx_hash,
            message,
        })
    }
}
