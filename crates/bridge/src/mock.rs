//! Test doubles for the connector, chain and attestation seams.
//!
//! Mocks track call counts and capture parameters for verification. Enable
//! the `mock` feature to use them from other crates' tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, FixedBytes, TxHash, U256, address};
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;
use tokio::time::Instant;

use crate::address::{ChainAddress, TokenId, UniversalAddress};
use crate::attestation::AttestationError;
use crate::cctp::{CctpError, CircleAttestation, CircleAttestationSource, CircleMessage};
use crate::chain::{Chain, Network};
use crate::client::{
    BridgeError, ChainContext, ChainMap, CircleBridge, NetworkConnector, Redeemer, TokenBridge,
};
use crate::signer::{SignedTransaction, UnsignedTransaction};
use crate::solana::associated_token_address;
use crate::transfer::{CircleTransferRequest, TransferRequest};
use crate::wormhole::{AttestationSource, MessageId, Vaa};

const SEPOLIA_CHAIN_ID: u64 = 11_155_111;
const MOCK_TOKEN_BRIDGE: Address = address!("0xDB5492265f6038831E89f495670FF909aDe94bd9");
const MOCK_TOKEN_MESSENGER: Address = address!("0x8FE6B999Dc680CcFDD5Bf7EB0974218be2542DAA");
const MOCK_USDC: Address = address!("0x1c7D4B196Cb0C7B01d743Fbc6116a902379C7238");
const MOCK_SOLANA_USDC: Pubkey = solana_sdk::pubkey!("4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU");

/// Encodes a VAA with `signatures` dummy guardian signatures.
pub fn encode_vaa(id: &MessageId, signatures: u8, payload: &[u8]) -> Vec<u8> {
    let mut bytes = vec![1u8];
    bytes.extend_from_slice(&4u32.to_be_bytes());
    bytes.push(signatures);
    for index in 0..signatures {
        bytes.push(index);
        bytes.extend_from_slice(&[0xab; 65]);
    }
    bytes.extend_from_slice(&1_700_000_000u32.to_be_bytes());
    bytes.extend_from_slice(&42u32.to_be_bytes());
    bytes.extend_from_slice(&id.chain.to_be_bytes());
    bytes.extend_from_slice(id.emitter.as_bytes());
    bytes.extend_from_slice(&id.sequence.to_be_bytes());
    bytes.push(1);
    bytes.extend_from_slice(payload);
    bytes
}

/// A parsed VAA for `id` signed by a full guardian set.
pub fn signed_vaa(id: &MessageId) -> Vaa {
    match Vaa::parse(&encode_vaa(id, 13, &[])) {
        Ok(vaa) => vaa,
        Err(err) => unreachable!("mock VAA encoding is well formed: {err}"),
    }
}

/// Builds a [`ChainMap`] from mock chains.
pub fn chain_map(chains: impl IntoIterator<Item = Arc<MockChain>>) -> ChainMap {
    chains
        .into_iter()
        .map(|chain| (chain.chain, chain as Arc<dyn ChainContext>))
        .collect()
}

/// Connector returning a fixed set of chains.
pub struct MockConnector {
    chains: ChainMap,
    delay: Duration,
    failures_left: AtomicUsize,
    connect_count: AtomicUsize,
}

impl MockConnector {
    pub fn new(chains: ChainMap) -> Self {
        Self {
            chains,
            delay: Duration::ZERO,
            failures_left: AtomicUsize::new(0),
            connect_count: AtomicUsize::new(0),
        }
    }

    /// Makes every connect take `delay`.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Makes the first `failures` connects fail.
    #[must_use]
    pub fn failing_first(self, failures: usize) -> Self {
        self.failures_left.store(failures, Ordering::SeqCst);
        self
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NetworkConnector for MockConnector {
    async fn connect(&self, _network: Network) -> Result<ChainMap, BridgeError> {
        self.connect_count.fetch_add(1, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(BridgeError::SolanaRpc {
                method: "getVersion",
                message: "mock connection refused".to_string(),
            });
        }

        Ok(self.chains.clone())
    }
}

/// In-memory chain that records what the bridge asks of it.
///
/// Ethereum mocks build fully populated EIP-1559 requests so they can be
/// signed by a real [`crate::signer::EvmSignerAdapter`].
pub struct MockChain {
    chain: Chain,
    decimals: u8,
    balance: U256,
    fail_balance: bool,
    fail_send: bool,
    unwrapped: bool,
    sequence: u64,
    transfers: Mutex<Vec<TransferRequest>>,
    circle_transfers: Mutex<Vec<(CircleTransferRequest, U256)>>,
    sent: Mutex<Vec<SignedTransaction>>,
    balance_queries: Mutex<Vec<(TokenId, ChainAddress)>>,
    parsed: Mutex<Vec<TxHash>>,
}

impl MockChain {
    pub fn new(chain: Chain) -> Self {
        Self {
            chain,
            decimals: 6,
            balance: U256::ZERO,
            fail_balance: false,
            fail_send: false,
            unwrapped: false,
            sequence: 1,
            transfers: Mutex::new(Vec::new()),
            circle_transfers: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            balance_queries: Mutex::new(Vec::new()),
            parsed: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_decimals(mut self, decimals: u8) -> Self {
        self.decimals = decimals;
        self
    }

    #[must_use]
    pub fn with_balance(mut self, balance: U256) -> Self {
        self.balance = balance;
        self
    }

    /// Makes every balance query fail.
    #[must_use]
    pub fn failing_balance(mut self) -> Self {
        self.fail_balance = true;
        self
    }

    /// Makes every broadcast fail.
    #[must_use]
    pub fn failing_send(mut self) -> Self {
        self.fail_send = true;
        self
    }

    /// Reports every foreign token as never attested on this chain.
    #[must_use]
    pub fn without_wrapped_assets(mut self) -> Self {
        self.unwrapped = true;
        self
    }

    /// Sequence number of the message published by any parsed transaction.
    #[must_use]
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Message every transaction on this chain publishes.
    pub fn message_id(&self) -> MessageId {
        MessageId {
            chain: self.chain.wormhole_id(Network::Testnet),
            emitter: UniversalAddress::from(MOCK_TOKEN_BRIDGE),
            sequence: self.sequence,
        }
    }

    pub fn transfer_requests(&self) -> Vec<TransferRequest> {
        self.transfers.lock().unwrap().clone()
    }

    pub fn circle_transfer_requests(&self) -> Vec<(CircleTransferRequest, U256)> {
        self.circle_transfers.lock().unwrap().clone()
    }

    pub fn sent_transactions(&self) -> Vec<SignedTransaction> {
        self.sent.lock().unwrap().clone()
    }

    pub fn balance_queries(&self) -> Vec<(TokenId, ChainAddress)> {
        self.balance_queries.lock().unwrap().clone()
    }

    pub fn parsed_transactions(&self) -> Vec<TxHash> {
        self.parsed.lock().unwrap().clone()
    }

    fn filled_request(from: Address, to: Address, nonce: u64) -> TransactionRequest {
        TransactionRequest::default()
            .with_from(from)
            .with_to(to)
            .with_input(Bytes::from_static(&[0x09, 0x5e, 0xa7, 0xb3]))
            .with_value(U256::ZERO)
            .with_nonce(nonce)
            .with_chain_id(SEPOLIA_CHAIN_ID)
            .with_gas_limit(300_000)
            .with_max_fee_per_gas(30_000_000_000)
            .with_max_priority_fee_per_gas(1_000_000_000)
    }

    fn evm_batch(
        &self,
        from: &ChainAddress,
        target: Address,
        label: &str,
    ) -> Result<Vec<UnsignedTransaction>, BridgeError> {
        if !self.chain.is_evm() {
            return Err(BridgeError::Unsupported {
                chain: self.chain,
                operation: "outbound transfer",
            });
        }

        let from = from.as_evm()?;
        Ok(vec![
            UnsignedTransaction::new(
                self.chain,
                "ERC20.approve",
                Self::filled_request(from, MOCK_USDC, 0),
            ),
            UnsignedTransaction::new(self.chain, label, Self::filled_request(from, target, 1)),
        ])
    }
}

#[async_trait]
impl TokenBridge for MockChain {
    async fn transfer(
        &self,
        request: &TransferRequest,
    ) -> Result<Vec<UnsignedTransaction>, BridgeError> {
        self.transfers.lock().unwrap().push(request.clone());
        self.evm_batch(
            request.from(),
            MOCK_TOKEN_BRIDGE,
            "TokenBridge.transferTokens",
        )
    }

    async fn wrapped_asset(&self, original: &TokenId) -> Result<TokenId, BridgeError> {
        if self.unwrapped {
            return Err(BridgeError::NotWrapped {
                token: *original,
                chain: self.chain,
            });
        }

        let bytes = *original.universal().as_bytes();
        let address = match self.chain {
            Chain::Solana => ChainAddress::solana(Pubkey::new_from_array(bytes)),
            Chain::Ethereum => ChainAddress::evm(self.chain, Address::from_slice(&bytes[12..])),
        };
        Ok(TokenId::new(address))
    }

    fn recipient_account(
        &self,
        owner: &ChainAddress,
        token: &TokenId,
    ) -> Result<ChainAddress, BridgeError> {
        match self.chain {
            Chain::Solana => Ok(ChainAddress::solana(associated_token_address(
                &owner.as_solana()?,
                &token.address().as_solana()?,
            ))),
            Chain::Ethereum => Ok(*owner),
        }
    }

    async fn balance(&self, token: &TokenId, owner: &ChainAddress) -> Result<U256, BridgeError> {
        self.balance_queries.lock().unwrap().push((*token, *owner));

        if self.fail_balance {
            return Err(BridgeError::SolanaRpc {
                method: "getTokenAccountBalance",
                message: "mock balance failure".to_string(),
            });
        }

        Ok(self.balance)
    }

    async fn decimals(&self, _token: &TokenId) -> Result<u8, BridgeError> {
        Ok(self.decimals)
    }
}

#[async_trait]
impl CircleBridge for MockChain {
    async fn transfer(
        &self,
        request: &CircleTransferRequest,
        max_fee: U256,
    ) -> Result<Vec<UnsignedTransaction>, BridgeError> {
        self.circle_transfers
            .lock()
            .unwrap()
            .push((request.clone(), max_fee));
        self.evm_batch(
            request.from(),
            MOCK_TOKEN_MESSENGER,
            "TokenMessengerV2.depositForBurn",
        )
    }

    fn mint_recipient(&self, owner: &ChainAddress) -> Result<UniversalAddress, BridgeError> {
        Ok(owner.universal())
    }

    fn usdc(&self) -> TokenId {
        match self.chain {
            Chain::Ethereum => TokenId::new(ChainAddress::evm(self.chain, MOCK_USDC)),
            Chain::Solana => TokenId::new(ChainAddress::solana(MOCK_SOLANA_USDC)),
        }
    }
}

#[async_trait]
impl ChainContext for MockChain {
    fn chain(&self) -> Chain {
        self.chain
    }

    fn token_bridge(&self) -> &dyn TokenBridge {
        self
    }

    fn circle_bridge(&self) -> Result<&dyn CircleBridge, BridgeError> {
        Ok(self)
    }

    async fn send(&self, transactions: Vec<SignedTransaction>) -> Result<Vec<TxHash>, BridgeError> {
        if self.fail_send {
            return Err(BridgeError::Reverted {
                tx_hash: transactions.first().map(|tx| tx.hash).unwrap_or_default(),
            });
        }

        let mut sent = self.sent.lock().unwrap();
        let mut hashes = Vec::with_capacity(transactions.len());
        for tx in transactions {
            if tx.chain != self.chain {
                return Err(BridgeError::WrongChain {
                    expected: self.chain,
                    actual: tx.chain,
                });
            }
            hashes.push(tx.hash);
            sent.push(tx);
        }

        Ok(hashes)
    }

    async fn parse_transaction(&self, tx_hash: TxHash) -> Result<Vec<MessageId>, BridgeError> {
        self.parsed.lock().unwrap().push(tx_hash);
        Ok(vec![self.message_id()])
    }

    async fn parse_circle_transaction(
        &self,
        tx_hash: TxHash,
    ) -> Result<CircleMessage, BridgeError> {
        self.parsed.lock().unwrap().push(tx_hash);
        Ok(CircleMessage {
            source_domain: self.chain.cctp_domain(),
            tx: tx_hash,
            message: Bytes::new(),
        })
    }
}

/// Yields an attestation once `delay` has passed since the first fetch.
struct DelayedArrival<T> {
    value: Option<T>,
    delay: Duration,
    first_fetch: Mutex<Option<Instant>>,
    fetch_count: AtomicUsize,
}

impl<T: Clone> DelayedArrival<T> {
    fn new(value: Option<T>, delay: Duration) -> Self {
        Self {
            value,
            delay,
            first_fetch: Mutex::new(None),
            fetch_count: AtomicUsize::new(0),
        }
    }

    fn poll(&self) -> Option<T> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        let started = *self
            .first_fetch
            .lock()
            .unwrap()
            .get_or_insert_with(Instant::now);

        if started.elapsed() >= self.delay {
            self.value.clone()
        } else {
            None
        }
    }

    fn fetches(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }
}

/// Guardian API whose VAA becomes available after a delay, or never.
pub struct MockAttestationSource {
    arrival: DelayedArrival<Vaa>,
}

impl MockAttestationSource {
    pub fn arriving_after(vaa: Vaa, delay: Duration) -> Self {
        Self {
            arrival: DelayedArrival::new(Some(vaa), delay),
        }
    }

    pub fn never() -> Self {
        Self {
            arrival: DelayedArrival::new(None, Duration::ZERO),
        }
    }

    pub fn fetch_calls(&self) -> usize {
        self.arrival.fetches()
    }
}

#[async_trait]
impl AttestationSource for MockAttestationSource {
    async fn fetch_vaa(&self, _id: &MessageId) -> Result<Option<Vaa>, AttestationError> {
        Ok(self.arrival.poll())
    }
}

/// Circle API with a fixed fast-transfer fee.
pub struct MockCircleAttestationSource {
    fee_bps: u64,
    arrival: DelayedArrival<CircleAttestation>,
    fee_count: AtomicUsize,
}

impl MockCircleAttestationSource {
    pub fn arriving_after(fee_bps: u64, delay: Duration) -> Self {
        let mut message = vec![0u8; 12];
        message.extend_from_slice(&[0x07; 32]);
        let attestation = CircleAttestation {
            message: Bytes::from(message),
            attestation: Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef]),
            nonce: FixedBytes::repeat_byte(0x07),
        };

        Self {
            fee_bps,
            arrival: DelayedArrival::new(Some(attestation), delay),
            fee_count: AtomicUsize::new(0),
        }
    }

    pub fn never(fee_bps: u64) -> Self {
        Self {
            fee_bps,
            arrival: DelayedArrival::new(None, Duration::ZERO),
            fee_count: AtomicUsize::new(0),
        }
    }

    pub fn fee_calls(&self) -> usize {
        self.fee_count.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.arrival.fetches()
    }
}

#[async_trait]
impl CircleAttestationSource for MockCircleAttestationSource {
    async fn fast_transfer_fee_bps(
        &self,
        _source_chain: Chain,
        _destination_chain: Chain,
    ) -> Result<u64, CctpError> {
        self.fee_count.fetch_add(1, Ordering::SeqCst);
        Ok(self.fee_bps)
    }

    async fn fetch_attestation(
        &self,
        _message: &CircleMessage,
    ) -> Result<Option<CircleAttestation>, AttestationError> {
        Ok(self.arrival.poll())
    }
}

/// Destination-side submitter that records what it was asked to complete.
pub struct MockRedeemer {
    fail: bool,
    redeemed: Mutex<Vec<Vaa>>,
    received: Mutex<Vec<CircleAttestation>>,
}

impl MockRedeemer {
    pub fn new() -> Self {
        Self {
            fail: false,
            redeemed: Mutex::new(Vec::new()),
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn redeem_calls(&self) -> usize {
        self.redeemed.lock().unwrap().len()
    }

    pub fn receive_calls(&self) -> usize {
        self.received.lock().unwrap().len()
    }

    fn outcome(&self, count: usize) -> Result<String, BridgeError> {
        if self.fail {
            return Err(BridgeError::Unsupported {
                chain: Chain::Solana,
                operation: "mock redeem",
            });
        }

        Ok(format!("mock-redeem-{count}"))
    }
}

impl Default for MockRedeemer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Redeemer for MockRedeemer {
    async fn redeem(&self, vaa: &Vaa) -> Result<String, BridgeError> {
        let count = {
            let mut redeemed = self.redeemed.lock().unwrap();
            redeemed.push(vaa.clone());
            redeemed.len()
        };
        self.outcome(count)
    }

    async fn receive_message(
        &self,
        attestation: &CircleAttestation,
    ) -> Result<String, BridgeError> {
        let count = {
            let mut received = self.received.lock().unwrap();
            received.push(attestation.clone());
            received.len()
        };
        self.outcome(count)
    }
}
