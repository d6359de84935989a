//! Cross-chain skin purchase orchestration.
//!
//! A purchase moves the skin price from the payer's Ethereum wallet to the
//! payer's Solana address and walks through these stages:
//!
//! ```text
//! Idle -> TransferInitiated -> AttestationPending -> AttestationReceived
//!      -> (RedeemSubmitted) -> BalanceVerified
//! ```
//!
//! Any error before settlement moves the purchase to `Failed`. Nothing is
//! retried or rolled back once the source transfer has been submitted;
//! funds in flight stay claimable with the published message.

use std::fmt;
use std::sync::Arc;

use alloy::primitives::{FixedBytes, TxHash, U256};
use tracing::{error, info, instrument, warn};

use skinshop_bridge::attestation::{AttestationError, AttestationPolicy};
use skinshop_bridge::cctp::{self, CctpError, CircleAttestationSource, wait_for_circle_attestation};
use skinshop_bridge::client::{BridgeClient, BridgeError, ChainContext, Redeemer};
use skinshop_bridge::signer::{SignOnlySigner, SignerError, UnsignedTransaction};
use skinshop_bridge::wormhole::{AttestationSource, MessageId, wait_for_vaa};
use skinshop_bridge::{
    AddressError, Chain, ChainAddress, CircleTransferRequest, TokenId, TransferError,
    TransferQuote, TransferRequest,
};

/// Stage a purchase has reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseState {
    Idle,
    TransferInitiated,
    AttestationPending,
    AttestationReceived,
    RedeemSubmitted,
    BalanceVerified,
    Failed,
}

impl fmt::Display for PurchaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::TransferInitiated => "transfer initiated",
            Self::AttestationPending => "attestation pending",
            Self::AttestationReceived => "attestation received",
            Self::RedeemSubmitted => "redeem submitted",
            Self::BalanceVerified => "balance verified",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// How the payment travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    TokenBridge,
    Circle,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TokenBridge => f.write_str("token bridge"),
            Self::Circle => f.write_str("circle transfer"),
        }
    }
}

/// Result reported to the storefront.
///
/// `SettlementIncomplete` means the source transfer is final and attested
/// but nothing was redeemed on Solana yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseOutcome {
    Settled,
    SettlementIncomplete,
    Failed,
}

impl PurchaseOutcome {
    /// Whether the payment left the payer's wallet and was attested.
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Settled | Self::SettlementIncomplete)
    }

    pub const fn is_settled(self) -> bool {
        matches!(self, Self::Settled)
    }
}

/// Which step a purchase failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseErrorKind {
    AddressResolution,
    TransferSubmission,
    AttestationTimeout,
    Redeem,
    BalanceQuery,
    Bridge,
}

#[derive(Debug, thiserror::Error)]
pub enum PurchaseError {
    #[error("failed to resolve address: {0}")]
    AddressResolution(#[from] AddressError),
    #[error("no token account can receive {token} on Solana: {source}")]
    RecipientAccount {
        token: TokenId,
        #[source]
        source: BridgeError,
    },
    #[error("signer {signer} cannot pay for {payer}")]
    SignerMismatch {
        signer: ChainAddress,
        payer: ChainAddress,
    },
    #[error("invalid transfer: {0}")]
    InvalidTransfer(#[from] TransferError),
    #[error("signing failed: {0}")]
    Signing(#[from] SignerError),
    #[error("transfer submission failed: {0}")]
    Submission(#[source] BridgeError),
    #[error("source transaction {tx_hash} published no bridge message")]
    NoMessage { tx_hash: TxHash },
    #[error("nothing was submitted")]
    NothingSubmitted,
    #[error("fast transfer fee unavailable: {0}")]
    Fee(#[from] CctpError),
    #[error("attestation not received: {0}")]
    Attestation(#[from] AttestationError),
    #[error("redeem failed: {0}")]
    Redeem(#[source] BridgeError),
    #[error("balance query failed: {0}")]
    BalanceQuery(#[source] BridgeError),
    #[error("bridge unavailable: {0}")]
    Bridge(#[source] BridgeError),
}

impl PurchaseError {
    pub const fn kind(&self) -> PurchaseErrorKind {
        match self {
            Self::AddressResolution(_)
            | Self::RecipientAccount { .. }
            | Self::SignerMismatch { .. } => {
                PurchaseErrorKind::AddressResolution
            }
            Self::InvalidTransfer(_)
            | Self::Signing(_)
            | Self::Submission(_)
            | Self::NoMessage { .. }
            | Self::NothingSubmitted
            | Self::Fee(_) => PurchaseErrorKind::TransferSubmission,
            Self::Attestation(_) => PurchaseErrorKind::AttestationTimeout,
            Self::Redeem(_) => PurchaseErrorKind::Redeem,
            Self::BalanceQuery(_) => PurchaseErrorKind::BalanceQuery,
            Self::Bridge(_) => PurchaseErrorKind::Bridge,
        }
    }
}

/// Identifier of the attested cross-chain message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRef {
    Wormhole(MessageId),
    Circle { nonce: FixedBytes<32> },
}

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wormhole(id) => write!(f, "wormhole:{id}"),
            Self::Circle { nonce } => write!(f, "cctp:{nonce}"),
        }
    }
}

/// Everything learned while executing one purchase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseReceipt {
    pub route: Route,
    pub quote: TransferQuote,
    pub source_txs: Vec<TxHash>,
    pub message: MessageRef,
    pub attestation_len: usize,
    pub redeem_tx: Option<String>,
    pub destination_balance: Option<U256>,
    pub state: PurchaseState,
}

impl PurchaseReceipt {
    pub const fn outcome(&self) -> PurchaseOutcome {
        if self.redeem_tx.is_some() {
            PurchaseOutcome::Settled
        } else {
            PurchaseOutcome::SettlementIncomplete
        }
    }
}

/// Tracks and logs stage transitions of one purchase.
struct Progress {
    route: Route,
    state: PurchaseState,
}

impl Progress {
    fn start(route: Route) -> Self {
        info!(%route, state = %PurchaseState::Idle, "Purchase started");
        Self {
            route,
            state: PurchaseState::Idle,
        }
    }

    fn enter(&mut self, next: PurchaseState) {
        info!(route = %self.route, from = %self.state, to = %next, "Purchase stage changed");
        self.state = next;
    }
}

/// Runs purchases against a shared [`BridgeClient`].
pub struct PurchaseOrchestrator {
    client: Arc<BridgeClient>,
    attestations: Arc<dyn AttestationSource>,
    circle: Arc<dyn CircleAttestationSource>,
    redeemer: Option<Arc<dyn Redeemer>>,
    policy: AttestationPolicy,
}

impl fmt::Debug for PurchaseOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PurchaseOrchestrator")
            .field("client", &self.client)
            .field("redeemer", &self.redeemer.is_some())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl PurchaseOrchestrator {
    pub fn new(
        client: Arc<BridgeClient>,
        attestations: Arc<dyn AttestationSource>,
        circle: Arc<dyn CircleAttestationSource>,
        policy: AttestationPolicy,
    ) -> Self {
        Self {
            client,
            attestations,
            circle,
            redeemer: None,
            policy,
        }
    }

    /// Completes transfers on Solana once attested.
    #[must_use]
    pub fn with_redeemer(mut self, redeemer: Arc<dyn Redeemer>) -> Self {
        self.redeemer = Some(redeemer);
        self
    }

    /// Pays `price` smallest units of `token_address` through the token
    /// bridge. Failures are logged with their kind and collapsed into
    /// [`PurchaseOutcome::Failed`].
    pub async fn purchase_skin_with_cross_chain_payment(
        &self,
        price: U256,
        payer_eth: &str,
        payer_sol: &str,
        signer: &dyn SignOnlySigner,
        token_address: &str,
    ) -> PurchaseOutcome {
        let result = self
            .try_purchase_skin_with_cross_chain_payment(
                price,
                payer_eth,
                payer_sol,
                signer,
                token_address,
            )
            .await;
        Self::report(Route::TokenBridge, result)
    }

    /// Pays `price` smallest units of native USDC through a Circle fast
    /// transfer.
    pub async fn purchase_skin_with_cctp(
        &self,
        price: U256,
        payer_eth: &str,
        payer_sol: &str,
        signer: &dyn SignOnlySigner,
    ) -> PurchaseOutcome {
        let result = self
            .try_purchase_skin_with_cctp(price, payer_eth, payer_sol, signer)
            .await;
        Self::report(Route::Circle, result)
    }

    fn report(route: Route, result: Result<PurchaseReceipt, PurchaseError>) -> PurchaseOutcome {
        match result {
            Ok(receipt) => {
                let outcome = receipt.outcome();
                info!(
                    %route,
                    ?outcome,
                    message = %receipt.message,
                    state = %receipt.state,
                    "Purchase complete"
                );
                outcome
            }
            Err(err) => {
                error!(
                    %route,
                    kind = ?err.kind(),
                    state = %PurchaseState::Failed,
                    "Purchase failed: {err}"
                );
                PurchaseOutcome::Failed
            }
        }
    }

    #[instrument(skip_all, fields(%price, payer = payer_eth, recipient = payer_sol))]
    pub async fn try_purchase_skin_with_cross_chain_payment(
        &self,
        price: U256,
        payer_eth: &str,
        payer_sol: &str,
        signer: &dyn SignOnlySigner,
        token_address: &str,
    ) -> Result<PurchaseReceipt, PurchaseError> {
        let mut progress = Progress::start(Route::TokenBridge);

        let (payer, recipient) = resolve_parties(payer_eth, payer_sol, signer)?;
        let token = TokenId::parse(Chain::Ethereum, token_address)?;

        let source = self.chain(Chain::Ethereum).await?;
        let destination = self.chain(Chain::Solana).await?;

        let (wrapped, recipient_account) =
            resolve_recipient_account(destination.as_ref(), &token, &recipient).await?;
        info!(%wrapped, %recipient_account, "Resolved destination token account");

        let request = TransferRequest::new(token, price, payer, recipient_account, false)?;

        let decimals = source
            .token_bridge()
            .decimals(&token)
            .await
            .map_err(PurchaseError::Submission)?;
        let quote = TransferQuote::token_bridge(price, decimals)?;
        info!(
            %token,
            decimals,
            source_amount = %quote.source_amount,
            destination_amount = %quote.destination_amount,
            relay_fee = %quote.relay_fee,
            "Quoted token bridge transfer"
        );

        let unsigned = source
            .token_bridge()
            .transfer(&request)
            .await
            .map_err(PurchaseError::Submission)?;
        let source_txs = submit(source.as_ref(), signer, unsigned).await?;
        progress.enter(PurchaseState::TransferInitiated);

        let last_tx = *source_txs.last().ok_or(PurchaseError::NothingSubmitted)?;
        let message_id = source
            .parse_transaction(last_tx)
            .await
            .map_err(PurchaseError::Submission)?
            .into_iter()
            .next()
            .ok_or(PurchaseError::NoMessage { tx_hash: last_tx })?;

        progress.enter(PurchaseState::AttestationPending);
        let vaa = wait_for_vaa(self.attestations.as_ref(), &message_id, &self.policy).await?;
        progress.enter(PurchaseState::AttestationReceived);
        info!(message = %message_id, signatures = vaa.signature_count, "VAA received");

        let redeem_tx = match &self.redeemer {
            Some(redeemer) => {
                let tx = redeemer.redeem(&vaa).await.map_err(PurchaseError::Redeem)?;
                progress.enter(PurchaseState::RedeemSubmitted);
                Some(tx)
            }
            None => {
                warn!(message = %message_id, "No redeemer configured, transfer awaits redemption on Solana");
                None
            }
        };

        let destination_balance =
            match destination
                .token_bridge()
                .balance(&wrapped, &recipient)
                .await
                .map_err(PurchaseError::BalanceQuery)
            {
                Ok(balance) => {
                    progress.enter(PurchaseState::BalanceVerified);
                    info!(%recipient, %balance, "Destination balance");
                    Some(balance)
                }
                Err(err) => {
                    warn!(kind = ?err.kind(), %recipient, "Could not verify destination balance: {err}");
                    None
                }
            };

        Ok(PurchaseReceipt {
            route: Route::TokenBridge,
            quote,
            source_txs,
            message: MessageRef::Wormhole(message_id),
            attestation_len: vaa.raw.len(),
            redeem_tx,
            destination_balance,
            state: progress.state,
        })
    }

    #[instrument(skip_all, fields(%price, payer = payer_eth, recipient = payer_sol))]
    pub async fn try_purchase_skin_with_cctp(
        &self,
        price: U256,
        payer_eth: &str,
        payer_sol: &str,
        signer: &dyn SignOnlySigner,
    ) -> Result<PurchaseReceipt, PurchaseError> {
        let mut progress = Progress::start(Route::Circle);

        let (payer, recipient) = resolve_parties(payer_eth, payer_sol, signer)?;

        let source = self.chain(Chain::Ethereum).await?;
        let destination = self.chain(Chain::Solana).await?;
        let source_circle = source.circle_bridge().map_err(PurchaseError::Bridge)?;
        let destination_circle = destination.circle_bridge().map_err(PurchaseError::Bridge)?;

        let mint_account = destination_circle
            .mint_recipient(&recipient)
            .map_err(PurchaseError::Bridge)?;
        let mint_recipient = ChainAddress::solana(mint_account.to_solana());
        let request = CircleTransferRequest::new(price, payer, mint_recipient, false)?;

        let fee_bps = self
            .circle
            .fast_transfer_fee_bps(Chain::Ethereum, Chain::Solana)
            .await?;
        let max_fee = cctp::max_fee(price, fee_bps)?;
        let quote = TransferQuote::circle(price, max_fee);
        info!(
            fee_bps,
            %max_fee,
            destination_amount = %quote.destination_amount,
            %mint_recipient,
            "Quoted circle transfer"
        );

        let unsigned = source_circle
            .transfer(&request, max_fee)
            .await
            .map_err(PurchaseError::Submission)?;
        let source_txs = submit(source.as_ref(), signer, unsigned).await?;
        progress.enter(PurchaseState::TransferInitiated);

        let last_tx = *source_txs.last().ok_or(PurchaseError::NothingSubmitted)?;
        let message = source
            .parse_circle_transaction(last_tx)
            .await
            .map_err(PurchaseError::Submission)?;

        progress.enter(PurchaseState::AttestationPending);
        let attestation =
            wait_for_circle_attestation(self.circle.as_ref(), &message, &self.policy).await?;
        progress.enter(PurchaseState::AttestationReceived);

        let redeem_tx = match &self.redeemer {
            Some(redeemer) => {
                let tx = redeemer
                    .receive_message(&attestation)
                    .await
                    .map_err(PurchaseError::Redeem)?;
                progress.enter(PurchaseState::RedeemSubmitted);
                Some(tx)
            }
            None => {
                warn!(nonce = %attestation.nonce, "No redeemer configured, USDC awaits minting on Solana");
                None
            }
        };

        Ok(PurchaseReceipt {
            route: Route::Circle,
            quote,
            source_txs,
            message: MessageRef::Circle {
                nonce: attestation.nonce,
            },
            attestation_len: attestation.attestation.len(),
            redeem_tx,
            destination_balance: None,
            state: progress.state,
        })
    }

    async fn chain(&self, chain: Chain) -> Result<Arc<dyn ChainContext>, PurchaseError> {
        self.client
            .get_chain_context(chain)
            .await
            .map_err(PurchaseError::Bridge)
    }
}

/// Parses both parties and checks the signer pays from the payer account.
fn resolve_parties(
    payer_eth: &str,
    payer_sol: &str,
    signer: &dyn SignOnlySigner,
) -> Result<(ChainAddress, ChainAddress), PurchaseError> {
    let payer = ChainAddress::parse(Chain::Ethereum, payer_eth)?;
    let recipient = ChainAddress::parse(Chain::Solana, payer_sol)?;

    let signer_address = signer.address();
    if signer.chain() != Chain::Ethereum || signer_address != payer {
        return Err(PurchaseError::SignerMismatch {
            signer: signer_address,
            payer,
        });
    }

    Ok((payer, recipient))
}

/// Signs the whole batch before broadcasting any of it.
async fn submit(
    source: &dyn ChainContext,
    signer: &dyn SignOnlySigner,
    unsigned: Vec<UnsignedTransaction>,
) -> Result<Vec<TxHash>, PurchaseError> {
    if unsigned.is_empty() {
        return Err(PurchaseError::NothingSubmitted);
    }

    let descriptions: Vec<String> = unsigned.iter().map(|tx| tx.description.clone()).collect();
    let signed = signer.sign(unsigned).await?;
    let hashes = source.send(signed).await.map_err(PurchaseError::Submission)?;

    info!(?descriptions, ?hashes, "Source transfer submitted");
    Ok(hashes)
}

/// Wrapped mint of `token` on the destination and the account of `owner`
/// the bridge credits with it. A token nobody has attested to the
/// destination yet has no such account.
async fn resolve_recipient_account(
    destination: &dyn ChainContext,
    token: &TokenId,
    owner: &ChainAddress,
) -> Result<(TokenId, ChainAddress), PurchaseError> {
    let no_account = |source| PurchaseError::RecipientAccount {
        token: *token,
        source,
    };

    let bridge = destination.token_bridge();
    let wrapped = bridge.wrapped_asset(token).await.map_err(no_account)?;
    let account = bridge
        .recipient_account(owner, &wrapped)
        .map_err(no_account)?;

    Ok((wrapped, account))
}
