//! Circle CCTP V2 attestation and fee service.
//!
//! Circle's Cross-Chain Transfer Protocol moves native USDC by burning it on
//! the source chain and minting it on the destination. The three steps are:
//!
//! 1. **Burn**: `TokenMessengerV2.depositForBurn()` on Ethereum
//! 2. **Attest**: poll Circle's Iris API for the signed message
//! 3. **Mint**: `receiveMessage` on the destination (Solana here), which
//!    needs a destination-side signer
//!
//! Fast transfers are requested by setting `minFinalityThreshold` to 1000;
//! the fee is queried from `/v2/burn/USDC/fees/{source}/{dest}` before each
//! burn.

use std::mem::size_of;

use alloy::primitives::{Bytes, FixedBytes, TxHash, U256};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::attestation::{AttestationError, AttestationPolicy, poll_attestation};
use crate::chain::{Chain, Network};

const IRIS_MAINNET: &str = "https://iris-api.circle.com";
const IRIS_TESTNET: &str = "https://iris-api-sandbox.circle.com";

/// Minimum finality threshold for CCTP V2 fast transfer.
pub const FAST_TRANSFER_THRESHOLD: u32 = 1000;

const BASIS_POINTS: u64 = 10_000;

pub fn default_iris_url(network: Network) -> &'static str {
    match network {
        Network::Mainnet => IRIS_MAINNET,
        Network::Testnet => IRIS_TESTNET,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CctpError {
    #[error("Attestation error: {0}")]
    Attestation(#[from] AttestationError),
    #[error("Fast transfer fee not available for {source_chain} -> {destination_chain}")]
    FastTransferFeeNotAvailable {
        source_chain: Chain,
        destination_chain: Chain,
    },
    #[error("Fee calculation overflow")]
    FeeCalculationOverflow,
    #[error("Message too short for nonce extraction: got {length} bytes, need at least 44")]
    MessageTooShort { length: usize },
}

/// Burn-side message emitted by `MessageTransmitterV2.MessageSent`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircleMessage {
    pub source_domain: u32,
    pub tx: TxHash,
    /// Message bytes from the event. The nonce inside is a placeholder in
    /// V2; the attested message carries the real one.
    pub message: Bytes,
}

/// Signed CCTP message returned by the Iris API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircleAttestation {
    pub message: Bytes,
    pub attestation: Bytes,
    pub nonce: FixedBytes<32>,
}

// CCTP V2 message layout:
// - Bytes 0-3: version
// - Bytes 4-7: source domain
// - Bytes 8-11: destination domain
// - Bytes 12-43: nonce
// - Bytes 44+: remaining message data
const NONCE_INDEX: usize = 12;
const NONCE_SIZE: usize = size_of::<FixedBytes<32>>();
const MIN_MESSAGE_LENGTH: usize = NONCE_INDEX + NONCE_SIZE;

fn extract_nonce_from_message(message: &[u8]) -> Result<FixedBytes<32>, CctpError> {
    if message.len() < MIN_MESSAGE_LENGTH {
        return Err(CctpError::MessageTooShort {
            length: message.len(),
        });
    }

    Ok(FixedBytes::<32>::from_slice(
        &message[NONCE_INDEX..MIN_MESSAGE_LENGTH],
    ))
}

/// Circle's fee and attestation endpoints.
#[async_trait]
pub trait CircleAttestationSource: Send + Sync {
    /// Fast-transfer fee in basis points for the route.
    async fn fast_transfer_fee_bps(
        &self,
        source_chain: Chain,
        destination_chain: Chain,
    ) -> Result<u64, CctpError>;

    /// Returns `Ok(None)` while Circle has not attested the burn.
    async fn fetch_attestation(
        &self,
        message: &CircleMessage,
    ) -> Result<Option<CircleAttestation>, AttestationError>;
}

/// Upper bound on the fee for `amount` at `fee_bps`.
pub fn max_fee(amount: U256, fee_bps: u64) -> Result<U256, CctpError> {
    Ok(amount
        .checked_mul(U256::from(fee_bps))
        .ok_or(CctpError::FeeCalculationOverflow)?
        / U256::from(BASIS_POINTS))
}

/// Waits for Circle to attest `message`, bounded by `policy.timeout`.
pub async fn wait_for_circle_attestation(
    source: &dyn CircleAttestationSource,
    message: &CircleMessage,
    policy: &AttestationPolicy,
) -> Result<CircleAttestation, AttestationError> {
    info!(tx = %message.tx, domain = message.source_domain, "Waiting for Circle attestation");
    poll_attestation(policy, || source.fetch_attestation(message)).await
}

/// Fee entry from Circle's `/v2/burn/USDC/fees/{source}/{dest}` API.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct FeeEntry {
    /// 1000 = fast transfer, 2000 = standard transfer
    finality_threshold: u32,
    /// Minimum fee in basis points
    minimum_fee: u64,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct MessageEntry {
    attestation: Option<String>,
    message: Option<String>,
    status: String,
}

#[derive(Deserialize, Debug)]
struct MessagesResponse {
    messages: Vec<MessageEntry>,
}

/// Iris API client.
#[derive(Debug, Clone)]
pub struct IrisClient {
    http_client: reqwest::Client,
    base_url: Url,
}

impl IrisClient {
    pub const fn new(http_client: reqwest::Client, base_url: Url) -> Self {
        Self {
            http_client,
            base_url,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.as_str().trim_end_matches('/'))
    }
}

#[async_trait]
impl CircleAttestationSource for IrisClient {
    async fn fast_transfer_fee_bps(
        &self,
        source_chain: Chain,
        destination_chain: Chain,
    ) -> Result<u64, CctpError> {
        let url = self.endpoint(&format!(
            "/v2/burn/USDC/fees/{}/{}",
            source_chain.cctp_domain(),
            destination_chain.cctp_domain()
        ));
        let unavailable = || CctpError::FastTransferFeeNotAvailable {
            source_chain,
            destination_chain,
        };

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(AttestationError::from)?;

        if !response.status().is_success() {
            warn!(
                url,
                status = response.status().as_u16(),
                "Fee endpoint failed"
            );
            return Err(unavailable());
        }

        let body = response.bytes().await.map_err(AttestationError::from)?;
        let fee_entries: Vec<FeeEntry> =
            serde_json::from_slice(&body).map_err(AttestationError::from)?;

        let fast_fee = fee_entries
            .iter()
            .find(|entry| entry.finality_threshold == FAST_TRANSFER_THRESHOLD)
            .ok_or_else(unavailable)?
            .minimum_fee;

        debug!(%source_chain, %destination_chain, fast_fee_bps = fast_fee, "Retrieved fast transfer fee");

        Ok(fast_fee)
    }

    async fn fetch_attestation(
        &self,
        message: &CircleMessage,
    ) -> Result<Option<CircleAttestation>, AttestationError> {
        let url = self.endpoint(&format!(
            "/v2/messages/{}?transactionHash={}",
            message.source_domain, message.tx
        ));

        let response = self.http_client.get(&url).send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !status.is_success() {
            return Err(AttestationError::UnexpectedStatus {
                status: status.as_u16(),
            });
        }

        let body: MessagesResponse = serde_json::from_slice(&response.bytes().await?)?;

        let Some(entry) = body.messages.first() else {
            return Ok(None);
        };

        if entry.status != "complete" {
            return Err(AttestationError::Pending {
                status: entry.status.clone(),
            });
        }

        let attestation_hex = entry
            .attestation
            .as_ref()
            .ok_or(AttestationError::MissingField {
                field: "attestation",
            })?;
        let message_hex = entry
            .message
            .as_ref()
            .ok_or(AttestationError::MissingField { field: "message" })?;

        let message = Bytes::from(alloy::hex::decode(message_hex)?);
        let attestation = Bytes::from(alloy::hex::decode(attestation_hex)?);
        let nonce =
            extract_nonce_from_message(&message).map_err(|err| AttestationError::Malformed {
                reason: err.to_string(),
            })?;

        Ok(Some(CircleAttestation {
            message,
            attestation,
            nonce,
        }))
    }
}
