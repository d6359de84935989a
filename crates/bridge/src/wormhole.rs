//! Wormhole messages, VAAs, and the guardian attestation API.
//!
//! A token bridge transfer publishes a message from the token bridge
//! contract on the source chain. The guardian network observes it and
//! signs a VAA (verified action approval), which is the attestation the
//! destination chain needs before it honors a redemption.

use std::fmt;

use alloy::primitives::{B256, U256};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use crate::address::UniversalAddress;
use crate::attestation::{AttestationError, AttestationPolicy, poll_attestation};
use crate::chain::Network;

const WORMHOLESCAN_MAINNET: &str = "https://api.wormholescan.io";
const WORMHOLESCAN_TESTNET: &str = "https://api.testnet.wormholescan.io";

pub fn default_wormholescan_url(network: Network) -> &'static str {
    match network {
        Network::Mainnet => WORMHOLESCAN_MAINNET,
        Network::Testnet => WORMHOLESCAN_TESTNET,
    }
}

/// Handle to a message published on the source chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId {
    /// Wormhole chain id of the emitting chain.
    pub chain: u16,
    pub emitter: UniversalAddress,
    pub sequence: u64,
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.chain,
            alloy::hex::encode(self.emitter.as_bytes()),
            self.sequence
        )
    }
}

// VAA layout:
// header: version(1) guardian_set_index(4) signature_count(1) signatures(66 each)
// body:   timestamp(4) nonce(4) emitter_chain(2) emitter_address(32)
//         sequence(8) consistency_level(1) payload(..)
const HEADER_LEN: usize = 6;
const SIGNATURE_LEN: usize = 66;
const BODY_FIXED_LEN: usize = 51;

/// A parsed, signed VAA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vaa {
    pub version: u8,
    pub guardian_set_index: u32,
    pub signature_count: u8,
    pub timestamp: u32,
    pub nonce: u32,
    pub emitter_chain: u16,
    pub emitter_address: UniversalAddress,
    pub sequence: u64,
    pub consistency_level: u8,
    pub payload: Vec<u8>,
    /// The exact bytes returned by the guardian API.
    pub raw: Vec<u8>,
}

/// Bounds-checked big-endian reader over VAA bytes.
struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take<const N: usize>(&mut self, field: &str) -> Result<[u8; N], AttestationError> {
        let end = self.offset + N;
        let slice = self
            .bytes
            .get(self.offset..end)
            .ok_or_else(|| AttestationError::Malformed {
                reason: format!(
                    "{field}: need {N} bytes at offset {}, have {}",
                    self.offset,
                    self.bytes.len()
                ),
            })?;
        self.offset = end;

        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn skip(&mut self, len: usize, field: &str) -> Result<(), AttestationError> {
        if self.bytes.len() < self.offset + len {
            return Err(AttestationError::Malformed {
                reason: format!("{field}: truncated at offset {}", self.offset),
            });
        }
        self.offset += len;
        Ok(())
    }

    fn rest(&self) -> &'a [u8] {
        &self.bytes[self.offset..]
    }
}

impl Vaa {
    pub fn parse(raw: &[u8]) -> Result<Self, AttestationError> {
        if raw.len() < HEADER_LEN + BODY_FIXED_LEN {
            return Err(AttestationError::Malformed {
                reason: format!("{} bytes is shorter than an empty VAA", raw.len()),
            });
        }

        let mut reader = Reader::new(raw);
        let [version] = reader.take::<1>("version")?;
        let guardian_set_index = u32::from_be_bytes(reader.take("guardian_set_index")?);
        let [signature_count] = reader.take::<1>("signature_count")?;
        reader.skip(usize::from(signature_count) * SIGNATURE_LEN, "signatures")?;

        let timestamp = u32::from_be_bytes(reader.take("timestamp")?);
        let nonce = u32::from_be_bytes(reader.take("nonce")?);
        let emitter_chain = u16::from_be_bytes(reader.take("emitter_chain")?);
        let emitter_address = UniversalAddress(B256::from(reader.take::<32>("emitter_address")?));
        let sequence = u64::from_be_bytes(reader.take("sequence")?);
        let [consistency_level] = reader.take::<1>("consistency_level")?;

        Ok(Self {
            version,
            guardian_set_index,
            signature_count,
            timestamp,
            nonce,
            emitter_chain,
            emitter_address,
            sequence,
            consistency_level,
            payload: reader.rest().to_vec(),
            raw: raw.to_vec(),
        })
    }

    pub fn message_id(&self) -> MessageId {
        MessageId {
            chain: self.emitter_chain,
            emitter: self.emitter_address,
            sequence: self.sequence,
        }
    }

    pub fn transfer(&self) -> Result<TransferPayload, AttestationError> {
        TransferPayload::parse(&self.payload)
    }
}

const PAYLOAD_TRANSFER: u8 = 1;
const PAYLOAD_TRANSFER_WITH_PAYLOAD: u8 = 3;

/// Token bridge transfer body carried in a VAA payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPayload {
    /// Amount normalized to at most 8 decimals.
    pub amount: U256,
    pub token_address: UniversalAddress,
    pub token_chain: u16,
    pub to: UniversalAddress,
    pub to_chain: u16,
    /// Relayer fee for plain transfers, `None` for transfers with payload.
    pub fee: Option<U256>,
    pub from_address: Option<UniversalAddress>,
    pub payload: Vec<u8>,
}

impl TransferPayload {
    pub fn parse(bytes: &[u8]) -> Result<Self, AttestationError> {
        let mut reader = Reader::new(bytes);
        let [payload_id] = reader.take::<1>("payload_id")?;

        if payload_id != PAYLOAD_TRANSFER && payload_id != PAYLOAD_TRANSFER_WITH_PAYLOAD {
            return Err(AttestationError::Malformed {
                reason: format!("payload id {payload_id} is not a token transfer"),
            });
        }

        let amount = U256::from_be_bytes(reader.take::<32>("amount")?);
        let token_address = UniversalAddress(B256::from(reader.take::<32>("token_address")?));
        let token_chain = u16::from_be_bytes(reader.take("token_chain")?);
        let to = UniversalAddress(B256::from(reader.take::<32>("to")?));
        let to_chain = u16::from_be_bytes(reader.take("to_chain")?);
        let trailer = reader.take::<32>("fee_or_from")?;

        let (fee, from_address, payload) = if payload_id == PAYLOAD_TRANSFER {
            (Some(U256::from_be_bytes(trailer)), None, Vec::new())
        } else {
            (
                None,
                Some(UniversalAddress(B256::from(trailer))),
                reader.rest().to_vec(),
            )
        };

        Ok(Self {
            amount,
            token_address,
            token_chain,
            to,
            to_chain,
            fee,
            from_address,
            payload,
        })
    }
}

/// Source of signed VAAs.
#[async_trait]
pub trait AttestationSource: Send + Sync {
    /// Returns `Ok(None)` while the guardians have not signed the message.
    async fn fetch_vaa(&self, id: &MessageId) -> Result<Option<Vaa>, AttestationError>;
}

/// Waits for the VAA of `id`, bounded by `policy.timeout`.
pub async fn wait_for_vaa(
    source: &dyn AttestationSource,
    id: &MessageId,
    policy: &AttestationPolicy,
) -> Result<Vaa, AttestationError> {
    info!(message = %id, timeout = ?policy.timeout, "Waiting for VAA");
    poll_attestation(policy, || source.fetch_vaa(id)).await
}

/// Guardian API client backed by Wormholescan.
#[derive(Debug, Clone)]
pub struct WormholescanClient {
    http_client: reqwest::Client,
    base_url: Url,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignedVaaResponse {
    vaa_bytes: Option<String>,
}

impl WormholescanClient {
    pub const fn new(http_client: reqwest::Client, base_url: Url) -> Self {
        Self {
            http_client,
            base_url,
        }
    }

    fn signed_vaa_url(&self, id: &MessageId) -> String {
        format!(
            "{}/v1/signed_vaa/{}/{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            id.chain,
            alloy::hex::encode(id.emitter.as_bytes()),
            id.sequence
        )
    }
}

#[async_trait]
impl AttestationSource for WormholescanClient {
    async fn fetch_vaa(&self, id: &MessageId) -> Result<Option<Vaa>, AttestationError> {
        let url = self.signed_vaa_url(id);
        let response = self.http_client.get(&url).send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            debug!(%url, "VAA not found yet");
            return Ok(None);
        }

        if !status.is_success() {
            return Err(AttestationError::UnexpectedStatus {
                status: status.as_u16(),
            });
        }

        let body: SignedVaaResponse = serde_json::from_slice(&response.bytes().await?)?;
        let encoded = body.vaa_bytes.ok_or(AttestationError::MissingField {
            field: "vaaBytes",
        })?;

        Vaa::parse(&BASE64.decode(encoded)?).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use alloy::primitives::Address;
    use httpmock::prelude::*;

    use super::*;
    use crate::mock::encode_vaa;

    fn transfer_payload(amount: u64, to: UniversalAddress, to_chain: u16) -> Vec<u8> {
        let mut bytes = vec![PAYLOAD_TRANSFER];
        bytes.extend_from_slice(&U256::from(amount).to_be_bytes::<32>());
        bytes.extend_from_slice(UniversalAddress::from(Address::repeat_byte(0x11)).as_bytes());
        bytes.extend_from_slice(&10002u16.to_be_bytes());
        bytes.extend_from_slice(to.as_bytes());
        bytes.extend_from_slice(&to_chain.to_be_bytes());
        bytes.extend_from_slice(&U256::ZERO.to_be_bytes::<32>());
        bytes
    }

    fn message_id() -> MessageId {
        MessageId {
            chain: 10002,
            emitter: UniversalAddress::from(Address::repeat_byte(0xdb)),
            sequence: 1234,
        }
    }

    #[test]
    fn parses_vaa_header_and_body() {
        let id = message_id();
        let recipient = UniversalAddress(B256::repeat_byte(0x77));
        let raw = encode_vaa(&id, 13, &transfer_payload(500_000, recipient, 1));

        let vaa = Vaa::parse(&raw).unwrap();

        assert_eq!(vaa.version, 1);
        assert_eq!(vaa.guardian_set_index, 4);
        assert_eq!(vaa.signature_count, 13);
        assert_eq!(vaa.nonce, 42);
        assert_eq!(vaa.message_id(), id);
        assert_eq!(vaa.raw, raw);

        let transfer = vaa.transfer().unwrap();
        assert_eq!(transfer.amount, U256::from(500_000));
        assert_eq!(transfer.to, recipient);
        assert_eq!(transfer.to_chain, 1);
        assert_eq!(transfer.token_chain, 10002);
        assert_eq!(transfer.fee, Some(U256::ZERO));
        assert!(transfer.from_address.is_none());
    }

    #[test]
    fn rejects_truncated_vaa() {
        let raw = encode_vaa(&message_id(), 2, &[]);

        let err = Vaa::parse(&raw[..raw.len() - 10]).unwrap_err();
        assert!(matches!(err, AttestationError::Malformed { .. }), "got {err:?}");

        let err = Vaa::parse(&[1, 0, 0]).unwrap_err();
        assert!(matches!(err, AttestationError::Malformed { .. }));
    }

    #[test]
    fn rejects_non_transfer_payload() {
        let raw = encode_vaa(&message_id(), 1, &[2, 0, 0]);
        let vaa = Vaa::parse(&raw).unwrap();

        assert!(matches!(
            vaa.transfer(),
            Err(AttestationError::Malformed { .. })
        ));
    }

    #[tokio::test]
    async fn wormholescan_returns_none_until_signed() {
        let server = MockServer::start();
        let id = message_id();
        let path = format!(
            "/v1/signed_vaa/10002/{}/1234",
            alloy::hex::encode(id.emitter.as_bytes())
        );

        let mock = server.mock(|when, then| {
            when.method(GET).path(path.clone());
            then.status(404).json_body(serde_json::json!({ "code": 5 }));
        });

        let client = WormholescanClient::new(
            reqwest::Client::new(),
            Url::parse(&server.base_url()).unwrap(),
        );

        assert!(client.fetch_vaa(&id).await.unwrap().is_none());
        assert_eq!(mock.hits(), 1);
    }

    #[tokio::test]
    async fn wormholescan_decodes_signed_vaa() {
        let server = MockServer::start();
        let id = message_id();
        let raw = encode_vaa(&id, 1, &[]);

        server.mock(|when, then| {
            when.method(GET).path(format!(
                "/v1/signed_vaa/10002/{}/1234",
                alloy::hex::encode(id.emitter.as_bytes())
            ));
            then.status(200)
                .json_body(serde_json::json!({ "vaaBytes": BASE64.encode(&raw) }));
        });

        let client = WormholescanClient::new(
            reqwest::Client::new(),
            Url::parse(&server.base_url()).unwrap(),
        );

        let vaa = client.fetch_vaa(&id).await.unwrap().unwrap();
        assert_eq!(vaa.raw, raw);
        assert_eq!(vaa.message_id(), id);
    }

    #[tokio::test]
    async fn wormholescan_server_error_is_retryable() {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(GET);
            then.status(503);
        });

        let client = WormholescanClient::new(
            reqwest::Client::new(),
            Url::parse(&server.base_url()).unwrap(),
        );

        let err = client.fetch_vaa(&message_id()).await.unwrap_err();
        assert!(matches!(err, AttestationError::UnexpectedStatus { status: 503 }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn wait_for_vaa_polls_until_signed() {
        let server = MockServer::start();
        let id = message_id();
        let raw = encode_vaa(&id, 1, &[]);

        server.mock(|when, then| {
            when.method(GET);
            then.status(200)
                .json_body(serde_json::json!({ "vaaBytes": BASE64.encode(&raw) }));
        });

        let client = WormholescanClient::new(
            reqwest::Client::new(),
            Url::parse(&server.base_url()).unwrap(),
        );
        let policy = AttestationPolicy {
            timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(10),
        };

        let vaa = wait_for_vaa(&client, &id, &policy).await.unwrap();
        assert_eq!(vaa.sequence, 1234);
    }
}
