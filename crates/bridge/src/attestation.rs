//! Bounded waiting for attestations produced by an external network.

use std::future::Future;
use std::time::Duration;

use backon::{ConstantBuilder, Retryable};
use tracing::{debug, info, warn};

/// Observed upper bound for the guardian network to sign a message.
pub const DEFAULT_ATTESTATION_TIMEOUT: Duration = Duration::from_secs(60);

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// How long, and how often, to ask for an attestation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttestationPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for AttestationPolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_ATTESTATION_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl AttestationPolicy {
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn max_attempts(&self) -> usize {
        let interval = self.poll_interval.as_millis().max(1);
        usize::try_from(self.timeout.as_millis() / interval)
            .unwrap_or(usize::MAX)
            .saturating_add(1)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AttestationError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Failed to parse attestation response: {0}")]
    JsonParse(#[from] serde_json::Error),
    #[error("Invalid base64 encoding: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Invalid hex encoding: {0}")]
    HexDecode(#[from] alloy::hex::FromHexError),
    #[error("Attestation API returned HTTP {status}")]
    UnexpectedStatus { status: u16 },
    #[error("Attestation pending: {status}")]
    Pending { status: String },
    #[error("Attestation response missing required field: {field}")]
    MissingField { field: &'static str },
    #[error("Malformed attestation: {reason}")]
    Malformed { reason: String },
    #[error("No attestation after {timeout:?}")]
    Timeout { timeout: Duration },
}

impl AttestationError {
    /// Whether asking again later can succeed.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::UnexpectedStatus { .. } | Self::Pending { .. }
        )
    }
}

/// Polls `fetch` until it yields an attestation or `policy.timeout` elapses.
///
/// `fetch` returns `Ok(None)` while the attestation does not exist yet.
/// Non-retryable errors stop polling immediately.
pub async fn poll_attestation<T, F, Fut>(
    policy: &AttestationPolicy,
    fetch: F,
) -> Result<T, AttestationError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, AttestationError>>,
{
    let mut fetch = fetch;
    let attempt = || {
        let pending = fetch();
        async move {
            pending.await?.ok_or_else(|| AttestationError::Pending {
                status: "not yet signed".to_string(),
            })
        }
    };

    let backoff = ConstantBuilder::default()
        .with_delay(policy.poll_interval)
        .with_max_times(policy.max_attempts());

    let polling = attempt
        .retry(backoff)
        .when(AttestationError::is_retryable)
        .notify(|err, dur| match err {
            AttestationError::Pending { status } => {
                debug!(%status, ?dur, "Attestation pending, retrying");
            }
            err => warn!(?err, ?dur, "Attestation fetch failed, retrying"),
        });

    let timeout = policy.timeout;
    match tokio::time::timeout(timeout, polling).await {
        Ok(Ok(attestation)) => {
            info!("Attestation received");
            Ok(attestation)
        }
        Ok(Err(err)) if err.is_retryable() => Err(AttestationError::Timeout { timeout }),
        Ok(Err(err)) => Err(err),
        Err(_elapsed) => Err(AttestationError::Timeout { timeout }),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn fast_policy() -> AttestationPolicy {
        AttestationPolicy {
            timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(1),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn returns_attestation_once_available() {
        let calls = AtomicUsize::new(0);

        let result = poll_attestation(&fast_policy(), || {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok((call >= 2).then_some(call)) }
        })
        .await
        .unwrap();

        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_when_never_available() {
        let start = tokio::time::Instant::now();

        let err = poll_attestation::<(), _, _>(&fast_policy(), || async { Ok(None) })
            .await
            .unwrap_err();

        assert!(
            matches!(err, AttestationError::Timeout { timeout } if timeout == Duration::from_secs(10)),
            "got {err:?}"
        );
        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn stops_on_non_retryable_error() {
        let calls = AtomicUsize::new(0);

        let err = poll_attestation::<(), _, _>(&fast_policy(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(AttestationError::Malformed {
                    reason: "truncated".to_string(),
                })
            }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, AttestationError::Malformed { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn default_policy_matches_observed_bound() {
        let policy = AttestationPolicy::default();
        assert_eq!(policy.timeout, Duration::from_secs(60));
        assert_eq!(policy.max_attempts(), 31);
    }
}
