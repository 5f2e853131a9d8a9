//! Recording download with bounded retry.

use crate::config::CarrierCredentials;
use crate::error::VoiceError;
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use std::time::Duration;

/// Recordings larger than this are refused (10 MiB).
const MAX_RECORDING_BYTES: usize = 10 * 1024 * 1024;

/// Downloads a recorded audio artifact.
#[async_trait]
pub trait AudioFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, VoiceError>;
}

/// Fetches recordings over HTTP, authenticating with the carrier account.
#[derive(Debug, Clone)]
pub struct HttpAudioFetcher {
    client: reqwest::Client,
    credentials: CarrierCredentials,
}

impl HttpAudioFetcher {
    pub fn new(credentials: CarrierCredentials, timeout: Duration) -> Result<Self, VoiceError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            credentials,
        })
    }
}

#[async_trait]
impl AudioFetcher for HttpAudioFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, VoiceError> {
        let mut request = self.client.get(url);
        if self.credentials.is_configured() {
            request = request.basic_auth(
                &self.credentials.account_sid,
                Some(&self.credentials.auth_token),
            );
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(VoiceError::FetchStatus {
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(VoiceError::Fetch("recording is empty".to_string()));
        }
        if bytes.len() > MAX_RECORDING_BYTES {
            return Err(VoiceError::Stt(format!(
                "recording exceeds maximum size: {} bytes (limit: {} bytes)",
                bytes.len(),
                MAX_RECORDING_BYTES
            )));
        }
        Ok(bytes.to_vec())
    }
}

/// Attempt count and backoff for recording downloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. At least 1.
    pub attempts: u32,
    /// Wait before the first retry. Each later wait doubles.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Doubling backoff without jitter, one entry per retry.
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_factor(2.0)
            .with_max_times(self.attempts.max(1).saturating_sub(1) as usize)
    }
}

/// Fetches `url`, retrying transient failures per `policy`.
///
/// Returns the last error once attempts are exhausted or a non-transient
/// error occurs.
pub async fn fetch_with_retry(
    fetcher: &dyn AudioFetcher,
    url: &str,
    policy: RetryPolicy,
) -> Result<Vec<u8>, VoiceError> {
    (|| fetcher.fetch(url))
        .retry(policy.backoff())
        .when(VoiceError::is_transient)
        .notify(|e: &VoiceError, delay: Duration| {
            tracing::warn!(
                delay_ms = delay.as_millis() as u64,
                error = %e,
                "recording fetch failed, retrying"
            );
        })
        .await
        .inspect_err(|e| tracing::warn!(error = %e, "recording fetch gave up"))
}
