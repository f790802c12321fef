//! Fixed-delay retry for upstream calls.

use std::future::Future;
use std::time::Duration;

use metrics::counter;
use tokio::time::sleep;
use tracing::{info, warn};

use super::error::UpstreamError;

const METRIC_RETRY: &str = "tessera_upstream_retry_total";

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Values below 1 are treated as 1.
    pub max_retries: u32,
    /// Pause between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }
}

/// Run `operation` until it succeeds, fails permanently, or attempts run out.
///
/// `operation` receives the 1-based attempt number. The last error is
/// returned once attempts are exhausted.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T, UpstreamError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, UpstreamError>>,
{
    let attempts = policy.attempts();
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    info!(attempt, "upstream call succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) if attempt < attempts && error.is_transient() => {
                warn!(
                    attempt,
                    max_attempts = attempts,
                    delay_ms = policy.delay.as_millis() as u64,
                    error = %error,
                    "transient upstream failure; retrying"
                );
                counter!(METRIC_RETRY).increment(1);
                sleep(policy.delay).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}
