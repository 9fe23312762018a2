//! Bounded-retry execution with exponential backoff
//!
//! Wraps a remote call and retries it through transient rate limiting,
//! honoring server-provided reset hints and the process-wide shutdown
//! signal. Retry counters are call-local; nothing here touches shared
//! state.

use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::BackoffConfig;
use crate::error::{PublishError, QuillcastError, Result};
use crate::shutdown::Shutdown;

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Retries after the first attempt; total attempts = max_retries + 1.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 6,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(300),
        }
    }
}

impl From<&BackoffConfig> for BackoffPolicy {
    fn from(config: &BackoffConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_secs(config.initial_seconds),
            max_backoff: Duration::from_secs(config.max_seconds),
        }
    }
}

/// Execute `call` with exponential backoff on transient failures.
///
/// Non-transient errors are returned immediately; no retry budget is spent
/// on them. A transient failure sleeps for the server's reset hint when one
/// is present, otherwise `min(current_backoff, max_backoff)` with the
/// backoff doubling after each attempt. The sleep is interruptible: a
/// shutdown request aborts the chain with [`QuillcastError::Cancelled`]
/// instead of completing the retry loop.
pub async fn run_with_backoff<T, F, Fut>(
    policy: BackoffPolicy,
    shutdown: &Shutdown,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, PublishError>>,
{
    let mut backoff = policy.initial_backoff;
    let mut failures: u32 = 0;

    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(e.into()),
            Err(e) => {
                failures += 1;
                if failures > policy.max_retries {
                    warn!("Rate limit persisted through {} retries", policy.max_retries);
                    return Err(PublishError::RetriesExhausted {
                        attempts: policy.max_retries,
                        cause: Box::new(e),
                    }
                    .into());
                }

                let wait = e
                    .retry_hint_secs()
                    .map(Duration::from_secs)
                    .unwrap_or_else(|| backoff.min(policy.max_backoff));

                warn!(
                    "Rate limit hit (attempt {}/{}), backing off for {:?}",
                    failures, policy.max_retries, wait
                );

                if !shutdown.sleep(wait).await {
                    info!("Backoff sleep interrupted by shutdown");
                    return Err(QuillcastError::Cancelled);
                }

                backoff = (backoff * 2).min(policy.max_backoff);
            }
        }
    }
}
