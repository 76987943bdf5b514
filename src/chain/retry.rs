//! Bounded exponential backoff for transient chain errors
//!
//! Only `ChainError::Network` is retried. On-chain rejections are returned
//! to the caller on the first occurrence.

use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use super::ChainError;

/// Backoff parameters for transient network errors
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay before the first retry (ms)
    pub initial_delay_ms: u64,
    /// Growth factor applied per attempt
    pub multiplier: f64,
    /// Upper bound for a single delay (ms)
    pub max_delay_ms: u64,
    /// Total attempts including the first call
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            multiplier: 2.0,
            max_delay_ms: 30_000,
            max_attempts: 6,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.max(1.0).powi(attempt.min(i32::MAX as u32) as i32);
        let ms = (self.initial_delay_ms as f64 * exp).min(self.max_delay_ms as f64);
        Duration::from_millis(ms as u64)
    }
}

/// Run `op`, retrying transient failures according to `policy`.
///
/// Returns the last error once attempts are exhausted.
pub async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, ChainError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ChainError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(ChainError::Network(e)) if attempt + 1 < max_attempts => {
                let delay = policy.delay_for(attempt);
                log::warn!(
                    "{} failed (attempt {}/{}): {} - retrying in {:?}",
                    what,
                    attempt + 1,
                    max_attempts,
                    e,
                    delay
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
