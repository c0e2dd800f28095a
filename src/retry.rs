use crate::error::{FetchError, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Extra time waited past a ban expiry before the next attempt.
const BAN_MARGIN: Duration = Duration::from_secs(5);

/// Exponential backoff applied to individual upstream requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Zero disables retrying.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// The wait after `current`, capped at `max_backoff`. Saturates instead of
    /// overflowing on oversized configured values.
    fn next_backoff(&self, current: Duration) -> Duration {
        current.saturating_mul(self.multiplier).min(self.max_backoff())
    }
}

/// How long a rate-limited caller has to stay away, if the upstream said so.
fn ban_wait(err: &FetchError) -> Option<Duration> {
    let FetchError::RateLimited {
        ban_until_ms: Some(until),
        ..
    } = err
    else {
        return None;
    };
    let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
    (*until > now).then(|| Duration::from_millis(until - now) + BAN_MARGIN)
}

/// Runs `operation` until it succeeds, fails with a non-retriable error, or
/// the policy's retries are used up. The last error is returned.
pub async fn retry_with_backoff<F, Fut, T>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = policy.initial_backoff();

    for attempt in 1..=policy.max_retries {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retriable() => {
                let wait = ban_wait(&err).map_or(backoff, |ban| ban.max(backoff));
                warn!(attempt, ?wait, error = %err, "request failed, retrying");
                sleep(wait).await;
                backoff = policy.next_backoff(backoff);
            }
            Err(err) => return Err(err),
        }
    }

    operation().await
}
