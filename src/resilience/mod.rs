//! Shared resilience primitives for provider clients
//!
//! Every external client uses the same two mechanisms:
//! - A token-bucket rate budget over a rolling minute that blocks until
//!   capacity frees instead of failing the call
//! - A retry loop with exponential backoff (2^attempt seconds) gated on
//!   [`AppError::is_transient`]
//!
//! Factoring them here keeps the rate/retry behavior identical across the
//! embedding, generation and vector-store wrappers.

use crate::errors::{AppError, Result};
use governor::{
    clock::QuantaClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

/// Direct (unkeyed) limiter over the in-process clock
pub type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, QuantaClock>;

/// A blocking per-minute request budget shared by one provider client.
#[derive(Clone)]
pub struct RateBudget {
    limiter: Arc<DirectRateLimiter>,
    requests_per_minute: u32,
}

impl RateBudget {
    /// Create a budget of `requests_per_minute` requests per rolling minute.
    pub fn per_minute(requests_per_minute: u32) -> Self {
        let rpm = NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: Arc::new(RateLimiter::direct(Quota::per_minute(rpm))),
            requests_per_minute: requests_per_minute.max(1),
        }
    }

    /// Wait until a request slot is available. Never fails; a call over
    /// budget blocks until capacity frees.
    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
    }

    pub fn requests_per_minute(&self) -> u32 {
        self.requests_per_minute
    }
}

impl std::fmt::Debug for RateBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateBudget")
            .field("requests_per_minute", &self.requests_per_minute)
            .finish()
    }
}

/// Run `op` up to `max_attempts` times, sleeping `2^attempt` seconds after
/// each transient failure. Non-transient errors abort immediately.
pub async fn retry_with_backoff<T, F, Fut>(
    max_attempts: u32,
    op_name: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < max_attempts => {
                let delay = Duration::from_secs(1u64 << attempt.min(6));
                tracing::warn!(
                    op = op_name,
                    attempt = attempt + 1,
                    max_attempts,
                    delay_secs = delay.as_secs(),
                    error = %err,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                if err.is_transient() {
                    tracing::warn!(op = op_name, attempts = attempt + 1, error = %err, "Retries exhausted");
                } else {
                    tracing::warn!(op = op_name, error = %err, "Non-transient failure, not retrying");
                }
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn budget_allows_initial_burst() {
        let budget = RateBudget::per_minute(30);
        assert_eq!(budget.requests_per_minute(), 30);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(3, "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(AppError::TransientProvider {
                        message: "try again".into(),
                    })
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn aborts_on_permanent_error() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_with_backoff(3, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(AppError::Provider {
                    message: "bad key".into(),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_with_backoff(3, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(AppError::TransientProvider {
                    message: "still busy".into(),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
