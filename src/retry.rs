// SPDX-License-Identifier: MIT

//! Jittered exponential backoff for transient record-store failures.
//!
//! Only errors reporting [`LedgerError::is_transient`] are retried; domain
//! outcomes (validation, insufficient funds, conflict, not found) surface to
//! the caller immediately.

use crate::error::Result;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Fraction of the computed delay applied as random jitter.
const JITTER_PCT: f64 = 0.25;

/// Bounded exponential backoff policy for async store operations.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        let base = base_delay_ms.max(1);
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms: base,
            max_delay_ms: max_delay_ms.max(base),
        }
    }

    /// Delay before retry number `attempt` (zero-based), without jitter.
    fn next_delay(&self, attempt: usize) -> Duration {
        let exp = 2_u64.saturating_pow(attempt as u32);
        let delay = self
            .base_delay_ms
            .saturating_mul(exp)
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let millis = delay.as_millis() as u64;
        let spread = (millis as f64 * JITTER_PCT) as i64;
        if spread == 0 {
            return delay;
        }
        let delta = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_millis(millis.saturating_add_signed(delta))
    }

    /// Run `op`, retrying transient failures up to `max_attempts` total tries.
    pub async fn run<F, Fut, T>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err(err);
                    }
                    let delay = self.jittered(self.next_delay(attempt - 1));
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient store failure, backing off"
                    );
                    sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, 250, 5_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn new_clamps_inputs() {
        let policy = RetryPolicy::new(0, 0, 0);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.base_delay_ms, 1);
        assert_eq!(policy.max_delay_ms, 1);
    }

    #[test]
    fn next_delay_doubles_and_caps() {
        let policy = RetryPolicy::new(5, 100, 500);
        let delays: Vec<_> = (0..5).map(|attempt| policy.next_delay(attempt)).collect();
        assert_eq!(delays[0], Duration::from_millis(100));
        assert_eq!(delays[1], Duration::from_millis(200));
        assert_eq!(delays[2], Duration::from_millis(400));
        assert_eq!(delays[3], Duration::from_millis(500)); // capped
        assert_eq!(delays[4], Duration::from_millis(500));
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let policy = RetryPolicy::new(3, 1, 1);
        let attempts = Arc::new(AtomicUsize::new(0));

        let result = policy
            .run(|| {
                let attempts = attempts.clone();
                async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(LedgerError::StoreUnavailable("flaky".into()))
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let policy = RetryPolicy::new(2, 1, 1);
        let attempts = Arc::new(AtomicUsize::new(0));

        let result: Result<()> = policy
            .run(|| {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(LedgerError::StoreUnavailable("down".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(LedgerError::StoreUnavailable(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn domain_errors_are_not_retried() {
        let policy = RetryPolicy::new(5, 1, 1);
        let attempts = Arc::new(AtomicUsize::new(0));

        let result: Result<()> = policy
            .run(|| {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(LedgerError::InsufficientFunds {
                        available: 5,
                        requested: 10,
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(LedgerError::InsufficientFunds { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
