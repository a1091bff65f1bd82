// SPDX-License-Identifier: MIT

//! Scheduled expiry sweeps.
//!
//! The sweeper owns no state: it ticks on an interval and invokes the
//! ledger's sweep, which is idempotent, so overlapping or repeated runs are
//! harmless.

use crate::clock::Clock;
use crate::error::Result;
use crate::services::CoinLedger;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Periodic caller of [`CoinLedger::sweep_expired`].
#[derive(Clone)]
pub struct ExpirySweeper {
    ledger: CoinLedger,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(ledger: CoinLedger, clock: Arc<dyn Clock>, interval: Duration) -> Self {
        Self {
            ledger,
            clock,
            interval,
        }
    }

    /// One sweep at the current time. Suitable for cron-style invocation.
    pub async fn run_once(&self) -> Result<usize> {
        let now = self.clock.now();
        let expired = self.ledger.sweep_expired(now).await?;
        if expired > 0 {
            tracing::info!(expired, %now, "scheduled sweep expired lots");
        } else {
            tracing::debug!(%now, "scheduled sweep found nothing to expire");
        }
        Ok(expired)
    }

    /// Sweep on the configured interval until `shutdown` changes.
    ///
    /// Sweep failures are logged and the loop keeps ticking; a transient
    /// store outage should not kill the schedule.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_secs = self.interval.as_secs(), "expiry sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.run_once().await {
                        tracing::error!(error = %err, "expiry sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    tracing::info!("expiry sweeper shutting down");
                    return;
                }
            }
        }
    }
}
