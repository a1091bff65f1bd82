// SPDX-License-Identifier: MIT

//! Coin ledger and referral-reward engine for a services marketplace.
//!
//! Users earn non-monetary coins (sign-in streaks, bookings, referrals) as
//! expiring *lots* and spend them strictly oldest-first, with partial-lot
//! splitting. The crate also drives the referral state machine: code
//! issuance, one-time attribution, and exactly-once reward firing.
//!
//! Persistence is abstract (any document store implementing
//! [`store::RecordStore`] works) and time is injectable via
//! [`clock::Clock`], so the engine sits behind any storage or API layer.

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod retry;
pub mod services;
pub mod store;

use clock::Clock;
use config::LedgerConfig;
use events::EventSink;
use services::{CoinLedger, ExpirySweeper, ReferralEngine};
use std::sync::Arc;
use store::RecordStore;

/// Fully wired engine: ledger, referral engine, and sweeper sharing one
/// store, clock, config, and event sink.
pub struct LedgerRuntime {
    pub config: LedgerConfig,
    pub ledger: CoinLedger,
    pub referrals: ReferralEngine,
    pub sweeper: ExpirySweeper,
}

impl LedgerRuntime {
    pub fn new(
        store: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
        config: LedgerConfig,
        events: EventSink,
        sweep_interval: std::time::Duration,
    ) -> Self {
        let ledger = CoinLedger::new(
            store.clone(),
            clock.clone(),
            config.clone(),
            events.clone(),
        );
        let referrals = ReferralEngine::new(
            store,
            clock.clone(),
            ledger.clone(),
            config.clone(),
            events,
        );
        let sweeper = ExpirySweeper::new(ledger.clone(), clock, sweep_interval);
        Self {
            config,
            ledger,
            referrals,
            sweeper,
        }
    }
}
