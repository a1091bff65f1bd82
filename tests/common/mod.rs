// SPDX-License-Identifier: MIT

//! Shared test fixtures: in-memory store, manual clock, wired runtime.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use coin_ledger::clock::ManualClock;
use coin_ledger::config::LedgerConfig;
use coin_ledger::error::{LedgerError, Result};
use coin_ledger::events::{EventSink, LedgerEvent};
use coin_ledger::logging::{self, LogFormat};
use coin_ledger::models::{CoinEntry, LotStatus, ReferralRecord, ReferralStatus};
use coin_ledger::store::{
    CoinFilter, CoinPatch, MemoryStore, Page, RecordStore, ReferralFilter, ReferralPatch,
    SortOrder, UpdateOutcome,
};
use coin_ledger::LedgerRuntime;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

/// Fixed start of time for deterministic tests.
#[allow(dead_code)]
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

pub struct TestEnv {
    pub runtime: LedgerRuntime,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub events: UnboundedReceiver<LedgerEvent>,
}

/// Delegating store that misbehaves at precise points, for tests covering
/// partial-failure reporting.
pub struct FaultyStore {
    inner: Arc<MemoryStore>,
    fail_coin_creates: AtomicBool,
    expire_before_update: Mutex<Option<String>>,
}

#[allow(dead_code)]
impl FaultyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            fail_coin_creates: AtomicBool::new(false),
            expire_before_update: Mutex::new(None),
        }
    }

    /// Every subsequent `create_coin` fails with `StoreUnavailable`.
    pub fn fail_coin_creates(&self) {
        self.fail_coin_creates.store(true, Ordering::SeqCst);
    }

    /// Before the next conditional update of `lot_id`, expire the lot out
    /// from under the caller, like a sweeper racing a spend. One-shot.
    pub fn expire_before_update(&self, lot_id: &str) {
        *self.expire_before_update.lock().unwrap() = Some(lot_id.to_string());
    }
}

#[async_trait]
impl RecordStore for FaultyStore {
    async fn create_coin(&self, entry: CoinEntry) -> Result<CoinEntry> {
        if self.fail_coin_creates.load(Ordering::SeqCst) {
            return Err(LedgerError::StoreUnavailable(
                "injected coin write failure".into(),
            ));
        }
        self.inner.create_coin(entry).await
    }

    async fn update_coin_if(
        &self,
        id: &str,
        expected: LotStatus,
        patch: CoinPatch,
    ) -> Result<UpdateOutcome> {
        let victim = {
            let mut slot = self.expire_before_update.lock().unwrap();
            if slot.as_deref() == Some(id) {
                slot.take()
            } else {
                None
            }
        };
        if let Some(victim) = victim {
            self.inner
                .update_coin_if(
                    &victim,
                    LotStatus::Active,
                    CoinPatch {
                        status: Some(LotStatus::Expired),
                        amount: None,
                    },
                )
                .await?;
        }
        self.inner.update_coin_if(id, expected, patch).await
    }

    async fn query_coins(
        &self,
        filter: CoinFilter,
        sort: SortOrder,
        cursor: Option<String>,
        page_size: u32,
    ) -> Result<Page<CoinEntry>> {
        self.inner.query_coins(filter, sort, cursor, page_size).await
    }

    async fn create_referral(&self, record: ReferralRecord) -> Result<ReferralRecord> {
        self.inner.create_referral(record).await
    }

    async fn update_referral_if(
        &self,
        id: &str,
        expected: ReferralStatus,
        patch: ReferralPatch,
    ) -> Result<UpdateOutcome> {
        self.inner.update_referral_if(id, expected, patch).await
    }

    async fn query_referrals(
        &self,
        filter: ReferralFilter,
        cursor: Option<String>,
        page_size: u32,
    ) -> Result<Page<ReferralRecord>> {
        self.inner.query_referrals(filter, cursor, page_size).await
    }
}

pub struct FaultyEnv {
    pub runtime: LedgerRuntime,
    pub store: Arc<MemoryStore>,
    pub faults: Arc<FaultyStore>,
    #[allow(dead_code)]
    pub clock: Arc<ManualClock>,
}

/// Like [`test_env`], but the runtime talks to the store through a
/// [`FaultyStore`] so tests can break individual operations.
#[allow(dead_code)]
pub fn faulty_env() -> FaultyEnv {
    logging::init(LogFormat::Human);
    let store = Arc::new(MemoryStore::new());
    let faults = Arc::new(FaultyStore::new(store.clone()));
    let clock = Arc::new(ManualClock::new(epoch()));
    let runtime = LedgerRuntime::new(
        faults.clone(),
        clock.clone(),
        LedgerConfig::test_default(),
        EventSink::disabled(),
        Duration::from_secs(3600),
    );
    FaultyEnv {
        runtime,
        store,
        clock,
        faults,
    }
}

/// Build a fully wired engine over an in-memory store and a manual clock
/// starting at [`epoch`].
#[allow(dead_code)]
pub fn test_env() -> TestEnv {
    logging::init(LogFormat::Human);
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(epoch()));
    let (events, rx) = EventSink::channel();
    let runtime = LedgerRuntime::new(
        store.clone(),
        clock.clone(),
        LedgerConfig::test_default(),
        events,
        Duration::from_secs(3600),
    );
    TestEnv {
        runtime,
        store,
        clock,
        events: rx,
    }
}
