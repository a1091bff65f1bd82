// SPDX-License-Identifier: MIT

//! In-memory [`RecordStore`] for tests and local development.
//!
//! Implements honest cursor pagination and the insert-time referral
//! uniqueness constraints, and can inject a burst of transient failures to
//! exercise the retry path.

use crate::error::{LedgerError, Result};
use crate::models::{CoinEntry, LotStatus, ReferralRecord, ReferralStatus};
use crate::store::{
    CoinFilter, CoinPatch, Page, RecordStore, ReferralFilter, ReferralPatch, SortOrder,
    UpdateOutcome,
};
use anyhow::anyhow;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Inner {
    coins: BTreeMap<String, CoinEntry>,
    referrals: BTreeMap<String, ReferralRecord>,
    next_id: u64,
    fail_remaining: u32,
}

impl Inner {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{:06}", prefix, self.next_id)
    }

    /// Injected-failure gate; every store operation passes through it.
    fn gate(&mut self) -> Result<()> {
        if self.fail_remaining > 0 {
            self.fail_remaining -= 1;
            return Err(LedgerError::StoreUnavailable(
                "injected transient failure".into(),
            ));
        }
        Ok(())
    }
}

/// In-process record store backed by ordered maps.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the inner state; a poisoned lock means a writer panicked
    /// mid-mutation and the data can no longer be trusted.
    fn locked(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| LedgerError::Internal(anyhow!("record store mutex poisoned")))
    }

    /// Make the next `count` store operations fail with `StoreUnavailable`.
    pub fn fail_next(&self, count: u32) {
        self.inner.lock().unwrap().fail_remaining = count;
    }

    /// Snapshot of every coin entry, for test assertions.
    pub fn dump_coins(&self) -> Vec<CoinEntry> {
        self.inner.lock().unwrap().coins.values().cloned().collect()
    }

    /// Snapshot of every referral record, for test assertions.
    pub fn dump_referrals(&self) -> Vec<ReferralRecord> {
        self.inner
            .lock()
            .unwrap()
            .referrals
            .values()
            .cloned()
            .collect()
    }
}

fn parse_cursor(cursor: Option<String>) -> Result<usize> {
    match cursor {
        None => Ok(0),
        Some(raw) => raw
            .parse()
            .map_err(|_| LedgerError::Validation(format!("invalid page cursor: {raw}"))),
    }
}

fn paginate<T>(items: Vec<T>, offset: usize, page_size: u32) -> Page<T> {
    let size = (page_size.max(1)) as usize;
    let total = items.len();
    let end = offset.saturating_add(size).min(total);
    let page: Vec<T> = items
        .into_iter()
        .skip(offset)
        .take(end.saturating_sub(offset))
        .collect();
    let next = (end < total).then(|| end.to_string());
    Page { items: page, next }
}

fn coin_matches(entry: &CoinEntry, filter: &CoinFilter) -> bool {
    if let Some(user_id) = &filter.user_id {
        if &entry.user_id != user_id {
            return false;
        }
    }
    if let Some(kind) = filter.kind {
        if entry.kind != kind {
            return false;
        }
    }
    if let Some(status) = filter.status {
        if entry.status != status {
            return false;
        }
    }
    if let Some(deadline) = filter.expiring_by {
        match entry.expiry_at {
            Some(expiry) if expiry <= deadline => {}
            _ => return false,
        }
    }
    true
}

fn referral_matches(record: &ReferralRecord, filter: &ReferralFilter) -> bool {
    if let Some(referrer_id) = &filter.referrer_id {
        if &record.referrer_id != referrer_id {
            return false;
        }
    }
    if let Some(referred) = &filter.referred_user_id {
        if record.referred_user_id.as_deref() != Some(referred.as_str()) {
            return false;
        }
    }
    if let Some(code) = &filter.referral_code {
        if &record.referral_code != code {
            return false;
        }
    }
    if let Some(status) = filter.status {
        if record.status != status {
            return false;
        }
    }
    if filter.issuance_only && !record.is_issuance() {
        return false;
    }
    true
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn create_coin(&self, mut entry: CoinEntry) -> Result<CoinEntry> {
        let mut inner = self.locked()?;
        inner.gate()?;

        entry.id = inner.next_id("coin");
        inner.coins.insert(entry.id.clone(), entry.clone());
        Ok(entry)
    }

    async fn update_coin_if(
        &self,
        id: &str,
        expected: LotStatus,
        patch: CoinPatch,
    ) -> Result<UpdateOutcome> {
        let mut inner = self.locked()?;
        inner.gate()?;

        let entry = inner
            .coins
            .get_mut(id)
            .ok_or_else(|| LedgerError::NotFound(format!("coin entry {id}")))?;
        if entry.status != expected {
            return Ok(UpdateOutcome::Conflict);
        }
        if let Some(status) = patch.status {
            entry.status = status;
        }
        if let Some(amount) = patch.amount {
            entry.amount = amount;
        }
        Ok(UpdateOutcome::Applied)
    }

    async fn query_coins(
        &self,
        filter: CoinFilter,
        sort: SortOrder,
        cursor: Option<String>,
        page_size: u32,
    ) -> Result<Page<CoinEntry>> {
        let mut inner = self.locked()?;
        inner.gate()?;

        let mut matches: Vec<CoinEntry> = inner
            .coins
            .values()
            .filter(|entry| coin_matches(entry, &filter))
            .cloned()
            .collect();
        matches.sort_by(|a, b| (a.earned_at, &a.id).cmp(&(b.earned_at, &b.id)));
        if sort == SortOrder::Desc {
            matches.reverse();
        }

        let offset = parse_cursor(cursor)?;
        Ok(paginate(matches, offset, page_size))
    }

    async fn create_referral(&self, mut record: ReferralRecord) -> Result<ReferralRecord> {
        let mut inner = self.locked()?;
        inner.gate()?;

        match &record.referred_user_id {
            // Attribution: at most one per referred user, enforced at insert.
            Some(referred) => {
                let taken = inner
                    .referrals
                    .values()
                    .any(|r| r.referred_user_id.as_deref() == Some(referred.as_str()));
                if taken {
                    return Err(LedgerError::Conflict(format!(
                        "user {referred} already has a referral attribution"
                    )));
                }
            }
            // Issuance: at most one per referrer.
            None => {
                let exists = inner
                    .referrals
                    .values()
                    .any(|r| r.is_issuance() && r.referrer_id == record.referrer_id);
                if exists {
                    return Err(LedgerError::Conflict(format!(
                        "referrer {} already has an issuance record",
                        record.referrer_id
                    )));
                }
            }
        }

        record.id = inner.next_id("ref");
        inner.referrals.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn update_referral_if(
        &self,
        id: &str,
        expected: ReferralStatus,
        patch: ReferralPatch,
    ) -> Result<UpdateOutcome> {
        let mut inner = self.locked()?;
        inner.gate()?;

        let record = inner
            .referrals
            .get_mut(id)
            .ok_or_else(|| LedgerError::NotFound(format!("referral record {id}")))?;
        if record.status != expected {
            return Ok(UpdateOutcome::Conflict);
        }
        if let Some(status) = patch.status {
            record.status = status;
        }
        if let Some(coins_awarded) = patch.coins_awarded {
            record.coins_awarded = coins_awarded;
        }
        if let Some(first_reward_at) = patch.first_reward_at {
            record.first_reward_at = Some(first_reward_at);
        }
        Ok(UpdateOutcome::Applied)
    }

    async fn query_referrals(
        &self,
        filter: ReferralFilter,
        cursor: Option<String>,
        page_size: u32,
    ) -> Result<Page<ReferralRecord>> {
        let mut inner = self.locked()?;
        inner.gate()?;

        let mut matches: Vec<ReferralRecord> = inner
            .referrals
            .values()
            .filter(|record| referral_matches(record, &filter))
            .cloned()
            .collect();
        matches.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));

        let offset = parse_cursor(cursor)?;
        Ok(paginate(matches, offset, page_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntryKind, LotStatus};
    use chrono::{Duration, TimeZone, Utc};

    fn lot(user_id: &str, amount: i64, day: i64) -> CoinEntry {
        let earned = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(day);
        CoinEntry {
            id: String::new(),
            user_id: user_id.into(),
            amount,
            kind: EntryKind::Earn,
            reason: "test".into(),
            earned_at: earned,
            expiry_at: Some(earned + Duration::days(365)),
            status: LotStatus::Active,
            metadata: None,
        }
    }

    #[tokio::test]
    async fn pagination_visits_every_record_exactly_once() {
        let store = MemoryStore::new();
        for day in 0..7 {
            store.create_coin(lot("u1", 10, day)).await.unwrap();
        }

        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let page = store
                .query_coins(
                    CoinFilter::active_lots("u1"),
                    SortOrder::Asc,
                    cursor.clone(),
                    3,
                )
                .await
                .unwrap();
            seen.extend(page.items);
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        assert_eq!(seen.len(), 7);
        let mut sorted = seen.clone();
        sorted.sort_by_key(|e| e.earned_at);
        assert_eq!(seen, sorted);
    }

    #[tokio::test]
    async fn conditional_update_respects_expected_status() {
        let store = MemoryStore::new();
        let entry = store.create_coin(lot("u1", 10, 0)).await.unwrap();

        let outcome = store
            .update_coin_if(
                &entry.id,
                LotStatus::Active,
                CoinPatch {
                    status: Some(LotStatus::Spent),
                    amount: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::Applied);

        // Already spent: a second transition must not apply.
        let outcome = store
            .update_coin_if(
                &entry.id,
                LotStatus::Active,
                CoinPatch {
                    status: Some(LotStatus::Expired),
                    amount: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::Conflict);

        let stored = &store.dump_coins()[0];
        assert_eq!(stored.status, LotStatus::Spent);
    }

    #[tokio::test]
    async fn attribution_uniqueness_enforced_at_insert() {
        let store = MemoryStore::new();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let attribution = ReferralRecord {
            id: String::new(),
            referrer_id: "referrer".into(),
            referred_user_id: Some("newbie".into()),
            referral_code: "INDAREFERR".into(),
            status: ReferralStatus::Pending,
            coins_awarded: 0,
            created_at: now,
            first_reward_at: None,
        };

        store.create_referral(attribution.clone()).await.unwrap();

        let duplicate = ReferralRecord {
            referrer_id: "other".into(),
            ..attribution
        };
        let err = store.create_referral(duplicate).await.unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)));
    }

    #[tokio::test]
    async fn poisoned_lock_surfaces_as_internal_error() {
        let store = MemoryStore::new();

        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = store.inner.lock().unwrap();
            panic!("poison the store");
        }));

        let err = store.create_coin(lot("u1", 10, 0)).await.unwrap_err();
        assert!(matches!(err, LedgerError::Internal(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn injected_failures_surface_as_store_unavailable() {
        let store = MemoryStore::new();
        store.fail_next(1);

        let err = store.create_coin(lot("u1", 10, 0)).await.unwrap_err();
        assert!(matches!(err, LedgerError::StoreUnavailable(_)));

        // The failure budget is consumed; the next call succeeds.
        store.create_coin(lot("u1", 10, 0)).await.unwrap();
    }
}
