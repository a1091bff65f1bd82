// SPDX-License-Identifier: MIT

//! Record store abstraction.
//!
//! The ledger does not own a persistence technology; it talks to any durable
//! document store through [`RecordStore`]: create, conditional update, and
//! filtered/sorted/cursor-paginated queries. Queries return one page at a
//! time and callers that need "all records" must loop until the cursor is
//! exhausted; a single bounded page silently understates balances for users
//! with many lots.

pub mod memory;

pub use memory::MemoryStore;

use crate::error::Result;
use crate::models::{CoinEntry, EntryKind, LotStatus, ReferralRecord, ReferralStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Outcome of a conditional update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The record matched the expected state and the patch was applied.
    Applied,
    /// The record was not in the expected state; nothing was written.
    Conflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// One page of query results plus the cursor for the next page, if any.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<String>,
}

/// Filter over the coins collection. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct CoinFilter {
    pub user_id: Option<String>,
    pub kind: Option<EntryKind>,
    pub status: Option<LotStatus>,
    /// Match entries with `expiry_at <= expiring_by`. Entries without an
    /// expiry never match.
    pub expiring_by: Option<DateTime<Utc>>,
}

impl CoinFilter {
    /// Active earn lots for one user: the spendable set.
    pub fn active_lots(user_id: &str) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            kind: Some(EntryKind::Earn),
            status: Some(LotStatus::Active),
            expiring_by: None,
        }
    }

    /// Every coin entry for one user, any kind or status.
    pub fn all_for_user(user_id: &str) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            ..Self::default()
        }
    }

    /// Active earn lots (all users) due to expire by `deadline`.
    pub fn due_lots(deadline: DateTime<Utc>) -> Self {
        Self {
            user_id: None,
            kind: Some(EntryKind::Earn),
            status: Some(LotStatus::Active),
            expiring_by: Some(deadline),
        }
    }
}

/// Fields a coin conditional update may change.
#[derive(Debug, Clone, Default)]
pub struct CoinPatch {
    pub status: Option<LotStatus>,
    /// Rewrites the lot amount; used when a split marks the consumed portion.
    pub amount: Option<i64>,
}

/// Filter over the referrals collection. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct ReferralFilter {
    pub referrer_id: Option<String>,
    pub referred_user_id: Option<String>,
    pub referral_code: Option<String>,
    pub status: Option<ReferralStatus>,
    /// Match only issuance records (no referred user set).
    pub issuance_only: bool,
}

/// Fields a referral conditional update may change.
#[derive(Debug, Clone, Default)]
pub struct ReferralPatch {
    pub status: Option<ReferralStatus>,
    pub coins_awarded: Option<i64>,
    pub first_reward_at: Option<DateTime<Utc>>,
}

/// Durable storage for coin entries and referral records.
///
/// Implementations must make `create_referral` enforce the one-attribution-
/// per-referred-user and one-issuance-per-referrer invariants at insert time
/// (returning `Conflict`), so concurrent writers cannot both land.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a coin entry; the store assigns and returns the id.
    async fn create_coin(&self, entry: CoinEntry) -> Result<CoinEntry>;

    /// Patch a coin entry only if it still has `expected` status.
    async fn update_coin_if(
        &self,
        id: &str,
        expected: LotStatus,
        patch: CoinPatch,
    ) -> Result<UpdateOutcome>;

    /// One page of coin entries matching `filter`, sorted by `earned_at`
    /// (ties broken by id).
    async fn query_coins(
        &self,
        filter: CoinFilter,
        sort: SortOrder,
        cursor: Option<String>,
        page_size: u32,
    ) -> Result<Page<CoinEntry>>;

    /// Insert a referral record; the store assigns and returns the id.
    async fn create_referral(&self, record: ReferralRecord) -> Result<ReferralRecord>;

    /// Patch a referral record only if it still has `expected` status.
    async fn update_referral_if(
        &self,
        id: &str,
        expected: ReferralStatus,
        patch: ReferralPatch,
    ) -> Result<UpdateOutcome>;

    /// One page of referral records matching `filter`, oldest first.
    async fn query_referrals(
        &self,
        filter: ReferralFilter,
        cursor: Option<String>,
        page_size: u32,
    ) -> Result<Page<ReferralRecord>>;
}
