// SPDX-License-Identifier: MIT

//! Coin ledger engine: award, FIFO spend, balance aggregation, expiry sweep.
//!
//! The engine holds no durable state of its own; everything lives in the
//! record store. It is constructed with explicit store and clock
//! dependencies so tests can substitute in-memory fakes and a controllable
//! clock.

use crate::clock::Clock;
use crate::config::LedgerConfig;
use crate::error::{LedgerError, Result};
use crate::events::{EventSink, LedgerEvent};
use crate::models::{Balance, CoinEntry, EntryKind, EntryMetadata, LotStatus};
use crate::retry::RetryPolicy;
use crate::store::{CoinFilter, CoinPatch, RecordStore, SortOrder, UpdateOutcome};
use chrono::{DateTime, Duration, Months, Utc};
use dashmap::DashMap;
use futures_util::{stream, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Cap on concurrent per-lot store writes during a sweep.
const MAX_CONCURRENT_SWEEP_OPS: usize = 16;

/// Per-user locks serializing spends. Shared across clones of the ledger
/// within one process; spends for different users proceed independently.
type SpendLocks = Arc<DashMap<String, Arc<Mutex<()>>>>;

/// Outcome of a successful spend.
#[derive(Debug)]
pub struct SpendResult {
    /// Coins consumed, as requested.
    pub requested: i64,
    /// Lots fully or partially drained, oldest first.
    pub lots_consumed: usize,
    /// The new active lot created when the last lot was split, if any.
    pub split_remainder: Option<CoinEntry>,
    /// The spend audit transaction (negative amount).
    pub transaction: CoinEntry,
}

/// Per-user summary of coins approaching expiry, for notification callers.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpiringCoins {
    pub user_id: String,
    pub amount: i64,
    pub earliest_expiry: DateTime<Utc>,
}

/// The coin ledger engine.
#[derive(Clone)]
pub struct CoinLedger {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    config: LedgerConfig,
    events: EventSink,
    retry: RetryPolicy,
    spend_locks: SpendLocks,
}

impl CoinLedger {
    pub fn new(
        store: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
        config: LedgerConfig,
        events: EventSink,
    ) -> Self {
        let retry = RetryPolicy::new(
            config.retry_max_attempts,
            config.retry_base_delay_ms,
            config.retry_max_delay_ms,
        );
        Self {
            store,
            clock,
            config,
            events,
            retry,
            spend_locks: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    // ─── Award ───────────────────────────────────────────────────

    /// Create one new active lot for `user_id`, expiring after the
    /// configured retention period. No other side effects.
    pub async fn award(
        &self,
        user_id: &str,
        amount: i64,
        reason: &str,
        metadata: Option<EntryMetadata>,
    ) -> Result<CoinEntry> {
        validate_user_and_amount(user_id, amount)?;
        if let Some(metadata) = &metadata {
            metadata.validate()?;
        }

        let now = self.clock.now();
        let expiry_at = now
            .checked_add_months(Months::new(self.config.retention_months))
            .ok_or_else(|| LedgerError::Validation("retention period overflows".into()))?;

        let entry = CoinEntry {
            id: String::new(),
            user_id: user_id.to_string(),
            amount,
            kind: EntryKind::Earn,
            reason: reason.to_string(),
            earned_at: now,
            expiry_at: Some(expiry_at),
            status: LotStatus::Active,
            metadata,
        };
        let lot = self.retry.run(|| self.store.create_coin(entry.clone())).await?;

        tracing::info!(user_id, amount, reason, lot_id = %lot.id, "coins awarded");
        self.events.emit(LedgerEvent::CoinsAwarded {
            user_id: user_id.to_string(),
            amount,
            reason: reason.to_string(),
        });
        Ok(lot)
    }

    /// Daily sign-in award with streak-milestone tiers.
    pub async fn award_daily_sign_in(&self, user_id: &str, day_streak: u32) -> Result<CoinEntry> {
        let (amount, reason) = match day_streak {
            7 => (15, "Daily sign-in - Day 7 streak"),
            30 => (50, "Daily sign-in - Day 30 streak"),
            _ => (10, "Daily sign-in"),
        };
        self.award(
            user_id,
            amount,
            reason,
            Some(EntryMetadata::SignIn { day_streak }),
        )
        .await
    }

    /// Booking-completion award with first-booking and milestone tiers.
    pub async fn award_booking_completion(
        &self,
        user_id: &str,
        booking_number: u32,
        first_booking: bool,
    ) -> Result<CoinEntry> {
        let (amount, reason) = if first_booking {
            (100, "First booking completed")
        } else {
            match booking_number {
                5 => (200, "5th booking milestone"),
                10 => (500, "10th booking milestone"),
                _ => (50, "Booking completed"),
            }
        };
        self.award(
            user_id,
            amount,
            reason,
            Some(EntryMetadata::Booking {
                booking_number,
                first_booking,
            }),
        )
        .await
    }

    // ─── Spend (FIFO) ────────────────────────────────────────────

    /// Consume `amount` coins oldest-first, splitting the last lot when it
    /// is only partially drained.
    ///
    /// Serialized per user: two concurrent spends for the same user cannot
    /// both pass the sufficiency check against stale data.
    pub async fn spend(&self, user_id: &str, amount: i64, reason: &str) -> Result<SpendResult> {
        validate_user_and_amount(user_id, amount)?;

        let lock = self
            .spend_locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Exhaustive scan: every active lot, oldest first.
        let lots = self
            .collect_coins(CoinFilter::active_lots(user_id), SortOrder::Asc)
            .await?;
        let available: i64 = lots.iter().map(|lot| lot.amount).sum();
        if available < amount {
            return Err(LedgerError::InsufficientFunds {
                available,
                requested: amount,
            });
        }

        let mut remaining = amount;
        let mut lots_consumed = 0;
        let mut split_remainder = None;
        let mut walk_failure = None;
        for lot in lots {
            if remaining == 0 {
                break;
            }
            if lot.amount <= remaining {
                // Drain the whole lot.
                if let Err(err) = self.transition_spent(&lot.id, None).await {
                    walk_failure = Some(err);
                    break;
                }
                remaining -= lot.amount;
                lots_consumed += 1;
            } else {
                // Split: the original becomes the consumed portion, and the
                // remainder lives on as a new lot inheriting earned_at,
                // expiry_at, reason, and metadata, so it keeps its place in
                // FIFO order and its original expiry clock.
                let consumed = remaining;
                if let Err(err) = self.transition_spent(&lot.id, Some(consumed)).await {
                    walk_failure = Some(err);
                    break;
                }
                lots_consumed += 1;
                remaining = 0;

                let remainder = CoinEntry {
                    id: String::new(),
                    user_id: lot.user_id.clone(),
                    amount: lot.amount - consumed,
                    kind: EntryKind::Earn,
                    reason: lot.reason.clone(),
                    earned_at: lot.earned_at,
                    expiry_at: lot.expiry_at,
                    status: LotStatus::Active,
                    metadata: lot.metadata.clone(),
                };
                match self
                    .retry
                    .run(|| self.store.create_coin(remainder.clone()))
                    .await
                {
                    Ok(created) => split_remainder = Some(created),
                    Err(err) => {
                        walk_failure = Some(err);
                        break;
                    }
                }
            }
        }

        // A lot raced away from active mid-walk (or the store gave out).
        // Lots drained so far are already committed as spent, so record a
        // spend transaction for that portion to keep the books consistent,
        // then report the failed step for the caller to compensate.
        if let Some(cause) = walk_failure {
            let consumed = amount - remaining;
            if consumed == 0 {
                return Err(cause);
            }
            if let Err(audit_err) = self
                .record_spend_transaction(user_id, consumed, reason)
                .await
            {
                tracing::error!(
                    user_id,
                    consumed,
                    error = %audit_err,
                    "aborted spend left consumed lots without a transaction"
                );
            }
            return Err(LedgerError::PartialFailure {
                step: "lot_consumption",
                cause: Box::new(cause),
            });
        }

        let transaction = self
            .record_spend_transaction(user_id, amount, reason)
            .await
            .map_err(|cause| LedgerError::PartialFailure {
                step: "spend_transaction",
                cause: Box::new(cause),
            })?;

        tracing::info!(user_id, amount, reason, lots_consumed, "coins spent");
        Ok(SpendResult {
            requested: amount,
            lots_consumed,
            split_remainder,
            transaction,
        })
    }

    /// Write the spend audit transaction for `amount` consumed coins and
    /// emit the matching event.
    async fn record_spend_transaction(
        &self,
        user_id: &str,
        amount: i64,
        reason: &str,
    ) -> Result<CoinEntry> {
        let audit = CoinEntry {
            id: String::new(),
            user_id: user_id.to_string(),
            amount: -amount,
            kind: EntryKind::Spend,
            reason: reason.to_string(),
            earned_at: self.clock.now(),
            expiry_at: None,
            status: LotStatus::Spent,
            metadata: None,
        };
        let transaction = self.retry.run(|| self.store.create_coin(audit.clone())).await?;
        self.events.emit(LedgerEvent::CoinsSpent {
            user_id: user_id.to_string(),
            amount: -amount,
            reason: reason.to_string(),
        });
        Ok(transaction)
    }

    /// Mark a lot spent, optionally rewriting its amount to the consumed
    /// portion (split case). A lot that raced away from active is a
    /// conflict, never a silent skip.
    async fn transition_spent(&self, lot_id: &str, consumed: Option<i64>) -> Result<()> {
        let patch = CoinPatch {
            status: Some(LotStatus::Spent),
            amount: consumed,
        };
        let outcome = self
            .retry
            .run(|| self.store.update_coin_if(lot_id, LotStatus::Active, patch.clone()))
            .await?;
        match outcome {
            UpdateOutcome::Applied => Ok(()),
            UpdateOutcome::Conflict => Err(LedgerError::Conflict(format!(
                "lot {lot_id} changed state during spend"
            ))),
        }
    }

    // ─── Balance & History ───────────────────────────────────────

    /// Aggregate a user's balance. Pure read; an empty ledger yields zeros,
    /// which is distinct from store unavailability (an error).
    pub async fn balance(&self, user_id: &str) -> Result<Balance> {
        if user_id.is_empty() {
            return Err(LedgerError::Validation("user_id must not be empty".into()));
        }

        let entries = self
            .collect_coins(CoinFilter::all_for_user(user_id), SortOrder::Asc)
            .await?;
        let horizon = self.clock.now() + Duration::days(self.config.expiring_soon_days);

        let mut balance = Balance::default();
        for entry in entries {
            match entry.kind {
                EntryKind::Earn if entry.status == LotStatus::Active => {
                    balance.active += entry.amount;
                    if entry.expiry_at.is_some_and(|expiry| expiry <= horizon) {
                        balance.expiring_soon += entry.amount;
                    }
                }
                EntryKind::Spend => balance.spent += entry.amount.abs(),
                EntryKind::Expire => balance.expired += entry.amount.abs(),
                EntryKind::Earn => {}
            }
        }
        balance.total = balance.active;
        Ok(balance)
    }

    /// Most-recent-first transaction history for display.
    pub async fn history(&self, user_id: &str, limit: usize) -> Result<Vec<CoinEntry>> {
        if user_id.is_empty() {
            return Err(LedgerError::Validation("user_id must not be empty".into()));
        }

        let mut entries = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .retry
                .run(|| {
                    self.store.query_coins(
                        CoinFilter::all_for_user(user_id),
                        SortOrder::Desc,
                        cursor.clone(),
                        self.config.store_page_size,
                    )
                })
                .await?;
            entries.extend(page.items);
            if entries.len() >= limit {
                entries.truncate(limit);
                return Ok(entries);
            }
            match page.next {
                Some(next) => cursor = Some(next),
                None => return Ok(entries),
            }
        }
    }

    // ─── Expiry ──────────────────────────────────────────────────

    /// Expire every active lot with `expiry_at <= now`, recording one expire
    /// transaction per lot. Returns the number of lots expired.
    ///
    /// Idempotent: lots already transitioned away from active no-op via the
    /// conditional update, so re-running with the same or later `now` never
    /// double-expires.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let due = self
            .collect_coins(CoinFilter::due_lots(now), SortOrder::Asc)
            .await?;
        if due.is_empty() {
            return Ok(0);
        }

        let outcomes: Vec<Result<bool>> = stream::iter(due)
            .map(|lot| self.expire_lot(lot))
            .buffer_unordered(MAX_CONCURRENT_SWEEP_OPS)
            .collect()
            .await;

        let mut expired = 0;
        for outcome in outcomes {
            if outcome? {
                expired += 1;
            }
        }
        tracing::info!(expired, "expiry sweep complete");
        Ok(expired)
    }

    /// Expire one lot. Returns false when the lot raced away from active
    /// (e.g. a concurrent spend), which leaves it untouched.
    async fn expire_lot(&self, lot: CoinEntry) -> Result<bool> {
        let patch = CoinPatch {
            status: Some(LotStatus::Expired),
            amount: None,
        };
        let outcome = self
            .retry
            .run(|| self.store.update_coin_if(&lot.id, LotStatus::Active, patch.clone()))
            .await?;
        if outcome == UpdateOutcome::Conflict {
            tracing::debug!(lot_id = %lot.id, "lot no longer active, sweep skipped it");
            return Ok(false);
        }

        let reason = format!(
            "Coins expired after {} months",
            self.config.retention_months
        );
        let audit = CoinEntry {
            id: String::new(),
            user_id: lot.user_id.clone(),
            amount: -lot.amount,
            kind: EntryKind::Expire,
            reason: reason.clone(),
            earned_at: self.clock.now(),
            expiry_at: None,
            status: LotStatus::Expired,
            metadata: None,
        };
        // The lot is already flipped; losing the audit insert is a partial
        // failure, not a plain store outage.
        self.retry
            .run(|| self.store.create_coin(audit.clone()))
            .await
            .map_err(|cause| LedgerError::PartialFailure {
                step: "expire_transaction",
                cause: Box::new(cause),
            })?;

        tracing::info!(user_id = %lot.user_id, amount = lot.amount, lot_id = %lot.id, "lot expired");
        self.events.emit(LedgerEvent::CoinsExpired {
            user_id: lot.user_id,
            amount: -lot.amount,
            reason,
        });
        Ok(true)
    }

    /// Per-user totals of active coins expiring within `within` of now,
    /// with each user's earliest expiry. Feeds notification collaborators.
    pub async fn expiring_soon_report(&self, within: Duration) -> Result<Vec<ExpiringCoins>> {
        let now = self.clock.now();
        let due = self
            .collect_coins(CoinFilter::due_lots(now + within), SortOrder::Asc)
            .await?;

        let mut per_user: BTreeMap<String, ExpiringCoins> = BTreeMap::new();
        for lot in due {
            let Some(expiry) = lot.expiry_at else { continue };
            if expiry <= now {
                // Already due; the sweeper will handle it.
                continue;
            }
            per_user
                .entry(lot.user_id.clone())
                .and_modify(|summary| {
                    summary.amount += lot.amount;
                    if expiry < summary.earliest_expiry {
                        summary.earliest_expiry = expiry;
                    }
                })
                .or_insert(ExpiringCoins {
                    user_id: lot.user_id,
                    amount: lot.amount,
                    earliest_expiry: expiry,
                });
        }
        Ok(per_user.into_values().collect())
    }

    // ─── Helpers ─────────────────────────────────────────────────

    /// Page through the store until the cursor is exhausted.
    async fn collect_coins(&self, filter: CoinFilter, sort: SortOrder) -> Result<Vec<CoinEntry>> {
        let mut all = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .retry
                .run(|| {
                    self.store.query_coins(
                        filter.clone(),
                        sort,
                        cursor.clone(),
                        self.config.store_page_size,
                    )
                })
                .await?;
            all.extend(page.items);
            match page.next {
                Some(next) => cursor = Some(next),
                None => return Ok(all),
            }
        }
    }
}

fn validate_user_and_amount(user_id: &str, amount: i64) -> Result<()> {
    if user_id.is_empty() {
        return Err(LedgerError::Validation("user_id must not be empty".into()));
    }
    if amount <= 0 {
        return Err(LedgerError::Validation(format!(
            "amount must be positive, got {amount}"
        )));
    }
    Ok(())
}
