// SPDX-License-Identifier: MIT

//! Referral engine: code issuance, one-time attribution, and exactly-once
//! reward firing.
//!
//! State machine: `Pending -> Rewarded`, terminal. The reward transition is
//! a single conditional update, so concurrent duplicate calls collapse to
//! one effective payout.

use crate::clock::Clock;
use crate::config::LedgerConfig;
use crate::error::{LedgerError, Result};
use crate::events::{EventSink, LedgerEvent};
use crate::models::{EntryMetadata, ReferralRecord, ReferralStats, ReferralStatus};
use crate::retry::RetryPolicy;
use crate::services::CoinLedger;
use crate::store::{RecordStore, ReferralFilter, ReferralPatch, UpdateOutcome};
use chrono::Datelike;
use std::sync::Arc;

/// The referral engine.
#[derive(Clone)]
pub struct ReferralEngine {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    ledger: CoinLedger,
    config: LedgerConfig,
    events: EventSink,
    retry: RetryPolicy,
}

impl ReferralEngine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
        ledger: CoinLedger,
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
            ledger,
            config,
            events,
            retry,
        }
    }

    // ─── Code Issuance ───────────────────────────────────────────

    /// Derive a user's referral code: configured prefix plus the first six
    /// characters of the user id, uppercased. Pure and deterministic; used
    /// both to mint codes and to verify them.
    pub fn referral_code_for(&self, user_id: &str) -> String {
        let short: String = user_id.chars().take(6).collect::<String>().to_uppercase();
        format!("{}{}", self.config.referral_code_prefix, short)
    }

    /// Idempotent get-or-create of the user's issuance record.
    pub async fn ensure_referral_code(&self, user_id: &str) -> Result<String> {
        if user_id.is_empty() {
            return Err(LedgerError::Validation("user_id must not be empty".into()));
        }

        let existing = self
            .find_one(ReferralFilter {
                referrer_id: Some(user_id.to_string()),
                issuance_only: true,
                ..ReferralFilter::default()
            })
            .await?;
        if let Some(record) = existing {
            return Ok(record.referral_code);
        }

        let code = self.referral_code_for(user_id);
        let record = ReferralRecord {
            id: String::new(),
            referrer_id: user_id.to_string(),
            referred_user_id: None,
            referral_code: code.clone(),
            status: ReferralStatus::Pending,
            coins_awarded: 0,
            created_at: self.clock.now(),
            first_reward_at: None,
        };
        match self.retry.run(|| self.store.create_referral(record.clone())).await {
            Ok(created) => {
                tracing::info!(user_id, code = %created.referral_code, "referral code issued");
                Ok(created.referral_code)
            }
            // A concurrent call created the issuance record first; the code
            // is deterministic, so theirs is ours.
            Err(LedgerError::Conflict(_)) => Ok(code),
            Err(err) => Err(err),
        }
    }

    // ─── Attribution ─────────────────────────────────────────────

    /// Link a new user to the referrer whose code they signed up with, and
    /// pay the new user the welcome bonus.
    ///
    /// The attribution insert and the bonus award are two writes; if the
    /// award fails after the attribution committed, the error names the
    /// failed step so the caller can compensate.
    pub async fn attribute_referral(
        &self,
        code: &str,
        new_user_id: &str,
    ) -> Result<ReferralRecord> {
        if code.is_empty() || new_user_id.is_empty() {
            return Err(LedgerError::Validation(
                "referral code and user_id must not be empty".into(),
            ));
        }

        let issuance = self
            .find_one(ReferralFilter {
                referral_code: Some(code.to_string()),
                issuance_only: true,
                ..ReferralFilter::default()
            })
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("referral code {code}")))?;

        // Friendly pre-check; the store's insert-time uniqueness constraint
        // is what actually holds under concurrency.
        let already = self
            .find_one(ReferralFilter {
                referred_user_id: Some(new_user_id.to_string()),
                ..ReferralFilter::default()
            })
            .await?;
        if already.is_some() {
            return Err(LedgerError::Conflict(format!(
                "user {new_user_id} already has a referral attribution"
            )));
        }

        let record = ReferralRecord {
            id: String::new(),
            referrer_id: issuance.referrer_id.clone(),
            referred_user_id: Some(new_user_id.to_string()),
            referral_code: code.to_string(),
            status: ReferralStatus::Pending,
            coins_awarded: 0,
            created_at: self.clock.now(),
            first_reward_at: None,
        };
        let attribution = self
            .retry
            .run(|| self.store.create_referral(record.clone()))
            .await?;

        self.ledger
            .award(
                new_user_id,
                self.config.welcome_bonus,
                "Welcome bonus from referral",
                Some(EntryMetadata::Referral {
                    referral_code: code.to_string(),
                    referred_user_id: None,
                }),
            )
            .await
            .map_err(|cause| LedgerError::PartialFailure {
                step: "welcome_bonus",
                cause: Box::new(cause),
            })?;

        tracing::info!(
            referrer_id = %attribution.referrer_id,
            referred_user_id = new_user_id,
            code,
            "referral attributed"
        );
        self.events.emit(LedgerEvent::ReferralAttributed {
            referrer_id: attribution.referrer_id.clone(),
            referred_user_id: new_user_id.to_string(),
            referral_code: code.to_string(),
        });
        Ok(attribution)
    }

    // ─── Reward ──────────────────────────────────────────────────

    /// Fire the referral reward for a referred user's qualifying event
    /// (e.g. first completed booking).
    ///
    /// Returns `false` when there is nothing to reward: never referred,
    /// already rewarded, or a concurrent call won the transition. The
    /// conditional `Pending -> Rewarded` update gates the payout, so the
    /// referrer is credited exactly once.
    pub async fn reward_referral(&self, referred_user_id: &str) -> Result<bool> {
        if referred_user_id.is_empty() {
            return Err(LedgerError::Validation("user_id must not be empty".into()));
        }

        let attribution = match self
            .find_one(ReferralFilter {
                referred_user_id: Some(referred_user_id.to_string()),
                ..ReferralFilter::default()
            })
            .await?
        {
            None => {
                tracing::debug!(referred_user_id, "no reward: user was never referred");
                return Ok(false);
            }
            Some(record) if record.status != ReferralStatus::Pending => {
                tracing::debug!(referred_user_id, "no reward: referral already rewarded");
                return Ok(false);
            }
            Some(record) => record,
        };

        let now = self.clock.now();
        let patch = ReferralPatch {
            status: Some(ReferralStatus::Rewarded),
            coins_awarded: Some(self.config.referral_reward),
            first_reward_at: Some(now),
        };
        let outcome = self
            .retry
            .run(|| {
                self.store
                    .update_referral_if(&attribution.id, ReferralStatus::Pending, patch.clone())
            })
            .await?;
        if outcome == UpdateOutcome::Conflict {
            tracing::debug!(referred_user_id, "no reward: lost the transition race");
            return Ok(false);
        }

        self.ledger
            .award(
                &attribution.referrer_id,
                self.config.referral_reward,
                &format!("Referral reward - {referred_user_id} completed first booking"),
                Some(EntryMetadata::Referral {
                    referral_code: attribution.referral_code.clone(),
                    referred_user_id: Some(referred_user_id.to_string()),
                }),
            )
            .await
            .map_err(|cause| LedgerError::PartialFailure {
                step: "referrer_reward",
                cause: Box::new(cause),
            })?;

        tracing::info!(
            referrer_id = %attribution.referrer_id,
            referred_user_id,
            amount = self.config.referral_reward,
            "referral rewarded"
        );
        self.events.emit(LedgerEvent::ReferralRewarded {
            referrer_id: attribution.referrer_id,
            referred_user_id: referred_user_id.to_string(),
            amount: self.config.referral_reward,
        });
        Ok(true)
    }

    // ─── Stats ───────────────────────────────────────────────────

    /// Aggregate a referrer's attribution figures.
    pub async fn referral_stats(&self, user_id: &str) -> Result<ReferralStats> {
        if user_id.is_empty() {
            return Err(LedgerError::Validation("user_id must not be empty".into()));
        }

        let records = self
            .collect_referrals(ReferralFilter {
                referrer_id: Some(user_id.to_string()),
                ..ReferralFilter::default()
            })
            .await?;

        let now = self.clock.now();
        let mut stats = ReferralStats::default();
        for record in records.iter().filter(|r| !r.is_issuance()) {
            stats.total_referred += 1;
            if record.created_at.year() == now.year() && record.created_at.month() == now.month() {
                stats.this_month += 1;
            }
            if record.status == ReferralStatus::Rewarded {
                stats.rewarded += 1;
                stats.coins_earned += record.coins_awarded;
            }
        }
        Ok(stats)
    }

    // ─── Helpers ─────────────────────────────────────────────────

    /// First record matching `filter`, if any.
    async fn find_one(&self, filter: ReferralFilter) -> Result<Option<ReferralRecord>> {
        let page = self
            .retry
            .run(|| self.store.query_referrals(filter.clone(), None, 1))
            .await?;
        Ok(page.items.into_iter().next())
    }

    /// Page through the store until the cursor is exhausted.
    async fn collect_referrals(&self, filter: ReferralFilter) -> Result<Vec<ReferralRecord>> {
        let mut all = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .retry
                .run(|| {
                    self.store.query_referrals(
                        filter.clone(),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::store::MemoryStore;

    fn engine() -> ReferralEngine {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(SystemClock);
        let config = LedgerConfig::test_default();
        let ledger = CoinLedger::new(
            store.clone(),
            clock.clone(),
            config.clone(),
            EventSink::disabled(),
        );
        ReferralEngine::new(store, clock, ledger, config, EventSink::disabled())
    }

    #[test]
    fn referral_code_is_deterministic() {
        let engine = engine();
        assert_eq!(engine.referral_code_for("abcdef123456"), "INDAABCDEF");
        assert_eq!(engine.referral_code_for("abcdef123456"), "INDAABCDEF");
    }

    #[test]
    fn referral_code_handles_short_ids() {
        let engine = engine();
        assert_eq!(engine.referral_code_for("ab"), "INDAAB");
    }
}
