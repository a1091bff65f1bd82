// SPDX-License-Identifier: MIT

//! Referral records and the attribution/reward state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Referral state machine: `Pending -> Rewarded`, terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferralStatus {
    Pending,
    Rewarded,
}

/// One row in the referrals collection.
///
/// Two shapes share the collection:
/// - *issuance* records (`referred_user_id` absent) mint a referrer's code;
///   at most one per referrer.
/// - *attribution* records (`referred_user_id` present) link a new user to
///   the referrer whose code they used; at most one per referred user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferralRecord {
    /// Store-assigned document id. Empty until the record is created.
    #[serde(default)]
    pub id: String,
    pub referrer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referred_user_id: Option<String>,
    pub referral_code: String,
    pub status: ReferralStatus,
    /// Coins paid to the referrer; 0 until the referral is rewarded.
    pub coins_awarded: i64,
    pub created_at: DateTime<Utc>,
    /// When the qualifying event fired the reward.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_reward_at: Option<DateTime<Utc>>,
}

impl ReferralRecord {
    /// Whether this is an issuance record (code minting, no referred user).
    pub fn is_issuance(&self) -> bool {
        self.referred_user_id.is_none()
    }
}

/// Aggregated referral figures for a referrer's dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReferralStats {
    /// Users attributed to this referrer.
    pub total_referred: u32,
    /// Attributions that have paid out.
    pub rewarded: u32,
    /// Coins earned from rewarded referrals.
    pub coins_earned: i64,
    /// Attributions created in the current calendar month.
    pub this_month: u32,
}
