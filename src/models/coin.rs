// SPDX-License-Identifier: MIT

//! Coin entries: earn lots and their spend/expire audit transactions.
//!
//! All entries live in the `coins` collection and are discriminated by
//! [`EntryKind`]. An `Earn` entry is a *lot*: a parcel of coins with its own
//! expiry clock, created only by `award` and consumed oldest-first. `Spend`
//! and `Expire` entries are immutable audit rows with negative amounts, one
//! per operation.

use crate::models::EntryMetadata;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Discriminates lots from audit transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Earn,
    Spend,
    Expire,
}

/// Lifecycle state of an earn lot.
///
/// Lots transition `Active -> Spent` (consumption) or `Active -> Expired`
/// (sweep) and are never resurrected. Audit entries carry the status that
/// matches their kind and never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LotStatus {
    Active,
    Spent,
    Expired,
}

/// One row in the coins collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinEntry {
    /// Store-assigned document id. Empty until the entry is created.
    #[serde(default)]
    pub id: String,
    pub user_id: String,
    /// Positive for earn lots, negative for spend/expire transactions.
    pub amount: i64,
    pub kind: EntryKind,
    pub reason: String,
    /// When the lot was earned. For audit entries this is the time the
    /// operation occurred; a split remainder inherits the original lot's
    /// value so it keeps its place in FIFO order.
    pub earned_at: DateTime<Utc>,
    /// Expiry deadline; present on earn lots only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_at: Option<DateTime<Utc>>,
    pub status: LotStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<EntryMetadata>,
}

impl CoinEntry {
    /// Whether this entry is a spendable lot.
    pub fn is_active_lot(&self) -> bool {
        self.kind == EntryKind::Earn && self.status == LotStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn entry_kind_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&EntryKind::Earn).unwrap(), "\"earn\"");
        assert_eq!(
            serde_json::to_string(&LotStatus::Active).unwrap(),
            "\"active\""
        );
    }

    #[test]
    fn active_lot_detection() {
        let earned = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut entry = CoinEntry {
            id: "coin-1".into(),
            user_id: "u1".into(),
            amount: 100,
            kind: EntryKind::Earn,
            reason: "signup".into(),
            earned_at: earned,
            expiry_at: Some(earned + chrono::Duration::days(365)),
            status: LotStatus::Active,
            metadata: None,
        };
        assert!(entry.is_active_lot());

        entry.status = LotStatus::Spent;
        assert!(!entry.is_active_lot());

        entry.status = LotStatus::Active;
        entry.kind = EntryKind::Spend;
        assert!(!entry.is_active_lot());
    }
}
