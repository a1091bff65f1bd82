// SPDX-License-Identifier: MIT

//! Structured metadata attached to coin entries.
//!
//! One tagged variant per earn-reason category, validated at the boundary.
//! The ledger itself treats metadata as opaque: a split remainder lot
//! inherits it verbatim.

use crate::error::{LedgerError, Result};
use serde::{Deserialize, Serialize};

/// Tagged metadata for a coin entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryMetadata {
    /// Daily sign-in award, tracking the streak that earned it.
    SignIn { day_streak: u32 },
    /// Booking-completion award.
    Booking {
        booking_number: u32,
        first_booking: bool,
    },
    /// Referral welcome bonus or referrer reward.
    Referral {
        referral_code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        referred_user_id: Option<String>,
    },
    /// Escape hatch for callers with categories the ledger does not model.
    Other { data: serde_json::Value },
}

impl EntryMetadata {
    /// Validate boundary constraints before the entry is written.
    pub fn validate(&self) -> Result<()> {
        match self {
            EntryMetadata::SignIn { day_streak } if *day_streak == 0 => Err(
                LedgerError::Validation("sign-in day_streak must be at least 1".into()),
            ),
            EntryMetadata::Booking { booking_number, .. } if *booking_number == 0 => Err(
                LedgerError::Validation("booking_number must be at least 1".into()),
            ),
            EntryMetadata::Referral { referral_code, .. } if referral_code.is_empty() => Err(
                LedgerError::Validation("referral_code must not be empty".into()),
            ),
            _ => Ok(()),
        }
    }
}
