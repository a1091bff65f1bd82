// SPDX-License-Identifier: MIT

//! Stored and derived data models.

pub mod balance;
pub mod coin;
pub mod metadata;
pub mod referral;

pub use balance::Balance;
pub use coin::{CoinEntry, EntryKind, LotStatus};
pub use metadata::EntryMetadata;
pub use referral::{ReferralRecord, ReferralStats, ReferralStatus};
