// SPDX-License-Identifier: MIT

//! Engine services.

pub mod ledger;
pub mod referral;
pub mod sweeper;

pub use ledger::{CoinLedger, ExpiringCoins, SpendResult};
pub use referral::ReferralEngine;
pub use sweeper::ExpirySweeper;
