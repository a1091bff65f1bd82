// SPDX-License-Identifier: MIT

//! Derived balance aggregate. Never stored; recomputed from coin entries.

use serde::{Deserialize, Serialize};

/// A user's coin balance, aggregated from their coin entries.
///
/// `total` always equals `active`; it exists so API consumers get one
/// obvious number to display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Spendable coins (sum of active earn-lot amounts).
    pub total: i64,
    /// Same as `total`.
    pub active: i64,
    /// Lifetime coins lost to expiry (sum of |expire amounts|).
    pub expired: i64,
    /// Lifetime coins redeemed (sum of |spend amounts|).
    pub spent: i64,
    /// Active coins whose expiry falls within the configured horizon.
    pub expiring_soon: i64,
}
