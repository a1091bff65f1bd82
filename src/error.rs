// SPDX-License-Identifier: MIT

//! Ledger error taxonomy.
//!
//! Every operation returns [`Result`]; callers branch on the error kind.
//! Only [`LedgerError::StoreUnavailable`] is transient and eligible for
//! retry; all other kinds are terminal and returned immediately.

/// Errors produced by ledger and referral operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Malformed input: non-positive amount, empty user id, invalid metadata.
    #[error("invalid request: {0}")]
    Validation(String),

    /// A spend exceeded the user's active balance. No writes were made.
    #[error("insufficient coins: {available} available, {requested} requested")]
    InsufficientFunds { available: i64, requested: i64 },

    /// Unknown referral code, or a record that disappeared mid-operation.
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate referral attribution, or a conditional update lost a race.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Transient record-store failure. Retried internally with backoff.
    #[error("record store unavailable: {0}")]
    StoreUnavailable(String),

    /// A later step of a multi-step operation failed after earlier writes
    /// had already committed. The engine does not roll back; the caller
    /// decides on compensating action.
    #[error("step '{step}' failed after earlier writes were committed")]
    PartialFailure {
        step: &'static str,
        #[source]
        cause: Box<LedgerError>,
    },

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl LedgerError {
    /// Whether the error is a transient I/O failure worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::StoreUnavailable(_))
    }
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, LedgerError>;
