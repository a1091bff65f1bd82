// SPDX-License-Identifier: MIT

//! Domain events emitted by the ledger and referral engine.
//!
//! Events feed out-of-scope collaborators (notifications, analytics) and are
//! delivered best-effort: a missing or dropped subscriber never fails the
//! operation that produced the event.

use serde::Serialize;
use tokio::sync::mpsc;

/// An event describing a committed ledger or referral state change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    CoinsAwarded {
        user_id: String,
        amount: i64,
        reason: String,
    },
    CoinsSpent {
        user_id: String,
        amount: i64,
        reason: String,
    },
    CoinsExpired {
        user_id: String,
        amount: i64,
        reason: String,
    },
    ReferralAttributed {
        referrer_id: String,
        referred_user_id: String,
        referral_code: String,
    },
    ReferralRewarded {
        referrer_id: String,
        referred_user_id: String,
        amount: i64,
    },
}

/// Best-effort event publisher handed to the engine at construction.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<LedgerEvent>>,
}

impl EventSink {
    /// A sink that drops every event. Used when no collaborator subscribes.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// A sink backed by an unbounded channel, with its receiving half.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LedgerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Publish an event. Never fails; a closed receiver is logged and ignored.
    pub fn emit(&self, event: LedgerEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                tracing::debug!("event receiver dropped, discarding event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_sink_delivers_events() {
        let (sink, mut rx) = EventSink::channel();

        sink.emit(LedgerEvent::CoinsAwarded {
            user_id: "u1".into(),
            amount: 100,
            reason: "signup".into(),
        });

        let event = rx.recv().await.unwrap();
        assert!(matches!(
            event,
            LedgerEvent::CoinsAwarded { amount: 100, .. }
        ));
    }

    #[test]
    fn disabled_sink_and_closed_receiver_are_silent() {
        EventSink::disabled().emit(LedgerEvent::CoinsSpent {
            user_id: "u1".into(),
            amount: -10,
            reason: "redeem".into(),
        });

        let (sink, rx) = EventSink::channel();
        drop(rx);
        sink.emit(LedgerEvent::CoinsSpent {
            user_id: "u1".into(),
            amount: -10,
            reason: "redeem".into(),
        });
    }
}
