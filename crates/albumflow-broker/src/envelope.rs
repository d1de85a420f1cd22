//! Delivery envelopes and settlement receipts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::event::ChangeEvent;

/// Classification of a processing failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// The object failed a content check; retrying will not help.
    Validation,
    /// A downstream dependency (store, notifier) failed.
    Downstream,
    /// The consumer did not settle the envelope within its visibility timeout.
    Expired,
}

/// Why an envelope was failed, captured at the point of failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    /// Failure classification.
    pub kind: FailureKind,
    /// Human-readable detail.
    pub message: String,
}

impl FailureReason {
    /// A content validation failure.
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Validation,
            message: message.into(),
        }
    }

    /// A downstream dependency failure.
    pub fn downstream(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Downstream,
            message: message.into(),
        }
    }

    /// A visibility timeout expiry.
    pub fn expired(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Expired,
            message: message.into(),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// A change event on its way to one subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique id, stable across redeliveries.
    pub id: Uuid,
    /// The wrapped event.
    pub event: ChangeEvent,
    /// Number of times this envelope has been handed to a consumer.
    pub delivery_attempt: u32,
    /// Subscription the envelope was fanned out to.
    pub subscriber_id: String,
    /// When the broker created the envelope.
    pub received_at: DateTime<Utc>,
    /// Failure recorded on the most recent failed attempt.
    pub last_failure: Option<FailureReason>,
}

impl Envelope {
    /// Wraps an event for a subscriber; no delivery has happened yet.
    pub fn new(event: ChangeEvent, subscriber_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event,
            delivery_attempt: 0,
            subscriber_id: subscriber_id.into(),
            received_at: Utc::now(),
            last_failure: None,
        }
    }

    /// Receipt identifying the current delivery of this envelope.
    pub fn receipt(&self) -> Receipt {
        Receipt {
            envelope_id: self.id,
            attempt: self.delivery_attempt,
        }
    }
}

/// Handle used to ack or fail one delivery of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Receipt {
    /// Envelope being settled.
    pub envelope_id: Uuid,
    /// Delivery attempt the receipt was issued for.
    pub attempt: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_envelope_has_no_attempts() {
        let env = Envelope::new(ChangeEvent::created("photos", "a.png"), "creation-queue");
        assert_eq!(env.delivery_attempt, 0);
        assert_eq!(env.subscriber_id, "creation-queue");
        assert!(env.last_failure.is_none());
    }

    #[test]
    fn test_receipt_tracks_attempt() {
        let mut env = Envelope::new(ChangeEvent::created("photos", "a.png"), "q");
        env.delivery_attempt = 3;
        let receipt = env.receipt();
        assert_eq!(receipt.envelope_id, env.id);
        assert_eq!(receipt.attempt, 3);
    }

    #[test]
    fn test_failure_reason_display() {
        let reason = FailureReason::validation("Unsupported image type: pdf.");
        assert_eq!(reason.to_string(), "Validation: Unsupported image type: pdf.");
        assert_eq!(FailureReason::downstream("x").kind, FailureKind::Downstream);
        assert_eq!(FailureReason::expired("x").kind, FailureKind::Expired);
    }
}
