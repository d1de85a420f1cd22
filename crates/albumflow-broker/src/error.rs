//! Error types for the broker subsystem.

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur while routing, queueing or settling messages.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The inbound notification is structurally invalid; redelivery cannot fix it.
    #[error("malformed event: {reason}")]
    MalformedEvent {
        /// What was missing or invalid.
        reason: String,
    },

    /// A subscription with this id is already registered.
    #[error("subscription already exists: {id}")]
    DuplicateSubscription {
        /// The conflicting subscription id.
        id: String,
    },

    /// No subscription with this id is registered.
    #[error("subscription not found: {id}")]
    SubscriptionNotFound {
        /// The unknown subscription id.
        id: String,
    },

    /// The envelope is not in flight (already settled, or never delivered).
    #[error("envelope {envelope_id} is not in flight")]
    UnknownReceipt {
        /// Envelope the receipt refers to.
        envelope_id: Uuid,
    },

    /// The receipt belongs to an earlier delivery of the envelope.
    #[error("stale receipt for envelope {envelope_id}: attempt {attempt}, current {current}")]
    StaleReceipt {
        /// Envelope the receipt refers to.
        envelope_id: Uuid,
        /// Attempt number carried by the receipt.
        attempt: u32,
        /// Attempt number of the current delivery.
        current: u32,
    },

    /// No dead-letter record with this envelope id is retained.
    #[error("dead-letter record not found: {envelope_id}")]
    DeadLetterNotFound {
        /// Envelope id that was looked up.
        envelope_id: Uuid,
    },

    /// The dead-letter record came from a different queue.
    #[error("dead-letter record {envelope_id} belongs to {source_queue}, not {target_queue}")]
    RedriveMismatch {
        /// Envelope id of the record.
        envelope_id: Uuid,
        /// Queue the record was dead-lettered from.
        source_queue: String,
        /// Queue the redrive was attempted on.
        target_queue: String,
    },

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using BrokerError as the error type.
pub type Result<T> = std::result::Result<T, BrokerError>;
