#![warn(missing_docs)]

//! AlbumFlow broker subsystem: change events, subscriber filters, fan-out, queues and dead letters

pub mod backoff;
pub mod broker;
pub mod dead_letter;
pub mod envelope;
pub mod error;
pub mod event;
pub mod filter;
pub mod queue;

pub use backoff::BackoffConfig;
pub use broker::{
    Broker, BrokerStats, DeliveryResult, PublishSummary, PushSubscriber, SubscriberTarget,
    Subscription,
};
pub use dead_letter::{DeadLetterQueue, DeadLetterRecord};
pub use envelope::{Envelope, FailureKind, FailureReason, Receipt};
pub use error::{BrokerError, Result};
pub use event::{parse_notification, ChangeEvent, EventKind, UpdateRequest};
pub use filter::{FilterSpec, MatchRule};
pub use queue::{Disposition, QueueConfig, QueueDepth, QueueStats, SubscriptionQueue};
