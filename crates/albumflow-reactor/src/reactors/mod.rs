//! Reactors: the domain actions triggered by broker deliveries.

pub mod change_notification;
pub mod creation;
pub mod deletion;
pub mod received;
pub mod update;

pub use change_notification::ChangeNotificationReactor;
pub use creation::CreationReactor;
pub use deletion::DeletionReactor;
pub use received::ReceivedReactor;
pub use update::UpdateReactor;

use albumflow_broker::{Envelope, FailureReason, PushSubscriber};
use async_trait::async_trait;
use std::sync::Arc;

use crate::outcome::ReactorOutcome;

/// Handles one delivered envelope and reports a tagged outcome.
#[async_trait]
pub trait Reactor: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Processes one envelope. Must be safe to run again for the same envelope.
    async fn handle(&self, envelope: &Envelope) -> ReactorOutcome;
}

/// Adapts a reactor to a push subscription.
pub struct ReactorSubscriber {
    reactor: Arc<dyn Reactor>,
}

impl ReactorSubscriber {
    /// Wraps `reactor`.
    pub fn new(reactor: Arc<dyn Reactor>) -> Self {
        Self { reactor }
    }
}

#[async_trait]
impl PushSubscriber for ReactorSubscriber {
    async fn deliver(&self, envelope: &Envelope) -> Result<(), FailureReason> {
        let outcome = self.reactor.handle(envelope).await;
        tracing::debug!(
            "{} handled {} (attempt {}): {}",
            self.reactor.name(),
            envelope.event.object_key,
            envelope.delivery_attempt,
            outcome
        );
        match outcome.failure_reason() {
            Some(reason) => Err(reason),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use albumflow_broker::{ChangeEvent, FailureKind};

    struct Fixed(ReactorOutcome);

    #[async_trait]
    impl Reactor for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn handle(&self, _envelope: &Envelope) -> ReactorOutcome {
            self.0.clone()
        }
    }

    fn envelope() -> Envelope {
        Envelope::new(ChangeEvent::removed("photos", "a.png"), "deletion")
    }

    #[tokio::test]
    async fn test_success_outcomes_acknowledge() {
        for outcome in [
            ReactorOutcome::Ok,
            ReactorOutcome::no_op("missing"),
            ReactorOutcome::dropped("malformed"),
        ] {
            let sub = ReactorSubscriber::new(Arc::new(Fixed(outcome)));
            assert!(sub.deliver(&envelope()).await.is_ok());
        }
    }

    #[tokio::test]
    async fn test_failure_outcome_fails_delivery() {
        let sub = ReactorSubscriber::new(Arc::new(Fixed(ReactorOutcome::DownstreamFailed {
            reason: "store down".to_string(),
        })));
        let err = sub.deliver(&envelope()).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::Downstream);
        assert_eq!(err.message, "store down");
    }
}
