//! Received Reactor: acknowledges every uploaded object as soon as it is
//! published, before the creation queue validates it.

use albumflow_broker::{Envelope, EventKind};
use async_trait::async_trait;
use std::sync::Arc;

use super::Reactor;
use crate::key::decode_object_key;
use crate::notifier::{Notification, Notifier};
use crate::outcome::ReactorOutcome;

/// Subject of an upload acknowledgement.
pub const SUBJECT_RECEIVED: &str = "Image Received Confirmation";

/// Mails the recipient the storage URL of each new object.
pub struct ReceivedReactor {
    notifier: Arc<dyn Notifier>,
    recipient: String,
    sender: String,
}

impl ReceivedReactor {
    /// Creates the reactor.
    pub fn new(notifier: Arc<dyn Notifier>, recipient: &str, sender: &str) -> Self {
        Self {
            notifier,
            recipient: recipient.to_string(),
            sender: sender.to_string(),
        }
    }

    /// Acknowledgement for `envelope`. Keys that do not decode are quoted raw.
    pub fn acknowledgement(&self, envelope: &Envelope) -> Notification {
        let event = &envelope.event;
        let key = decode_object_key(&event.object_key).unwrap_or_else(|_| event.object_key.clone());
        let message = format!(
            "We received your image. Its URL is s3://{}/{}",
            event.source_container, key
        );
        Notification::new(&self.recipient, &self.sender, SUBJECT_RECEIVED, &message)
    }
}

#[async_trait]
impl Reactor for ReceivedReactor {
    fn name(&self) -> &'static str {
        "received"
    }

    async fn handle(&self, envelope: &Envelope) -> ReactorOutcome {
        if envelope.event.kind != EventKind::Created {
            return ReactorOutcome::dropped(format!(
                "not a create event: {}",
                envelope.event.kind.as_str()
            ));
        }
        let notification = self.acknowledgement(envelope);
        if let Err(e) = self.notifier.send(notification).await {
            tracing::error!(
                "Failed to acknowledge {}: {}",
                envelope.event.object_key,
                e
            );
        }
        ReactorOutcome::Ok
    }
}
