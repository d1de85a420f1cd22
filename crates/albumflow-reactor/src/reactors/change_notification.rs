//! Change-Notification Reactor.
//!
//! Two independent triggers: store changes produce confirmations ("Image
//! Added" / "Image Deleted"), dead-lettered envelopes produce rejections
//! ("Image Rejected"). Send failures are logged and never retried.

use albumflow_broker::{DeadLetterRecord, FailureKind};
use albumflow_meta::{ChangeKind, ChangeRecord};
use std::sync::Arc;

use crate::key::decode_object_key;
use crate::notifier::{Notification, Notifier};

/// Subject of a creation confirmation.
pub const SUBJECT_ADDED: &str = "Image Added";
/// Subject of a deletion confirmation.
pub const SUBJECT_DELETED: &str = "Image Deleted";
/// Subject of a rejection.
pub const SUBJECT_REJECTED: &str = "Image Rejected";

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// Sends confirmations and rejections to the configured recipient.
pub struct ChangeNotificationReactor {
    notifier: Arc<dyn Notifier>,
    recipient: String,
    sender: String,
}

impl ChangeNotificationReactor {
    /// Creates the reactor.
    pub fn new(notifier: Arc<dyn Notifier>, recipient: &str, sender: &str) -> Self {
        Self {
            notifier,
            recipient: recipient.to_string(),
            sender: sender.to_string(),
        }
    }

    /// Confirmation for a store change; `None` for modifications.
    pub fn confirmation(&self, change: &ChangeRecord) -> Option<Notification> {
        let when = change.timestamp.format(TIME_FORMAT);
        let (subject, message) = match change.kind {
            ChangeKind::Insert => (
                SUBJECT_ADDED,
                format!("The image \"{}\" was added at {}", change.key, when),
            ),
            ChangeKind::Remove => (
                SUBJECT_DELETED,
                format!("The image \"{}\" was deleted at {}", change.key, when),
            ),
            ChangeKind::Modify => return None,
        };
        Some(Notification::new(
            &self.recipient,
            &self.sender,
            subject,
            &message,
        ))
    }

    /// Rejection for a dead-lettered envelope, worded by failure kind.
    pub fn rejection(&self, record: &DeadLetterRecord) -> Notification {
        let event = &record.envelope.event;
        let key = decode_object_key(&event.object_key).unwrap_or_else(|_| event.object_key.clone());
        let bucket = &event.source_container;
        let attempts = record.envelope.delivery_attempt;

        let message = match record.reason.kind {
            FailureKind::Validation => format!(
                "The image \"{}\" could not be processed in bucket \"{}\": {}",
                key, bucket, record.reason.message
            ),
            FailureKind::Downstream => format!(
                "The image \"{}\" in bucket \"{}\" could not be processed after {} attempts: {}",
                key, bucket, attempts, record.reason.message
            ),
            FailureKind::Expired => format!(
                "The image \"{}\" in bucket \"{}\" was not processed in time after {} attempts",
                key, bucket, attempts
            ),
        };
        Notification::new(&self.recipient, &self.sender, SUBJECT_REJECTED, &message)
    }

    /// Sends the confirmation for `change`, if any. Returns what was attempted.
    pub async fn confirm(&self, change: &ChangeRecord) -> Option<Notification> {
        let notification = self.confirmation(change)?;
        self.send(notification.clone()).await;
        Some(notification)
    }

    /// Sends the rejection for `record`. Returns what was attempted.
    pub async fn reject(&self, record: &DeadLetterRecord) -> Notification {
        let notification = self.rejection(record);
        self.send(notification.clone()).await;
        notification
    }

    async fn send(&self, notification: Notification) {
        let subject = notification.subject.clone();
        if let Err(e) = self.notifier.send(notification).await {
            tracing::error!("Failed to send \"{}\" notification: {}", subject, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::MemoryNotifier;
    use albumflow_broker::{ChangeEvent, Envelope, FailureReason};
    use albumflow_meta::MetadataRecord;
    use chrono::{TimeZone, Utc};

    fn reactor() -> (ChangeNotificationReactor, Arc<MemoryNotifier>) {
        let notifier = Arc::new(MemoryNotifier::new());
        (
            ChangeNotificationReactor::new(
                notifier.clone(),
                "owner@example.com",
                "albums@example.com",
            ),
            notifier,
        )
    }

    fn change(kind: ChangeKind, key: &str) -> ChangeRecord {
        ChangeRecord {
            sequence: 1,
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap(),
            kind,
            key: key.to_string(),
            old: None,
            new: Some(MetadataRecord::new(key)),
        }
    }

    fn dead_letter(key: &str, reason: FailureReason) -> DeadLetterRecord {
        let mut envelope = Envelope::new(ChangeEvent::created("uploads", key), "creation-queue");
        envelope.delivery_attempt = 5;
        DeadLetterRecord {
            envelope,
            reason,
            source_queue: "creation-queue".to_string(),
            dead_lettered_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_insert_confirmation() {
        let (reactor, notifier) = reactor();
        let sent = reactor.confirm(&change(ChangeKind::Insert, "vacation photo.png")).await;
        let sent = sent.unwrap();
        assert_eq!(sent.subject, SUBJECT_ADDED);
        assert_eq!(sent.recipient, "owner@example.com");
        assert_eq!(sent.sender, "albums@example.com");
        assert!(sent.body_html.contains(
            "The image &quot;vacation photo.png&quot; was added at 2024-03-01 12:30:00 UTC"
        ));
        assert_eq!(notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_confirmation() {
        let (reactor, _) = reactor();
        let sent = reactor.confirm(&change(ChangeKind::Remove, "a.png")).await.unwrap();
        assert_eq!(sent.subject, SUBJECT_DELETED);
        assert!(sent.body_html.contains("was deleted at"));
    }

    #[tokio::test]
    async fn test_modify_sends_nothing() {
        let (reactor, notifier) = reactor();
        assert!(reactor.confirm(&change(ChangeKind::Modify, "a.png")).await.is_none());
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_validation_rejection_names_object_and_bucket() {
        let (reactor, _) = reactor();
        let sent = reactor
            .reject(&dead_letter(
                "doc.pdf",
                FailureReason::validation("Unsupported image type: pdf."),
            ))
            .await;
        assert_eq!(sent.subject, SUBJECT_REJECTED);
        assert!(sent.body_html.contains("doc.pdf"));
        assert!(sent.body_html.contains("uploads"));
        assert!(sent.body_html.contains("Unsupported image type: pdf."));
    }

    #[test]
    fn test_rejection_wording_by_kind() {
        let (reactor, _) = reactor();
        let downstream =
            reactor.rejection(&dead_letter("a+b.png", FailureReason::downstream("offline")));
        assert!(downstream.body_html.contains("a b.png"));
        assert!(downstream.body_html.contains("after 5 attempts: offline"));

        let expired = reactor.rejection(&dead_letter("a.png", FailureReason::expired("lease")));
        assert!(expired.body_html.contains("was not processed in time"));
    }

    #[tokio::test]
    async fn test_send_failure_is_swallowed() {
        let (reactor, notifier) = reactor();
        notifier.set_failing(true);
        let sent = reactor.confirm(&change(ChangeKind::Insert, "a.png")).await;
        assert!(sent.is_some());
        assert!(notifier.sent().is_empty());
    }
}
