//! Outbound notifications.
//!
//! The pipeline only needs "send this message to the configured recipient".
//! Delivery is fire-and-forget: a failed send is logged by the caller and
//! never retried.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::error::{PipelineError, Result};

/// A rendered message ready to send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    /// Destination address.
    pub recipient: String,
    /// Source address.
    pub sender: String,
    /// Subject line.
    pub subject: String,
    /// HTML body.
    pub body_html: String,
}

impl Notification {
    /// Builds a notification whose body is `message` in a single paragraph.
    pub fn new(recipient: &str, sender: &str, subject: &str, message: &str) -> Self {
        Self {
            recipient: recipient.to_string(),
            sender: sender.to_string(),
            subject: subject.to_string(),
            body_html: render_paragraph(message),
        }
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Wraps an escaped message in a minimal HTML document.
pub fn render_paragraph(message: &str) -> String {
    format!(
        "<html>\n  <body>\n    <p style=\"font-size:18px\">{}</p>\n  </body>\n</html>\n",
        escape_html(message)
    )
}

/// Sends notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Sends one notification.
    async fn send(&self, notification: Notification) -> Result<()>;
}

/// Writes notifications to the log instead of a mail service.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: Notification) -> Result<()> {
        tracing::info!(
            "Notification to {} from {}: {}",
            notification.recipient,
            notification.sender,
            notification.subject
        );
        tracing::debug!("Notification body: {}", notification.body_html);
        Ok(())
    }
}

/// Keeps sent notifications in memory; can be switched to fail.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<Notification>>,
    failing: AtomicBool,
}

impl MemoryNotifier {
    /// Creates an empty notifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent sends fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every notification sent so far, in send order.
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Notifications sent with the given subject.
    pub fn with_subject(&self, subject: &str) -> Vec<Notification> {
        self.sent()
            .into_iter()
            .filter(|n| n.subject == subject)
            .collect()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn send(&self, notification: Notification) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PipelineError::Notify("mail service unavailable".to_string()));
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notification);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_escapes_markup() {
        let body = render_paragraph(r#"The image "<b>x</b>.png" & more"#);
        assert!(body.contains("&quot;&lt;b&gt;x&lt;/b&gt;.png&quot; &amp; more"));
        assert!(body.starts_with("<html>"));
    }

    #[test]
    fn test_notification_new() {
        let n = Notification::new("to@example.com", "from@example.com", "Image Added", "hello");
        assert_eq!(n.subject, "Image Added");
        assert!(n.body_html.contains("<p style=\"font-size:18px\">hello</p>"));
    }

    #[tokio::test]
    async fn test_memory_notifier_records_and_fails() {
        let notifier = MemoryNotifier::new();
        notifier
            .send(Notification::new("a", "b", "Image Added", "x"))
            .await
            .unwrap();
        notifier.set_failing(true);
        assert!(notifier
            .send(Notification::new("a", "b", "Image Deleted", "y"))
            .await
            .is_err());

        assert_eq!(notifier.sent().len(), 1);
        assert_eq!(notifier.with_subject("Image Added").len(), 1);
        assert!(notifier.with_subject("Image Deleted").is_empty());
    }

    #[tokio::test]
    async fn test_log_notifier_succeeds() {
        assert!(LogNotifier
            .send(Notification::new("a", "b", "s", "m"))
            .await
            .is_ok());
    }
}
