//! Pipeline configuration, loaded from TOML or JSON.

use albumflow_broker::{BackoffConfig, QueueConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use crate::error::{PipelineError, Result};

/// Redelivery backoff settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffSettings {
    /// Delay before the first retry, in milliseconds.
    pub initial_ms: u64,
    /// Upper bound on a single delay, in milliseconds.
    pub max_ms: u64,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Add up to 50% random jitter.
    pub jitter: bool,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            initial_ms: 1_000,
            max_ms: 30_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl BackoffSettings {
    /// Converts to the broker's backoff policy.
    pub fn to_backoff(&self) -> BackoffConfig {
        BackoffConfig {
            initial: Duration::from_millis(self.initial_ms),
            max: Duration::from_millis(self.max_ms),
            multiplier: self.multiplier,
            jitter: self.jitter,
        }
    }
}

/// Settings for the creation queue and its worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Envelopes per poll.
    pub batch_size: usize,
    /// Longest wait to fill a batch, in seconds.
    pub max_batching_window_secs: u64,
    /// Lease duration of a delivered envelope, in seconds.
    pub visibility_timeout_secs: u64,
    /// Deliveries before an envelope is dead-lettered.
    pub max_receive_count: u32,
    /// Envelopes of one batch processed concurrently.
    pub parallelism: usize,
    /// Delay before a failed envelope is redelivered.
    pub backoff: BackoffSettings,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            batch_size: 5,
            max_batching_window_secs: 10,
            visibility_timeout_secs: 30,
            max_receive_count: 5,
            parallelism: 5,
            backoff: BackoffSettings::default(),
        }
    }
}

impl QueueSettings {
    /// Converts to the broker's queue configuration.
    pub fn to_queue_config(&self) -> QueueConfig {
        QueueConfig {
            batch_size: self.batch_size,
            max_batching_window: Duration::from_secs(self.max_batching_window_secs),
            visibility_timeout: Duration::from_secs(self.visibility_timeout_secs),
            max_receive_count: self.max_receive_count,
            redelivery: self.backoff.to_backoff(),
        }
    }
}

/// Settings for the dead-letter queue and the rejection worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadLetterSettings {
    /// How long dead-lettered envelopes are retained, in seconds.
    pub retention_secs: u64,
    /// Records per rejection batch.
    pub batch_size: usize,
    /// Longest wait to fill a rejection batch, in seconds.
    pub max_batching_window_secs: u64,
    /// Rejections sent concurrently.
    pub concurrency: usize,
}

impl Default for DeadLetterSettings {
    fn default() -> Self {
        Self {
            retention_secs: 600,
            batch_size: 5,
            max_batching_window_secs: 10,
            concurrency: 5,
        }
    }
}

/// Settings for push subscriptions (deletion and update).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushSettings {
    /// Attempts before a push delivery is dead-lettered.
    pub max_attempts: u32,
    /// Delay between attempts.
    pub backoff: BackoffSettings,
}

impl Default for PushSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffSettings::default(),
        }
    }
}

/// Notification addressing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierSettings {
    /// Address every notification is sent to.
    pub recipient: String,
    /// Address notifications are sent from.
    pub sender: String,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Logging settings; `RUST_LOG` overrides the filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Output format.
    pub format: LogFormat,
    /// Default filter directive.
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            filter: "info".to_string(),
        }
    }
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Broker topic name.
    pub topic: String,
    /// Container update requests are attributed to.
    pub container: String,
    /// Accepted image extensions, with leading dot.
    pub allowed_extensions: Vec<String>,
    /// Changes retained by the store's change log.
    pub change_log_capacity: usize,
    /// Creation queue settings.
    pub queue: QueueSettings,
    /// Dead-letter settings.
    pub dead_letter: DeadLetterSettings,
    /// Push subscription settings.
    pub push: PushSettings,
    /// Notification addressing.
    pub notifier: NotifierSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            topic: "images".to_string(),
            container: "images".to_string(),
            allowed_extensions: vec![".jpeg".to_string(), ".png".to_string()],
            change_log_capacity: 10_000,
            queue: QueueSettings::default(),
            dead_letter: DeadLetterSettings::default(),
            push: PushSettings::default(),
            notifier: NotifierSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl PipelineConfig {
    /// Loads a configuration file, choosing the format by extension.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => Ok(toml::from_str(&contents)?),
            "json" => Ok(serde_json::from_str(&contents)?),
            _ => Err(PipelineError::UnsupportedConfigFormat(ext.to_string())),
        }
    }

    /// Dead-letter retention window.
    pub fn dead_letter_retention(&self) -> Duration {
        Duration::from_secs(self.dead_letter.retention_secs)
    }

    /// Dead-letter batching window.
    pub fn dead_letter_window(&self) -> Duration {
        Duration::from_secs(self.dead_letter.max_batching_window_secs)
    }

    /// Checks every setting the pipeline relies on.
    pub fn validate(&self) -> Result<()> {
        fn invalid(msg: impl Into<String>) -> Result<()> {
            Err(PipelineError::Config(msg.into()))
        }

        if self.topic.is_empty() {
            return invalid("topic must not be empty");
        }
        if self.allowed_extensions.is_empty() {
            return invalid("allowed_extensions must not be empty");
        }
        for ext in &self.allowed_extensions {
            if !ext.starts_with('.') || ext.len() < 2 || ext[1..].contains('.') {
                return invalid(format!(
                    "allowed extension {:?} must be a dot followed by a name",
                    ext
                ));
            }
        }
        if self.change_log_capacity == 0 {
            return invalid("change_log_capacity must be at least 1");
        }
        if self.queue.batch_size == 0 || self.queue.parallelism == 0 {
            return invalid("queue batch_size and parallelism must be at least 1");
        }
        if self.queue.max_receive_count == 0 {
            return invalid("queue max_receive_count must be at least 1");
        }
        if self.queue.visibility_timeout_secs == 0 {
            return invalid("queue visibility_timeout_secs must be at least 1");
        }
        if self.queue.max_batching_window_secs == 0
            || self.dead_letter.max_batching_window_secs == 0
        {
            return invalid("batching windows must be at least 1 second");
        }
        if self.dead_letter.batch_size == 0 || self.dead_letter.concurrency == 0 {
            return invalid("dead_letter batch_size and concurrency must be at least 1");
        }
        if self.push.max_attempts == 0 {
            return invalid("push max_attempts must be at least 1");
        }
        for backoff in [&self.queue.backoff, &self.push.backoff] {
            if backoff.multiplier < 1.0 {
                return invalid("backoff multiplier must be at least 1.0");
            }
            if backoff.initial_ms > backoff.max_ms {
                return invalid("backoff initial_ms must not exceed max_ms");
            }
        }
        if self.notifier.recipient.is_empty() || self.notifier.sender.is_empty() {
            return invalid("notifier recipient and sender must be set");
        }
        if let Err(e) = EnvFilter::try_new(&self.logging.filter) {
            return invalid(format!("logging filter {:?}: {}", self.logging.filter, e));
        }
        Ok(())
    }
}
