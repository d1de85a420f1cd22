//! Error types for the reactor subsystem.

use albumflow_broker::BrokerError;
use albumflow_meta::MetaError;
use thiserror::Error;

/// Errors raised while configuring or running the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The configuration failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The configuration file has an extension other than `.toml` or `.json`.
    #[error("unsupported config file extension: {0}")]
    UnsupportedConfigFormat(String),

    /// An object key could not be decoded.
    #[error("undecodable object key {key}: {reason}")]
    UndecodableKey {
        /// The raw key as received.
        key: String,
        /// Why decoding failed.
        reason: String,
    },

    /// The notifier failed to send a message.
    #[error("notification failed: {0}")]
    Notify(String),

    /// Shared clients were requested before they were installed.
    #[error("shared clients are not installed")]
    ClientsNotInstalled,

    /// Shared clients were installed twice.
    #[error("shared clients are already installed")]
    ClientsAlreadyInstalled,

    /// Broker error.
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    /// Metadata store error.
    #[error("metadata error: {0}")]
    Meta(#[from] MetaError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parse error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result type alias using PipelineError as the error type.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undecodable_key_display() {
        let err = PipelineError::UndecodableKey {
            key: "%ff.png".to_string(),
            reason: "invalid utf-8".to_string(),
        };
        assert_eq!(err.to_string(), "undecodable object key %ff.png: invalid utf-8");
    }

    #[test]
    fn test_broker_error_converts() {
        let err: PipelineError = BrokerError::SubscriptionNotFound {
            id: "x".to_string(),
        }
        .into();
        assert!(matches!(err, PipelineError::Broker(_)));
    }

    #[test]
    fn test_meta_error_converts() {
        let err: PipelineError = MetaError::EmptyKey.into();
        assert!(err.to_string().starts_with("metadata error"));
    }
}
