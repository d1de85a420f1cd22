//! Core types for the metadata subsystem.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Descriptive attributes kept for one stored object.
///
/// The record key always equals the storage object's (decoded) key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    /// Object key, the table's primary key.
    pub object_key: String,
    /// Free-form description supplied through an update request.
    pub description: Option<String>,
}

impl MetadataRecord {
    /// Creates a record with an empty description.
    pub fn new(object_key: impl Into<String>) -> Self {
        Self {
            object_key: object_key.into(),
            description: None,
        }
    }

    /// Creates a record carrying a description.
    pub fn with_description(object_key: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            object_key: object_key.into(),
            description: Some(description.into()),
        }
    }
}

/// Attributes that can be changed by a targeted update.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordField {
    /// The `description` attribute.
    Description,
}

impl RecordField {
    /// Attribute name as stored and logged.
    pub fn name(&self) -> &'static str {
        match self {
            RecordField::Description => "description",
        }
    }
}

/// Errors returned by the metadata subsystem.
#[derive(Debug, Error)]
pub enum MetaError {
    /// Object keys must be non-empty.
    #[error("object key must not be empty")]
    EmptyKey,

    /// An error occurred in the KV store layer.
    #[error("kv store error: {0}")]
    KvError(String),

    /// A stored value could not be encoded or decoded.
    #[error("record codec error: {0}")]
    Codec(#[from] bincode::Error),

    /// The store is temporarily unable to serve requests.
    #[error("metadata store unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_has_no_description() {
        let record = MetadataRecord::new("cat.png");
        assert_eq!(record.object_key, "cat.png");
        assert!(record.description.is_none());
    }

    #[test]
    fn test_record_with_description() {
        let record = MetadataRecord::with_description("cat.png", "a cat");
        assert_eq!(record.description.as_deref(), Some("a cat"));
    }

    #[test]
    fn test_record_field_name() {
        assert_eq!(RecordField::Description.name(), "description");
    }

    #[test]
    fn test_meta_error_display() {
        assert_eq!(
            MetaError::EmptyKey.to_string(),
            "object key must not be empty"
        );
        assert_eq!(
            MetaError::Unavailable("throttled".to_string()).to_string(),
            "metadata store unavailable: throttled"
        );
    }
}
