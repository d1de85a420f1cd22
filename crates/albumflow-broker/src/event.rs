//! Storage change events and their inbound wire formats.
//!
//! Two notification shapes are accepted: the flat form
//! `{"eventKind": "Created", "container": "photos", "key": "a.png"}` and a
//! batch `{"Records": [...]}` whose entries are either flat or S3-style
//! (`eventName` plus an `s3.bucket.name` / `s3.object.key` entity).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{BrokerError, Result};

/// Kind of change carried by an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// An object was created or overwritten.
    Created,
    /// An object was removed.
    Removed,
    /// An object's description was changed out-of-band.
    Annotated,
    /// Any other storage event.
    Unknown,
}

impl EventKind {
    /// Attribute value used by filters and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "Created",
            EventKind::Removed => "Removed",
            EventKind::Annotated => "Annotated",
            EventKind::Unknown => "Unknown",
        }
    }

    /// Maps an event name to a kind, accepting S3-style names such as
    /// `ObjectCreated:Put` or `ObjectRemoved:Delete`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "Created" => EventKind::Created,
            "Removed" => EventKind::Removed,
            "Annotated" => EventKind::Annotated,
            n if n.starts_with("ObjectCreated") || n.starts_with("s3:ObjectCreated") => {
                EventKind::Created
            }
            n if n.starts_with("ObjectRemoved") || n.starts_with("s3:ObjectRemoved") => {
                EventKind::Removed
            }
            _ => EventKind::Unknown,
        }
    }
}

/// Filter attribute carrying the event kind.
pub const ATTR_EVENT_KIND: &str = "eventKind";
/// Filter attribute carrying the raw object key.
pub const ATTR_OBJECT_KEY: &str = "objectKey";
/// Filter attribute carrying the source container.
pub const ATTR_CONTAINER: &str = "container";

/// An immutable storage change event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Object key as emitted by storage (percent-encoded, `+` for spaces).
    pub object_key: String,
    /// What happened.
    pub kind: EventKind,
    /// When the event was emitted.
    pub timestamp: DateTime<Utc>,
    /// Bucket or container the object lives in.
    pub source_container: String,
    /// Custom attributes filters may match on.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// New description, carried only by `Annotated` events.
    #[serde(default)]
    pub description: Option<String>,
}

impl ChangeEvent {
    /// Creates an event stamped with the current time.
    pub fn new(kind: EventKind, container: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            object_key: key.into(),
            kind,
            timestamp: Utc::now(),
            source_container: container.into(),
            tags: BTreeMap::new(),
            description: None,
        }
    }

    /// Shorthand for a `Created` event.
    pub fn created(container: impl Into<String>, key: impl Into<String>) -> Self {
        Self::new(EventKind::Created, container, key)
    }

    /// Shorthand for a `Removed` event.
    pub fn removed(container: impl Into<String>, key: impl Into<String>) -> Self {
        Self::new(EventKind::Removed, container, key)
    }

    /// Adds a custom tag.
    pub fn with_tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(name.into(), value.into());
        self
    }

    /// Looks up a filter attribute. Built-in attributes shadow tags of the same name.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        match name {
            ATTR_EVENT_KIND => Some(self.kind.as_str()),
            ATTR_OBJECT_KEY => Some(self.object_key.as_str()),
            ATTR_CONTAINER => Some(self.source_container.as_str()),
            other => self.tags.get(other).map(String::as_str),
        }
    }
}

/// An out-of-band request to change an object's description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRequest {
    /// Key of the object to annotate (not percent-encoded).
    #[serde(rename = "objectKey", alias = "name")]
    pub object_key: String,
    /// The new description.
    pub description: String,
}

impl UpdateRequest {
    /// Creates an update request.
    pub fn new(object_key: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            object_key: object_key.into(),
            description: description.into(),
        }
    }

    /// Wraps the request as an `Annotated` change event.
    pub fn into_event(self, container: impl Into<String>) -> Result<ChangeEvent> {
        if self.object_key.is_empty() {
            return Err(BrokerError::MalformedEvent {
                reason: "update request has an empty objectKey".to_string(),
            });
        }
        let mut event = ChangeEvent::new(EventKind::Annotated, container, self.object_key);
        event.description = Some(self.description);
        Ok(event)
    }
}

#[derive(Debug, Deserialize)]
struct S3Bucket {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct S3Object {
    key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct S3Entity {
    bucket: Option<S3Bucket>,
    object: Option<S3Object>,
}

#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(rename = "eventKind", alias = "eventName")]
    event_kind: Option<String>,
    #[serde(alias = "bucket")]
    container: Option<String>,
    key: Option<String>,
    s3: Option<S3Entity>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    tags: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawNotification {
    Batch {
        #[serde(rename = "Records")]
        records: Vec<RawRecord>,
    },
    Single(RawRecord),
}

fn malformed(reason: impl Into<String>) -> BrokerError {
    BrokerError::MalformedEvent {
        reason: reason.into(),
    }
}

impl RawRecord {
    fn into_event(self) -> Result<ChangeEvent> {
        let (s3_container, s3_key) = match self.s3 {
            Some(entity) => (
                entity.bucket.and_then(|b| b.name),
                entity.object.and_then(|o| o.key),
            ),
            None => (None, None),
        };

        let name = self
            .event_kind
            .ok_or_else(|| malformed("record has no event kind"))?;
        let key = self
            .key
            .or(s3_key)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| malformed("record has no object key"))?;
        let container = self
            .container
            .or(s3_container)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| malformed("record has no container"))?;

        Ok(ChangeEvent {
            object_key: key,
            kind: EventKind::from_name(&name),
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            source_container: container,
            tags: self.tags,
            description: None,
        })
    }
}

/// Parses an inbound storage notification into change events.
///
/// Any structural problem (invalid JSON, empty record list, missing key or
/// container) yields [`BrokerError::MalformedEvent`].
pub fn parse_notification(raw: &str) -> Result<Vec<ChangeEvent>> {
    let notification: RawNotification =
        serde_json::from_str(raw).map_err(|e| malformed(format!("invalid notification: {}", e)))?;

    let records = match notification {
        RawNotification::Batch { records } => records,
        RawNotification::Single(record) => vec![record],
    };
    if records.is_empty() {
        return Err(malformed("no storage records present"));
    }

    records.into_iter().map(RawRecord::into_event).collect()
}
