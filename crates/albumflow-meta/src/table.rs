//! Metadata table keyed by object key.
//!
//! `RecordTable` encodes records with bincode on top of a [`KvStore`] and
//! publishes every effective mutation to a [`ChangeLog`]. Mutations run under
//! a table-wide lock so the change log order is the apply order.

use std::sync::{Arc, Mutex};

use crate::changelog::{ChangeKind, ChangeLog};
use crate::kvstore::{KvStore, MemoryKvStore};
use crate::types::{MetaError, MetadataRecord, RecordField};

/// Single-key operations the reactors need from the metadata table.
pub trait MetadataStore: Send + Sync {
    /// Fetch the record for `key`, or None when absent.
    fn get(&self, key: &str) -> Result<Option<MetadataRecord>, MetaError>;

    /// Write the whole record, replacing any existing one (idempotent by key).
    fn put(&self, record: MetadataRecord) -> Result<(), MetaError>;

    /// Set one attribute of an existing record.
    ///
    /// Returns `Ok(false)` without writing when the key is absent.
    fn update(&self, key: &str, field: RecordField, value: String) -> Result<bool, MetaError>;

    /// Delete the record. Returns `Ok(false)` when there was nothing to delete.
    fn delete(&self, key: &str) -> Result<bool, MetaError>;
}

/// Metadata table over a KV store, with change capture.
pub struct RecordTable {
    kv: Box<dyn KvStore>,
    changes: Arc<ChangeLog>,
    mutation: Mutex<()>,
}

impl RecordTable {
    /// Creates a table over the given KV store and change log.
    pub fn new(kv: Box<dyn KvStore>, changes: Arc<ChangeLog>) -> Self {
        Self {
            kv,
            changes,
            mutation: Mutex::new(()),
        }
    }

    /// Creates an in-memory table with its own change log.
    pub fn in_memory(change_log_capacity: usize) -> Self {
        Self::new(
            Box::new(MemoryKvStore::new()),
            Arc::new(ChangeLog::new(change_log_capacity)),
        )
    }

    /// The change log this table publishes to.
    pub fn change_log(&self) -> Arc<ChangeLog> {
        Arc::clone(&self.changes)
    }

    /// Records whose key starts with `prefix`, in key order.
    pub fn scan_prefix(&self, prefix: &str) -> Result<Vec<MetadataRecord>, MetaError> {
        self.kv
            .scan_prefix(prefix.as_bytes())?
            .into_iter()
            .map(|(_, value)| decode(&value))
            .collect()
    }

    /// Returns true if a record exists for `key`.
    pub fn contains(&self, key: &str) -> Result<bool, MetaError> {
        self.kv.contains_key(key.as_bytes())
    }

    /// Number of records in the table.
    pub fn len(&self) -> Result<usize, MetaError> {
        self.kv.len()
    }

    /// Returns true if the table holds no records.
    pub fn is_empty(&self) -> Result<bool, MetaError> {
        self.kv.is_empty()
    }

    fn lock_mutations(&self) -> std::sync::MutexGuard<'_, ()> {
        self.mutation.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn encode(record: &MetadataRecord) -> Result<Vec<u8>, MetaError> {
    Ok(bincode::serialize(record)?)
}

fn decode(bytes: &[u8]) -> Result<MetadataRecord, MetaError> {
    Ok(bincode::deserialize(bytes)?)
}

fn check_key(key: &str) -> Result<(), MetaError> {
    if key.is_empty() {
        return Err(MetaError::EmptyKey);
    }
    Ok(())
}

impl MetadataStore for RecordTable {
    fn get(&self, key: &str) -> Result<Option<MetadataRecord>, MetaError> {
        check_key(key)?;
        self.kv
            .get(key.as_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    fn put(&self, record: MetadataRecord) -> Result<(), MetaError> {
        check_key(&record.object_key)?;
        let value = encode(&record)?;

        let _guard = self.lock_mutations();
        let previous = self
            .kv
            .put(record.object_key.as_bytes().to_vec(), value)?
            .map(|bytes| decode(&bytes))
            .transpose()?;

        let kind = if previous.is_some() {
            ChangeKind::Modify
        } else {
            ChangeKind::Insert
        };
        tracing::debug!("put record {} ({:?})", record.object_key, kind);
        self.changes
            .publish(kind, &record.object_key, previous, Some(record.clone()));
        Ok(())
    }

    fn update(&self, key: &str, field: RecordField, value: String) -> Result<bool, MetaError> {
        check_key(key)?;

        let _guard = self.lock_mutations();
        let current = match self.kv.get(key.as_bytes())? {
            Some(bytes) => decode(&bytes)?,
            None => return Ok(false),
        };

        let mut updated = current.clone();
        match field {
            RecordField::Description => updated.description = Some(value),
        }
        self.kv.put(key.as_bytes().to_vec(), encode(&updated)?)?;

        tracing::debug!("updated {} of record {}", field.name(), key);
        self.changes
            .publish(ChangeKind::Modify, key, Some(current), Some(updated));
        Ok(true)
    }

    fn delete(&self, key: &str) -> Result<bool, MetaError> {
        check_key(key)?;

        let _guard = self.lock_mutations();
        let removed = match self.kv.delete(key.as_bytes())? {
            Some(bytes) => decode(&bytes)?,
            None => return Ok(false),
        };

        tracing::debug!("deleted record {}", key);
        self.changes
            .publish(ChangeKind::Remove, key, Some(removed), None);
        Ok(true)
    }
}
