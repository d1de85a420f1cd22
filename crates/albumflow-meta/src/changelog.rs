//! Change log of metadata table mutations.
//!
//! Every mutation the table applies is published here with a monotonic
//! sequence number. Consumers register a cursor and read forward from it
//! independently; the log keeps a bounded window of recent changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;

use crate::types::MetadataRecord;

/// What happened to a record.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    /// A record was written for a key that had none.
    Insert,
    /// An existing record was overwritten or updated.
    Modify,
    /// An existing record was deleted.
    Remove,
}

/// One entry of the change log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Monotonically increasing sequence number.
    pub sequence: u64,
    /// When the mutation was applied.
    pub timestamp: DateTime<Utc>,
    /// Kind of mutation.
    pub kind: ChangeKind,
    /// Key of the affected record.
    pub key: String,
    /// Record image before the mutation.
    pub old: Option<MetadataRecord>,
    /// Record image after the mutation.
    pub new: Option<MetadataRecord>,
}

/// Change log with per-consumer cursors.
pub struct ChangeLog {
    /// Published changes in sequence order.
    records: RwLock<Vec<ChangeRecord>>,
    /// Consumer cursors: consumer id -> last consumed sequence.
    cursors: RwLock<HashMap<String, u64>>,
    /// Next sequence number to assign.
    next_sequence: AtomicU64,
    /// Maximum number of changes to retain.
    capacity: usize,
    /// Latest published sequence, for consumers waiting on new changes.
    head: watch::Sender<u64>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

impl ChangeLog {
    /// Creates a change log retaining at most `capacity` changes.
    pub fn new(capacity: usize) -> Self {
        let (head, _) = watch::channel(0);
        Self {
            records: RwLock::new(Vec::new()),
            cursors: RwLock::new(HashMap::new()),
            next_sequence: AtomicU64::new(1),
            capacity: capacity.max(1),
            head,
        }
    }

    /// Appends a change and returns its sequence number.
    pub fn publish(
        &self,
        kind: ChangeKind,
        key: &str,
        old: Option<MetadataRecord>,
        new: Option<MetadataRecord>,
    ) -> u64 {
        let mut records = write(&self.records);
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        records.push(ChangeRecord {
            sequence,
            timestamp: Utc::now(),
            kind,
            key: key.to_string(),
            old,
            new,
        });

        if records.len() > self.capacity {
            let remove_count = records.len() - self.capacity;
            records.drain(0..remove_count);
        }
        drop(records);

        self.head.send_replace(sequence);
        tracing::debug!("Published change: seq={} kind={:?} key={}", sequence, kind, key);
        sequence
    }

    /// Registers a consumer starting after the current head.
    ///
    /// Re-registering an existing consumer keeps its cursor.
    pub fn register_consumer(&self, consumer_id: &str) -> u64 {
        let head = self.head_sequence();
        let mut cursors = write(&self.cursors);
        let cursor = *cursors.entry(consumer_id.to_string()).or_insert(head);
        tracing::info!("Registered change log consumer: {} at {}", consumer_id, cursor);
        cursor
    }

    /// Registers a consumer that will read every retained change.
    pub fn register_consumer_from_start(&self, consumer_id: &str) -> u64 {
        let mut cursors = write(&self.cursors);
        let cursor = *cursors.entry(consumer_id.to_string()).or_insert(0);
        tracing::info!("Registered change log consumer: {} at {}", consumer_id, cursor);
        cursor
    }

    /// Unregisters a consumer. Returns true if it was registered.
    pub fn unregister_consumer(&self, consumer_id: &str) -> bool {
        write(&self.cursors).remove(consumer_id).is_some()
    }

    /// Returns up to `max_count` changes after the consumer's cursor and
    /// advances the cursor past them.
    pub fn consume(&self, consumer_id: &str, max_count: usize) -> Vec<ChangeRecord> {
        let mut cursors = write(&self.cursors);
        let cursor = match cursors.get_mut(consumer_id) {
            Some(c) => c,
            None => return Vec::new(),
        };

        let records = read(&self.records);
        if let Some(first) = records.first() {
            if first.sequence > *cursor + 1 {
                tracing::warn!(
                    "Change log consumer {} fell behind retention: skipped {} changes",
                    consumer_id,
                    first.sequence - *cursor - 1
                );
            }
        }

        let start_idx = match records.binary_search_by(|r| r.sequence.cmp(cursor)) {
            Ok(idx) => idx + 1,
            Err(idx) => idx,
        };
        let end_idx = (start_idx + max_count).min(records.len());
        let result: Vec<ChangeRecord> = records[start_idx..end_idx].to_vec();

        if let Some(last) = result.last() {
            *cursor = last.sequence;
        }
        result
    }

    /// Number of changes the consumer has not consumed yet.
    pub fn lag(&self, consumer_id: &str) -> Option<u64> {
        let cursors = read(&self.cursors);
        let cursor = cursors.get(consumer_id)?;
        Some(self.head_sequence().saturating_sub(*cursor))
    }

    /// Sequence number of the latest change (0 when nothing was published).
    pub fn head_sequence(&self) -> u64 {
        self.next_sequence.load(Ordering::SeqCst) - 1
    }

    /// Subscribes to head updates; the receiver wakes whenever a change is published.
    pub fn watch_head(&self) -> watch::Receiver<u64> {
        self.head.subscribe()
    }

    /// Number of retained changes.
    pub fn len(&self) -> usize {
        read(&self.records).len()
    }

    /// Returns true if no changes are retained.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
