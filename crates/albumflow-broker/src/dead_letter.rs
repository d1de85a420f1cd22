//! Dead-letter queue: terminal storage for envelopes that exhausted their
//! delivery budget.
//!
//! Records are retained for a bounded window. Each record is handed to the
//! dead-letter consumer exactly once through [`DeadLetterQueue::poll`], while
//! staying visible to operators through [`DeadLetterQueue::list`] until it
//! expires or is taken for redrive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

use crate::envelope::{Envelope, FailureReason};

/// An envelope that exceeded its maximum delivery attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    /// The exhausted envelope, with its final attempt count.
    pub envelope: Envelope,
    /// The failure that exhausted the envelope.
    pub reason: FailureReason,
    /// Queue (or push subscription) the envelope was dead-lettered from.
    pub source_queue: String,
    /// When the envelope was dead-lettered.
    pub dead_lettered_at: DateTime<Utc>,
}

struct Retained {
    record: DeadLetterRecord,
    dispatched: bool,
    expires_at: Instant,
}

/// Bounded-retention dead-letter queue.
pub struct DeadLetterQueue {
    name: String,
    retention: Duration,
    records: Mutex<VecDeque<Retained>>,
    notify: Notify,
    total: AtomicU64,
    dispatched: AtomicU64,
}

impl DeadLetterQueue {
    /// Creates a dead-letter queue retaining records for `retention`.
    pub fn new(name: impl Into<String>, retention: Duration) -> Self {
        Self {
            name: name.into(),
            retention,
            records: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            total: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
        }
    }

    /// Queue name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Retained>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Hands an exhausted envelope to the dead-letter queue.
    pub fn push(&self, envelope: Envelope, reason: FailureReason, source_queue: &str) {
        tracing::error!(
            "Dead-lettering envelope {} (key={}, attempts={}) from {}: {}",
            envelope.id,
            envelope.event.object_key,
            envelope.delivery_attempt,
            source_queue,
            reason
        );
        let record = DeadLetterRecord {
            envelope,
            reason,
            source_queue: source_queue.to_string(),
            dead_lettered_at: Utc::now(),
        };
        self.lock().push_back(Retained {
            record,
            dispatched: false,
            expires_at: Instant::now() + self.retention,
        });
        self.total.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_waiters();
    }

    fn purge_locked(&self, records: &mut VecDeque<Retained>, now: Instant) -> usize {
        let before = records.len();
        records.retain(|r| {
            let keep = r.expires_at > now;
            if !keep && !r.dispatched {
                tracing::warn!(
                    "Dead-letter record {} expired before it was consumed",
                    r.record.envelope.id
                );
            }
            keep
        });
        before - records.len()
    }

    /// Drops records older than the retention window. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let mut records = self.lock();
        self.purge_locked(&mut records, Instant::now())
    }

    /// Waits up to `wait` for records not yet handed out and returns at most
    /// `max` of them, marking them consumed. Returns an empty batch on timeout.
    pub async fn poll(&self, max: usize, wait: Duration) -> Vec<DeadLetterRecord> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut records = self.lock();
                let now = Instant::now();
                self.purge_locked(&mut records, now);

                let batch: Vec<DeadLetterRecord> = records
                    .iter_mut()
                    .filter(|r| !r.dispatched)
                    .take(max)
                    .map(|r| {
                        r.dispatched = true;
                        r.record.clone()
                    })
                    .collect();
                self.dispatched
                    .fetch_add(batch.len() as u64, Ordering::Relaxed);
                if !batch.is_empty() || now >= deadline {
                    return batch;
                }
            }

            let _ = tokio::time::timeout_at(deadline, notified).await;
        }
    }

    /// Snapshot of every retained record, for operator inspection.
    pub fn list(&self) -> Vec<DeadLetterRecord> {
        let mut records = self.lock();
        self.purge_locked(&mut records, Instant::now());
        records.iter().map(|r| r.record.clone()).collect()
    }

    /// Removes a record by envelope id, typically to redrive it.
    pub fn take(&self, envelope_id: Uuid) -> Option<DeadLetterRecord> {
        self.take_if(envelope_id, |_| true)
    }

    /// Removes a record by envelope id only if `accept` approves it.
    ///
    /// A rejected record is left exactly as it was, dispatch state included.
    pub fn take_if<F>(&self, envelope_id: Uuid, accept: F) -> Option<DeadLetterRecord>
    where
        F: FnOnce(&DeadLetterRecord) -> bool,
    {
        let mut records = self.lock();
        let idx = records
            .iter()
            .position(|r| r.record.envelope.id == envelope_id)?;
        if !accept(&records[idx].record) {
            return None;
        }
        records.remove(idx).map(|r| r.record)
    }

    /// Queue a retained record was dead-lettered from.
    pub fn source_of(&self, envelope_id: Uuid) -> Option<String> {
        self.lock()
            .iter()
            .find(|r| r.record.envelope.id == envelope_id)
            .map(|r| r.record.source_queue.clone())
    }

    /// Number of retained records.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if no records are retained.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of retained records not yet handed to the consumer.
    pub fn pending(&self) -> usize {
        self.lock().iter().filter(|r| !r.dispatched).count()
    }

    /// Total envelopes ever dead-lettered here.
    pub fn total_dead_lettered(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Total records ever handed out by [`DeadLetterQueue::poll`].
    pub fn total_dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }
}
