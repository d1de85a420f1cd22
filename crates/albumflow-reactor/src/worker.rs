//! Background workers driving the reactors.
//!
//! - [`QueueWorker`] polls a subscription queue and settles each envelope
//!   from its reactor's outcome, with bounded parallelism per batch.
//! - [`RejectionWorker`] drains the dead-letter queue into rejections.
//! - [`ConfirmationFeed`] follows the store's change log into confirmations.
//!
//! All three stop polling when their cancellation token fires and let the
//! batch in hand finish.

use albumflow_broker::{
    DeadLetterQueue, DeadLetterRecord, Disposition, Envelope, SubscriptionQueue,
};
use albumflow_meta::ChangeLog;
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::outcome::ReactorOutcome;
use crate::reactors::{ChangeNotificationReactor, Reactor};

/// Settlement counts for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Envelopes acknowledged.
    pub acked: usize,
    /// Envelopes failed and scheduled for redelivery.
    pub redelivering: usize,
    /// Envelopes failed into the dead-letter queue.
    pub dead_lettered: usize,
    /// Settlements rejected by the queue (stale or unknown receipts).
    pub stale: usize,
}

/// Progress counters shared between the workers and the pipeline.
#[derive(Debug, Default)]
pub struct WorkerProgress {
    rejections_handled: AtomicU64,
    changes_handled: AtomicU64,
}

impl WorkerProgress {
    /// Dead-letter records turned into rejections.
    pub fn rejections_handled(&self) -> u64 {
        self.rejections_handled.load(Ordering::SeqCst)
    }

    /// Sequence of the last change-log entry fully handled.
    pub fn changes_handled(&self) -> u64 {
        self.changes_handled.load(Ordering::SeqCst)
    }
}

/// Polls a subscription queue and runs a reactor on every envelope.
pub struct QueueWorker {
    queue: Arc<SubscriptionQueue>,
    reactor: Arc<dyn Reactor>,
    parallelism: usize,
}

impl QueueWorker {
    /// Creates a worker processing up to `parallelism` envelopes at once.
    pub fn new(
        queue: Arc<SubscriptionQueue>,
        reactor: Arc<dyn Reactor>,
        parallelism: usize,
    ) -> Self {
        Self {
            queue,
            reactor,
            parallelism: parallelism.max(1),
        }
    }

    /// Runs the reactor on a batch and settles every envelope.
    pub async fn process_batch(&self, batch: Vec<Envelope>) -> BatchReport {
        let settled: Vec<SettleResult> = stream::iter(batch)
            .map(|envelope| async move {
                let outcome = self.reactor.handle(&envelope).await;
                self.settle(&envelope, &outcome)
            })
            .buffer_unordered(self.parallelism)
            .collect()
            .await;

        let mut report = BatchReport::default();
        for result in settled {
            match result {
                SettleResult::Acked => report.acked += 1,
                SettleResult::Redelivering => report.redelivering += 1,
                SettleResult::DeadLettered => report.dead_lettered += 1,
                SettleResult::Stale => report.stale += 1,
            }
        }
        report
    }

    fn settle(&self, envelope: &Envelope, outcome: &ReactorOutcome) -> SettleResult {
        let receipt = envelope.receipt();
        let settled = match outcome.failure_reason() {
            None => {
                tracing::debug!(
                    "{} settled {} on attempt {}: {}",
                    self.reactor.name(),
                    envelope.event.object_key,
                    envelope.delivery_attempt,
                    outcome
                );
                self.queue.ack(&receipt).map(|_| SettleResult::Acked)
            }
            Some(reason) => self.queue.fail(&receipt, reason).map(|d| match d {
                Disposition::Redelivering { .. } => SettleResult::Redelivering,
                Disposition::DeadLettered => SettleResult::DeadLettered,
            }),
        };
        settled.unwrap_or_else(|e| {
            tracing::warn!(
                "{} could not settle envelope {}: {}",
                self.reactor.name(),
                envelope.id,
                e
            );
            SettleResult::Stale
        })
    }

    /// Polls and processes batches until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            "{} worker started on {} (parallelism {})",
            self.reactor.name(),
            self.queue.id(),
            self.parallelism
        );
        loop {
            let batch = tokio::select! {
                _ = cancel.cancelled() => break,
                batch = self.queue.poll() => batch,
            };
            if batch.is_empty() {
                continue;
            }
            let report = self.process_batch(batch).await;
            tracing::debug!("{} batch settled: {:?}", self.reactor.name(), report);
        }
        tracing::info!("{} worker stopped", self.reactor.name());
    }
}

enum SettleResult {
    Acked,
    Redelivering,
    DeadLettered,
    Stale,
}

/// Turns dead-lettered envelopes into rejection notifications.
pub struct RejectionWorker {
    dead_letters: Arc<DeadLetterQueue>,
    reactor: Arc<ChangeNotificationReactor>,
    progress: Arc<WorkerProgress>,
    batch_size: usize,
    window: Duration,
    concurrency: usize,
}

impl RejectionWorker {
    /// Creates a worker reading `batch_size` records per poll, waiting at
    /// most `window`, and sending up to `concurrency` rejections at once.
    pub fn new(
        dead_letters: Arc<DeadLetterQueue>,
        reactor: Arc<ChangeNotificationReactor>,
        progress: Arc<WorkerProgress>,
        batch_size: usize,
        window: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            dead_letters,
            reactor,
            progress,
            batch_size: batch_size.max(1),
            window,
            concurrency: concurrency.max(1),
        }
    }

    /// Polls the dead-letter queue once and sends a rejection per record.
    pub async fn poll_once(&self) -> usize {
        let records = self.dead_letters.poll(self.batch_size, self.window).await;
        self.reject_all(records).await
    }

    async fn reject_all(&self, records: Vec<DeadLetterRecord>) -> usize {
        let count = records.len();
        stream::iter(records)
            .for_each_concurrent(self.concurrency, |record| async move {
                self.reactor.reject(&record).await;
                self.progress.rejections_handled.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        self.dead_letters.purge_expired();
        count
    }

    /// Polls until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!("Rejection worker started on {}", self.dead_letters.name());
        loop {
            let records = tokio::select! {
                _ = cancel.cancelled() => break,
                records = self.dead_letters.poll(self.batch_size, self.window) => records,
            };
            self.reject_all(records).await;
        }
        tracing::info!("Rejection worker stopped");
    }
}

/// Follows the store's change log and sends confirmations.
pub struct ConfirmationFeed {
    log: Arc<ChangeLog>,
    reactor: Arc<ChangeNotificationReactor>,
    progress: Arc<WorkerProgress>,
    consumer_id: String,
    head: watch::Receiver<u64>,
    batch_size: usize,
}

impl ConfirmationFeed {
    /// Registers a change-log consumer at the current head; changes made
    /// after this call are confirmed once the feed runs.
    pub fn new(
        log: Arc<ChangeLog>,
        reactor: Arc<ChangeNotificationReactor>,
        progress: Arc<WorkerProgress>,
        consumer_id: &str,
        batch_size: usize,
    ) -> Self {
        let start = log.register_consumer(consumer_id);
        progress.changes_handled.store(start, Ordering::SeqCst);
        let head = log.watch_head();
        Self {
            log,
            reactor,
            progress,
            consumer_id: consumer_id.to_string(),
            head,
            batch_size: batch_size.max(1),
        }
    }

    /// Confirms every pending change. Returns how many changes were read.
    pub async fn drain(&mut self) -> usize {
        let mut total = 0;
        loop {
            self.head.borrow_and_update();
            let changes = self.log.consume(&self.consumer_id, self.batch_size);
            if changes.is_empty() {
                return total;
            }
            total += changes.len();
            for change in &changes {
                self.reactor.confirm(change).await;
                self.progress
                    .changes_handled
                    .store(change.sequence, Ordering::SeqCst);
            }
        }
    }

    /// Drains changes as they are published until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!("Confirmation feed started as {}", self.consumer_id);
        loop {
            self.drain().await;
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = self.head.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        self.log.unregister_consumer(&self.consumer_id);
        tracing::info!("Confirmation feed stopped");
    }
}
