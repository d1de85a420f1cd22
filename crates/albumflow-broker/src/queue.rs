//! Queue-backed subscriber with at-least-once delivery.
//!
//! Envelopes move through `Pending -> InFlight -> Done` on ack. A failed or
//! timed-out delivery returns to `Pending` after a backoff delay while its
//! delivery attempt is below `max_receive_count`; once the budget is spent it
//! is handed to the dead-letter queue instead. Nothing is dropped silently.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

use crate::backoff::BackoffConfig;
use crate::dead_letter::DeadLetterQueue;
use crate::envelope::{Envelope, FailureReason, Receipt};
use crate::error::{BrokerError, Result};

/// Configuration for one subscription queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum envelopes returned by one poll (default: 5).
    pub batch_size: usize,
    /// How long a poll waits to fill a batch (default: 10 seconds).
    pub max_batching_window: Duration,
    /// How long a delivered envelope stays leased before it is redelivered (default: 30 seconds).
    pub visibility_timeout: Duration,
    /// Deliveries allowed before an envelope is dead-lettered (default: 5).
    pub max_receive_count: u32,
    /// Delay before a failed envelope becomes visible again.
    pub redelivery: BackoffConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            max_batching_window: Duration::from_secs(10),
            visibility_timeout: Duration::from_secs(30),
            max_receive_count: 5,
            redelivery: BackoffConfig::default(),
        }
    }
}

/// What happened to an envelope after a failed delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// The envelope will be delivered again after `delay`.
    Redelivering {
        /// The attempt that just failed.
        attempt: u32,
        /// Delay before the envelope is visible again.
        delay: Duration,
    },
    /// The envelope exhausted its budget and moved to the dead-letter queue.
    DeadLettered,
}

/// Point-in-time queue occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueDepth {
    /// Envelopes visible to the next poll.
    pub ready: usize,
    /// Envelopes waiting out a redelivery delay.
    pub delayed: usize,
    /// Envelopes leased to a consumer.
    pub in_flight: usize,
}

impl QueueDepth {
    /// Total envelopes not yet settled.
    pub fn total(&self) -> usize {
        self.ready + self.delayed + self.in_flight
    }
}

#[derive(Debug, Default)]
struct QueueStatsInner {
    enqueued: AtomicU64,
    delivered: AtomicU64,
    acked: AtomicU64,
    redelivered: AtomicU64,
    dead_lettered: AtomicU64,
}

/// Counters for one subscription queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Envelopes accepted from the broker (including redrives).
    pub enqueued: u64,
    /// Deliveries handed to consumers.
    pub delivered: u64,
    /// Envelopes acknowledged.
    pub acked: u64,
    /// Failed deliveries scheduled for another attempt.
    pub redelivered: u64,
    /// Envelopes moved to the dead-letter queue.
    pub dead_lettered: u64,
}

struct Lease {
    envelope: Envelope,
    expires_at: Instant,
}

struct Delayed {
    envelope: Envelope,
    visible_at: Instant,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Envelope>,
    delayed: Vec<Delayed>,
    in_flight: HashMap<Uuid, Lease>,
}

impl QueueState {
    fn next_wakeup(&self) -> Option<Instant> {
        let delayed = self.delayed.iter().map(|d| d.visible_at);
        let leases = self.in_flight.values().map(|l| l.expires_at);
        delayed.chain(leases).min()
    }
}

/// A buffered subscriber queue with redelivery and dead-lettering.
pub struct SubscriptionQueue {
    id: String,
    config: QueueConfig,
    state: Mutex<QueueState>,
    notify: Notify,
    dead_letters: Arc<DeadLetterQueue>,
    stats: QueueStatsInner,
}

impl SubscriptionQueue {
    /// Creates a queue that dead-letters into `dead_letters`.
    pub fn new(
        id: impl Into<String>,
        config: QueueConfig,
        dead_letters: Arc<DeadLetterQueue>,
    ) -> Self {
        Self {
            id: id.into(),
            config,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            dead_letters,
            stats: QueueStatsInner::default(),
        }
    }

    /// Queue (subscription) id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The queue's configuration.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// The dead-letter queue exhausted envelopes are moved to.
    pub fn dead_letters(&self) -> &Arc<DeadLetterQueue> {
        &self.dead_letters
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Appends an envelope in arrival order.
    pub fn enqueue(&self, envelope: Envelope) {
        tracing::debug!(
            "Queue {} accepted envelope {} (key={})",
            self.id,
            envelope.id,
            envelope.event.object_key
        );
        self.lock().ready.push_back(envelope);
        self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_waiters();
    }

    /// Polls with the configured batch size and batching window.
    pub async fn poll(&self) -> Vec<Envelope> {
        self.poll_batch(self.config.batch_size, self.config.max_batching_window)
            .await
    }

    /// Waits until `max` envelopes are visible or `window` elapses, then
    /// leases and returns up to `max` envelopes (possibly none).
    pub async fn poll_batch(&self, max: usize, window: Duration) -> Vec<Envelope> {
        let max = max.max(1);
        let deadline = Instant::now() + window;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wake_at = {
                let mut state = self.lock();
                let now = Instant::now();
                self.promote_locked(&mut state, now);
                if state.ready.len() >= max || now >= deadline {
                    return self.lease_locked(&mut state, max, now);
                }
                match state.next_wakeup() {
                    Some(at) if at < deadline => at,
                    _ => deadline,
                }
            };

            let _ = tokio::time::timeout_at(wake_at, notified).await;
        }
    }

    /// Acknowledges a delivery; the envelope is done.
    pub fn ack(&self, receipt: &Receipt) -> Result<()> {
        let mut state = self.lock();
        let lease = Self::take_lease(&mut state, receipt)?;
        self.stats.acked.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            "Queue {} acked envelope {} on attempt {}",
            self.id,
            lease.envelope.id,
            receipt.attempt
        );
        Ok(())
    }

    /// Fails a delivery, scheduling a redelivery or dead-lettering the envelope.
    pub fn fail(&self, receipt: &Receipt, reason: FailureReason) -> Result<Disposition> {
        let disposition = {
            let mut state = self.lock();
            let lease = Self::take_lease(&mut state, receipt)?;
            self.settle_failure_locked(&mut state, lease.envelope, reason, Instant::now())
        };
        self.notify.notify_waiters();
        Ok(disposition)
    }

    /// Moves a dead-lettered envelope back into this queue with a fresh budget.
    pub fn redrive(&self, envelope_id: Uuid) -> Result<()> {
        let taken = self
            .dead_letters
            .take_if(envelope_id, |r| r.source_queue == self.id);
        let Some(record) = taken else {
            return Err(match self.dead_letters.source_of(envelope_id) {
                Some(source_queue) => BrokerError::RedriveMismatch {
                    envelope_id,
                    source_queue,
                    target_queue: self.id.clone(),
                },
                None => BrokerError::DeadLetterNotFound { envelope_id },
            });
        };

        let mut envelope = record.envelope;
        envelope.delivery_attempt = 0;
        envelope.last_failure = None;
        tracing::info!("Queue {} redriving envelope {}", self.id, envelope_id);
        self.enqueue(envelope);
        Ok(())
    }

    /// Applies expired leases and elapsed redelivery delays now.
    pub fn reap(&self) {
        let mut state = self.lock();
        self.promote_locked(&mut state, Instant::now());
    }

    /// Current occupancy.
    pub fn depth(&self) -> QueueDepth {
        let state = self.lock();
        QueueDepth {
            ready: state.ready.len(),
            delayed: state.delayed.len(),
            in_flight: state.in_flight.len(),
        }
    }

    /// Returns true if every accepted envelope has been settled.
    pub fn is_idle(&self) -> bool {
        self.depth().total() == 0
    }

    /// Snapshot of the queue counters.
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            enqueued: self.stats.enqueued.load(Ordering::Relaxed),
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            acked: self.stats.acked.load(Ordering::Relaxed),
            redelivered: self.stats.redelivered.load(Ordering::Relaxed),
            dead_lettered: self.stats.dead_lettered.load(Ordering::Relaxed),
        }
    }

    fn take_lease(state: &mut QueueState, receipt: &Receipt) -> Result<Lease> {
        let current = match state.in_flight.get(&receipt.envelope_id) {
            Some(lease) => lease.envelope.delivery_attempt,
            None => {
                return Err(BrokerError::UnknownReceipt {
                    envelope_id: receipt.envelope_id,
                })
            }
        };
        if current != receipt.attempt {
            return Err(BrokerError::StaleReceipt {
                envelope_id: receipt.envelope_id,
                attempt: receipt.attempt,
                current,
            });
        }
        state
            .in_flight
            .remove(&receipt.envelope_id)
            .ok_or(BrokerError::UnknownReceipt {
                envelope_id: receipt.envelope_id,
            })
    }

    fn lease_locked(&self, state: &mut QueueState, max: usize, now: Instant) -> Vec<Envelope> {
        let take = max.min(state.ready.len());
        let mut batch = Vec::with_capacity(take);
        for mut envelope in state.ready.drain(..take) {
            envelope.delivery_attempt += 1;
            state.in_flight.insert(
                envelope.id,
                Lease {
                    envelope: envelope.clone(),
                    expires_at: now + self.config.visibility_timeout,
                },
            );
            batch.push(envelope);
        }
        self.stats
            .delivered
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
        batch
    }

    fn promote_locked(&self, state: &mut QueueState, now: Instant) {
        let expired: Vec<Uuid> = state
            .in_flight
            .iter()
            .filter(|(_, lease)| lease.expires_at <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(lease) = state.in_flight.remove(&id) {
                let attempt = lease.envelope.delivery_attempt;
                tracing::warn!(
                    "Queue {} lease on envelope {} expired (attempt {})",
                    self.id,
                    id,
                    attempt
                );
                let reason = FailureReason::expired(format!(
                    "not acknowledged within {:?} on attempt {}",
                    self.config.visibility_timeout, attempt
                ));
                self.settle_failure_locked(state, lease.envelope, reason, now);
            }
        }

        let mut i = 0;
        while i < state.delayed.len() {
            if state.delayed[i].visible_at <= now {
                let delayed = state.delayed.remove(i);
                state.ready.push_back(delayed.envelope);
            } else {
                i += 1;
            }
        }
    }

    fn settle_failure_locked(
        &self,
        state: &mut QueueState,
        mut envelope: Envelope,
        reason: FailureReason,
        now: Instant,
    ) -> Disposition {
        envelope.last_failure = Some(reason.clone());
        let attempt = envelope.delivery_attempt;

        if attempt >= self.config.max_receive_count {
            self.dead_letters.push(envelope, reason, &self.id);
            self.stats.dead_lettered.fetch_add(1, Ordering::Relaxed);
            return Disposition::DeadLettered;
        }

        let delay = self.config.redelivery.delay_for(attempt);
        tracing::debug!(
            "Queue {} will redeliver envelope {} in {:?} (attempt {} failed: {})",
            self.id,
            envelope.id,
            delay,
            attempt,
            reason
        );
        if delay.is_zero() {
            state.ready.push_back(envelope);
        } else {
            state.delayed.push(Delayed {
                envelope,
                visible_at: now + delay,
            });
        }
        self.stats.redelivered.fetch_add(1, Ordering::Relaxed);
        Disposition::Redelivering { attempt, delay }
    }
}
