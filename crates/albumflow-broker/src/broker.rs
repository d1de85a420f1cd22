//! Topic broker: explicit (filter, target) subscriptions with parallel fan-out.
//!
//! Each published event is evaluated once against every enabled
//! subscription. Matching queue subscribers get an envelope appended to their
//! queue; matching push subscribers are invoked in their own task and retried
//! in place, so a slow, failing or panicking subscriber never affects another.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::backoff::BackoffConfig;
use crate::dead_letter::DeadLetterQueue;
use crate::envelope::{Envelope, FailureReason};
use crate::error::{BrokerError, Result};
use crate::event::ChangeEvent;
use crate::filter::FilterSpec;
use crate::queue::SubscriptionQueue;

/// A subscriber invoked immediately for each matching event.
#[async_trait]
pub trait PushSubscriber: Send + Sync {
    /// Handles one delivery. An `Err` counts as a failed attempt.
    async fn deliver(&self, envelope: &Envelope) -> std::result::Result<(), FailureReason>;
}

/// Where a subscription's envelopes go.
#[derive(Clone)]
pub enum SubscriberTarget {
    /// Buffered, polled, at-least-once consumption.
    Queue(Arc<SubscriptionQueue>),
    /// Immediate invocation with in-place retries.
    Push(Arc<dyn PushSubscriber>),
}

impl std::fmt::Debug for SubscriberTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriberTarget::Queue(q) => write!(f, "Queue({})", q.id()),
            SubscriberTarget::Push(_) => write!(f, "Push"),
        }
    }
}

/// A filtered subscription to the topic.
#[derive(Clone)]
pub struct Subscription {
    /// Unique subscription id; also the envelope's `subscriber_id`.
    pub id: String,
    /// Events must match this filter to be delivered.
    pub filter: FilterSpec,
    /// Delivery target.
    pub target: SubscriberTarget,
    /// Disabled subscriptions are skipped during fan-out.
    pub enabled: bool,
    /// Push delivery attempts before giving up (default: 3).
    pub max_attempts: u32,
    /// Delay between push delivery attempts.
    pub backoff: BackoffConfig,
    /// Receives push envelopes whose attempts are exhausted.
    pub dead_letter: Option<Arc<DeadLetterQueue>>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("filter", &self.filter)
            .field("target", &self.target)
            .field("enabled", &self.enabled)
            .field("max_attempts", &self.max_attempts)
            .field(
                "dead_letter",
                &self.dead_letter.as_ref().map(|d| d.name().to_string()),
            )
            .finish()
    }
}

impl Subscription {
    fn with_target(id: impl Into<String>, filter: FilterSpec, target: SubscriberTarget) -> Self {
        Self {
            id: id.into(),
            filter,
            target,
            enabled: true,
            max_attempts: 3,
            backoff: BackoffConfig::default(),
            dead_letter: None,
        }
    }

    /// A subscription that appends matching events to `queue`.
    pub fn queue(id: impl Into<String>, filter: FilterSpec, queue: Arc<SubscriptionQueue>) -> Self {
        Self::with_target(id, filter, SubscriberTarget::Queue(queue))
    }

    /// A subscription that invokes `subscriber` for matching events.
    pub fn push(
        id: impl Into<String>,
        filter: FilterSpec,
        subscriber: Arc<dyn PushSubscriber>,
    ) -> Self {
        Self::with_target(id, filter, SubscriberTarget::Push(subscriber))
    }

    /// Sets the push attempt budget (at least one attempt is always made).
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Sets the delay policy between push attempts.
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Dead-letters exhausted push deliveries into `dlq`.
    pub fn with_dead_letter(mut self, dlq: Arc<DeadLetterQueue>) -> Self {
        self.dead_letter = Some(dlq);
        self
    }
}

/// Outcome of delivering one event to one subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryResult {
    /// Subscription id.
    pub subscriber_id: String,
    /// Whether the envelope was enqueued or a push attempt succeeded.
    pub success: bool,
    /// Push attempts made (0 for queue targets).
    pub attempts: u32,
    /// Last failure if unsuccessful.
    pub error: Option<String>,
}

/// Summary of one publish across all subscriptions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishSummary {
    /// Number of enabled subscriptions whose filter matched.
    pub matched: usize,
    /// Per-subscription results, in registration order.
    pub results: Vec<DeliveryResult>,
}

impl PublishSummary {
    /// Returns true if every matched delivery succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|r| r.success)
    }

    /// Ids of the subscriptions that received the event.
    pub fn delivered_to(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| r.success)
            .map(|r| r.subscriber_id.as_str())
            .collect()
    }
}

/// Broker counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerStats {
    /// Events published.
    pub published: u64,
    /// Successful deliveries (enqueues and push successes).
    pub delivered: u64,
    /// Push deliveries that exhausted their attempts.
    pub push_failures: u64,
}

#[derive(Debug, Default)]
struct BrokerCounters {
    published: AtomicU64,
    delivered: AtomicU64,
    push_failures: AtomicU64,
}

/// A topic with filtered subscriptions.
pub struct Broker {
    topic: String,
    subscriptions: RwLock<Vec<Subscription>>,
    counters: BrokerCounters,
}

impl Broker {
    /// Creates a broker for `topic` with no subscriptions.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            subscriptions: RwLock::new(Vec::new()),
            counters: BrokerCounters::default(),
        }
    }

    /// Topic name.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Registers a subscription. Fails if the id is already taken.
    pub async fn register(&self, subscription: Subscription) -> Result<()> {
        let mut subs = self.subscriptions.write().await;
        if subs.iter().any(|s| s.id == subscription.id) {
            return Err(BrokerError::DuplicateSubscription {
                id: subscription.id,
            });
        }
        tracing::info!(
            "Topic {} registered subscription {} ({:?})",
            self.topic,
            subscription.id,
            subscription.target
        );
        subs.push(subscription);
        Ok(())
    }

    /// Removes a subscription. Returns true if it was present.
    pub async fn remove(&self, id: &str) -> bool {
        let mut subs = self.subscriptions.write().await;
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    /// Enables a subscription.
    pub async fn enable(&self, id: &str) -> Result<()> {
        self.set_enabled(id, true).await
    }

    /// Disables a subscription; it is skipped until re-enabled.
    pub async fn disable(&self, id: &str) -> Result<()> {
        self.set_enabled(id, false).await
    }

    async fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let mut subs = self.subscriptions.write().await;
        let sub = subs
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| BrokerError::SubscriptionNotFound { id: id.to_string() })?;
        sub.enabled = enabled;
        Ok(())
    }

    /// Registered subscription ids, in registration order.
    pub async fn subscription_ids(&self) -> Vec<String> {
        let subs = self.subscriptions.read().await;
        subs.iter().map(|s| s.id.clone()).collect()
    }

    /// Delivers `event` to every enabled subscription whose filter matches,
    /// waiting for all push deliveries to settle.
    pub async fn publish(&self, event: ChangeEvent) -> PublishSummary {
        self.counters.published.fetch_add(1, Ordering::Relaxed);

        let matched: Vec<Subscription> = {
            let subs = self.subscriptions.read().await;
            subs.iter()
                .filter(|s| s.enabled && s.filter.matches(&event))
                .cloned()
                .collect()
        };
        tracing::debug!(
            "Topic {} publishing {} {} to {} subscriber(s)",
            self.topic,
            event.kind.as_str(),
            event.object_key,
            matched.len()
        );

        let mut handles = Vec::with_capacity(matched.len());
        for sub in &matched {
            let envelope = Envelope::new(event.clone(), sub.id.clone());
            match &sub.target {
                SubscriberTarget::Queue(queue) => {
                    queue.enqueue(envelope);
                    handles.push(Pending::Done(DeliveryResult {
                        subscriber_id: sub.id.clone(),
                        success: true,
                        attempts: 0,
                        error: None,
                    }));
                }
                SubscriberTarget::Push(subscriber) => {
                    let task = tokio::spawn(deliver_push(
                        sub.clone(),
                        Arc::clone(subscriber),
                        envelope.clone(),
                    ));
                    handles.push(Pending::Task {
                        sub: sub.clone(),
                        envelope,
                        task,
                    });
                }
            }
        }

        let mut results = Vec::with_capacity(handles.len());
        for pending in handles {
            let result = match pending {
                Pending::Done(result) => result,
                Pending::Task {
                    sub,
                    mut envelope,
                    task,
                } => match task.await {
                    Ok(result) => result,
                    Err(e) => {
                        tracing::error!("Push subscriber {} panicked: {}", sub.id, e);
                        let reason =
                            FailureReason::downstream(format!("subscriber panicked: {}", e));
                        // A panic ends the delivery; it counts as one failed attempt.
                        envelope.delivery_attempt = envelope.delivery_attempt.max(1);
                        envelope.last_failure = Some(reason.clone());
                        let attempts = envelope.delivery_attempt;
                        exhaust(&sub, envelope, reason.clone());
                        DeliveryResult {
                            subscriber_id: sub.id,
                            success: false,
                            attempts,
                            error: Some(reason.to_string()),
                        }
                    }
                },
            };
            if result.success {
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
            } else {
                self.counters.push_failures.fetch_add(1, Ordering::Relaxed);
            }
            results.push(result);
        }

        PublishSummary {
            matched: matched.len(),
            results,
        }
    }

    /// Snapshot of the broker counters.
    pub fn stats(&self) -> BrokerStats {
        BrokerStats {
            published: self.counters.published.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            push_failures: self.counters.push_failures.load(Ordering::Relaxed),
        }
    }
}

enum Pending {
    Done(DeliveryResult),
    Task {
        sub: Subscription,
        envelope: Envelope,
        task: tokio::task::JoinHandle<DeliveryResult>,
    },
}

async fn deliver_push(
    sub: Subscription,
    subscriber: Arc<dyn PushSubscriber>,
    mut envelope: Envelope,
) -> DeliveryResult {
    let max_attempts = sub.max_attempts.max(1);
    loop {
        envelope.delivery_attempt += 1;
        let attempt = envelope.delivery_attempt;
        match subscriber.deliver(&envelope).await {
            Ok(()) => {
                return DeliveryResult {
                    subscriber_id: sub.id,
                    success: true,
                    attempts: attempt,
                    error: None,
                }
            }
            Err(reason) => {
                tracing::warn!(
                    "Push delivery to {} failed on attempt {}/{}: {}",
                    sub.id,
                    attempt,
                    max_attempts,
                    reason
                );
                envelope.last_failure = Some(reason.clone());
                if attempt >= max_attempts {
                    let error = reason.to_string();
                    exhaust(&sub, envelope, reason);
                    return DeliveryResult {
                        subscriber_id: sub.id,
                        success: false,
                        attempts: attempt,
                        error: Some(error),
                    };
                }
                tokio::time::sleep(sub.backoff.delay_for(attempt)).await;
            }
        }
    }
}

fn exhaust(sub: &Subscription, envelope: Envelope, reason: FailureReason) {
    match &sub.dead_letter {
        Some(dlq) => dlq.push(envelope, reason, &sub.id),
        None => tracing::error!(
            "Push delivery of {} (key={}) to {} exhausted with no dead-letter queue: {}",
            envelope.id,
            envelope.event.object_key,
            sub.id,
            reason
        ),
    }
}
