//! Pipeline wiring.
//!
//! | subscription     | filter                  | target                       |
//! |------------------|-------------------------|------------------------------|
//! | `creation-queue` | eventKind ∈ {Created}   | queue → Creation Reactor     |
//! | `received`       | eventKind ∈ {Created}   | push → Received Reactor      |
//! | `deletion`       | eventKind ∈ {Removed}   | push → Deletion Reactor      |
//! | `update`         | eventKind ∈ {Annotated} | push → Update Reactor        |
//!
//! Store changes feed the confirmation branch of the Change-Notification
//! Reactor; the shared dead-letter queue feeds its rejection branch.

use albumflow_broker::{
    parse_notification, Broker, BrokerError, BrokerStats, ChangeEvent, DeadLetterQueue,
    DeadLetterRecord, EventKind, FilterSpec, PublishSummary, QueueStats, Subscription,
    SubscriptionQueue, UpdateRequest,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::clients::SharedClients;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::key::ImageTypePolicy;
use crate::reactors::{
    ChangeNotificationReactor, CreationReactor, DeletionReactor, ReactorSubscriber,
    ReceivedReactor, UpdateReactor,
};
use crate::worker::{ConfirmationFeed, QueueWorker, RejectionWorker, WorkerProgress};

/// Subscription id of the creation queue.
pub const CREATION_QUEUE: &str = "creation-queue";
/// Subscription id of the upload acknowledgement push subscriber.
pub const RECEIVED_SUBSCRIPTION: &str = "received";
/// Subscription id of the deletion push subscriber.
pub const DELETION_SUBSCRIPTION: &str = "deletion";
/// Subscription id of the update push subscriber.
pub const UPDATE_SUBSCRIPTION: &str = "update";
/// Name of the shared dead-letter queue.
pub const DEAD_LETTER_QUEUE: &str = "rejections";
/// Change-log consumer id of the confirmation feed.
pub const CONFIRMATION_CONSUMER: &str = "change-notification";

const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Pipeline counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineStats {
    /// Broker counters.
    pub broker: BrokerStats,
    /// Creation queue counters.
    pub creation_queue: QueueStats,
    /// Envelopes ever dead-lettered.
    pub dead_lettered: u64,
    /// Rejections sent.
    pub rejections_sent: u64,
}

/// The wired event pipeline.
pub struct Pipeline {
    config: PipelineConfig,
    clients: Arc<SharedClients>,
    broker: Arc<Broker>,
    creation_queue: Arc<SubscriptionQueue>,
    dead_letters: Arc<DeadLetterQueue>,
    creation: Arc<CreationReactor>,
    notifications: Arc<ChangeNotificationReactor>,
    progress: Arc<WorkerProgress>,
    feed: Option<ConfirmationFeed>,
}

/// Handle to the running workers.
pub struct PipelineHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl PipelineHandle {
    /// Stops polling and waits for in-hand batches to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!("Pipeline worker ended abnormally: {}", e);
            }
        }
        tracing::info!("Pipeline stopped");
    }
}

impl Pipeline {
    /// Validates `config` and wires the topology over `clients`.
    ///
    /// The confirmation feed starts following the change log here, so store
    /// changes made before [`Pipeline::start`] are still confirmed.
    pub async fn new(config: PipelineConfig, clients: Arc<SharedClients>) -> Result<Self> {
        config.validate()?;

        let dead_letters = Arc::new(DeadLetterQueue::new(
            DEAD_LETTER_QUEUE,
            config.dead_letter_retention(),
        ));
        let creation_queue = Arc::new(SubscriptionQueue::new(
            CREATION_QUEUE,
            config.queue.to_queue_config(),
            Arc::clone(&dead_letters),
        ));

        let creation = Arc::new(CreationReactor::new(
            Arc::clone(&clients.store),
            ImageTypePolicy::new(&config.allowed_extensions),
        ));
        let deletion = Arc::new(DeletionReactor::new(Arc::clone(&clients.store)));
        let update = Arc::new(UpdateReactor::new(Arc::clone(&clients.store)));
        let received = Arc::new(ReceivedReactor::new(
            Arc::clone(&clients.notifier),
            &config.notifier.recipient,
            &config.notifier.sender,
        ));
        let notifications = Arc::new(ChangeNotificationReactor::new(
            Arc::clone(&clients.notifier),
            &config.notifier.recipient,
            &config.notifier.sender,
        ));

        let broker = Arc::new(Broker::new(config.topic.clone()));
        broker
            .register(Subscription::queue(
                CREATION_QUEUE,
                FilterSpec::new().with_event_kinds(&[EventKind::Created]),
                Arc::clone(&creation_queue),
            ))
            .await?;
        for (id, kind, subscriber) in [
            (
                RECEIVED_SUBSCRIPTION,
                EventKind::Created,
                ReactorSubscriber::new(received),
            ),
            (
                DELETION_SUBSCRIPTION,
                EventKind::Removed,
                ReactorSubscriber::new(deletion),
            ),
            (
                UPDATE_SUBSCRIPTION,
                EventKind::Annotated,
                ReactorSubscriber::new(update),
            ),
        ] {
            broker
                .register(
                    Subscription::push(
                        id,
                        FilterSpec::new().with_event_kinds(&[kind]),
                        Arc::new(subscriber),
                    )
                    .with_max_attempts(config.push.max_attempts)
                    .with_backoff(config.push.backoff.to_backoff())
                    .with_dead_letter(Arc::clone(&dead_letters)),
                )
                .await?;
        }

        let progress = Arc::new(WorkerProgress::default());
        let feed = ConfirmationFeed::new(
            Arc::clone(&clients.changes),
            Arc::clone(&notifications),
            Arc::clone(&progress),
            CONFIRMATION_CONSUMER,
            config.dead_letter.batch_size,
        );

        tracing::info!(
            "Pipeline wired on topic {} (max receive count {}, allowed {:?})",
            config.topic,
            config.queue.max_receive_count,
            config.allowed_extensions
        );
        Ok(Self {
            config,
            clients,
            broker,
            creation_queue,
            dead_letters,
            creation,
            notifications,
            progress,
            feed: Some(feed),
        })
    }

    /// Spawns the creation worker, the rejection worker and the confirmation feed.
    pub fn start(&mut self) -> Result<PipelineHandle> {
        let feed = self.feed.take().ok_or_else(|| {
            PipelineError::Config("pipeline workers are already running".to_string())
        })?;
        let cancel = CancellationToken::new();

        let creation_worker = QueueWorker::new(
            Arc::clone(&self.creation_queue),
            self.creation.clone(),
            self.config.queue.parallelism,
        );
        let rejection_worker = RejectionWorker::new(
            Arc::clone(&self.dead_letters),
            Arc::clone(&self.notifications),
            Arc::clone(&self.progress),
            self.config.dead_letter.batch_size,
            self.config.dead_letter_window(),
            self.config.dead_letter.concurrency,
        );

        let tasks = vec![
            tokio::spawn(creation_worker.run(cancel.child_token())),
            tokio::spawn(rejection_worker.run(cancel.child_token())),
            tokio::spawn(feed.run(cancel.child_token())),
        ];
        tracing::info!("Pipeline started");
        Ok(PipelineHandle { cancel, tasks })
    }

    /// Publishes one change event to the broker.
    pub async fn publish(&self, event: ChangeEvent) -> PublishSummary {
        self.broker.publish(event).await
    }

    /// Parses a storage notification and publishes every event in it.
    pub async fn ingest(&self, raw: &str) -> Result<Vec<PublishSummary>> {
        let events = parse_notification(raw).map_err(|e| {
            tracing::warn!("Dropping malformed notification: {}", e);
            e
        })?;
        let mut summaries = Vec::with_capacity(events.len());
        for event in events {
            summaries.push(self.publish(event).await);
        }
        Ok(summaries)
    }

    /// Publishes an update request as an `Annotated` event.
    pub async fn submit_update(&self, request: UpdateRequest) -> Result<PublishSummary> {
        let event = request.into_event(self.config.container.clone())?;
        Ok(self.publish(event).await)
    }

    /// Accepts either an update request or a storage notification.
    ///
    /// A JSON object carrying `description` is treated as an update request.
    pub async fn ingest_message(&self, raw: &str) -> Result<Vec<PublishSummary>> {
        let value: serde_json::Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Dropping message that is not JSON: {}", e);
                return Err(e.into());
            }
        };
        if value.get("description").is_some() {
            let request: UpdateRequest = serde_json::from_value(value)?;
            return Ok(vec![self.submit_update(request).await?]);
        }
        self.ingest(raw).await
    }

    /// Retained dead-letter records.
    pub fn dead_letters(&self) -> Vec<DeadLetterRecord> {
        self.dead_letters.list()
    }

    /// Drops dead-letter records past their retention window.
    pub fn purge_dead_letters(&self) -> usize {
        self.dead_letters.purge_expired()
    }

    /// Replays a dead-lettered envelope with a fresh attempt budget.
    ///
    /// Creation queue records go back into the queue; push records are
    /// published again.
    pub async fn replay_dead_letter(&self, envelope_id: Uuid) -> Result<()> {
        let source = self
            .dead_letters
            .source_of(envelope_id)
            .ok_or(BrokerError::DeadLetterNotFound { envelope_id })?;

        if source == CREATION_QUEUE {
            self.creation_queue.redrive(envelope_id)?;
            return Ok(());
        }

        let record = self
            .dead_letters
            .take(envelope_id)
            .ok_or(BrokerError::DeadLetterNotFound { envelope_id })?;
        tracing::info!("Replaying dead letter {} from {}", envelope_id, source);
        self.publish(record.envelope.event).await;
        Ok(())
    }

    /// Returns true once every accepted event has been fully handled:
    /// queue settled, rejections sent and confirmations sent.
    pub fn is_idle(&self) -> bool {
        self.creation_queue.is_idle()
            && self.dead_letters.pending() == 0
            && self.progress.rejections_handled() == self.dead_letters.total_dispatched()
            && self.progress.changes_handled() >= self.clients.changes.head_sequence()
    }

    /// Waits until [`Pipeline::is_idle`] holds or `timeout` elapses.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_idle() {
                return true;
            }
            if Instant::now() >= deadline {
                tracing::warn!("Pipeline still busy after {:?}", timeout);
                return false;
            }
            tokio::time::sleep(IDLE_POLL_INTERVAL).await;
        }
    }

    /// Snapshot of the pipeline counters.
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            broker: self.broker.stats(),
            creation_queue: self.creation_queue.stats(),
            dead_lettered: self.dead_letters.total_dead_lettered(),
            rejections_sent: self.progress.rejections_handled(),
        }
    }

    /// The broker.
    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    /// The creation queue.
    pub fn creation_queue(&self) -> &Arc<SubscriptionQueue> {
        &self.creation_queue
    }

    /// The shared dead-letter queue.
    pub fn dead_letter_queue(&self) -> &Arc<DeadLetterQueue> {
        &self.dead_letters
    }

    /// The configuration the pipeline was built with.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}
