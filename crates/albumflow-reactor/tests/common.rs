//! Common test utilities and fixtures for pipeline integration tests.

#![allow(dead_code)]

use albumflow_meta::{MetaError, MetadataRecord, MetadataStore, RecordField, RecordTable};
use albumflow_reactor::config::BackoffSettings;
use albumflow_reactor::{MemoryNotifier, Pipeline, PipelineConfig, SharedClients};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Upper bound for `wait_idle` in tests; time is paused so this is virtual.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Pipeline configuration with immediate retries and short windows.
pub fn test_config() -> PipelineConfig {
    let immediate = BackoffSettings {
        initial_ms: 0,
        max_ms: 0,
        multiplier: 1.0,
        jitter: false,
    };
    let mut config = PipelineConfig::default();
    config.container = "photos".to_string();
    config.change_log_capacity = 1_000;
    config.queue.max_receive_count = 3;
    config.queue.max_batching_window_secs = 1;
    config.queue.backoff = immediate.clone();
    config.dead_letter.max_batching_window_secs = 1;
    config.push.max_attempts = 3;
    config.push.backoff = immediate;
    config.notifier.recipient = "owner@example.com".to_string();
    config.notifier.sender = "albums@example.com".to_string();
    config
}

/// Record table whose deletes can be switched to fail.
pub struct FlakyStore {
    table: Arc<RecordTable>,
    deletes_unavailable: AtomicBool,
}

impl FlakyStore {
    pub fn new(table: Arc<RecordTable>) -> Self {
        Self {
            table,
            deletes_unavailable: AtomicBool::new(false),
        }
    }

    pub fn set_deletes_unavailable(&self, unavailable: bool) {
        self.deletes_unavailable.store(unavailable, Ordering::SeqCst);
    }
}

impl MetadataStore for FlakyStore {
    fn get(&self, key: &str) -> Result<Option<MetadataRecord>, MetaError> {
        self.table.get(key)
    }

    fn put(&self, record: MetadataRecord) -> Result<(), MetaError> {
        self.table.put(record)
    }

    fn update(&self, key: &str, field: RecordField, value: String) -> Result<bool, MetaError> {
        self.table.update(key, field, value)
    }

    fn delete(&self, key: &str) -> Result<bool, MetaError> {
        if self.deletes_unavailable.load(Ordering::SeqCst) {
            return Err(MetaError::Unavailable("delete throttled".to_string()));
        }
        self.table.delete(key)
    }
}

/// A wired pipeline plus handles to inspect its side effects.
pub struct Harness {
    pub pipeline: Pipeline,
    pub notifier: Arc<MemoryNotifier>,
    pub table: Arc<RecordTable>,
    pub store: Arc<FlakyStore>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: PipelineConfig) -> Self {
        let table = Arc::new(RecordTable::in_memory(config.change_log_capacity));
        let store = Arc::new(FlakyStore::new(table.clone()));
        let notifier = Arc::new(MemoryNotifier::new());
        let clients = SharedClients::new(store.clone(), table.change_log(), notifier.clone());
        let pipeline = Pipeline::new(config, Arc::new(clients)).await.unwrap();
        Self {
            pipeline,
            notifier,
            table,
            store,
        }
    }

    pub fn subjects(&self) -> Vec<String> {
        self.notifier.sent().into_iter().map(|n| n.subject).collect()
    }
}

/// A flat storage notification.
pub fn notification(kind: &str, key: &str) -> String {
    format!(
        r#"{{"eventKind":"{}","container":"photos","key":"{}"}}"#,
        kind, key
    )
}
