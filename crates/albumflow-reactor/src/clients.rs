//! Process-wide shared clients.
//!
//! The store and notifier handles are built once at start-up, installed
//! here, and reused by every reactor for the life of the process.

use albumflow_meta::{ChangeLog, MetadataStore, RecordTable};
use std::sync::{Arc, OnceLock};

use crate::error::{PipelineError, Result};
use crate::notifier::Notifier;

/// Handles shared by all reactors.
#[derive(Clone)]
pub struct SharedClients {
    /// Metadata store.
    pub store: Arc<dyn MetadataStore>,
    /// Change log the store publishes its mutations to.
    pub changes: Arc<ChangeLog>,
    /// Outbound notifier.
    pub notifier: Arc<dyn Notifier>,
}

impl SharedClients {
    /// Bundles existing handles.
    pub fn new(
        store: Arc<dyn MetadataStore>,
        changes: Arc<ChangeLog>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            changes,
            notifier,
        }
    }

    /// An in-memory record table with its own change log.
    pub fn in_memory(change_log_capacity: usize, notifier: Arc<dyn Notifier>) -> Self {
        let table = RecordTable::in_memory(change_log_capacity);
        let changes = table.change_log();
        Self::new(Arc::new(table), changes, notifier)
    }
}

static CLIENTS: OnceLock<Arc<SharedClients>> = OnceLock::new();

/// Installs the process-wide clients. Fails if they are already installed.
pub fn install(clients: SharedClients) -> Result<Arc<SharedClients>> {
    let shared = Arc::new(clients);
    CLIENTS
        .set(Arc::clone(&shared))
        .map_err(|_| PipelineError::ClientsAlreadyInstalled)?;
    tracing::info!("Shared clients installed");
    Ok(shared)
}

/// Returns the installed clients.
#[inline]
pub fn get() -> Result<Arc<SharedClients>> {
    CLIENTS
        .get()
        .map(Arc::clone)
        .ok_or(PipelineError::ClientsNotInstalled)
}
