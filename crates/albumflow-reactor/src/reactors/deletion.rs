//! Deletion Reactor: removes the record of a deleted object.

use albumflow_broker::{Envelope, EventKind};
use albumflow_meta::MetadataStore;
use async_trait::async_trait;
use std::sync::Arc;

use super::Reactor;
use crate::key::decode_object_key;
use crate::outcome::ReactorOutcome;

/// Deletes records for removed objects.
pub struct DeletionReactor {
    store: Arc<dyn MetadataStore>,
}

impl DeletionReactor {
    /// Creates the reactor.
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Reactor for DeletionReactor {
    fn name(&self) -> &'static str {
        "deletion"
    }

    async fn handle(&self, envelope: &Envelope) -> ReactorOutcome {
        let event = &envelope.event;
        if event.kind != EventKind::Removed {
            return ReactorOutcome::dropped(format!("not a remove event: {}", event.kind.as_str()));
        }
        let key = match decode_object_key(&event.object_key) {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!("Dropping remove event: {}", e);
                return ReactorOutcome::dropped(e.to_string());
            }
        };

        match self.store.delete(&key) {
            Ok(true) => {
                tracing::info!("Deleted record {}", key);
                ReactorOutcome::Ok
            }
            Ok(false) => ReactorOutcome::no_op(format!("{} already absent", key)),
            Err(e) => ReactorOutcome::DownstreamFailed {
                reason: e.to_string(),
            },
        }
    }
}
