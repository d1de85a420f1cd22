//! Update Reactor: applies out-of-band description changes.

use albumflow_broker::{Envelope, EventKind};
use albumflow_meta::{MetadataStore, RecordField};
use async_trait::async_trait;
use std::sync::Arc;

use super::Reactor;
use crate::outcome::ReactorOutcome;

/// Sets the description of an existing record.
pub struct UpdateReactor {
    store: Arc<dyn MetadataStore>,
}

impl UpdateReactor {
    /// Creates the reactor.
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Reactor for UpdateReactor {
    fn name(&self) -> &'static str {
        "update"
    }

    async fn handle(&self, envelope: &Envelope) -> ReactorOutcome {
        let event = &envelope.event;
        if event.kind != EventKind::Annotated {
            return ReactorOutcome::dropped(format!(
                "not an annotation event: {}",
                event.kind.as_str()
            ));
        }
        let description = match &event.description {
            Some(d) => d.clone(),
            None => {
                tracing::warn!("Dropping annotation of {} without description", event.object_key);
                return ReactorOutcome::dropped("annotation without description");
            }
        };
        let key = event.object_key.as_str();

        match self.store.get(key) {
            Ok(Some(_)) => {}
            Ok(None) => {
                tracing::info!("Image {} not found, skipping update", key);
                return ReactorOutcome::no_op(format!("{} not found", key));
            }
            Err(e) => {
                return ReactorOutcome::DownstreamFailed {
                    reason: e.to_string(),
                }
            }
        }

        // The store re-checks existence, so a delete in between is still a no-op.
        match self.store.update(key, RecordField::Description, description) {
            Ok(true) => {
                tracing::info!("Updated description of {}", key);
                ReactorOutcome::Ok
            }
            Ok(false) => ReactorOutcome::no_op(format!("{} deleted before update", key)),
            Err(e) => ReactorOutcome::DownstreamFailed {
                reason: e.to_string(),
            },
        }
    }
}
