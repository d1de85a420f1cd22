//! Creation Reactor: validates new objects and records them.

use albumflow_broker::{Envelope, EventKind};
use albumflow_meta::{MetadataRecord, MetadataStore};
use async_trait::async_trait;
use std::sync::Arc;

use super::Reactor;
use crate::key::{decode_object_key, ImageTypePolicy};
use crate::outcome::ReactorOutcome;

/// Records allow-listed images in the metadata store.
pub struct CreationReactor {
    store: Arc<dyn MetadataStore>,
    policy: ImageTypePolicy,
}

impl CreationReactor {
    /// Creates the reactor.
    pub fn new(store: Arc<dyn MetadataStore>, policy: ImageTypePolicy) -> Self {
        Self { store, policy }
    }
}

#[async_trait]
impl Reactor for CreationReactor {
    fn name(&self) -> &'static str {
        "creation"
    }

    async fn handle(&self, envelope: &Envelope) -> ReactorOutcome {
        let event = &envelope.event;
        if event.kind != EventKind::Created {
            return ReactorOutcome::dropped(format!(
                "not a create event: {}",
                event.kind.as_str()
            ));
        }

        let key = match decode_object_key(&event.object_key) {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!("Dropping create event: {}", e);
                return ReactorOutcome::dropped(e.to_string());
            }
        };

        if let Err(e) = self.policy.check(&key) {
            tracing::warn!(
                "Rejecting {} in {} (attempt {}): {}",
                key,
                event.source_container,
                envelope.delivery_attempt,
                e
            );
            return ReactorOutcome::ValidationFailed {
                reason: e.to_string(),
            };
        }

        // Upsert; an overwrite is logged as Modify and not confirmed again.
        match self.store.put(MetadataRecord::new(key.clone())) {
            Ok(()) => {
                tracing::info!("Recorded image {}", key);
                ReactorOutcome::Ok
            }
            Err(e) => ReactorOutcome::DownstreamFailed {
                reason: e.to_string(),
            },
        }
    }
}
