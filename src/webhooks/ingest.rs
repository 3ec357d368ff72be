use std::sync::Arc;

use tracing::{debug, error, info};

use super::intuit::NotificationBatch;
use crate::error::{BridgeError, EntityFailure, IngestFailures};
use crate::store::{ChangeEvent, RealmStore};

/// Outcome of a fully processed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub recorded: usize,
    /// Entities dropped because their realm never completed authorization.
    pub skipped: usize,
}

/// Records webhook entities for realms that have authorized this service.
pub struct WebhookIngestor {
    store: Arc<dyn RealmStore>,
}

impl WebhookIngestor {
    pub fn new(store: Arc<dyn RealmStore>) -> Self {
        Self { store }
    }

    /// Ingest one delivery, entity by entity in delivery order.
    ///
    /// Each entity is written independently. If any write fails the remaining
    /// entities are still attempted and the error lists every failed entity.
    pub async fn ingest(&self, batch: &NotificationBatch) -> Result<IngestReport, BridgeError> {
        let notifications = batch.notifications();
        if notifications.is_empty() {
            return Ok(IngestReport::default());
        }

        let mut realm_ids: Vec<String> = notifications.iter().map(|n| n.realm_id.clone()).collect();
        realm_ids.sort();
        realm_ids.dedup();
        let authorized = self.store.authorized_realms(&realm_ids).await?;

        let mut report = IngestReport::default();
        let mut failed = Vec::new();

        for (notification_index, notification) in notifications.iter().enumerate() {
            let entities = notification.entities();

            if !authorized.contains(&notification.realm_id) {
                if !entities.is_empty() {
                    info!(
                        "[Webhook:Intuit] realm {} not authorized, dropping {} entities",
                        notification.realm_id,
                        entities.len()
                    );
                }
                report.skipped += entities.len();
                continue;
            }

            for (entity_index, entity) in entities.iter().enumerate() {
                let event = ChangeEvent {
                    realm_id: notification.realm_id.clone(),
                    entity_name: entity.name.clone(),
                    operation: entity.operation.clone(),
                    entity_id: entity.id.clone(),
                };

                match self.store.record_change_event(&event).await {
                    Ok(()) => {
                        debug!(
                            "[Webhook:Intuit] recorded {} {} {} for realm {}",
                            event.operation, event.entity_name, event.entity_id, event.realm_id
                        );
                        report.recorded += 1;
                    }
                    Err(e) => {
                        error!(
                            "[Webhook:Intuit] failed to record {} {} for realm {}: {e}",
                            event.entity_name, event.entity_id, event.realm_id
                        );
                        failed.push(EntityFailure {
                            notification_index,
                            entity_index,
                            realm_id: event.realm_id,
                            entity_name: event.entity_name,
                            entity_id: event.entity_id,
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }

        if failed.is_empty() {
            Ok(report)
        } else {
            Err(BridgeError::Ingest(IngestFailures {
                recorded: report.recorded,
                skipped: report.skipped,
                failed,
            }))
        }
    }
}
