//! Intuit change-notification webhooks.

pub mod ingest;
pub mod intuit;

pub use ingest::{IngestReport, WebhookIngestor};
pub use intuit::{ChangedEntity, DataChangeEvent, EventNotification, NotificationBatch};
