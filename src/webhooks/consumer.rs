//! Webhook consumers
//!
//! A consumer receives the raw payload of every invocation of the webhooks
//! routed to it. The built-in `sync-trigger` consumer starts a sync job named
//! in the payload.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use super::types::Webhook;
use crate::error::IntegrationError;
use crate::sync::SyncScheduler;

/// Name under which [`SyncTriggerConsumer`] is registered.
pub const SYNC_TRIGGER_CONSUMER: &str = "sync-trigger";

/// Error returned by a consumer. Recorded in the webhook log.
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Integration(#[from] IntegrationError),

    #[error("{0}")]
    Failed(String),
}

/// Receives webhook payloads.
#[async_trait]
pub trait WebhookConsumer: Send + Sync {
    async fn consume(&self, webhook: &Webhook, payload: &[u8]) -> Result<(), ConsumerError>;
}

#[derive(Debug, Deserialize)]
struct SyncTrigger {
    job_id: String,
}

/// Starts the sync job given as `{"job_id": "..."}`.
pub struct SyncTriggerConsumer {
    scheduler: Arc<SyncScheduler>,
}

impl SyncTriggerConsumer {
    pub fn new(scheduler: Arc<SyncScheduler>) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl WebhookConsumer for SyncTriggerConsumer {
    async fn consume(&self, webhook: &Webhook, payload: &[u8]) -> Result<(), ConsumerError> {
        let trigger: SyncTrigger = serde_json::from_slice(payload)
            .map_err(|e| ConsumerError::InvalidPayload(e.to_string()))?;
        if trigger.job_id.trim().is_empty() {
            return Err(ConsumerError::InvalidPayload("job_id is empty".to_string()));
        }

        self.scheduler.start(&trigger.job_id).await?;
        tracing::info!(webhook_id = %webhook.id, job_id = %trigger.job_id, "Webhook triggered sync job");
        Ok(())
    }
}
