//! Internal event notifications
//!
//! Components publish lifecycle notifications onto a bounded channel. Publishing
//! never waits: when the channel is full (or nobody is listening) the event is
//! dropped, a warning is logged and the drop counter is incremented.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::sync::SyncState;

/// Notification emitted by the integration core.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntegrationEvent {
    EndpointRegistered { endpoint_id: String },
    EndpointUpdated { endpoint_id: String },
    EndpointDeactivated { endpoint_id: String },
    /// Availability flipped as the result of a probe or call
    EndpointAvailabilityChanged { endpoint_id: String, available: bool },
    SyncJobCreated { job_id: String },
    SyncStarted { job_id: String },
    SyncFinished { job_id: String, state: SyncState },
    WebhookRegistered { webhook_id: String },
    WebhookHandled { webhook_id: String, success: bool },
}

/// Sending half of the event channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: mpsc::Sender<IntegrationEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventBus {
    /// Creates a bus with the given capacity and the receiver for its events.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<IntegrationEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let bus = Self {
            sender,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (bus, receiver)
    }

    /// A bus whose receiver is already gone; every event counts as dropped.
    pub fn detached() -> Self {
        Self::new(1).0
    }

    /// Publish without blocking the caller.
    pub fn publish(&self, event: IntegrationEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(?event, "Event channel full, dropping event");
            }
            Err(TrySendError::Closed(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(?event, "Event channel closed, dropping event");
            }
        }
    }

    /// Number of events dropped since creation.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
