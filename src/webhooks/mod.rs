//! Webhooks module
//!
//! Inbound webhook registrations, the consumers that receive their payloads,
//! per-webhook invocation logs with retention, and HMAC payload signatures.

pub mod consumer;
pub mod registry;
pub mod signature;
pub mod types;

pub use consumer::{ConsumerError, SyncTriggerConsumer, WebhookConsumer, SYNC_TRIGGER_CONSUMER};
pub use registry::WebhookRegistry;
pub use signature::{compute_signature, verify_signature, SIGNATURE_HEADER};
pub use types::{RetentionPolicy, Webhook, WebhookLog};
