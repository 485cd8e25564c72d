//! Webhook data model

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An inbound webhook routed to a named consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Webhook {
    /// Unique ID; generated on registration when empty
    pub id: String,
    pub name: String,
    /// Name of the registered consumer that receives the payloads
    pub consumer: String,
    /// Shared secret for `X-Hub-Signature-256` verification
    #[serde(default, skip_serializing)]
    pub secret: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Webhook {
    pub fn new(name: impl Into<String>, consumer: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            name: name.into(),
            consumer: consumer.into(),
            secret: None,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// True when payloads must carry a valid signature.
    pub fn requires_signature(&self) -> bool {
        self.secret.as_deref().map(|s| !s.is_empty()).unwrap_or(false)
    }
}

/// One invocation of a webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookLog {
    pub webhook_id: String,
    pub timestamp: DateTime<Utc>,
    pub payload_size: usize,
    pub success: bool,
    /// Consumer error text when `success` is false
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// How long and how many log entries are kept per webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_age: Duration,
    pub max_entries: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(7 * 24 * 60 * 60),
            max_entries: 1000,
        }
    }
}
