//! Webhook registry and dispatcher
//!
//! Holds webhook registrations, the named consumers they route to and an
//! append-only invocation log per webhook. A background sweep trims the logs
//! according to the [`RetentionPolicy`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{watch, RwLock};
use uuid::Uuid;

use super::consumer::WebhookConsumer;
use super::types::{RetentionPolicy, Webhook, WebhookLog};
use crate::error::{EntityKind, IntegrationError, IntegrationResult};
use crate::events::{EventBus, IntegrationEvent};
use crate::metrics::WebhookMetrics;

#[derive(Default)]
struct RegistryInner {
    webhooks: HashMap<String, Webhook>,
    logs: HashMap<String, Vec<WebhookLog>>,
}

/// Registry of webhooks and their consumers.
pub struct WebhookRegistry {
    inner: RwLock<RegistryInner>,
    consumers: RwLock<HashMap<String, Arc<dyn WebhookConsumer>>>,
    retention: RetentionPolicy,
    events: EventBus,
}

impl WebhookRegistry {
    pub fn new(retention: RetentionPolicy, events: EventBus) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            consumers: RwLock::new(HashMap::new()),
            retention,
            events,
        }
    }

    /// Builder form of [`register_consumer`](Self::register_consumer) for setup code.
    pub fn with_consumer(mut self, name: impl Into<String>, consumer: Arc<dyn WebhookConsumer>) -> Self {
        self.consumers.get_mut().insert(name.into(), consumer);
        self
    }

    /// Add or replace the consumer registered under `name`.
    pub async fn register_consumer(
        &self,
        name: impl Into<String>,
        consumer: Arc<dyn WebhookConsumer>,
    ) -> IntegrationResult<()> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(IntegrationError::Validation(
                "consumer name is required".to_string(),
            ));
        }
        tracing::debug!(consumer = %name, "Registered webhook consumer");
        self.consumers.write().await.insert(name, consumer);
        Ok(())
    }

    /// Register a webhook.
    ///
    /// # Errors
    /// * `Validation` if name or consumer are empty
    /// * `NotFound` if the consumer is not registered
    /// * `Conflict` on a duplicate ID
    pub async fn register(&self, mut webhook: Webhook) -> IntegrationResult<Webhook> {
        if webhook.name.trim().is_empty() {
            return Err(IntegrationError::Validation(
                "webhook name is required".to_string(),
            ));
        }
        if webhook.consumer.trim().is_empty() {
            return Err(IntegrationError::Validation(
                "webhook consumer is required".to_string(),
            ));
        }
        if !self.consumers.read().await.contains_key(&webhook.consumer) {
            return Err(IntegrationError::not_found(
                EntityKind::Consumer,
                &webhook.consumer,
            ));
        }

        if webhook.id.is_empty() {
            webhook.id = Uuid::new_v4().to_string();
        }
        let now = Utc::now();
        webhook.created_at = now;
        webhook.updated_at = now;

        let mut inner = self.inner.write().await;
        if inner.webhooks.contains_key(&webhook.id) {
            return Err(IntegrationError::conflict(EntityKind::Webhook, &webhook.id));
        }
        inner.webhooks.insert(webhook.id.clone(), webhook.clone());
        inner.logs.insert(webhook.id.clone(), Vec::new());
        drop(inner);

        tracing::info!(
            webhook_id = %webhook.id,
            name = %webhook.name,
            consumer = %webhook.consumer,
            signed = webhook.requires_signature(),
            "Registered webhook"
        );
        self.events.publish(IntegrationEvent::WebhookRegistered {
            webhook_id: webhook.id.clone(),
        });
        Ok(webhook)
    }

    /// Disable a webhook. Idempotent; logs are kept.
    pub async fn deactivate(&self, id: &str) -> IntegrationResult<Webhook> {
        let mut inner = self.inner.write().await;
        let webhook = inner
            .webhooks
            .get_mut(id)
            .ok_or_else(|| IntegrationError::not_found(EntityKind::Webhook, id))?;
        if webhook.active {
            webhook.active = false;
            webhook.updated_at = Utc::now();
            tracing::info!(webhook_id = %id, name = %webhook.name, "Deactivated webhook");
        }
        Ok(webhook.clone())
    }

    pub async fn get(&self, id: &str) -> IntegrationResult<Webhook> {
        self.inner
            .read()
            .await
            .webhooks
            .get(id)
            .cloned()
            .ok_or_else(|| IntegrationError::not_found(EntityKind::Webhook, id))
    }

    /// All webhooks, ordered by creation time.
    pub async fn list(&self) -> Vec<Webhook> {
        let mut webhooks: Vec<Webhook> =
            self.inner.read().await.webhooks.values().cloned().collect();
        webhooks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        webhooks
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.webhooks.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Deliver a payload to the webhook's consumer.
    ///
    /// Unknown and inactive webhooks are rejected without a log entry. Every
    /// delivery attempt appends exactly one log entry, whether the consumer
    /// succeeded or not, and that entry is returned.
    pub async fn handle(&self, webhook_id: &str, payload: &[u8]) -> IntegrationResult<WebhookLog> {
        let webhook = self.get(webhook_id).await?;
        if !webhook.active {
            return Err(IntegrationError::inactive(EntityKind::Webhook, webhook_id));
        }
        let consumer = self.consumers.read().await.get(&webhook.consumer).cloned();

        let started = Instant::now();
        let result = match consumer {
            Some(consumer) => consumer
                .consume(&webhook, payload)
                .await
                .map_err(|e| e.to_string()),
            None => Err(format!("consumer '{}' is not registered", webhook.consumer)),
        };
        let log = WebhookLog {
            webhook_id: webhook.id.clone(),
            timestamp: Utc::now(),
            payload_size: payload.len(),
            success: result.is_ok(),
            error: result.err(),
            duration_ms: started.elapsed().as_millis() as u64,
        };

        self.inner
            .write()
            .await
            .logs
            .entry(webhook.id.clone())
            .or_default()
            .push(log.clone());

        match &log.error {
            None => tracing::info!(
                webhook_id = %webhook.id,
                payload_size = log.payload_size,
                "Webhook handled"
            ),
            Some(error) => tracing::warn!(
                webhook_id = %webhook.id,
                consumer = %webhook.consumer,
                error = %error,
                "Webhook consumer failed"
            ),
        }
        self.events.publish(IntegrationEvent::WebhookHandled {
            webhook_id: webhook.id,
            success: log.success,
        });
        Ok(log)
    }

    /// Copy of a webhook's log, oldest first.
    pub async fn logs(&self, webhook_id: &str) -> IntegrationResult<Vec<WebhookLog>> {
        let inner = self.inner.read().await;
        if !inner.webhooks.contains_key(webhook_id) {
            return Err(IntegrationError::not_found(EntityKind::Webhook, webhook_id));
        }
        Ok(inner.logs.get(webhook_id).cloned().unwrap_or_default())
    }

    /// Total number of log entries across all webhooks.
    pub async fn log_count(&self) -> usize {
        self.inner.read().await.logs.values().map(Vec::len).sum()
    }

    /// Retained deliveries split by outcome.
    pub async fn delivery_metrics(&self) -> WebhookMetrics {
        let inner = self.inner.read().await;
        let mut metrics = WebhookMetrics::default();
        for log in inner.logs.values().flatten() {
            metrics.deliveries += 1;
            if log.success {
                metrics.successful += 1;
            } else {
                metrics.failed += 1;
            }
        }
        metrics
    }

    /// Apply the retention policy as of `now`. Returns how many entries were removed.
    pub async fn prune_logs(&self, now: DateTime<Utc>) -> usize {
        // An age too large to represent disables age-based pruning.
        let cutoff = chrono::Duration::from_std(self.retention.max_age)
            .ok()
            .and_then(|age| now.checked_sub_signed(age));
        let max_entries = self.retention.max_entries;

        let mut inner = self.inner.write().await;
        let mut removed = 0;
        for logs in inner.logs.values_mut() {
            let before = logs.len();
            if let Some(cutoff) = cutoff {
                logs.retain(|log| log.timestamp >= cutoff);
            }
            if logs.len() > max_entries {
                let excess = logs.len() - max_entries;
                logs.drain(..excess);
            }
            removed += before - logs.len();
        }
        removed
    }

    /// Run the retention sweep every `interval` until `shutdown` flips to true.
    pub async fn run_sweeper(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            interval_secs = interval.as_secs(),
            max_entries = self.retention.max_entries,
            "Webhook log sweeper started"
        );
        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.prune_logs(Utc::now()).await;
                    if removed > 0 {
                        tracing::debug!(removed, "Pruned webhook logs");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Webhook log sweeper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhooks::consumer::ConsumerError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Accepts payloads starting with `{`, rejects everything else.
    struct JsonishConsumer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl WebhookConsumer for JsonishConsumer {
        async fn consume(&self, _webhook: &Webhook, payload: &[u8]) -> Result<(), ConsumerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if payload.first() == Some(&b'{') {
                Ok(())
            } else {
                Err(ConsumerError::InvalidPayload("expected an object".to_string()))
            }
        }
    }

    async fn registry(retention: RetentionPolicy) -> (WebhookRegistry, Arc<JsonishConsumer>) {
        let registry = WebhookRegistry::new(retention, EventBus::detached());
        let consumer = Arc::new(JsonishConsumer {
            calls: AtomicUsize::new(0),
        });
        registry
            .register_consumer("jsonish", consumer.clone())
            .await
            .unwrap();
        (registry, consumer)
    }

    #[tokio::test]
    async fn test_register_requires_known_consumer() {
        let (registry, _) = registry(RetentionPolicy::default()).await;

        let result = registry.register(Webhook::new("hook", "nobody")).await;
        assert!(matches!(
            result,
            Err(IntegrationError::NotFound {
                kind: EntityKind::Consumer,
                ..
            })
        ));

        let result = registry.register(Webhook::new("", "jsonish")).await;
        assert!(matches!(result, Err(IntegrationError::Validation(_))));

        let webhook = registry
            .register(Webhook::new("hook", "jsonish"))
            .await
            .unwrap();
        assert!(!webhook.id.is_empty());
        assert_eq!(registry.get(&webhook.id).await.unwrap(), webhook);
        assert!(registry.logs(&webhook.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_register_duplicate_id_conflicts() {
        let (registry, _) = registry(RetentionPolicy::default()).await;
        registry
            .register(Webhook::new("first", "jsonish").with_id("wh"))
            .await
            .unwrap();
        let result = registry
            .register(Webhook::new("second", "jsonish").with_id("wh"))
            .await;
        assert!(matches!(result, Err(IntegrationError::Conflict { .. })));
        assert_eq!(registry.get("wh").await.unwrap().name, "first");
        assert_eq!(registry.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_handle_unknown_webhook_leaves_no_log() {
        let (registry, consumer) = registry(RetentionPolicy::default()).await;
        let result = registry.handle("missing", b"{}").await;
        assert!(matches!(result, Err(IntegrationError::NotFound { .. })));
        assert_eq!(registry.log_count().await, 0);
        assert_eq!(consumer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_handle_logs_exactly_once_per_delivery() {
        let (registry, consumer) = registry(RetentionPolicy::default()).await;
        let webhook = registry
            .register(Webhook::new("hook", "jsonish"))
            .await
            .unwrap();

        let ok = registry.handle(&webhook.id, br#"{"a":1}"#).await.unwrap();
        assert!(ok.success);
        assert_eq!(ok.payload_size, 7);
        assert!(ok.error.is_none());

        let failed = registry.handle(&webhook.id, b"plain").await.unwrap();
        assert!(!failed.success);
        assert!(failed.error.unwrap().contains("expected an object"));

        let logs = registry.logs(&webhook.id).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert!(logs[0].success);
        assert!(!logs[1].success);
        assert_eq!(consumer.calls.load(Ordering::SeqCst), 2);

        let metrics = registry.delivery_metrics().await;
        assert_eq!(metrics.deliveries, 2);
        assert_eq!(metrics.successful, 1);
        assert_eq!(metrics.failed, 1);
    }

    #[tokio::test]
    async fn test_handle_inactive_webhook() {
        let (registry, consumer) = registry(RetentionPolicy::default()).await;
        let webhook = registry
            .register(Webhook::new("hook", "jsonish"))
            .await
            .unwrap();
        registry.deactivate(&webhook.id).await.unwrap();
        // Deactivating twice is fine.
        assert!(!registry.deactivate(&webhook.id).await.unwrap().active);

        let result = registry.handle(&webhook.id, b"{}").await;
        assert!(matches!(result, Err(IntegrationError::Inactive { .. })));
        assert!(registry.logs(&webhook.id).await.unwrap().is_empty());
        assert_eq!(consumer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_prune_by_count_keeps_newest() {
        let (registry, _) = registry(RetentionPolicy {
            max_age: Duration::from_secs(3600),
            max_entries: 2,
        })
        .await;
        let webhook = registry
            .register(Webhook::new("hook", "jsonish"))
            .await
            .unwrap();
        for payload in [&b"{1}"[..], &b"{22}"[..], &b"{333}"[..]] {
            registry.handle(&webhook.id, payload).await.unwrap();
        }

        assert_eq!(registry.prune_logs(Utc::now()).await, 1);
        let logs = registry.logs(&webhook.id).await.unwrap();
        let sizes: Vec<usize> = logs.iter().map(|l| l.payload_size).collect();
        assert_eq!(sizes, vec![4, 5]);
    }

    #[tokio::test]
    async fn test_prune_by_age() {
        let (registry, _) = registry(RetentionPolicy {
            max_age: Duration::from_secs(60),
            max_entries: 100,
        })
        .await;
        let webhook = registry
            .register(Webhook::new("hook", "jsonish"))
            .await
            .unwrap();
        registry.handle(&webhook.id, b"{}").await.unwrap();

        assert_eq!(registry.prune_logs(Utc::now()).await, 0);
        let later = Utc::now() + chrono::Duration::seconds(120);
        assert_eq!(registry.prune_logs(later).await, 1);
        assert!(registry.logs(&webhook.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_shutdown() {
        let (registry, _) = registry(RetentionPolicy {
            max_age: Duration::from_secs(3600),
            max_entries: 0,
        })
        .await;
        let registry = Arc::new(registry);
        let webhook = registry
            .register(Webhook::new("hook", "jsonish"))
            .await
            .unwrap();
        registry.handle(&webhook.id, b"{}").await.unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(registry.clone().run_sweeper(Duration::from_millis(10), rx));
        tokio::time::sleep(Duration::from_millis(40)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(registry.log_count().await, 0);
    }
}
