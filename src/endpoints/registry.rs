//! Endpoint registry
//!
//! Owns endpoint definitions and one [`ApiStatus`] per endpoint. Each status
//! sits behind its own mutex so concurrent attempts against the same endpoint
//! never race on the counters, while attempts against different endpoints
//! proceed independently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::types::{ApiEndpoint, ApiStatus, DEFAULT_TIMEOUT, SUPPORTED_METHODS};
use crate::error::{EntityKind, IntegrationError, IntegrationResult};
use crate::events::{EventBus, IntegrationEvent};

#[derive(Default)]
struct RegistryInner {
    endpoints: HashMap<String, ApiEndpoint>,
    statuses: HashMap<String, Arc<Mutex<ApiStatus>>>,
}

/// Registry of external HTTP endpoints and their live status.
pub struct EndpointRegistry {
    inner: RwLock<RegistryInner>,
    default_timeout: Duration,
    events: EventBus,
}

/// Availability before and after an attempt was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvailabilityChange {
    pub was_available: bool,
    pub is_available: bool,
}

impl AvailabilityChange {
    pub fn changed(&self) -> bool {
        self.was_available != self.is_available
    }
}

impl EndpointRegistry {
    pub fn new(events: EventBus) -> Self {
        Self::with_default_timeout(events, DEFAULT_TIMEOUT)
    }

    /// Registry that fills a zero timeout with `default_timeout`.
    pub fn with_default_timeout(events: EventBus, default_timeout: Duration) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            default_timeout,
            events,
        }
    }

    /// Register a new endpoint.
    ///
    /// Assigns a UUID when `id` is empty, normalizes the method to upper case
    /// and creates a zeroed status record in the same critical section.
    ///
    /// # Errors
    /// * `Validation` if name, url or method are missing or the method is unknown
    /// * `Conflict` if an endpoint with the same ID already exists
    pub async fn register(&self, mut endpoint: ApiEndpoint) -> IntegrationResult<ApiEndpoint> {
        validate(&mut endpoint)?;
        if endpoint.id.is_empty() {
            endpoint.id = Uuid::new_v4().to_string();
        }
        if endpoint.timeout.is_zero() {
            endpoint.timeout = self.default_timeout;
        }
        let now = Utc::now();
        endpoint.created_at = now;
        endpoint.updated_at = now;
        endpoint.last_called_at = None;

        {
            let mut inner = self.inner.write().await;
            if inner.endpoints.contains_key(&endpoint.id) {
                return Err(IntegrationError::conflict(EntityKind::Endpoint, &endpoint.id));
            }
            inner.statuses.insert(
                endpoint.id.clone(),
                Arc::new(Mutex::new(ApiStatus::new(&endpoint.id))),
            );
            inner
                .endpoints
                .insert(endpoint.id.clone(), endpoint.clone());
        }

        tracing::info!(
            endpoint_id = %endpoint.id,
            name = %endpoint.name,
            url = %endpoint.url,
            method = %endpoint.method,
            "Registered API endpoint"
        );
        self.events.publish(IntegrationEvent::EndpointRegistered {
            endpoint_id: endpoint.id.clone(),
        });

        Ok(endpoint)
    }

    /// Replace the definition of an existing endpoint.
    ///
    /// The creation and last-called timestamps of the stored endpoint are kept.
    pub async fn update(&self, id: &str, mut endpoint: ApiEndpoint) -> IntegrationResult<ApiEndpoint> {
        validate(&mut endpoint)?;
        if endpoint.timeout.is_zero() {
            endpoint.timeout = self.default_timeout;
        }

        let updated = {
            let mut inner = self.inner.write().await;
            let existing = inner
                .endpoints
                .get_mut(id)
                .ok_or_else(|| IntegrationError::not_found(EntityKind::Endpoint, id))?;

            endpoint.id = id.to_string();
            endpoint.created_at = existing.created_at;
            endpoint.last_called_at = existing.last_called_at;
            endpoint.updated_at = Utc::now();
            *existing = endpoint;
            existing.clone()
        };

        tracing::info!(
            endpoint_id = %updated.id,
            name = %updated.name,
            url = %updated.url,
            "Updated API endpoint"
        );
        self.events.publish(IntegrationEvent::EndpointUpdated {
            endpoint_id: updated.id.clone(),
        });

        Ok(updated)
    }

    /// Mark an endpoint inactive. The record and its status are kept.
    pub async fn deactivate(&self, id: &str) -> IntegrationResult<ApiEndpoint> {
        let (endpoint, was_active) = {
            let mut inner = self.inner.write().await;
            let endpoint = inner
                .endpoints
                .get_mut(id)
                .ok_or_else(|| IntegrationError::not_found(EntityKind::Endpoint, id))?;
            let was_active = endpoint.active;
            if was_active {
                endpoint.active = false;
                endpoint.updated_at = Utc::now();
            }
            (endpoint.clone(), was_active)
        };

        if was_active {
            tracing::info!(
                endpoint_id = %endpoint.id,
                name = %endpoint.name,
                url = %endpoint.url,
                "Deactivated API endpoint"
            );
            self.events.publish(IntegrationEvent::EndpointDeactivated {
                endpoint_id: endpoint.id.clone(),
            });
        }

        Ok(endpoint)
    }

    pub async fn get(&self, id: &str) -> IntegrationResult<ApiEndpoint> {
        self.inner
            .read()
            .await
            .endpoints
            .get(id)
            .cloned()
            .ok_or_else(|| IntegrationError::not_found(EntityKind::Endpoint, id))
    }

    /// All endpoints, ordered by creation time.
    pub async fn list(&self) -> Vec<ApiEndpoint> {
        let mut endpoints: Vec<ApiEndpoint> =
            self.inner.read().await.endpoints.values().cloned().collect();
        endpoints.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        endpoints
    }

    pub async fn list_active(&self) -> Vec<ApiEndpoint> {
        self.list().await.into_iter().filter(|e| e.active).collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.endpoints.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.endpoints.is_empty()
    }

    /// Snapshot of one endpoint's status.
    pub async fn status(&self, id: &str) -> IntegrationResult<ApiStatus> {
        let handle = self.status_handle(id).await?;
        let status = handle.lock().await;
        Ok(status.clone())
    }

    /// Snapshots of every status record.
    pub async fn statuses(&self) -> Vec<ApiStatus> {
        let handles: Vec<Arc<Mutex<ApiStatus>>> =
            self.inner.read().await.statuses.values().cloned().collect();

        let mut statuses = Vec::with_capacity(handles.len());
        for handle in handles {
            statuses.push(handle.lock().await.clone());
        }
        statuses.sort_by(|a, b| a.endpoint_id.cmp(&b.endpoint_id));
        statuses
    }

    /// Fold an attempt into the endpoint's status under its own lock.
    pub async fn record_attempt(
        &self,
        id: &str,
        success: bool,
        response_time: Duration,
    ) -> IntegrationResult<AvailabilityChange> {
        let handle = self.status_handle(id).await?;
        let change = {
            let mut status = handle.lock().await;
            let was_available = status.is_available;
            status.record(success, response_time, Utc::now());
            AvailabilityChange {
                was_available,
                is_available: status.is_available,
            }
        };

        if change.changed() {
            tracing::info!(
                endpoint_id = %id,
                available = change.is_available,
                "Endpoint availability changed"
            );
            self.events
                .publish(IntegrationEvent::EndpointAvailabilityChanged {
                    endpoint_id: id.to_string(),
                    available: change.is_available,
                });
        }

        Ok(change)
    }

    /// Stamp the endpoint's last-called time.
    pub async fn touch_last_called(&self, id: &str, at: DateTime<Utc>) {
        if let Some(endpoint) = self.inner.write().await.endpoints.get_mut(id) {
            endpoint.last_called_at = Some(at);
        }
    }

    async fn status_handle(&self, id: &str) -> IntegrationResult<Arc<Mutex<ApiStatus>>> {
        self.inner
            .read()
            .await
            .statuses
            .get(id)
            .cloned()
            .ok_or_else(|| IntegrationError::not_found(EntityKind::Endpoint, id))
    }
}

fn validate(endpoint: &mut ApiEndpoint) -> IntegrationResult<()> {
    if endpoint.name.trim().is_empty() {
        return Err(IntegrationError::Validation(
            "endpoint name is required".to_string(),
        ));
    }
    if endpoint.url.trim().is_empty() {
        return Err(IntegrationError::Validation(
            "endpoint url is required".to_string(),
        ));
    }
    if endpoint.method.trim().is_empty() {
        return Err(IntegrationError::Validation(
            "endpoint method is required".to_string(),
        ));
    }

    let method = endpoint.method.trim().to_ascii_uppercase();
    if !SUPPORTED_METHODS.contains(&method.as_str()) {
        return Err(IntegrationError::Validation(format!(
            "unsupported HTTP method: {}",
            endpoint.method
        )));
    }
    endpoint.method = method;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoints::types::{AuthConfig, DEFAULT_RETRY_COUNT};

    fn registry() -> EndpointRegistry {
        EndpointRegistry::new(EventBus::detached())
    }

    fn svc() -> ApiEndpoint {
        ApiEndpoint::new("svc", "http://x/health", "GET")
    }

    #[tokio::test]
    async fn test_register_assigns_id_and_zeroed_status() {
        let registry = registry();
        let endpoint = registry.register(svc()).await.unwrap();

        assert!(!endpoint.id.is_empty());
        let fetched = registry.get(&endpoint.id).await.unwrap();
        assert_eq!(fetched, endpoint);

        let status = registry.status(&endpoint.id).await.unwrap();
        assert!(!status.is_available);
        assert_eq!(status.success_count, 0);
        assert_eq!(status.error_count, 0);
        assert_eq!(status.success_rate, 0.0);
        assert_eq!(registry.statuses().await.len(), 1);
    }

    #[tokio::test]
    async fn test_register_keeps_fields() {
        let registry = registry();
        let endpoint = svc()
            .with_id("billing")
            .with_header("Accept", "application/json")
            .with_auth(AuthConfig::bearer("t"))
            .with_retry_count(5)
            .with_timeout(Duration::from_secs(3));

        let registered = registry.register(endpoint.clone()).await.unwrap();
        assert_eq!(registered.id, "billing");
        assert_eq!(registered.headers, endpoint.headers);
        assert_eq!(registered.auth, endpoint.auth);
        assert_eq!(registered.retry_count, 5);
        assert_eq!(registered.timeout, Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_register_duplicate_id_conflicts() {
        let registry = registry();
        let first = registry.register(svc().with_id("dup")).await.unwrap();

        let second = ApiEndpoint::new("other", "http://y", "POST").with_id("dup");
        let result = registry.register(second).await;
        assert!(matches!(result, Err(IntegrationError::Conflict { .. })));

        let stored = registry.get("dup").await.unwrap();
        assert_eq!(stored, first);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_register_validation() {
        let registry = registry();

        let cases = vec![
            ApiEndpoint::new("", "http://x", "GET"),
            ApiEndpoint::new("svc", "", "GET"),
            ApiEndpoint::new("svc", "http://x", ""),
            ApiEndpoint::new("svc", "http://x", "FETCH"),
        ];
        for endpoint in cases {
            let result = registry.register(endpoint).await;
            assert!(matches!(result, Err(IntegrationError::Validation(_))));
        }
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_register_normalizes_method_and_timeout() {
        let registry = EndpointRegistry::with_default_timeout(
            EventBus::detached(),
            Duration::from_secs(7),
        );
        let endpoint = registry
            .register(ApiEndpoint::new("svc", "http://x", "post").with_timeout(Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(endpoint.method, "POST");
        assert_eq!(endpoint.timeout, Duration::from_secs(7));
    }

    #[tokio::test]
    async fn test_register_retry_count_defaults_and_zero() {
        let registry = registry();
        let defaulted = registry.register(svc()).await.unwrap();
        assert_eq!(defaulted.retry_count, DEFAULT_RETRY_COUNT);

        let single_attempt = registry
            .register(svc().with_retry_count(0))
            .await
            .unwrap();
        assert_eq!(single_attempt.retry_count, 0);

        let updated = registry
            .update(&defaulted.id, svc().with_retry_count(0))
            .await
            .unwrap();
        assert_eq!(updated.retry_count, 0);
    }

    #[tokio::test]
    async fn test_update_preserves_created_at() {
        let registry = registry();
        let original = registry.register(svc()).await.unwrap();

        let replacement = ApiEndpoint::new("svc-v2", "http://x/v2/health", "HEAD");
        let updated = registry.update(&original.id, replacement).await.unwrap();

        assert_eq!(updated.id, original.id);
        assert_eq!(updated.name, "svc-v2");
        assert_eq!(updated.created_at, original.created_at);
        assert!(updated.updated_at >= original.updated_at);
    }

    #[tokio::test]
    async fn test_update_unknown_and_invalid() {
        let registry = registry();
        let result = registry.update("missing", svc()).await;
        assert!(matches!(result, Err(IntegrationError::NotFound { .. })));

        let endpoint = registry.register(svc()).await.unwrap();
        let result = registry
            .update(&endpoint.id, ApiEndpoint::new("svc", "", "GET"))
            .await;
        assert!(matches!(result, Err(IntegrationError::Validation(_))));
    }

    #[tokio::test]
    async fn test_deactivate_is_idempotent_and_keeps_status() {
        let registry = registry();
        let endpoint = registry.register(svc()).await.unwrap();
        registry
            .record_attempt(&endpoint.id, true, Duration::from_millis(5))
            .await
            .unwrap();

        let first = registry.deactivate(&endpoint.id).await.unwrap();
        assert!(!first.active);
        let second = registry.deactivate(&endpoint.id).await.unwrap();
        assert!(!second.active);

        assert!(registry.list_active().await.is_empty());
        assert_eq!(registry.list().await.len(), 1);
        assert_eq!(registry.status(&endpoint.id).await.unwrap().success_count, 1);

        let result = registry.deactivate("missing").await;
        assert!(matches!(result, Err(IntegrationError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_returned_values_are_copies() {
        let registry = registry();
        let mut endpoint = registry.register(svc()).await.unwrap();
        endpoint.name = "mutated".to_string();

        assert_eq!(registry.get(&endpoint.id).await.unwrap().name, "svc");
    }

    #[tokio::test]
    async fn test_record_attempt_reports_changes() {
        let registry = registry();
        let endpoint = registry.register(svc()).await.unwrap();

        let change = registry
            .record_attempt(&endpoint.id, true, Duration::from_millis(1))
            .await
            .unwrap();
        assert!(change.changed());

        let change = registry
            .record_attempt(&endpoint.id, true, Duration::from_millis(1))
            .await
            .unwrap();
        assert!(!change.changed());

        let result = registry
            .record_attempt("missing", true, Duration::ZERO)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_attempts_do_not_lose_updates() {
        let registry = Arc::new(registry());
        let endpoint = registry.register(svc()).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..50 {
            let registry = registry.clone();
            let id = endpoint.id.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .record_attempt(&id, i % 2 == 0, Duration::from_millis(1))
                    .await
                    .unwrap();
            }));
        }
        futures::future::join_all(handles).await;

        let status = registry.status(&endpoint.id).await.unwrap();
        assert_eq!(status.success_count, 25);
        assert_eq!(status.error_count, 25);
        assert_eq!(status.success_rate, 50.0);
    }
}
