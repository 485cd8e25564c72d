//! Call executor
//!
//! Turns a registered endpoint plus an [`ApiRequest`] into outbound HTTP
//! attempts. Authentication is injected from the endpoint's auth descriptor,
//! transport failures are retried with a linear backoff (`attempt * unit`),
//! and every attempt is folded into the endpoint's [`ApiStatus`](super::ApiStatus).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;

use super::registry::EndpointRegistry;
use super::types::{
    ApiEndpoint, ApiRequest, ApiResponse, AuthConfig, CallKind, OutboundRequest,
    DEFAULT_API_KEY_HEADER,
};
use crate::error::{EntityKind, IntegrationError, IntegrationResult, TransportFailure};

/// Sends a single resolved request. Implementations must not retry.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: OutboundRequest) -> Result<ApiResponse, TransportFailure>;
}

/// [`HttpTransport`] backed by a shared `reqwest` client.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: OutboundRequest) -> Result<ApiResponse, TransportFailure> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| TransportFailure::Other(format!("invalid method: {}", e)))?;

        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(request.timeout);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let started = Instant::now();
        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        Ok(ApiResponse {
            status,
            headers,
            body,
            elapsed: started.elapsed(),
        })
    }
}

/// Executes calls against registered endpoints.
pub struct CallExecutor {
    registry: Arc<EndpointRegistry>,
    transport: Arc<dyn HttpTransport>,
    backoff_unit: Duration,
}

impl CallExecutor {
    pub fn new(registry: Arc<EndpointRegistry>, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            registry,
            transport,
            backoff_unit: Duration::from_secs(1),
        }
    }

    /// Set the retry delay unit; attempt `n` waits `n * unit` before retrying.
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    /// Call a registered endpoint.
    ///
    /// Non-2xx responses are returned as-is (and counted as errors in the
    /// endpoint status); only transport failures are retried.
    ///
    /// # Errors
    /// * `NotFound` / `Inactive` for unknown or deactivated endpoints
    /// * `AuthConfig` if the auth descriptor is incomplete or unknown
    /// * `Transport` once `retry_count` retries have failed
    pub async fn call(&self, endpoint_id: &str, request: ApiRequest) -> IntegrationResult<ApiResponse> {
        let endpoint = self.registry.get(endpoint_id).await?;
        if !endpoint.active {
            return Err(IntegrationError::inactive(EntityKind::Endpoint, endpoint_id));
        }

        let outbound = build_request(&endpoint, &request, endpoint.timeout)?;
        self.registry.touch_last_called(&endpoint.id, Utc::now()).await;

        let max_attempts = endpoint.retry_count + 1;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let started = Instant::now();
            match self.transport.send(outbound.clone()).await {
                Ok(response) => {
                    self.record(&endpoint.id, CallKind::User, response.is_success(), response.elapsed)
                        .await;
                    tracing::debug!(
                        endpoint_id = %endpoint.id,
                        status = response.status,
                        attempt,
                        elapsed_ms = response.elapsed.as_millis() as u64,
                        "API call completed"
                    );
                    return Ok(response);
                }
                Err(failure) => {
                    self.record(&endpoint.id, CallKind::User, false, started.elapsed())
                        .await;

                    if attempt >= max_attempts {
                        tracing::warn!(
                            endpoint_id = %endpoint.id,
                            url = %endpoint.url,
                            retries = endpoint.retry_count,
                            error = %failure,
                            "API call failed after all retries"
                        );
                        return Err(IntegrationError::Transport {
                            retries: endpoint.retry_count,
                            source: failure,
                        });
                    }

                    let delay = self.backoff_unit * attempt;
                    tracing::debug!(
                        endpoint_id = %endpoint.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %failure,
                        "API call attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Single liveness attempt against an endpoint, without retries.
    ///
    /// Any status in `[200, 500)` counts as up. Transport and auth failures are
    /// absorbed into the status record and reported as down.
    pub async fn probe(&self, endpoint: &ApiEndpoint, timeout: Duration) -> ProbeOutcome {
        let outbound = match build_request(endpoint, &ApiRequest::default(), timeout) {
            Ok(outbound) => outbound,
            Err(err) => {
                self.record(&endpoint.id, CallKind::Probe, false, Duration::ZERO)
                    .await;
                return ProbeOutcome::down(&endpoint.id, Duration::ZERO, err.to_string());
            }
        };

        let started = Instant::now();
        let outcome = match self.transport.send(outbound).await {
            Ok(response) if response.is_up() => {
                ProbeOutcome::up(&endpoint.id, response.elapsed, response.status)
            }
            Ok(response) => {
                let mut outcome = ProbeOutcome::down(
                    &endpoint.id,
                    response.elapsed,
                    format!("server error: HTTP {}", response.status),
                );
                outcome.status_code = Some(response.status);
                outcome
            }
            Err(failure) => ProbeOutcome::down(&endpoint.id, started.elapsed(), failure.to_string()),
        };

        self.record(&endpoint.id, CallKind::Probe, outcome.available, outcome.response_time)
            .await;
        outcome
    }

    async fn record(&self, endpoint_id: &str, kind: CallKind, success: bool, elapsed: Duration) {
        if let Err(err) = self
            .registry
            .record_attempt(endpoint_id, success, elapsed)
            .await
        {
            tracing::warn!(endpoint_id, %kind, error = %err, "Failed to record call attempt");
        }
    }
}

/// Result of one health probe.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ProbeOutcome {
    pub endpoint_id: String,
    pub available: bool,
    pub status_code: Option<u16>,
    pub response_time: Duration,
    pub error: Option<String>,
}

impl ProbeOutcome {
    fn up(endpoint_id: &str, response_time: Duration, status_code: u16) -> Self {
        Self {
            endpoint_id: endpoint_id.to_string(),
            available: true,
            status_code: Some(status_code),
            response_time,
            error: None,
        }
    }

    fn down(endpoint_id: &str, response_time: Duration, error: String) -> Self {
        Self {
            endpoint_id: endpoint_id.to_string(),
            available: false,
            status_code: None,
            response_time,
            error: Some(error),
        }
    }
}

/// Merge endpoint and caller parts into one outbound request.
pub(crate) fn build_request(
    endpoint: &ApiEndpoint,
    request: &ApiRequest,
    timeout: Duration,
) -> IntegrationResult<OutboundRequest> {
    let mut headers: HashMap<String, String> = endpoint.headers.clone();

    let body = match &request.body {
        Some(value) => {
            let bytes = serde_json::to_vec(value)
                .map_err(|e| IntegrationError::Validation(format!("invalid request body: {}", e)))?;
            headers.insert("Content-Type".to_string(), "application/json".to_string());
            Some(bytes)
        }
        None => None,
    };

    if let Some(auth) = &endpoint.auth {
        let (name, value) = auth_header(auth)?;
        headers.insert(name, value);
    }

    // Caller headers win over endpoint headers and injected auth.
    for (name, value) in &request.headers {
        headers.retain(|existing, _| !existing.eq_ignore_ascii_case(name));
        headers.insert(name.clone(), value.clone());
    }

    Ok(OutboundRequest {
        method: endpoint.method.clone(),
        url: endpoint.url.clone(),
        headers,
        query: request.query.clone(),
        body,
        timeout,
    })
}

/// Resolve an auth descriptor into a single header.
pub(crate) fn auth_header(auth: &AuthConfig) -> IntegrationResult<(String, String)> {
    let field = |name: &str| -> IntegrationResult<&str> {
        auth.config
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                IntegrationError::AuthConfig(format!(
                    "{} auth requires a '{}' field",
                    auth.auth_type, name
                ))
            })
    };

    match auth.auth_type.as_str() {
        "bearer" => Ok((
            "Authorization".to_string(),
            format!("Bearer {}", field("token")?),
        )),
        "basic" => {
            let credentials = format!("{}:{}", field("username")?, field("password")?);
            Ok((
                "Authorization".to_string(),
                format!("Basic {}", BASE64.encode(credentials)),
            ))
        }
        "api_key" => {
            let header = auth
                .config
                .get("header")
                .filter(|h| !h.is_empty())
                .cloned()
                .unwrap_or_else(|| DEFAULT_API_KEY_HEADER.to_string());
            Ok((header, field("key")?.to_string()))
        }
        other => Err(IntegrationError::AuthConfig(format!(
            "unsupported auth type: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Mutex;

    /// Transport that fails every attempt and counts them
    struct FailingTransport {
        attempts: AtomicU32,
    }

    #[async_trait]
    impl HttpTransport for FailingTransport {
        async fn send(&self, _request: OutboundRequest) -> Result<ApiResponse, TransportFailure> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(TransportFailure::Connect("connection refused".to_string()))
        }
    }

    /// Transport that answers with a fixed status and remembers the requests
    struct StaticTransport {
        status: u16,
        seen: Mutex<Vec<OutboundRequest>>,
    }

    impl StaticTransport {
        fn new(status: u16) -> Self {
            Self {
                status,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl HttpTransport for StaticTransport {
        async fn send(&self, request: OutboundRequest) -> Result<ApiResponse, TransportFailure> {
            self.seen.lock().await.push(request);
            Ok(ApiResponse {
                status: self.status,
                headers: HashMap::new(),
                body: b"{\"ok\":true}".to_vec(),
                elapsed: Duration::from_millis(3),
            })
        }
    }

    /// Transport that fails a fixed number of times before succeeding
    struct FlakyTransport {
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl HttpTransport for FlakyTransport {
        async fn send(&self, _request: OutboundRequest) -> Result<ApiResponse, TransportFailure> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(TransportFailure::Timeout);
            }
            Ok(ApiResponse {
                status: 200,
                headers: HashMap::new(),
                body: Vec::new(),
                elapsed: Duration::from_millis(1),
            })
        }
    }

    async fn setup(
        transport: Arc<dyn HttpTransport>,
        endpoint: ApiEndpoint,
    ) -> (CallExecutor, ApiEndpoint) {
        let registry = Arc::new(EndpointRegistry::new(EventBus::detached()));
        let endpoint = registry.register(endpoint).await.unwrap();
        let executor =
            CallExecutor::new(registry, transport).with_backoff_unit(Duration::from_millis(1));
        (executor, endpoint)
    }

    #[tokio::test]
    async fn test_always_failing_transport_makes_retry_plus_one_attempts() {
        for retries in [0u32, 1, 3] {
            let transport = Arc::new(FailingTransport {
                attempts: AtomicU32::new(0),
            });
            let (executor, endpoint) = setup(
                transport.clone(),
                ApiEndpoint::new("svc", "http://x", "GET").with_retry_count(retries),
            )
            .await;

            let result = executor.call(&endpoint.id, ApiRequest::new()).await;
            match result {
                Err(IntegrationError::Transport { retries: r, .. }) => assert_eq!(r, retries),
                other => panic!("expected transport error, got {:?}", other),
            }
            assert_eq!(transport.attempts.load(Ordering::SeqCst), retries + 1);

            let status = executor.registry().status(&endpoint.id).await.unwrap();
            assert_eq!(status.error_count, u64::from(retries + 1));
            assert!(!status.is_available);
            assert_eq!(status.success_rate, 0.0);
        }
    }

    #[tokio::test]
    async fn test_retry_then_success_updates_every_attempt() {
        let transport = Arc::new(FlakyTransport {
            failures_left: AtomicU32::new(2),
        });
        let (executor, endpoint) = setup(
            transport,
            ApiEndpoint::new("svc", "http://x", "GET").with_retry_count(3),
        )
        .await;

        let response = executor.call(&endpoint.id, ApiRequest::new()).await.unwrap();
        assert_eq!(response.status, 200);

        let status = executor.registry().status(&endpoint.id).await.unwrap();
        assert_eq!(status.error_count, 2);
        assert_eq!(status.success_count, 1);
        assert!(status.is_available);
        assert!((status.success_rate - 100.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_non_2xx_is_returned_but_counted_as_error() {
        let transport = Arc::new(StaticTransport::new(404));
        let (executor, endpoint) =
            setup(transport.clone(), ApiEndpoint::new("svc", "http://x", "GET")).await;

        let response = executor.call(&endpoint.id, ApiRequest::new()).await.unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(transport.seen.lock().await.len(), 1);

        let status = executor.registry().status(&endpoint.id).await.unwrap();
        assert_eq!(status.error_count, 1);
        assert!(!status.is_available);
    }

    #[tokio::test]
    async fn test_call_merges_headers_body_and_query() {
        let transport = Arc::new(StaticTransport::new(200));
        let (executor, endpoint) = setup(
            transport.clone(),
            ApiEndpoint::new("svc", "http://x/items", "POST")
                .with_header("X-Env", "prod")
                .with_header("Accept", "text/plain")
                .with_auth(AuthConfig::bearer("tok")),
        )
        .await;

        let request = ApiRequest::new()
            .with_body(serde_json::json!({"name": "widget"}))
            .with_header("accept", "application/json")
            .with_query("page", "2");
        executor.call(&endpoint.id, request).await.unwrap();

        let seen = transport.seen.lock().await;
        let sent = &seen[0];
        assert_eq!(sent.method, "POST");
        assert_eq!(sent.url, "http://x/items");
        assert_eq!(sent.headers.get("X-Env").unwrap(), "prod");
        assert_eq!(sent.headers.get("accept").unwrap(), "application/json");
        assert!(!sent.headers.contains_key("Accept"));
        assert_eq!(sent.headers.get("Authorization").unwrap(), "Bearer tok");
        assert_eq!(sent.headers.get("Content-Type").unwrap(), "application/json");
        assert_eq!(sent.query.get("page").unwrap(), "2");
        assert_eq!(sent.body.as_deref(), Some(&br#"{"name":"widget"}"#[..]));

        let stored = executor.registry().get(&endpoint.id).await.unwrap();
        assert!(stored.last_called_at.is_some());
    }

    #[tokio::test]
    async fn test_call_rejects_inactive_and_unknown() {
        let transport = Arc::new(StaticTransport::new(200));
        let (executor, endpoint) =
            setup(transport.clone(), ApiEndpoint::new("svc", "http://x", "GET")).await;
        executor.registry().deactivate(&endpoint.id).await.unwrap();

        let result = executor.call(&endpoint.id, ApiRequest::new()).await;
        assert!(matches!(result, Err(IntegrationError::Inactive { .. })));

        let result = executor.call("missing", ApiRequest::new()).await;
        assert!(matches!(result, Err(IntegrationError::NotFound { .. })));
        assert!(transport.seen.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_bad_auth_fails_before_any_attempt() {
        let transport = Arc::new(FailingTransport {
            attempts: AtomicU32::new(0),
        });
        let (executor, endpoint) = setup(
            transport.clone(),
            ApiEndpoint::new("svc", "http://x", "GET").with_auth(AuthConfig::new("bearer")),
        )
        .await;

        let result = executor.call(&endpoint.id, ApiRequest::new()).await;
        assert!(matches!(result, Err(IntegrationError::AuthConfig(_))));
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_auth_header_schemes() {
        let (name, value) = auth_header(&AuthConfig::bearer("abc")).unwrap();
        assert_eq!(name, "Authorization");
        assert_eq!(value, "Bearer abc");

        let (name, value) = auth_header(&AuthConfig::basic("user", "pass")).unwrap();
        assert_eq!(name, "Authorization");
        assert_eq!(value, "Basic dXNlcjpwYXNz");

        let (name, value) = auth_header(&AuthConfig::api_key("k")).unwrap();
        assert_eq!(name, "X-API-Key");
        assert_eq!(value, "k");

        let custom = AuthConfig::api_key("k").with_field("header", "X-Service-Token");
        let (name, _) = auth_header(&custom).unwrap();
        assert_eq!(name, "X-Service-Token");
    }

    #[test]
    fn test_auth_header_errors() {
        assert!(matches!(
            auth_header(&AuthConfig::new("oauth2")),
            Err(IntegrationError::AuthConfig(_))
        ));
        assert!(matches!(
            auth_header(&AuthConfig::new("basic").with_field("username", "u")),
            Err(IntegrationError::AuthConfig(_))
        ));
        assert!(matches!(
            auth_header(&AuthConfig::new("api_key")),
            Err(IntegrationError::AuthConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_probe_criteria() {
        for (status, expected) in [(200u16, true), (404, true), (499, true), (500, false), (503, false)] {
            let transport = Arc::new(StaticTransport::new(status));
            let (executor, endpoint) =
                setup(transport, ApiEndpoint::new("svc", "http://x", "GET")).await;

            let outcome = executor.probe(&endpoint, Duration::from_secs(1)).await;
            assert_eq!(outcome.available, expected, "status {}", status);
            assert_eq!(outcome.status_code, Some(status));

            let api_status = executor.registry().status(&endpoint.id).await.unwrap();
            assert_eq!(api_status.is_available, expected);
        }
    }

    #[tokio::test]
    async fn test_probe_absorbs_transport_failure() {
        let transport = Arc::new(FailingTransport {
            attempts: AtomicU32::new(0),
        });
        let (executor, endpoint) = setup(
            transport.clone(),
            ApiEndpoint::new("svc", "http://x", "GET").with_retry_count(3),
        )
        .await;

        let outcome = executor.probe(&endpoint, Duration::from_secs(1)).await;
        assert!(!outcome.available);
        assert!(outcome.error.unwrap().contains("connection refused"));
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(
            executor.registry().status(&endpoint.id).await.unwrap().error_count,
            1
        );
    }
}
