//! Endpoint data model
//!
//! Definitions of registered endpoints, their derived health status, and the
//! request/response shapes used by the call executor.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default per-attempt timeout for an endpoint.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of retries after the first failed attempt.
pub const DEFAULT_RETRY_COUNT: u32 = 3;

/// HTTP verbs accepted for endpoint definitions.
pub const SUPPORTED_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

/// Header used by the `api_key` scheme when none is configured.
pub const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";

/// Authentication descriptor attached to an endpoint.
///
/// `auth_type` is one of `bearer`, `basic` or `api_key`; `config` carries the
/// scheme's fields (`token`; `username`/`password`; `key` and optional
/// `header`). Unknown types are rejected when a call is made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(rename = "type")]
    pub auth_type: String,
    #[serde(default)]
    pub config: HashMap<String, String>,
}

impl AuthConfig {
    pub fn new(auth_type: impl Into<String>) -> Self {
        Self {
            auth_type: auth_type.into(),
            config: HashMap::new(),
        }
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Self::new("bearer").with_field("token", token)
    }

    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::new("basic")
            .with_field("username", username)
            .with_field("password", password)
    }

    pub fn api_key(key: impl Into<String>) -> Self {
        Self::new("api_key").with_field("key", key)
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(name.into(), value.into());
        self
    }
}

/// A registered external HTTP target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiEndpoint {
    /// Unique ID; generated on registration when empty
    pub id: String,
    pub name: String,
    pub url: String,
    /// Upper-case HTTP verb
    pub method: String,
    /// Static headers sent with every call
    pub headers: HashMap<String, String>,
    /// Credentials are never serialized
    #[serde(default, skip_serializing)]
    pub auth: Option<AuthConfig>,
    /// Per-attempt timeout
    pub timeout: Duration,
    /// Additional attempts after the first transport failure
    pub retry_count: u32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_called_at: Option<DateTime<Utc>>,
}

impl ApiEndpoint {
    /// Create an endpoint definition with default timeout and retry policy.
    pub fn new(name: impl Into<String>, url: impl Into<String>, method: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            name: name.into(),
            url: url.into(),
            method: method.into(),
            headers: HashMap::new(),
            auth: None,
            timeout: DEFAULT_TIMEOUT,
            retry_count: DEFAULT_RETRY_COUNT,
            active: true,
            created_at: now,
            updated_at: now,
            last_called_at: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }
}

/// Live health of an endpoint, updated by every call attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiStatus {
    pub endpoint_id: String,
    pub is_available: bool,
    pub last_check: Option<DateTime<Utc>>,
    pub response_time: Duration,
    pub success_count: u64,
    pub error_count: u64,
    /// Percentage in `[0, 100]`; 0 when no calls have been made
    pub success_rate: f64,
}

impl ApiStatus {
    pub fn new(endpoint_id: impl Into<String>) -> Self {
        Self {
            endpoint_id: endpoint_id.into(),
            is_available: false,
            last_check: None,
            response_time: Duration::ZERO,
            success_count: 0,
            error_count: 0,
            success_rate: 0.0,
        }
    }

    /// Fold one attempt into the counters.
    pub fn record(&mut self, success: bool, response_time: Duration, at: DateTime<Utc>) {
        if success {
            self.success_count += 1;
        } else {
            self.error_count += 1;
        }
        self.is_available = success;
        self.response_time = response_time;
        self.last_check = Some(at);
        self.success_rate = success_rate(self.success_count, self.error_count);
    }

    pub fn total_calls(&self) -> u64 {
        self.success_count + self.error_count
    }
}

/// `successes / (successes + errors) * 100`, or 0 with no calls.
pub fn success_rate(successes: u64, errors: u64) -> f64 {
    let total = successes + errors;
    if total == 0 {
        return 0.0;
    }
    successes as f64 / total as f64 * 100.0
}

/// Caller-supplied parts of an outbound call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiRequest {
    /// JSON body; sent with `Content-Type: application/json`
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    /// Headers overriding the endpoint's static headers
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub query: HashMap<String, String>,
}

impl ApiRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }
}

/// Fully resolved request handed to an [`HttpTransport`](super::HttpTransport).
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
    pub timeout: Duration,
}

/// Response of a completed attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub elapsed: Duration,
}

impl ApiResponse {
    /// 2xx, the success criterion for user calls
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Anything below 500 means the service answered
    pub fn is_up(&self) -> bool {
        (200..500).contains(&self.status)
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }
}

/// Which success criterion an attempt is judged by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// User-initiated call: 2xx only
    User,
    /// Liveness probe: any status in `[200, 500)`
    Probe,
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallKind::User => write!(f, "user"),
            CallKind::Probe => write!(f, "probe"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_endpoint_defaults() {
        let endpoint = ApiEndpoint::new("svc", "http://x/health", "GET");
        assert!(endpoint.id.is_empty());
        assert_eq!(endpoint.timeout, DEFAULT_TIMEOUT);
        assert_eq!(endpoint.retry_count, DEFAULT_RETRY_COUNT);
        assert!(endpoint.active);
        assert!(endpoint.last_called_at.is_none());
    }

    #[test]
    fn test_success_rate_boundaries() {
        assert_eq!(success_rate(0, 0), 0.0);
        assert_eq!(success_rate(3, 0), 100.0);
        assert_eq!(success_rate(0, 4), 0.0);
        assert_eq!(success_rate(1, 3), 25.0);
        assert_eq!(success_rate(2, 1), 2.0 / 3.0 * 100.0);
    }

    #[test]
    fn test_status_record() {
        let mut status = ApiStatus::new("ep");
        assert!(!status.is_available);
        assert_eq!(status.success_rate, 0.0);

        let now = Utc::now();
        status.record(true, Duration::from_millis(12), now);
        assert!(status.is_available);
        assert_eq!(status.success_count, 1);
        assert_eq!(status.success_rate, 100.0);
        assert_eq!(status.last_check, Some(now));

        status.record(false, Duration::from_millis(40), now);
        assert!(!status.is_available);
        assert_eq!(status.error_count, 1);
        assert_eq!(status.success_rate, 50.0);
        assert_eq!(status.response_time, Duration::from_millis(40));
        assert_eq!(status.total_calls(), 2);
    }

    #[test]
    fn test_response_criteria() {
        let mut response = ApiResponse {
            status: 204,
            headers: HashMap::new(),
            body: Vec::new(),
            elapsed: Duration::ZERO,
        };
        assert!(response.is_success());
        assert!(response.is_up());

        response.status = 404;
        assert!(!response.is_success());
        assert!(response.is_up());

        response.status = 503;
        assert!(!response.is_success());
        assert!(!response.is_up());
    }

    #[test]
    fn test_auth_config_serialize() {
        let auth = AuthConfig::api_key("k-1").with_field("header", "X-Token");
        let json = serde_json::to_value(&auth).unwrap();
        assert_eq!(json["type"], "api_key");
        assert_eq!(json["config"]["header"], "X-Token");
    }
}
