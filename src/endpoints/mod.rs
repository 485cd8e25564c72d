//! Endpoints module
//!
//! Registry of external HTTP endpoints, the executor that calls them with
//! retries and auth injection, and the background health monitor.

pub mod executor;
pub mod health;
pub mod registry;
pub mod types;

pub use executor::{CallExecutor, HttpTransport, ProbeOutcome, ReqwestTransport};
pub use health::HealthMonitor;
pub use registry::{AvailabilityChange, EndpointRegistry};
pub use types::{
    success_rate, ApiEndpoint, ApiRequest, ApiResponse, ApiStatus, AuthConfig, CallKind,
    OutboundRequest, DEFAULT_API_KEY_HEADER, DEFAULT_RETRY_COUNT, DEFAULT_TIMEOUT,
    SUPPORTED_METHODS,
};
