//! Error types for the integration core
//!
//! Every public operation returns [`IntegrationResult`]. Validation and lookup
//! failures are returned synchronously and never retried; transport failures
//! are retried by the call executor before surfacing as
//! [`IntegrationError::Transport`].

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// The kind of entity an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Endpoint,
    SyncJob,
    Webhook,
    Consumer,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Endpoint => write!(f, "endpoint"),
            EntityKind::SyncJob => write!(f, "sync job"),
            EntityKind::Webhook => write!(f, "webhook"),
            EntityKind::Consumer => write!(f, "webhook consumer"),
        }
    }
}

/// Underlying network failure of a single outbound attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportFailure {
    /// The attempt exceeded the endpoint timeout.
    #[error("request timed out")]
    Timeout,
    /// The remote host could not be reached.
    #[error("connection failed: {0}")]
    Connect(String),
    /// The request could not be built or sent.
    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportFailure {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportFailure::Timeout
        } else if err.is_connect() {
            TransportFailure::Connect(err.to_string())
        } else {
            TransportFailure::Other(err.to_string())
        }
    }
}

/// Errors returned by the integration core.
#[derive(Debug, Error)]
pub enum IntegrationError {
    /// Malformed input (missing name, url, method, ...).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unknown endpoint, job, webhook or consumer.
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    /// Duplicate ID on creation.
    #[error("{kind} already exists: {id}")]
    Conflict { kind: EntityKind, id: String },

    /// Operation attempted on a deactivated entity.
    #[error("{kind} is inactive: {id}")]
    Inactive { kind: EntityKind, id: String },

    /// The sync job is already in the Running state.
    #[error("sync job is already running: {0}")]
    AlreadyRunning(String),

    /// The sync job is not in the Running state.
    #[error("sync job is not running: {0}")]
    NotRunning(String),

    /// The global cap on running sync jobs has been reached.
    #[error("concurrency limit reached: {limit} sync jobs already running")]
    ConcurrencyLimit { limit: usize },

    /// Missing or invalid auth descriptor fields.
    #[error("invalid auth configuration: {0}")]
    AuthConfig(String),

    /// Network failure after all retries were exhausted.
    #[error("request failed after {retries} retries: {source}")]
    Transport {
        retries: u32,
        #[source]
        source: TransportFailure,
    },

    /// The operation did not finish within its configured deadline.
    #[error("operation exceeded deadline of {0:?}")]
    DeadlineExceeded(Duration),

    /// `start` called on a running manager.
    #[error("integration manager is already started")]
    AlreadyStarted,

    /// `stop` called on a manager that was never started.
    #[error("integration manager is not started")]
    NotStarted,

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),
}

impl IntegrationError {
    pub fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        IntegrationError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn conflict(kind: EntityKind, id: impl Into<String>) -> Self {
        IntegrationError::Conflict {
            kind,
            id: id.into(),
        }
    }

    pub fn inactive(kind: EntityKind, id: impl Into<String>) -> Self {
        IntegrationError::Inactive {
            kind,
            id: id.into(),
        }
    }
}

impl From<config::ConfigError> for IntegrationError {
    fn from(err: config::ConfigError) -> Self {
        IntegrationError::Config(err.to_string())
    }
}

/// Result type for integration operations
pub type IntegrationResult<T> = Result<T, IntegrationError>;
