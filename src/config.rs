//! Service configuration
//!
//! Configuration is read from a TOML file through the `config` crate, with
//! environment overrides in the form `HUBLINK__<SECTION>__<KEY>`
//! (e.g. `HUBLINK__SYNC__MAX_CONCURRENT=10`). Every section has defaults, so
//! an empty file is a valid configuration.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::endpoints::{ApiEndpoint, AuthConfig};
use crate::error::{IntegrationError, IntegrationResult};
use crate::sync::SyncJob;
use crate::webhooks::{RetentionPolicy, Webhook};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LogSettings,
    #[serde(default)]
    pub calls: CallsConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub webhooks: WebhooksConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub operations: OperationsConfig,
    /// Endpoints registered at startup
    #[serde(default)]
    pub endpoints: Vec<EndpointSeed>,
    /// Sync jobs created at startup
    #[serde(default)]
    pub sync_jobs: Vec<SyncJobSeed>,
    /// Webhooks registered at startup
    #[serde(default)]
    pub webhook_registrations: Vec<WebhookSeed>,
}

/// HTTP server settings for `hublink serve`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8088
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    /// Full bind address (ip:port)
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// Logging settings. `RUST_LOG` takes precedence over `level`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Defaults applied to outbound calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallsConfig {
    #[serde(default = "default_call_timeout")]
    pub default_timeout_secs: u64,
    #[serde(default = "default_retry_count")]
    pub default_retry_count: u32,
    /// Retry delay unit; attempt `n` waits `n * backoff_unit_ms`.
    #[serde(default = "default_backoff_unit")]
    pub backoff_unit_ms: u64,
}

fn default_call_timeout() -> u64 {
    30
}

fn default_retry_count() -> u32 {
    3
}

fn default_backoff_unit() -> u64 {
    1000
}

impl Default for CallsConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_call_timeout(),
            default_retry_count: default_retry_count(),
            backoff_unit_ms: default_backoff_unit(),
        }
    }
}

impl CallsConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn backoff_unit(&self) -> Duration {
        Duration::from_millis(self.backoff_unit_ms)
    }
}

/// Health monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_monitor_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

fn default_monitor_interval() -> u64 {
    60
}

fn default_probe_timeout() -> u64 {
    10
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_monitor_interval(),
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

/// Sync scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Maximum number of jobs in the Running state at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_job_timeout")]
    pub job_timeout_secs: u64,
    #[serde(default = "default_supervisor_interval")]
    pub supervisor_interval_secs: u64,
}

fn default_max_concurrent() -> usize {
    5
}

fn default_job_timeout() -> u64 {
    3600
}

fn default_supervisor_interval() -> u64 {
    30
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            job_timeout_secs: default_job_timeout(),
            supervisor_interval_secs: default_supervisor_interval(),
        }
    }
}

impl SyncConfig {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn supervisor_interval(&self) -> Duration {
        Duration::from_secs(self.supervisor_interval_secs)
    }
}

/// Webhook log retention settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhooksConfig {
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    #[serde(default)]
    pub retention: RetentionConfig,
}

fn default_sweep_interval() -> u64 {
    300
}

impl Default for WebhooksConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            retention: RetentionConfig::default(),
        }
    }
}

impl WebhooksConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_max_age")]
    pub max_age_secs: u64,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

fn default_max_age() -> u64 {
    7 * 24 * 60 * 60
}

fn default_max_entries() -> usize {
    1000
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_age_secs: default_max_age(),
            max_entries: default_max_entries(),
        }
    }
}

impl From<&RetentionConfig> for RetentionPolicy {
    fn from(config: &RetentionConfig) -> Self {
        RetentionPolicy {
            max_age: Duration::from_secs(config.max_age_secs),
            max_entries: config.max_entries,
        }
    }
}

/// Internal event channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_event_capacity")]
    pub capacity: usize,
}

fn default_event_capacity() -> usize {
    256
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: default_event_capacity(),
        }
    }
}

/// Deadlines for user-facing operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationsConfig {
    /// Deadline for operations on a single entity (one probe)
    #[serde(default = "default_entity_deadline")]
    pub entity_deadline_secs: u64,
    /// Deadline for operations spanning every endpoint
    #[serde(default = "default_ecosystem_deadline")]
    pub ecosystem_deadline_secs: u64,
    /// Deadline for a user call including retries
    #[serde(default = "default_call_deadline")]
    pub call_deadline_secs: u64,
}

fn default_entity_deadline() -> u64 {
    60
}

fn default_ecosystem_deadline() -> u64 {
    300
}

fn default_call_deadline() -> u64 {
    120
}

impl Default for OperationsConfig {
    fn default() -> Self {
        Self {
            entity_deadline_secs: default_entity_deadline(),
            ecosystem_deadline_secs: default_ecosystem_deadline(),
            call_deadline_secs: default_call_deadline(),
        }
    }
}

impl OperationsConfig {
    pub fn entity_deadline(&self) -> Duration {
        Duration::from_secs(self.entity_deadline_secs)
    }

    pub fn ecosystem_deadline(&self) -> Duration {
        Duration::from_secs(self.ecosystem_deadline_secs)
    }

    pub fn call_deadline(&self) -> Duration {
        Duration::from_secs(self.call_deadline_secs)
    }
}

/// Endpoint declared in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointSeed {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub retry_count: Option<u32>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl EndpointSeed {
    /// Build the endpoint, filling unset values from the call defaults.
    pub fn to_endpoint(&self, defaults: &CallsConfig) -> ApiEndpoint {
        let mut endpoint = ApiEndpoint::new(&self.name, &self.url, &self.method)
            .with_timeout(
                self.timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or_else(|| defaults.default_timeout()),
            )
            .with_retry_count(self.retry_count.unwrap_or(defaults.default_retry_count));
        if let Some(id) = &self.id {
            endpoint = endpoint.with_id(id);
        }
        for (name, value) in &self.headers {
            endpoint = endpoint.with_header(name, value);
        }
        if let Some(auth) = &self.auth {
            endpoint = endpoint.with_auth(auth.clone());
        }
        endpoint
    }
}

/// Sync job declared in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncJobSeed {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub source: String,
    pub target: String,
    #[serde(default = "default_sync_type")]
    pub sync_type: String,
    #[serde(default)]
    pub schedule: Option<String>,
}

fn default_sync_type() -> String {
    "http".to_string()
}

impl SyncJobSeed {
    pub fn to_job(&self) -> SyncJob {
        let mut job = SyncJob::new(&self.name, &self.source, &self.target, &self.sync_type);
        if let Some(id) = &self.id {
            job = job.with_id(id);
        }
        if let Some(schedule) = &self.schedule {
            job = job.with_schedule(schedule);
        }
        job
    }
}

/// Webhook declared in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSeed {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub consumer: String,
    #[serde(default)]
    pub secret: Option<String>,
}

impl WebhookSeed {
    pub fn to_webhook(&self) -> Webhook {
        let mut webhook = Webhook::new(&self.name, &self.consumer);
        if let Some(id) = &self.id {
            webhook = webhook.with_id(id);
        }
        if let Some(secret) = &self.secret {
            webhook = webhook.with_secret(secret);
        }
        webhook
    }
}

impl HubConfig {
    /// Load configuration from a TOML file with `HUBLINK__` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrationError::Config`] if the file does not exist, cannot
    /// be parsed, or fails validation.
    pub fn load<P: AsRef<Path>>(path: P) -> IntegrationResult<Self> {
        let path = path.as_ref();

        let path_str = path
            .to_str()
            .ok_or_else(|| IntegrationError::Config(format!("invalid path: {:?}", path)))?;

        if !path.exists() {
            return Err(IntegrationError::Config(format!(
                "configuration file not found: {}",
                path_str
            )));
        }

        let config = Config::builder()
            .add_source(File::with_name(path_str))
            .add_source(
                Environment::with_prefix("HUBLINK")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let hub_config: HubConfig = config.try_deserialize()?;
        hub_config.validate()?;
        Ok(hub_config)
    }

    /// Parse configuration from an in-memory TOML string (no env overrides).
    pub fn from_toml_str(contents: &str) -> IntegrationResult<Self> {
        let config = Config::builder()
            .add_source(File::from_str(contents, config::FileFormat::Toml))
            .build()?;
        let hub_config: HubConfig = config.try_deserialize()?;
        hub_config.validate()?;
        Ok(hub_config)
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> IntegrationResult<()> {
        if self.sync.max_concurrent == 0 {
            return Err(IntegrationError::Config(
                "sync.max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.events.capacity == 0 {
            return Err(IntegrationError::Config(
                "events.capacity must be at least 1".to_string(),
            ));
        }
        if self.monitor.interval_secs == 0
            || self.sync.supervisor_interval_secs == 0
            || self.webhooks.sweep_interval_secs == 0
        {
            return Err(IntegrationError::Config(
                "background intervals must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
