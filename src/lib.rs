//! hublink - integration orchestration core
//!
//! Keeps a registry of external HTTP endpoints and calls them with auth
//! injection and retries, probes their health in the background, runs
//! scheduled and on-demand sync jobs between them, and routes inbound
//! webhooks to named consumers. [`manager::IntegrationManager`] ties the
//! pieces together; [`server`] exposes them over HTTP.

pub mod config;
pub mod endpoints;
pub mod error;
pub mod events;
pub mod logging;
pub mod manager;
pub mod metrics;
pub mod server;
pub mod sync;
pub mod webhooks;

pub use config::HubConfig;
pub use error::{IntegrationError, IntegrationResult};
pub use manager::IntegrationManager;
