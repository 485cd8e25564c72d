//! Health monitor
//!
//! Periodically probes every active endpoint. Probes run concurrently, one per
//! endpoint per tick, and their results are folded into the endpoint statuses
//! through [`CallExecutor::probe`]. Probe failures are pure telemetry and are
//! never surfaced to callers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use super::executor::{CallExecutor, ProbeOutcome};
use super::registry::EndpointRegistry;
use crate::error::{EntityKind, IntegrationError, IntegrationResult};

/// Background prober for registered endpoints.
pub struct HealthMonitor {
    executor: Arc<CallExecutor>,
    interval: Duration,
    probe_timeout: Duration,
}

impl HealthMonitor {
    pub fn new(executor: Arc<CallExecutor>, interval: Duration, probe_timeout: Duration) -> Self {
        Self {
            executor,
            interval,
            probe_timeout,
        }
    }

    fn registry(&self) -> &Arc<EndpointRegistry> {
        self.executor.registry()
    }

    /// Probe one endpoint now.
    pub async fn check_endpoint(&self, endpoint_id: &str) -> IntegrationResult<ProbeOutcome> {
        let endpoint = self.registry().get(endpoint_id).await?;
        if !endpoint.active {
            return Err(IntegrationError::inactive(EntityKind::Endpoint, endpoint_id));
        }
        Ok(self.executor.probe(&endpoint, self.probe_timeout).await)
    }

    /// Probe every active endpoint concurrently.
    pub async fn check_all(&self) -> Vec<ProbeOutcome> {
        let endpoints = self.registry().list_active().await;
        let probes = endpoints
            .iter()
            .map(|endpoint| self.executor.probe(endpoint, self.probe_timeout));
        futures::future::join_all(probes).await
    }

    /// Run the probe loop until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Health monitor started"
        );
        let mut ticker = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let outcomes = self.check_all().await;
                    let down = outcomes.iter().filter(|o| !o.available).count();
                    tracing::debug!(
                        probed = outcomes.len(),
                        down,
                        "Health check round finished"
                    );
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Health monitor stopped");
    }
}
