//! Status and metrics snapshots
//!
//! Read-only aggregates over the endpoint, sync and webhook stores, as
//! returned by [`IntegrationManager::status`](crate::manager::IntegrationManager::status)
//! and [`IntegrationManager::metrics`](crate::manager::IntegrationManager::metrics)
//! and served on `/status` and `/metrics`.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::endpoints::{success_rate, ApiStatus};
use crate::sync::StoreCounts;

/// Overall state of the manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerStatus {
    /// Background activities are running
    pub running: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub uptime_secs: u64,
    pub endpoints: EndpointSummary,
    pub sync_jobs: SyncSummary,
    pub webhooks: WebhookSummary,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSummary {
    pub total: usize,
    pub active: usize,
    pub available: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub total: usize,
    pub active: usize,
    pub running: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookSummary {
    pub total: usize,
    pub active: usize,
}

/// Counters across all components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerMetrics {
    pub collected_at: DateTime<Utc>,
    pub calls: CallMetrics,
    pub sync: SyncMetrics,
    pub webhooks: WebhookMetrics,
    /// Notifications lost to a full or closed event channel
    pub events_dropped: u64,
}

/// Aggregate of every endpoint's [`ApiStatus`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallMetrics {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub success_rate: f64,
    /// Mean of the last response time of endpoints that have been called
    pub average_response_ms: f64,
}

impl CallMetrics {
    pub fn from_statuses(statuses: &[ApiStatus]) -> Self {
        let successful_calls: u64 = statuses.iter().map(|s| s.success_count).sum();
        let failed_calls: u64 = statuses.iter().map(|s| s.error_count).sum();

        let called: Vec<Duration> = statuses
            .iter()
            .filter(|s| s.total_calls() > 0)
            .map(|s| s.response_time)
            .collect();
        let average_response_ms = if called.is_empty() {
            0.0
        } else {
            let total: Duration = called.iter().sum();
            total.as_secs_f64() * 1000.0 / called.len() as f64
        };

        Self {
            total_calls: successful_calls + failed_calls,
            successful_calls,
            failed_calls,
            success_rate: success_rate(successful_calls, failed_calls),
            average_response_ms,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetrics {
    /// Job count per state name
    pub jobs_by_state: BTreeMap<String, usize>,
    pub active_syncs: usize,
    pub max_concurrent: usize,
    pub records_synced: u64,
    pub records_failed: u64,
}

impl SyncMetrics {
    pub fn from_counts(counts: &StoreCounts, active_syncs: usize, max_concurrent: usize) -> Self {
        Self {
            jobs_by_state: counts
                .by_state
                .iter()
                .map(|(state, count)| (state.to_string(), *count))
                .collect(),
            active_syncs,
            max_concurrent,
            records_synced: counts.records_synced,
            records_failed: counts.records_failed,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookMetrics {
    pub deliveries: usize,
    pub successful: usize,
    pub failed: usize,
}
