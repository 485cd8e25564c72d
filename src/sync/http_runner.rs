//! Built-in `http` runner
//!
//! Reads records from the source endpoint and pushes them one by one to the
//! target endpoint. Both ends are registered endpoint IDs and every request
//! goes through the [`CallExecutor`], so auth, retries and status tracking
//! apply as for any other call.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::runner::{SyncContext, SyncRunError, SyncRunner};
use super::types::SyncJob;
use crate::endpoints::{ApiRequest, CallExecutor};
use crate::error::IntegrationError;

pub const HTTP_RUNNER: &str = "http";

/// Endpoint-to-endpoint record copier.
pub struct HttpSyncRunner {
    executor: Arc<CallExecutor>,
}

impl HttpSyncRunner {
    pub fn new(executor: Arc<CallExecutor>) -> Self {
        Self { executor }
    }

    async fn fetch_records(&self, job: &SyncJob) -> Result<Vec<Value>, SyncRunError> {
        let response = self.executor.call(&job.source_id, ApiRequest::new()).await?;
        if !response.is_success() {
            return Err(SyncRunError::Failed(format!(
                "source '{}' returned HTTP {}",
                job.source_id, response.status
            )));
        }
        let body: Value = response.json().map_err(|e| {
            SyncRunError::Failed(format!("source '{}' returned invalid JSON: {}", job.source_id, e))
        })?;
        extract_records(body).ok_or_else(|| {
            SyncRunError::Failed(format!(
                "source '{}' did not return a record list",
                job.source_id
            ))
        })
    }
}

/// Accepts a bare array or an object carrying a `records` or `data` array.
fn extract_records(body: Value) -> Option<Vec<Value>> {
    match body {
        Value::Array(records) => Some(records),
        Value::Object(mut map) => ["records", "data"]
            .iter()
            .find_map(|key| match map.remove(*key) {
                Some(Value::Array(records)) => Some(records),
                _ => None,
            }),
        _ => None,
    }
}

#[async_trait]
impl SyncRunner for HttpSyncRunner {
    fn name(&self) -> &str {
        HTTP_RUNNER
    }

    async fn run(&self, job: &SyncJob, ctx: &SyncContext) -> Result<(), SyncRunError> {
        let records = self.fetch_records(job).await?;
        let total = records.len() as u64;
        ctx.set_total(total).await;
        ctx.checkpoint()?;

        let mut failed = 0u64;
        for record in records {
            ctx.checkpoint()?;
            match self
                .executor
                .call(&job.target_id, ApiRequest::new().with_body(record))
                .await
            {
                Ok(response) if response.is_success() => ctx.record_synced(1).await,
                Ok(response) => {
                    failed += 1;
                    tracing::warn!(
                        job_id = %job.id,
                        target = %job.target_id,
                        status = response.status,
                        "Target rejected record"
                    );
                    ctx.record_failed(1).await;
                }
                Err(err @ IntegrationError::Transport { .. }) => {
                    failed += 1;
                    tracing::warn!(job_id = %job.id, target = %job.target_id, error = %err, "Failed to push record");
                    ctx.record_failed(1).await;
                }
                Err(err) => return Err(err.into()),
            }
        }

        ctx.set_metric("records_pushed", Value::from(total - failed))
            .await;

        if total > 0 && failed == total {
            return Err(SyncRunError::Failed(format!(
                "all {} records failed to reach target '{}'",
                total, job.target_id
            )));
        }
        Ok(())
    }
}
