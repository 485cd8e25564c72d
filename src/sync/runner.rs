//! Sync runner trait and registry
//!
//! A runner executes the body of a sync job. Runners are registered by name
//! and resolved through the job's `sync_type`. During a run the runner reports
//! record counts and metrics through a [`SyncContext`], which also exposes the
//! job's cancellation signal.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use super::store::{ProgressUpdate, RunId, SyncJobStore};
use super::types::SyncJob;
use crate::error::IntegrationError;

/// Why a run did not complete.
#[derive(Debug, thiserror::Error)]
pub enum SyncRunError {
    /// The run observed its cancellation signal
    #[error("sync cancelled")]
    Cancelled,

    #[error(transparent)]
    Integration(#[from] IntegrationError),

    #[error("{0}")]
    Failed(String),
}

/// Executes the body of a sync job.
#[async_trait]
pub trait SyncRunner: Send + Sync {
    /// Registry key, matched against [`SyncJob::sync_type`].
    fn name(&self) -> &str;

    /// Run the job once. Implementations should check
    /// [`SyncContext::is_cancelled`] between units of work.
    async fn run(&self, job: &SyncJob, ctx: &SyncContext) -> Result<(), SyncRunError>;
}

/// Handle given to a runner for one run of one job.
pub struct SyncContext {
    job_id: String,
    run: RunId,
    store: Arc<SyncJobStore>,
    cancel: watch::Receiver<bool>,
}

impl SyncContext {
    pub(crate) fn new(
        job_id: impl Into<String>,
        run: RunId,
        store: Arc<SyncJobStore>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            run,
            store,
            cancel,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn run_id(&self) -> RunId {
        self.run
    }

    /// True once the job has been stopped.
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Returns `Err(Cancelled)` if the job has been stopped.
    pub fn checkpoint(&self) -> Result<(), SyncRunError> {
        if self.is_cancelled() {
            Err(SyncRunError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub async fn set_total(&self, total: u64) {
        self.progress(ProgressUpdate {
            total: Some(total),
            ..ProgressUpdate::default()
        })
        .await;
    }

    pub async fn record_synced(&self, count: u64) {
        self.progress(ProgressUpdate {
            synced: count,
            ..ProgressUpdate::default()
        })
        .await;
    }

    pub async fn record_failed(&self, count: u64) {
        self.progress(ProgressUpdate {
            failed: count,
            ..ProgressUpdate::default()
        })
        .await;
    }

    pub async fn set_metric(&self, key: &str, value: serde_json::Value) {
        self.store.set_metric(&self.job_id, self.run, key, value).await;
    }

    async fn progress(&self, update: ProgressUpdate) {
        if !self.store.update_progress(&self.job_id, self.run, update).await {
            tracing::debug!(job_id = %self.job_id, "Ignoring progress for a run that is no longer current");
        }
    }
}

/// Runners by name.
#[derive(Default, Clone)]
pub struct RunnerRegistry {
    runners: HashMap<String, Arc<dyn SyncRunner>>,
}

impl RunnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a runner under its own name, replacing any previous one.
    pub fn register(&mut self, runner: Arc<dyn SyncRunner>) -> String {
        let name = runner.name().to_string();
        self.runners.insert(name.clone(), runner);
        name
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SyncRunner>> {
        self.runners.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.runners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }
}
