//! Sync scheduler
//!
//! Drives sync jobs through `Idle -> Running -> {Completed, Failed, Cancelled}`.
//! State transitions happen in the [`SyncJobStore`]; this type owns the
//! spawned job tasks, their cancellation senders and the scheduling loop that
//! starts due jobs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use super::runner::{RunnerRegistry, SyncContext, SyncRunError, SyncRunner};
use super::store::{RunId, RunOutcome, StoreCounts, SyncJobStore};
use super::types::{SyncEvent, SyncJob, SyncState, SyncStatus};
use crate::config::SyncConfig;
use crate::error::{IntegrationError, IntegrationResult};
use crate::events::{EventBus, IntegrationEvent};

/// A spawned run that may still be executing.
struct RunHandle {
    run: RunId,
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Scheduler for sync jobs.
pub struct SyncScheduler {
    store: Arc<SyncJobStore>,
    runners: RwLock<RunnerRegistry>,
    max_concurrent: usize,
    job_timeout: Duration,
    supervisor_interval: Duration,
    running: Mutex<HashMap<String, RunHandle>>,
    events: EventBus,
}

impl SyncScheduler {
    pub fn new(config: &SyncConfig, events: EventBus) -> Self {
        Self {
            store: Arc::new(SyncJobStore::new()),
            runners: RwLock::new(RunnerRegistry::new()),
            max_concurrent: config.max_concurrent,
            job_timeout: config.job_timeout(),
            supervisor_interval: config.supervisor_interval(),
            running: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Builder form of [`register_runner`](Self::register_runner) for setup code.
    pub fn with_runner(mut self, runner: Arc<dyn SyncRunner>) -> Self {
        self.runners.get_mut().register(runner);
        self
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Register the runner for a sync type.
    pub async fn register_runner(&self, runner: Arc<dyn SyncRunner>) -> String {
        let name = self.runners.write().await.register(runner);
        tracing::debug!(runner = %name, "Registered sync runner");
        name
    }

    pub async fn create_job(&self, job: SyncJob) -> IntegrationResult<SyncJob> {
        let job = self.store.create(job).await?;
        self.events.publish(IntegrationEvent::SyncJobCreated {
            job_id: job.id.clone(),
        });
        Ok(job)
    }

    pub async fn update_job(&self, id: &str, job: SyncJob) -> IntegrationResult<SyncJob> {
        self.store.update(id, job).await
    }

    pub async fn deactivate_job(&self, id: &str) -> IntegrationResult<SyncJob> {
        self.store.deactivate(id).await
    }

    pub async fn get_job(&self, id: &str) -> IntegrationResult<SyncJob> {
        self.store.get(id).await
    }

    pub async fn list_jobs(&self) -> Vec<SyncJob> {
        self.store.list().await
    }

    pub async fn status(&self, id: &str) -> IntegrationResult<SyncStatus> {
        self.store.status(id).await
    }

    pub async fn history(&self, id: &str) -> IntegrationResult<Vec<SyncEvent>> {
        self.store.history(id).await
    }

    pub async fn active_syncs(&self) -> usize {
        self.store.active_syncs().await
    }

    pub async fn counts(&self) -> StoreCounts {
        self.store.counts().await
    }

    /// Start a job. The job body runs on its own task; this returns as soon
    /// as the job is Running.
    ///
    /// # Errors
    /// * `NotFound`, `Inactive`, `AlreadyRunning`
    /// * `ConcurrencyLimit` when `max_concurrent` jobs are already running
    pub async fn start(&self, job_id: &str) -> IntegrationResult<SyncStatus> {
        // Held until the handle is stored, so a concurrent `stop` always finds it.
        let mut running = self.running.lock().await;
        let (job, run) = self.store.begin_run(job_id, self.max_concurrent).await?;
        let runner = self.runners.read().await.get(&job.sync_type);

        let (cancel_tx, cancel_rx) = watch::channel(false);
        if !self.store.is_current(&job.id, run).await {
            // Stopped before the task exists.
            let _ = cancel_tx.send(true);
        }
        let ctx = SyncContext::new(&job.id, run, self.store.clone(), cancel_rx);
        let task = tokio::spawn(execute(
            job.clone(),
            runner,
            ctx,
            self.store.clone(),
            self.events.clone(),
            self.job_timeout,
        ));

        running.insert(
            job.id.clone(),
            RunHandle {
                run,
                cancel: cancel_tx,
                task,
            },
        );
        drop(running);

        tracing::info!(job_id = %job.id, name = %job.name, sync_type = %job.sync_type, "Sync job started");
        self.events.publish(IntegrationEvent::SyncStarted {
            job_id: job.id.clone(),
        });
        self.store.status(&job.id).await
    }

    /// Cancel a running job and signal its task.
    ///
    /// # Errors
    /// * `NotFound` for unknown jobs
    /// * `NotRunning` unless the job is Running
    pub async fn stop(&self, job_id: &str) -> IntegrationResult<SyncStatus> {
        let run = self.store.cancel_run(job_id).await?;
        if let Some(handle) = self.running.lock().await.get(job_id) {
            if handle.run == run {
                // The task may already have returned; a closed channel is fine.
                let _ = handle.cancel.send(true);
            }
        }

        tracing::info!(job_id, "Sync job cancelled");
        self.events.publish(IntegrationEvent::SyncFinished {
            job_id: job_id.to_string(),
            state: SyncState::Cancelled,
        });
        self.store.status(job_id).await
    }

    /// Cancel every running job. Used on shutdown.
    pub async fn stop_all(&self) {
        let ids: Vec<String> = self.running.lock().await.keys().cloned().collect();
        for id in ids {
            match self.stop(&id).await {
                Ok(_) | Err(IntegrationError::NotRunning(_)) => {}
                Err(err) => tracing::warn!(job_id = %id, error = %err, "Failed to cancel sync job"),
            }
        }
        self.reap().await;
    }

    /// Drop handles of tasks that have returned.
    async fn reap(&self) -> usize {
        let mut running = self.running.lock().await;
        let before = running.len();
        running.retain(|_, handle| !handle.task.is_finished());
        before - running.len()
    }

    /// Start every due scheduled job. Returns how many were started.
    pub async fn run_due(&self, now: DateTime<Utc>) -> usize {
        self.reap().await;

        let mut started = 0;
        for job_id in self.store.due_jobs(now).await {
            match self.start(&job_id).await {
                Ok(_) => {
                    started += 1;
                    self.store.advance_schedule(&job_id, now).await;
                }
                Err(IntegrationError::ConcurrencyLimit { limit }) => {
                    tracing::info!(job_id = %job_id, limit, "Concurrency limit reached, retrying scheduled job on next tick");
                }
                Err(err) => {
                    tracing::warn!(job_id = %job_id, error = %err, "Could not start scheduled sync job");
                    self.store.advance_schedule(&job_id, now).await;
                }
            }
        }
        started
    }

    /// Run the scheduling loop until `shutdown` flips to true.
    pub async fn run_supervisor(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            interval_secs = self.supervisor_interval.as_secs(),
            "Sync supervisor started"
        );
        let mut ticker = tokio::time::interval(self.supervisor_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let started = self.run_due(Utc::now()).await;
                    if started > 0 {
                        tracing::debug!(started, "Started scheduled sync jobs");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Sync supervisor stopped");
    }
}

/// Body of a spawned run: execute the runner under the job timeout and record
/// the natural outcome. A run that was stopped meanwhile is left Cancelled.
async fn execute(
    job: SyncJob,
    runner: Option<Arc<dyn SyncRunner>>,
    ctx: SyncContext,
    store: Arc<SyncJobStore>,
    events: EventBus,
    job_timeout: Duration,
) {
    let result = match runner {
        None => Err(SyncRunError::Failed(format!(
            "no runner registered for sync type '{}'",
            job.sync_type
        ))),
        Some(runner) => match tokio::time::timeout(job_timeout, runner.run(&job, &ctx)).await {
            Ok(result) => result,
            Err(_) => Err(SyncRunError::Failed(format!(
                "sync timed out after {}s",
                job_timeout.as_secs()
            ))),
        },
    };

    let outcome = match result {
        Ok(()) => RunOutcome::Completed,
        Err(err) => RunOutcome::Failed(err.to_string()),
    };

    let run = ctx.run_id();
    match store.finish_run(&job.id, run, outcome.clone()).await {
        Some(state) => {
            match &outcome {
                RunOutcome::Completed => tracing::info!(job_id = %job.id, "Sync job completed"),
                RunOutcome::Failed(error) => {
                    tracing::warn!(job_id = %job.id, error = %error, "Sync job failed")
                }
            }
            events.publish(IntegrationEvent::SyncFinished {
                job_id: job.id.clone(),
                state,
            });
        }
        None => {
            tracing::debug!(job_id = %job.id, "Sync run ended after it was cancelled");
        }
    }
}
