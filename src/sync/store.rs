//! Sync job store
//!
//! Owns job definitions, one [`SyncStatus`] per job, each job's event history
//! and the global running counter. All four live under a single lock, so the
//! concurrency-cap check and the transition to Running happen in one critical
//! section.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::schedule::next_run_after;
use super::types::{SyncEvent, SyncEventKind, SyncJob, SyncState, SyncStatus};
use crate::error::{EntityKind, IntegrationError, IntegrationResult};

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed(String),
}

/// Identifies one run of a job. A later run of the same job gets a new ID,
/// so a straggling task cannot finish a run it does not own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunId(pub u64);

/// Counts of jobs by state, used by the manager's snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub total: usize,
    pub active: usize,
    pub by_state: HashMap<SyncState, usize>,
    pub records_synced: u64,
    pub records_failed: u64,
}

#[derive(Default)]
struct StoreInner {
    jobs: HashMap<String, SyncJob>,
    statuses: HashMap<String, SyncStatus>,
    events: HashMap<String, Vec<SyncEvent>>,
    current_runs: HashMap<String, RunId>,
    active_syncs: usize,
    next_run_id: u64,
}

impl StoreInner {
    fn append(&mut self, job_id: &str, event: SyncEvent) {
        self.events.entry(job_id.to_string()).or_default().push(event);
    }

    /// Status of `job_id` if it is Running as part of `run`.
    fn running_status(&mut self, job_id: &str, run: RunId) -> Option<&mut SyncStatus> {
        if self.current_runs.get(job_id) != Some(&run) {
            return None;
        }
        self.statuses
            .get_mut(job_id)
            .filter(|status| status.state == SyncState::Running)
    }
}

/// In-memory store of sync jobs, statuses and histories.
#[derive(Default)]
pub struct SyncJobStore {
    inner: RwLock<StoreInner>,
}

impl SyncJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a job with an Idle status and a `created` event.
    ///
    /// # Errors
    /// * `Validation` if name, source, target or sync type are empty
    /// * `Conflict` on a duplicate ID
    pub async fn create(&self, mut job: SyncJob) -> IntegrationResult<SyncJob> {
        validate(&mut job)?;
        if job.id.is_empty() {
            job.id = Uuid::new_v4().to_string();
        }
        let now = Utc::now();
        job.created_at = now;
        job.updated_at = now;
        job.last_run = None;
        job.next_run = next_run_after(job.schedule.as_deref(), now);

        let mut inner = self.inner.write().await;
        if inner.jobs.contains_key(&job.id) {
            return Err(IntegrationError::conflict(EntityKind::SyncJob, &job.id));
        }
        inner.jobs.insert(job.id.clone(), job.clone());
        inner
            .statuses
            .insert(job.id.clone(), SyncStatus::new(&job.id));
        inner.append(
            &job.id,
            SyncEvent::new(SyncEventKind::Created, format!("Sync job '{}' created", job.name))
                .with_data(json!({
                    "source": job.source_id,
                    "target": job.target_id,
                    "sync_type": job.sync_type,
                })),
        );
        drop(inner);

        tracing::info!(
            job_id = %job.id,
            name = %job.name,
            source = %job.source_id,
            target = %job.target_id,
            next_run = ?job.next_run,
            "Created sync job"
        );
        Ok(job)
    }

    /// Replace a job definition, keeping run bookkeeping and recomputing `next_run`.
    pub async fn update(&self, id: &str, mut job: SyncJob) -> IntegrationResult<SyncJob> {
        validate(&mut job)?;
        let now = Utc::now();

        let mut inner = self.inner.write().await;
        let existing = inner
            .jobs
            .get_mut(id)
            .ok_or_else(|| IntegrationError::not_found(EntityKind::SyncJob, id))?;
        job.id = id.to_string();
        job.created_at = existing.created_at;
        job.last_run = existing.last_run;
        job.updated_at = now;
        job.next_run = next_run_after(job.schedule.as_deref(), now);
        *existing = job.clone();
        inner.append(
            id,
            SyncEvent::new(SyncEventKind::Updated, format!("Sync job '{}' updated", job.name)),
        );
        drop(inner);

        tracing::info!(job_id = %job.id, name = %job.name, "Updated sync job");
        Ok(job)
    }

    /// Mark a job inactive. A running job keeps running until it ends.
    pub async fn deactivate(&self, id: &str) -> IntegrationResult<SyncJob> {
        let mut inner = self.inner.write().await;
        let job = inner
            .jobs
            .get_mut(id)
            .ok_or_else(|| IntegrationError::not_found(EntityKind::SyncJob, id))?;
        if !job.active {
            return Ok(job.clone());
        }
        job.active = false;
        job.next_run = None;
        job.updated_at = Utc::now();
        let job = job.clone();
        inner.append(
            id,
            SyncEvent::new(
                SyncEventKind::Deactivated,
                format!("Sync job '{}' deactivated", job.name),
            ),
        );
        drop(inner);

        tracing::info!(job_id = %job.id, name = %job.name, "Deactivated sync job");
        Ok(job)
    }

    pub async fn get(&self, id: &str) -> IntegrationResult<SyncJob> {
        self.inner
            .read()
            .await
            .jobs
            .get(id)
            .cloned()
            .ok_or_else(|| IntegrationError::not_found(EntityKind::SyncJob, id))
    }

    /// All jobs, ordered by creation time.
    pub async fn list(&self) -> Vec<SyncJob> {
        let mut jobs: Vec<SyncJob> = self.inner.read().await.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        jobs
    }

    pub async fn status(&self, id: &str) -> IntegrationResult<SyncStatus> {
        self.inner
            .read()
            .await
            .statuses
            .get(id)
            .cloned()
            .ok_or_else(|| IntegrationError::not_found(EntityKind::SyncJob, id))
    }

    /// Copy of the job's event history, oldest first.
    pub async fn history(&self, id: &str) -> IntegrationResult<Vec<SyncEvent>> {
        let inner = self.inner.read().await;
        if !inner.jobs.contains_key(id) {
            return Err(IntegrationError::not_found(EntityKind::SyncJob, id));
        }
        Ok(inner.events.get(id).cloned().unwrap_or_default())
    }

    /// Number of jobs currently Running.
    pub async fn active_syncs(&self) -> usize {
        self.inner.read().await.active_syncs
    }

    /// Transition a job to Running if every precondition holds.
    ///
    /// The limit check and the counter increment share one critical section,
    /// so two concurrent callers can never both take the last slot.
    pub async fn begin_run(&self, id: &str, limit: usize) -> IntegrationResult<(SyncJob, RunId)> {
        let mut inner = self.inner.write().await;
        let job = inner
            .jobs
            .get(id)
            .cloned()
            .ok_or_else(|| IntegrationError::not_found(EntityKind::SyncJob, id))?;
        if !job.active {
            return Err(IntegrationError::inactive(EntityKind::SyncJob, id));
        }
        let running = inner
            .statuses
            .get(id)
            .map(|s| s.state == SyncState::Running)
            .unwrap_or(false);
        if running {
            return Err(IntegrationError::AlreadyRunning(id.to_string()));
        }
        if inner.active_syncs >= limit {
            return Err(IntegrationError::ConcurrencyLimit { limit });
        }

        let now = Utc::now();
        inner.next_run_id += 1;
        let run = RunId(inner.next_run_id);
        inner.current_runs.insert(id.to_string(), run);
        inner.active_syncs += 1;
        if let Some(status) = inner.statuses.get_mut(id) {
            status.reset_for_run(now);
        }
        let job = match inner.jobs.get_mut(id) {
            Some(stored) => {
                stored.last_run = Some(now);
                stored.clone()
            }
            None => job,
        };
        inner.append(
            id,
            SyncEvent::new(SyncEventKind::Started, format!("Sync job '{}' started", job.name))
                .with_data(json!({ "run": run.0 })),
        );

        Ok((job, run))
    }

    /// Transition a Running job to Cancelled.
    ///
    /// Returns the run that was cancelled so the caller can signal its task.
    pub async fn cancel_run(&self, id: &str) -> IntegrationResult<RunId> {
        let mut inner = self.inner.write().await;
        if !inner.jobs.contains_key(id) {
            return Err(IntegrationError::not_found(EntityKind::SyncJob, id));
        }
        let run = inner
            .current_runs
            .get(id)
            .copied()
            .ok_or_else(|| IntegrationError::NotRunning(id.to_string()))?;
        let status = inner
            .running_status(id, run)
            .ok_or_else(|| IntegrationError::NotRunning(id.to_string()))?;

        status.state = SyncState::Cancelled;
        status.completed_at = Some(Utc::now());
        inner.active_syncs = inner.active_syncs.saturating_sub(1);
        inner.append(
            id,
            SyncEvent::new(SyncEventKind::Cancelled, "Sync job cancelled")
                .with_data(json!({ "run": run.0 })),
        );
        Ok(run)
    }

    /// Record the natural end of a run.
    ///
    /// Returns the terminal state applied, or `None` when the run is no longer
    /// current (for example after it was cancelled), in which case nothing
    /// changes.
    pub async fn finish_run(&self, id: &str, run: RunId, outcome: RunOutcome) -> Option<SyncState> {
        let mut inner = self.inner.write().await;
        let status = inner.running_status(id, run)?;

        let now = Utc::now();
        status.completed_at = Some(now);
        let event = match &outcome {
            RunOutcome::Completed => {
                status.state = SyncState::Completed;
                status.progress = 100.0;
                SyncEvent::new(SyncEventKind::Completed, "Sync job completed").with_data(json!({
                    "run": run.0,
                    "synced": status.synced_records,
                    "failed": status.failed_records,
                }))
            }
            RunOutcome::Failed(error) => {
                status.state = SyncState::Failed;
                status.last_error = Some(error.clone());
                SyncEvent::new(SyncEventKind::Failed, format!("Sync job failed: {}", error))
                    .with_data(json!({ "run": run.0, "error": error }))
            }
        };
        let state = status.state;
        inner.active_syncs = inner.active_syncs.saturating_sub(1);
        inner.append(id, event);
        Some(state)
    }

    /// Apply record counts reported by a running job.
    ///
    /// Returns false (and changes nothing) if the run is no longer current.
    pub async fn update_progress(&self, id: &str, run: RunId, update: ProgressUpdate) -> bool {
        let mut inner = self.inner.write().await;
        let Some(status) = inner.running_status(id, run) else {
            return false;
        };
        if let Some(total) = update.total {
            status.total_records = total;
        }
        status.synced_records += update.synced;
        status.failed_records += update.failed;
        status.recompute_progress();
        true
    }

    /// Set a free-form metric on a running job.
    pub async fn set_metric(&self, id: &str, run: RunId, key: &str, value: serde_json::Value) -> bool {
        let mut inner = self.inner.write().await;
        let Some(status) = inner.running_status(id, run) else {
            return false;
        };
        status.metrics.insert(key.to_string(), value);
        true
    }

    /// Whether `run` is still the live run of `id`.
    pub async fn is_current(&self, id: &str, run: RunId) -> bool {
        let mut inner = self.inner.write().await;
        inner.running_status(id, run).is_some()
    }

    /// IDs of active scheduled jobs whose `next_run` is due and that are not running.
    pub async fn due_jobs(&self, now: DateTime<Utc>) -> Vec<String> {
        let inner = self.inner.read().await;
        let mut due: Vec<&SyncJob> = inner
            .jobs
            .values()
            .filter(|job| job.active)
            .filter(|job| job.next_run.map(|next| next <= now).unwrap_or(false))
            .filter(|job| {
                inner
                    .statuses
                    .get(&job.id)
                    .map(|s| s.state != SyncState::Running)
                    .unwrap_or(true)
            })
            .collect();
        due.sort_by_key(|job| job.next_run);
        due.into_iter().map(|job| job.id.clone()).collect()
    }

    /// Move `next_run` to the schedule's next fire time after `after`.
    pub async fn advance_schedule(&self, id: &str, after: DateTime<Utc>) {
        let mut inner = self.inner.write().await;
        if let Some(job) = inner.jobs.get_mut(id) {
            job.next_run = next_run_after(job.schedule.as_deref(), after);
        }
    }

    /// Aggregate counts for status and metrics snapshots.
    pub async fn counts(&self) -> StoreCounts {
        let inner = self.inner.read().await;
        let mut counts = StoreCounts {
            total: inner.jobs.len(),
            active: inner.jobs.values().filter(|j| j.active).count(),
            ..StoreCounts::default()
        };
        for status in inner.statuses.values() {
            *counts.by_state.entry(status.state).or_insert(0) += 1;
            counts.records_synced += status.synced_records;
            counts.records_failed += status.failed_records;
        }
        counts
    }
}

/// Record counts reported by a runner. `synced`/`failed` are increments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub total: Option<u64>,
    pub synced: u64,
    pub failed: u64,
}

fn validate(job: &mut SyncJob) -> IntegrationResult<()> {
    let required = [
        ("name", &job.name),
        ("source", &job.source_id),
        ("target", &job.target_id),
        ("sync type", &job.sync_type),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(IntegrationError::Validation(format!(
                "sync job {} is required",
                field
            )));
        }
    }
    if job
        .schedule
        .as_deref()
        .map(|s| s.trim().is_empty())
        .unwrap_or(false)
    {
        job.schedule = None;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn job(name: &str) -> SyncJob {
        SyncJob::new(name, "src", "dst", "http")
    }

    #[tokio::test]
    async fn test_create_assigns_id_and_idle_status() {
        let store = SyncJobStore::new();
        let created = store.create(job("orders")).await.unwrap();

        assert!(!created.id.is_empty());
        assert_eq!(store.get(&created.id).await.unwrap(), created);

        let status = store.status(&created.id).await.unwrap();
        assert_eq!(status.state, SyncState::Idle);
        assert_eq!(status.progress, 0.0);

        let history = store.history(&created.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, SyncEventKind::Created);
    }

    #[tokio::test]
    async fn test_create_schedule_handling() {
        let store = SyncJobStore::new();

        let unscheduled = store.create(job("a").with_schedule("")).await.unwrap();
        assert!(unscheduled.schedule.is_none());
        assert!(unscheduled.next_run.is_none());

        let scheduled = store
            .create(job("b").with_schedule("*/5 * * * *"))
            .await
            .unwrap();
        let next = scheduled.next_run.unwrap();
        assert!(next > scheduled.created_at);

        let invalid = store
            .create(job("c").with_schedule("not a cron"))
            .await
            .unwrap();
        assert!(invalid.next_run.is_none());
    }

    #[tokio::test]
    async fn test_create_validation_and_conflict() {
        let store = SyncJobStore::new();
        let result = store.create(SyncJob::new("x", "", "dst", "http")).await;
        assert!(matches!(result, Err(IntegrationError::Validation(_))));
        let result = store.create(SyncJob::new("x", "src", "dst", " ")).await;
        assert!(matches!(result, Err(IntegrationError::Validation(_))));

        store.create(job("x").with_id("fixed")).await.unwrap();
        let result = store.create(job("y").with_id("fixed")).await;
        assert!(matches!(result, Err(IntegrationError::Conflict { .. })));
        assert_eq!(store.get("fixed").await.unwrap().name, "x");
    }

    #[tokio::test]
    async fn test_begin_run_preconditions() {
        let store = SyncJobStore::new();
        let a = store.create(job("a")).await.unwrap();
        let b = store.create(job("b")).await.unwrap();
        let c = store.create(job("c")).await.unwrap();
        store.deactivate(&c.id).await.unwrap();

        let result = store.begin_run("missing", 1).await;
        assert!(matches!(result, Err(IntegrationError::NotFound { .. })));

        let result = store.begin_run(&c.id, 1).await;
        assert!(matches!(result, Err(IntegrationError::Inactive { .. })));

        let (started, _) = store.begin_run(&a.id, 1).await.unwrap();
        assert!(started.last_run.is_some());
        assert_eq!(store.active_syncs().await, 1);

        let result = store.begin_run(&a.id, 5).await;
        assert!(matches!(result, Err(IntegrationError::AlreadyRunning(_))));

        let result = store.begin_run(&b.id, 1).await;
        assert!(matches!(
            result,
            Err(IntegrationError::ConcurrencyLimit { limit: 1 })
        ));
        assert_eq!(store.active_syncs().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_begin_run_takes_exactly_limit_slots() {
        let store = Arc::new(SyncJobStore::new());
        let mut ids = Vec::new();
        for i in 0..12 {
            ids.push(store.create(job(&format!("job-{}", i))).await.unwrap().id);
        }

        let results = futures::future::join_all(ids.into_iter().map(|id| {
            let store = store.clone();
            tokio::spawn(async move { store.begin_run(&id, 4).await })
        }))
        .await;

        let started = results.iter().filter(|r| matches!(r, Ok(Ok(_)))).count();
        let limited = results
            .iter()
            .filter(|r| matches!(r, Ok(Err(IntegrationError::ConcurrencyLimit { limit: 4 }))))
            .count();
        assert_eq!(started, 4);
        assert_eq!(limited, 8);
        assert_eq!(store.active_syncs().await, 4);
        assert_eq!(store.counts().await.by_state.get(&SyncState::Running), Some(&4));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_begin_run_on_one_job() {
        let store = Arc::new(SyncJobStore::new());
        let id = store.create(job("a")).await.unwrap().id;

        let results = futures::future::join_all((0..2).map(|_| {
            let store = store.clone();
            let id = id.clone();
            tokio::spawn(async move { store.begin_run(&id, 10).await })
        }))
        .await;

        let started = results.iter().filter(|r| matches!(r, Ok(Ok(_)))).count();
        let rejected = results
            .iter()
            .filter(|r| matches!(r, Ok(Err(IntegrationError::AlreadyRunning(_)))))
            .count();
        assert_eq!((started, rejected), (1, 1));
        assert_eq!(store.active_syncs().await, 1);
    }

    #[tokio::test]
    async fn test_finish_run_completes_and_frees_slot() {
        let store = SyncJobStore::new();
        let a = store.create(job("a")).await.unwrap();
        let b = store.create(job("b")).await.unwrap();

        let (_, run) = store.begin_run(&a.id, 1).await.unwrap();
        assert!(
            store
                .update_progress(
                    &a.id,
                    run,
                    ProgressUpdate {
                        total: Some(4),
                        synced: 3,
                        failed: 1
                    }
                )
                .await
        );

        let state = store.finish_run(&a.id, run, RunOutcome::Completed).await;
        assert_eq!(state, Some(SyncState::Completed));
        assert_eq!(store.active_syncs().await, 0);

        let status = store.status(&a.id).await.unwrap();
        assert_eq!(status.progress, 100.0);
        assert_eq!(status.synced_records, 3);
        assert!(status.completed_at.is_some());

        store.begin_run(&b.id, 1).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_run_records_error() {
        let store = SyncJobStore::new();
        let a = store.create(job("a")).await.unwrap();
        let (_, run) = store.begin_run(&a.id, 1).await.unwrap();

        let state = store
            .finish_run(&a.id, run, RunOutcome::Failed("source unavailable".into()))
            .await;
        assert_eq!(state, Some(SyncState::Failed));

        let status = store.status(&a.id).await.unwrap();
        assert_eq!(status.last_error.as_deref(), Some("source unavailable"));

        let history = store.history(&a.id).await.unwrap();
        assert_eq!(history.last().unwrap().kind, SyncEventKind::Failed);
    }

    #[tokio::test]
    async fn test_cancel_run_rules() {
        let store = SyncJobStore::new();
        let a = store.create(job("a")).await.unwrap();

        let result = store.cancel_run(&a.id).await;
        assert!(matches!(result, Err(IntegrationError::NotRunning(_))));
        let result = store.cancel_run("missing").await;
        assert!(matches!(result, Err(IntegrationError::NotFound { .. })));

        let (_, run) = store.begin_run(&a.id, 2).await.unwrap();
        assert_eq!(store.cancel_run(&a.id).await.unwrap(), run);
        assert_eq!(store.active_syncs().await, 0);
        assert_eq!(store.status(&a.id).await.unwrap().state, SyncState::Cancelled);

        let result = store.cancel_run(&a.id).await;
        assert!(matches!(result, Err(IntegrationError::NotRunning(_))));
        assert_eq!(store.active_syncs().await, 0);

        // The cancelled run can no longer complete or report progress.
        assert_eq!(store.finish_run(&a.id, run, RunOutcome::Completed).await, None);
        assert!(!store.update_progress(&a.id, run, ProgressUpdate::default()).await);
        assert_eq!(store.status(&a.id).await.unwrap().state, SyncState::Cancelled);
        assert_eq!(store.active_syncs().await, 0);
    }

    #[tokio::test]
    async fn test_stale_run_cannot_finish_new_run() {
        let store = SyncJobStore::new();
        let a = store.create(job("a")).await.unwrap();

        let (_, first) = store.begin_run(&a.id, 1).await.unwrap();
        store.cancel_run(&a.id).await.unwrap();
        let (_, second) = store.begin_run(&a.id, 1).await.unwrap();
        assert_ne!(first, second);

        assert_eq!(store.finish_run(&a.id, first, RunOutcome::Completed).await, None);
        assert_eq!(store.status(&a.id).await.unwrap().state, SyncState::Running);
        assert!(store.is_current(&a.id, second).await);
    }

    #[tokio::test]
    async fn test_history_grows_monotonically() {
        let store = SyncJobStore::new();
        let a = store.create(job("a")).await.unwrap();
        let mut last_len = store.history(&a.id).await.unwrap().len();

        for _ in 0..3 {
            let (_, run) = store.begin_run(&a.id, 1).await.unwrap();
            store.finish_run(&a.id, run, RunOutcome::Completed).await;
            let history = store.history(&a.id).await.unwrap();
            assert!(history.len() > last_len);
            last_len = history.len();
        }

        let history = store.history(&a.id).await.unwrap();
        let kinds: Vec<SyncEventKind> = history.iter().map(|e| e.kind).collect();
        assert_eq!(kinds[0], SyncEventKind::Created);
        assert_eq!(kinds[1], SyncEventKind::Started);
        assert_eq!(kinds[2], SyncEventKind::Completed);
        assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[tokio::test]
    async fn test_due_jobs_and_advance() {
        let store = SyncJobStore::new();
        let scheduled = store
            .create(job("a").with_schedule("* * * * *"))
            .await
            .unwrap();
        store.create(job("b")).await.unwrap();

        let now = Utc::now();
        assert!(store.due_jobs(now).await.is_empty());

        let later = scheduled.next_run.unwrap();
        assert_eq!(store.due_jobs(later).await, vec![scheduled.id.clone()]);

        store.advance_schedule(&scheduled.id, later).await;
        let advanced = store.get(&scheduled.id).await.unwrap();
        assert!(advanced.next_run.unwrap() > later);
        assert!(store.due_jobs(later).await.is_empty());
    }

    #[tokio::test]
    async fn test_update_keeps_bookkeeping() {
        let store = SyncJobStore::new();
        let a = store.create(job("a")).await.unwrap();
        store.begin_run(&a.id, 1).await.unwrap();

        let updated = store
            .update(&a.id, job("a2").with_schedule("@daily"))
            .await
            .unwrap();
        assert_eq!(updated.created_at, a.created_at);
        assert!(updated.last_run.is_some());
        assert!(updated.next_run.is_some());
        assert_eq!(updated.name, "a2");

        let result = store.update("missing", job("x")).await;
        assert!(matches!(result, Err(IntegrationError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_counts() {
        let store = SyncJobStore::new();
        let a = store.create(job("a")).await.unwrap();
        let b = store.create(job("b")).await.unwrap();
        store.deactivate(&b.id).await.unwrap();
        store.begin_run(&a.id, 1).await.unwrap();

        let counts = store.counts().await;
        assert_eq!(counts.total, 2);
        assert_eq!(counts.active, 1);
        assert_eq!(counts.by_state.get(&SyncState::Running), Some(&1));
        assert_eq!(counts.by_state.get(&SyncState::Idle), Some(&1));
    }
}
