//! Sync job data model

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of a sync job's current or last run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Never started
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
    /// Stopped by a caller while running
    Cancelled,
}

impl SyncState {
    /// Completed, Failed and Cancelled end a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncState::Completed | SyncState::Failed | SyncState::Cancelled
        )
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::Idle => write!(f, "idle"),
            SyncState::Running => write!(f, "running"),
            SyncState::Completed => write!(f, "completed"),
            SyncState::Failed => write!(f, "failed"),
            SyncState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A schedulable synchronization between a source and a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncJob {
    /// Unique ID; generated on creation when empty
    pub id: String,
    pub name: String,
    /// Source identifier (an endpoint ID for the `http` runner)
    pub source_id: String,
    /// Target identifier (an endpoint ID for the `http` runner)
    pub target_id: String,
    /// Selects the runner that executes the job
    pub sync_type: String,
    /// Cron expression; empty means run on demand only
    pub schedule: Option<String>,
    pub active: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncJob {
    pub fn new(
        name: impl Into<String>,
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        sync_type: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            name: name.into(),
            source_id: source_id.into(),
            target_id: target_id.into(),
            sync_type: sync_type.into(),
            schedule: None,
            active: true,
            last_run: None,
            next_run: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_schedule(mut self, schedule: impl Into<String>) -> Self {
        self.schedule = Some(schedule.into());
        self
    }
}

/// Live status of a sync job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub job_id: String,
    pub state: SyncState,
    /// Percentage in `[0, 100]`
    pub progress: f64,
    pub total_records: u64,
    pub synced_records: u64,
    pub failed_records: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub metrics: HashMap<String, serde_json::Value>,
}

impl SyncStatus {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            state: SyncState::Idle,
            progress: 0.0,
            total_records: 0,
            synced_records: 0,
            failed_records: 0,
            started_at: None,
            completed_at: None,
            last_error: None,
            metrics: HashMap::new(),
        }
    }

    /// Clear counters for a fresh run.
    pub(crate) fn reset_for_run(&mut self, started_at: DateTime<Utc>) {
        self.state = SyncState::Running;
        self.progress = 0.0;
        self.total_records = 0;
        self.synced_records = 0;
        self.failed_records = 0;
        self.started_at = Some(started_at);
        self.completed_at = None;
        self.last_error = None;
        self.metrics.clear();
    }

    pub(crate) fn recompute_progress(&mut self) {
        if self.total_records == 0 {
            return;
        }
        let processed = (self.synced_records + self.failed_records).min(self.total_records);
        self.progress = processed as f64 / self.total_records as f64 * 100.0;
    }
}

/// Kind of an audit record in a job's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncEventKind {
    Created,
    Updated,
    Deactivated,
    Started,
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for SyncEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncEventKind::Created => "created",
            SyncEventKind::Updated => "updated",
            SyncEventKind::Deactivated => "deactivated",
            SyncEventKind::Started => "started",
            SyncEventKind::Completed => "completed",
            SyncEventKind::Failed => "failed",
            SyncEventKind::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

/// Append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEvent {
    #[serde(rename = "type")]
    pub kind: SyncEventKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl SyncEvent {
    pub fn new(kind: SyncEventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            timestamp: Utc::now(),
            data: serde_json::Value::Null,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}
