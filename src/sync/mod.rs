//! Sync module
//!
//! Sync job definitions and their run state machine, the runner abstraction
//! that executes job bodies, and the scheduler that starts, stops and
//! periodically triggers jobs.

pub mod http_runner;
pub mod runner;
pub mod schedule;
pub mod scheduler;
pub mod store;
pub mod types;

pub use http_runner::{HttpSyncRunner, HTTP_RUNNER};
pub use runner::{RunnerRegistry, SyncContext, SyncRunError, SyncRunner};
pub use schedule::{next_run_after, parse_schedule};
pub use scheduler::SyncScheduler;
pub use store::{ProgressUpdate, RunId, RunOutcome, StoreCounts, SyncJobStore};
pub use types::{SyncEvent, SyncEventKind, SyncJob, SyncState, SyncStatus};
