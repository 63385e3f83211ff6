//! Shared deterministic types for job lifecycle logic.
//!
//! These types define stable contracts between the watcher and the
//! controller. They carry snapshots received from the cluster but never talk
//! to it.

use std::fmt;

use k8s_openapi::api::batch::v1::{Job, JobStatus};
use kube::ResourceExt;

use crate::exit_codes;

/// Kind of change reported by a watch event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchAction {
    Added,
    Modified,
    Deleted,
    Error,
}

impl fmt::Display for WatchAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WatchAction::Added => "ADDED",
            WatchAction::Modified => "MODIFIED",
            WatchAction::Deleted => "DELETED",
            WatchAction::Error => "ERROR",
        };
        f.write_str(label)
    }
}

/// One status-change notification for the watched job.
///
/// `job` is `None` when the cluster sent an event without an object
/// (for example an `ERROR` event carrying only a status message).
#[derive(Debug, Clone)]
pub struct JobEvent {
    pub action: WatchAction,
    pub job: Option<Job>,
}

impl JobEvent {
    pub fn new(action: WatchAction, job: Job) -> Self {
        Self {
            action,
            job: Some(job),
        }
    }

    pub fn without_object(action: WatchAction) -> Self {
        Self { action, job: None }
    }

    /// Name of the job in the snapshot, if any.
    pub fn job_name(&self) -> Option<String> {
        self.job.as_ref().map(|job| job.name_any())
    }
}

/// Member pod counters of a job status, with absent counters read as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub active: i32,
    pub succeeded: i32,
    pub failed: i32,
}

impl From<&JobStatus> for StatusCounts {
    fn from(status: &JobStatus) -> Self {
        Self {
            active: status.active.unwrap_or(0),
            succeeded: status.succeeded.unwrap_or(0),
            failed: status.failed.unwrap_or(0),
        }
    }
}

impl fmt::Display for StatusCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "active={} succeeded={} failed={}",
            self.active, self.succeeded, self.failed
        )
    }
}

/// Terminal outcome of a watched job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed,
}

impl JobOutcome {
    /// Process status code mirroring the outcome.
    pub fn status_code(self) -> i32 {
        match self {
            JobOutcome::Succeeded => exit_codes::SUCCEEDED,
            JobOutcome::Failed => exit_codes::FAILED,
        }
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Succeeded => f.write_str("succeeded"),
            JobOutcome::Failed => f.write_str("failed"),
        }
    }
}

/// Classification of a single watch event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// No snapshot or no status payload.
    Ignorable,
    /// Job still running; carries the active pod count.
    Active(i32),
    /// Job reached a terminal state.
    Terminal(JobOutcome),
}
