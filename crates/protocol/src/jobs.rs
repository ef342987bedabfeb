//! Async job status payloads.
//!
//! Server-side background operations (copies, large moves) report progress
//! through a monitor URL. A status snapshot is fetched fresh on every poll
//! and never persisted.

use serde::{Deserialize, Serialize};

/// State of a server-side background job.
///
/// Unrecognized values deserialize as [`JobState::Unknown`] so a server that
/// grows new states is treated as still-running rather than terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    #[serde(rename = "notStarted")]
    NotStarted,
    #[serde(rename = "waiting")]
    Waiting,
    #[serde(rename = "inProgress")]
    InProgress,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
    #[serde(other)]
    Unknown,
}

impl JobState {
    /// Terminal states end the poll loop; everything else keeps polling.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// Failure detail attached to a failed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.code.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

/// Snapshot of a background job, fetched from its monitor URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub status: JobState,
    /// Best-effort completion percentage, 0–100.
    #[serde(default)]
    pub percentage_complete: f64,
    /// Identifier of the produced resource; only present once completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    /// Failure detail; only present when failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
}
