//! Polling of server-side asynchronous jobs.
//!
//! A job (a server-side copy, for instance) completes independently of the
//! request that started it. The poller queries the job's status with
//! exponentially growing intervals until it reaches a terminal state.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use nimbus_protocol::{JobError, JobState, JobStatus};
use nimbus_remote::{RemoteError, RemoteService};

/// Errors that terminate a poll.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    /// The job itself reached the failed state.
    #[error("job failed: {0}")]
    JobFailed(JobError),

    /// A status query failed. Not retried internally; the job may still be
    /// running on the server.
    #[error("job status query failed: {0}")]
    Query(#[from] RemoteError),

    #[error("job monitoring cancelled")]
    Cancelled,
}

/// Exponential backoff schedule for successive status queries.
///
/// Intervals are non-decreasing and capped at `max_interval` for any
/// multiplier above one.
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    fn next(&self, current: Duration) -> Duration {
        current.mul_f64(self.multiplier).min(self.max_interval)
    }
}

/// A status snapshot forwarded to the caller on every non-terminal poll.
#[derive(Debug, Clone, PartialEq)]
pub struct JobProgress {
    pub state: JobState,
    pub percentage_complete: f64,
}

/// Polls a job to completion.
pub struct JobPoller<'a> {
    remote: &'a dyn RemoteService,
    backoff: BackoffConfig,
    cancel: CancellationToken,
}

impl<'a> JobPoller<'a> {
    pub fn new(remote: &'a dyn RemoteService, cancel: CancellationToken) -> Self {
        Self {
            remote,
            backoff: BackoffConfig::default(),
            cancel,
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Blocks until the job at `job_url` reaches a terminal state.
    ///
    /// Returns the completed job's resource identifier, if the server
    /// reported one. Unrecognized status strings are treated as non-terminal
    /// so a still-running job is never wrongly abandoned when the server
    /// grows new states. Cancellation is honored during the inter-poll
    /// sleep, never mid-query.
    pub async fn await_completion(
        &self,
        job_url: &str,
        progress_tx: &mpsc::Sender<JobProgress>,
    ) -> Result<Option<String>, PollError> {
        let mut interval = self.backoff.initial_interval;

        loop {
            let status: JobStatus = self.remote.query_job(job_url).await?;

            match status.status {
                JobState::Completed => {
                    debug!(job_url, "job completed");
                    return Ok(status.resource_id);
                }
                JobState::Failed => {
                    let detail = status.error.unwrap_or_else(|| JobError {
                        code: "unknown".to_string(),
                        message: "job failed without detail".to_string(),
                    });
                    return Err(PollError::JobFailed(detail));
                }
                state => {
                    debug!(
                        job_url,
                        state = ?state,
                        percent = status.percentage_complete,
                        "job still running"
                    );
                    let _ = progress_tx
                        .send(JobProgress {
                            state,
                            percentage_complete: status.percentage_complete,
                        })
                        .await;
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(PollError::Cancelled),
                _ = tokio::time::sleep(interval) => {}
            }
            interval = self.backoff.next(interval);
        }
    }
}
