//! Remote job status polling.

use std::time::Duration;

use serde::Deserialize;

use crate::config::PollOptions;
use crate::error::{ConnectorError, ConnectorResult, format_backend_error};

use super::CancelToken;

/// States in which a job has stopped without producing results.
pub const FAILURE_STATES: [&str; 3] = ["TIMED_OUT", "STOPPED", "ERROR"];
/// State of a job that completed.
pub const SUCCESS_STATE: &str = "FINISHED";

/// Error detail attached to a failed job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct JobErrorDetail {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub title: Option<String>,
    pub message: Option<String>,
}

/// A job status response: `{"state": "...", "error": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JobStatus {
    pub state: String,
    #[serde(default)]
    pub error: Option<JobErrorDetail>,
}

impl JobStatus {
    pub fn new(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            error: None,
        }
    }

    pub fn is_failure(&self) -> bool {
        FAILURE_STATES.contains(&self.state.as_str())
    }

    pub fn is_success(&self) -> bool {
        self.state == SUCCESS_STATE
    }

    /// `type: title: message` of the attached error, or `Unknown error`.
    pub fn error_message(&self) -> String {
        match &self.error {
            Some(e) => format_backend_error(&e.kind, &e.title, &e.message),
            None => format_backend_error(&None, &None, &None),
        }
    }
}

/// Poll `fetch` until the job reaches a terminal state.
///
/// Every check is preceded by one `sleep(options.interval)`. Failure states become
/// [`ConnectorError::JobFailed`]; unknown states keep polling. With a timeout set, polling stops
/// with [`ConnectorError::PollTimeout`] once the accumulated sleep reaches it.
pub fn poll_until_terminal<F, S>(
    job_id: &str,
    options: &PollOptions,
    cancel: Option<&CancelToken>,
    mut fetch: F,
    mut sleep: S,
) -> ConnectorResult<JobStatus>
where
    F: FnMut(&str) -> ConnectorResult<JobStatus>,
    S: FnMut(Duration),
{
    let cancelled = || cancel.is_some_and(CancelToken::is_cancelled);
    let mut waited = Duration::ZERO;

    loop {
        if let Some(limit) = options.timeout {
            if waited >= limit {
                return Err(ConnectorError::PollTimeout {
                    job_id: job_id.to_string(),
                    waited_secs: waited.as_secs(),
                });
            }
        }
        if cancelled() {
            return Err(ConnectorError::Cancelled {
                job_id: job_id.to_string(),
            });
        }

        sleep(options.interval);
        waited += options.interval;
        if cancelled() {
            return Err(ConnectorError::Cancelled {
                job_id: job_id.to_string(),
            });
        }

        let status = fetch(job_id)?;
        if status.is_failure() {
            return Err(ConnectorError::JobFailed {
                job_id: job_id.to_string(),
                message: status.error_message(),
                state: status.state,
            });
        }
        if status.is_success() {
            return Ok(status);
        }
        tracing::debug!(job_id, state = %status.state, "job not finished yet");
    }
}
