use thiserror::Error;

use crate::observability::Severity;

/// Convenience result type for connector operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Error type returned by serializers, connectors and the job lifecycle.
///
/// This is a single error enum shared by the Server and Studio connectors. Metadata problems are
/// never reported through it: they degrade to inference and are logged instead.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Underlying I/O error (e.g. file not found, permission denied).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV read/write error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// HTTP client error (connection refused, TLS, body decoding).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON encode/decode error outside of the metadata side-channel.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The transport reported failure: a non-2xx HTTP status or a launcher that exited abnormally.
    #[error("{operation} failed{}: {message}", status_suffix(.status))]
    Transport {
        operation: String,
        status: Option<u16>,
        message: String,
    },

    /// The backend returned a structured error payload.
    #[error("{operation}: {}", format_backend_error(.kind, .title, .message))]
    BackendReported {
        operation: String,
        kind: Option<String>,
        title: Option<String>,
        message: Option<String>,
    },

    /// A remote job reached a failure state.
    #[error("job {job_id} finished with error state: {state}, {message}")]
    JobFailed {
        job_id: String,
        state: String,
        message: String,
    },

    /// A payload could not be written to its resource representation.
    #[error("serialization error: {message}")]
    Serialization { message: String },

    /// A resource could not be read back (corrupt or unreadable).
    #[error("deserialization error: {message}")]
    Deserialization { message: String },

    /// A resource file has an extension no serializer handles.
    #[error("cannot handle files with '{extension}' extension")]
    UnsupportedFormat { extension: String },

    /// Caller-supplied arguments are inconsistent (e.g. payload/output count mismatch).
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// A value could not be parsed into the column type declared by the metadata.
    #[error("failed to parse value at row {row} column '{column}': {message} (raw='{raw}')")]
    ParseError {
        row: usize,
        column: String,
        raw: String,
        message: String,
    },

    /// The configured polling deadline elapsed before the job reached a terminal state.
    #[error("job {job_id} did not reach a terminal state within {waited_secs}s")]
    PollTimeout { job_id: String, waited_secs: u64 },

    /// The caller cancelled the run while it was waiting for the backend.
    #[error("job {job_id} was cancelled")]
    Cancelled { job_id: String },

    /// The caller cancelled the run before any job was submitted.
    #[error("run of process {process} was cancelled before submission")]
    CancelledBeforeSubmit { process: String },

    /// Transient resources could not be removed after a run.
    #[error("could not delete the following temporary resources: {}", .resources.join(", "))]
    Cleanup { resources: Vec<String> },
}

impl ConnectorError {
    pub(crate) fn transport(
        operation: impl Into<String>,
        status: Option<u16>,
        message: impl Into<String>,
    ) -> Self {
        Self::Transport {
            operation: operation.into(),
            status,
            message: message.into(),
        }
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub(crate) fn deserialization(message: impl Into<String>) -> Self {
        Self::Deserialization {
            message: message.into(),
        }
    }

    /// Classify the error for observers and alerting.
    pub fn severity(&self) -> Severity {
        match self {
            ConnectorError::Io(_) | ConnectorError::Http(_) | ConnectorError::Transport { .. } => {
                Severity::Critical
            }
            ConnectorError::Csv(err) => match err.kind() {
                ::csv::ErrorKind::Io(_) => Severity::Critical,
                _ => Severity::Error,
            },
            ConnectorError::Json(err) if err.is_io() => Severity::Critical,
            ConnectorError::Json(_) => Severity::Error,
            ConnectorError::Cleanup { .. } => Severity::Warning,
            ConnectorError::BackendReported { .. }
            | ConnectorError::JobFailed { .. }
            | ConnectorError::Serialization { .. }
            | ConnectorError::Deserialization { .. }
            | ConnectorError::UnsupportedFormat { .. }
            | ConnectorError::Configuration { .. }
            | ConnectorError::ParseError { .. }
            | ConnectorError::PollTimeout { .. }
            | ConnectorError::Cancelled { .. }
            | ConnectorError::CancelledBeforeSubmit { .. } => Severity::Error,
        }
    }
}

/// Render a backend error as `type: title: message`, or `Unknown error` when nothing was sent.
pub(crate) fn format_backend_error(
    kind: &Option<String>,
    title: &Option<String>,
    message: &Option<String>,
) -> String {
    let parts: Vec<&str> = [kind, title, message]
        .into_iter()
        .filter_map(|p| p.as_deref())
        .collect();
    if parts.is_empty() {
        "Unknown error".to_string()
    } else {
        parts.join(": ")
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(", status: {code}"),
        None => String::new(),
    }
}
