//! Logging boundary for connectors.
//!
//! Every connector owns a [`ConnectorLogger`] named `<Kind>@<id>`. Records are emitted as
//! `tracing` events (fields `connector` and `source`) and, when configured, forwarded to a
//! [`LogObserver`]. Lines produced by a Studio launch are re-emitted with
//! [`LogSource::Studio`]; everything the library says itself uses [`LogSource::Client`].

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;

use crate::config::LogOptions;

/// Severity of a log record, also used to classify errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Diagnostic detail.
    Debug,
    /// Informational event.
    Info,
    /// Warning-level event (non-fatal).
    Warning,
    /// Error-level event (operation failed).
    Error,
    /// Critical error (typically I/O or transport failures).
    Critical,
}

/// Where a log record originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSource {
    /// This library.
    Client,
    /// Output of a local Studio launch.
    Studio,
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogSource::Client => f.write_str("client"),
            LogSource::Studio => f.write_str("studio"),
        }
    }
}

/// A single structured log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Name of the emitting connector, e.g. `Studio@3`.
    pub connector: String,
    pub source: LogSource,
    pub level: Severity,
    pub message: String,
}

/// Observer interface for connector log records.
///
/// Implementors can record metrics, logs, or trigger alerts.
pub trait LogObserver: Send + Sync {
    /// Called for every record at or above the connector's level.
    fn on_record(&self, _record: &LogRecord) {}

    /// Called when a record meets the alert threshold.
    ///
    /// Default behavior forwards to [`Self::on_record`].
    fn on_alert(&self, record: &LogRecord) {
        self.on_record(record)
    }
}

/// An observer that fans out callbacks to a list of observers.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn LogObserver>>,
}

impl CompositeObserver {
    /// Create a new composite observer from a list of observers.
    pub fn new(observers: Vec<Arc<dyn LogObserver>>) -> Self {
        Self { observers }
    }
}

impl fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("observers_len", &self.observers.len())
            .finish()
    }
}

impl LogObserver for CompositeObserver {
    fn on_record(&self, record: &LogRecord) {
        for o in &self.observers {
            o.on_record(record);
        }
    }

    fn on_alert(&self, record: &LogRecord) {
        for o in &self.observers {
            o.on_alert(record);
        }
    }
}

/// Logs records to stderr.
#[derive(Debug, Default)]
pub struct StdErrObserver;

impl LogObserver for StdErrObserver {
    fn on_record(&self, record: &LogRecord) {
        eprintln!(
            "[{:?} -- {}] {}: {}",
            record.level, record.source, record.connector, record.message
        );
    }

    fn on_alert(&self, record: &LogRecord) {
        eprintln!(
            "[ALERT][{:?} -- {}] {}: {}",
            record.level, record.source, record.connector, record.message
        );
    }
}

/// Appends records to a local log file.
#[derive(Debug)]
pub struct FileObserver {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileObserver {
    /// Create a file observer that appends records to `path`.
    ///
    /// Writes are best-effort; failures to open/write the log file are ignored.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    fn append_line(&self, line: &str) {
        let _guard = self.lock.lock().ok();
        if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(&self.path) {
            let _ = writeln!(f, "{line}");
        }
    }
}

impl LogObserver for FileObserver {
    fn on_record(&self, record: &LogRecord) {
        self.append_line(&format!(
            "{} [{:?} -- {}] {}: {}",
            unix_ts(),
            record.level,
            record.source,
            record.connector,
            record.message
        ));
    }

    fn on_alert(&self, record: &LogRecord) {
        self.append_line(&format!(
            "{} ALERT [{:?} -- {}] {}: {}",
            unix_ts(),
            record.level,
            record.source,
            record.connector,
            record.message
        ));
    }
}

fn unix_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Monotonic generator for connector instance ids.
///
/// Inject one through [`LogOptions::ids`] to get deterministic names; otherwise the
/// process-wide instance from [`ConnectorIds::global`] is used.
#[derive(Debug, Default)]
pub struct ConnectorIds {
    next: AtomicU64,
}

static GLOBAL_IDS: Lazy<Arc<ConnectorIds>> = Lazy::new(|| Arc::new(ConnectorIds::default()));

impl ConnectorIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide generator.
    pub fn global() -> Arc<ConnectorIds> {
        Arc::clone(&GLOBAL_IDS)
    }

    /// Take the next id.
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

/// Per-connector logger.
#[derive(Clone)]
pub struct ConnectorLogger {
    name: String,
    min_level: Severity,
    alert_at_or_above: Severity,
    observer: Option<Arc<dyn LogObserver>>,
}

impl fmt::Debug for ConnectorLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorLogger")
            .field("name", &self.name)
            .field("min_level", &self.min_level)
            .field("alert_at_or_above", &self.alert_at_or_above)
            .field("observer_set", &self.observer.is_some())
            .finish()
    }
}

impl ConnectorLogger {
    /// Create a logger named `<kind>@<id>`, taking the id from the configured generator.
    pub fn new(kind: &str, options: &LogOptions) -> Self {
        let ids = options.ids.clone().unwrap_or_else(ConnectorIds::global);
        Self {
            name: format!("{kind}@{}", ids.next_id()),
            min_level: options.level,
            alert_at_or_above: options.alert_at_or_above,
            observer: options.observer.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Log a message. Surrounding whitespace is stripped.
    pub fn log(&self, level: Severity, source: LogSource, message: &str) {
        if level < self.min_level {
            return;
        }
        let record = LogRecord {
            connector: self.name.clone(),
            source,
            level,
            message: message.trim().to_string(),
        };
        emit_tracing(&record);

        if let Some(obs) = &self.observer {
            obs.on_record(&record);
            if level >= self.alert_at_or_above {
                obs.on_alert(&record);
            }
        }
    }

    pub fn debug(&self, message: &str) {
        self.log(Severity::Debug, LogSource::Client, message);
    }

    pub fn info(&self, message: &str) {
        self.log(Severity::Info, LogSource::Client, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(Severity::Warning, LogSource::Client, message);
    }

    pub fn error(&self, message: &str) {
        self.log(Severity::Error, LogSource::Client, message);
    }
}

fn emit_tracing(record: &LogRecord) {
    let connector = record.connector.as_str();
    let source = record.source;
    let message = record.message.as_str();
    match record.level {
        Severity::Debug => tracing::debug!(connector, %source, "{message}"),
        Severity::Info => tracing::info!(connector, %source, "{message}"),
        Severity::Warning => tracing::warn!(connector, %source, "{message}"),
        Severity::Error | Severity::Critical => tracing::error!(connector, %source, "{message}"),
    }
}

/// Install a `tracing` subscriber that prints to stdout.
///
/// `RUST_LOG` takes precedence over `default_filter`. Does nothing if a global subscriber is
/// already installed.
pub fn init_logging(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
