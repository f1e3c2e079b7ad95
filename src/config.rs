//! Connector and job configuration.
//!
//! All option structs implement [`Default`]; override individual fields with struct-update
//! syntax:
//!
//! ```
//! use std::time::Duration;
//! use rapidminer_connector::config::{CleanupPolicy, JobOptions, PollOptions};
//!
//! let opts = JobOptions {
//!     queue: "gpu".to_string(),
//!     cleanup: CleanupPolicy::Propagate,
//!     poll: PollOptions {
//!         timeout: Some(Duration::from_secs(600)),
//!         ..Default::default()
//!     },
//!     ..Default::default()
//! };
//! assert_eq!(opts.poll.interval, Duration::from_secs(6));
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::lifecycle::CancelToken;
use crate::observability::{ConnectorIds, LogObserver, Severity};

/// Environment variable consulted when [`StudioConfig::studio_home`] is not set.
pub const STUDIO_HOME_ENV: &str = "RAPIDMINER_HOME";

/// Launcher class passed with `-C` to the Studio batch script.
pub const DEFAULT_LAUNCHER_CLASS: &str =
    "rmx_python_scripting:com.rapidminer.extension.pythonscripting.launcher.ExtendedCmdLauncher";

/// Logging options shared by both connectors.
#[derive(Clone)]
pub struct LogOptions {
    /// Records below this level are dropped.
    pub level: Severity,
    /// Severity threshold at which [`LogObserver::on_alert`] is invoked.
    pub alert_at_or_above: Severity,
    /// Optional observer receiving every record.
    pub observer: Option<Arc<dyn LogObserver>>,
    /// Id generator for connector names. `None` uses [`ConnectorIds::global`].
    pub ids: Option<Arc<ConnectorIds>>,
}

impl fmt::Debug for LogOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogOptions")
            .field("level", &self.level)
            .field("alert_at_or_above", &self.alert_at_or_above)
            .field("observer_set", &self.observer.is_some())
            .field("ids_set", &self.ids.is_some())
            .finish()
    }
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            level: Severity::Info,
            alert_at_or_above: Severity::Critical,
            observer: None,
            ids: None,
        }
    }
}

/// What to do when transient resources cannot be deleted after a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CleanupPolicy {
    /// Log every resource that could not be removed and return the run's own result.
    #[default]
    LogAndContinue,
    /// Fail the run with [`crate::ConnectorError::Cleanup`].
    Propagate,
}

/// Remote job status polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOptions {
    /// Wait between status checks. The first check also happens after one interval.
    pub interval: Duration,
    /// Give up after waiting this long. `None` polls until a terminal state is seen.
    pub timeout: Option<Duration>,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(6),
            timeout: None,
        }
    }
}

/// Per-run options for [`crate::connector::Connector::run_process`].
#[derive(Debug, Clone)]
pub struct JobOptions {
    /// Server execution queue.
    pub queue: String,
    /// Macros substituted into the process at submission time.
    pub macros: BTreeMap<String, String>,
    /// Studio only: run just this operator instead of the whole process.
    pub operator: Option<String>,
    pub cleanup: CleanupPolicy,
    pub poll: PollOptions,
    /// Cancels a run that is waiting for the backend. Cleanup still runs.
    pub cancel: Option<CancelToken>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            queue: "DEFAULT".to_string(),
            macros: BTreeMap::new(),
            operator: None,
            cleanup: CleanupPolicy::default(),
            poll: PollOptions::default(),
            cancel: None,
        }
    }
}

/// Settings for [`crate::connector::server::Server`].
#[derive(Clone)]
pub struct ServerConfig {
    /// Base URL including scheme and port.
    pub url: String,
    pub username: String,
    pub password: String,
    /// Name of the repository-access web service.
    pub webservice: String,
    /// Repository path the web service process is installed to. Defaults to
    /// `/home/<username>/<webservice>`.
    pub process_path: Option<String>,
    /// Repository folder for transient job resources. Defaults to `/home/<username>/tmp/`.
    pub temp_folder: Option<String>,
    /// Test for the web service on connect and install it when missing.
    pub install: bool,
    /// Per-request HTTP timeout.
    pub request_timeout: Option<Duration>,
    pub log: LogOptions,
}

impl ServerConfig {
    pub fn new(
        url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            username: username.into(),
            password: password.into(),
            ..Default::default()
        }
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }

    /// Temp folder, always ending in `/`.
    pub fn temp_folder(&self) -> String {
        let mut folder = self
            .temp_folder
            .clone()
            .unwrap_or_else(|| format!("/home/{}/tmp/", self.username));
        if !folder.ends_with('/') {
            folder.push('/');
        }
        folder
    }

    /// Repository path the web service process is installed to.
    pub fn webservice_process_path(&self) -> String {
        match self.process_path.as_deref().map(str::trim) {
            Some(path) if !path.is_empty() => path.to_string(),
            _ => format!("/home/{}/{}", self.username, self.webservice),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080".to_string(),
            username: String::new(),
            password: String::new(),
            webservice: "Repository Service".to_string(),
            process_path: None,
            temp_folder: None,
            install: true,
            request_timeout: None,
            log: LogOptions::default(),
        }
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("webservice", &self.webservice)
            .field("process_path", &self.process_path)
            .field("temp_folder", &self.temp_folder)
            .field("install", &self.install)
            .field("request_timeout", &self.request_timeout)
            .field("log", &self.log)
            .finish_non_exhaustive()
    }
}

/// Settings for [`crate::connector::studio::Studio`].
#[derive(Clone)]
pub struct StudioConfig {
    /// Installation directory. Falls back to `RAPIDMINER_HOME`, then the current directory.
    pub studio_home: Option<PathBuf>,
    /// Credential for remote repositories, passed with `-X`.
    pub password: Option<String>,
    /// Launcher class passed with `-C`.
    pub launcher_class: String,
    pub log: LogOptions,
}

impl StudioConfig {
    /// Resolve the installation directory.
    pub fn resolve_home(&self) -> PathBuf {
        if let Some(home) = &self.studio_home {
            return home.clone();
        }
        match std::env::var(STUDIO_HOME_ENV) {
            Ok(home) if !home.is_empty() => PathBuf::from(home),
            _ => std::env::current_dir().unwrap_or_default(),
        }
    }
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            studio_home: None,
            password: None,
            launcher_class: DEFAULT_LAUNCHER_CLASS.to_string(),
            log: LogOptions::default(),
        }
    }
}

impl fmt::Debug for StudioConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StudioConfig")
            .field("studio_home", &self.studio_home)
            .field("password_set", &self.password.is_some())
            .field("launcher_class", &self.launcher_class)
            .field("log", &self.log)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_defaults_derive_from_username() {
        let cfg = ServerConfig::new("http://rm:8080/", "ada", "secret");
        assert_eq!(cfg.base_url(), "http://rm:8080");
        assert_eq!(cfg.temp_folder(), "/home/ada/tmp/");
        assert_eq!(cfg.webservice_process_path(), "/home/ada/Repository Service");
    }

    #[test]
    fn temp_folder_gets_trailing_slash() {
        let cfg = ServerConfig {
            temp_folder: Some("/shared/scratch".to_string()),
            ..ServerConfig::new("http://rm", "ada", "pw")
        };
        assert_eq!(cfg.temp_folder(), "/shared/scratch/");
    }

    #[test]
    fn explicit_studio_home_wins() {
        let cfg = StudioConfig {
            studio_home: Some(PathBuf::from("/opt/studio")),
            ..Default::default()
        };
        assert_eq!(cfg.resolve_home(), PathBuf::from("/opt/studio"));
    }

    #[test]
    fn debug_output_hides_password() {
        let cfg = ServerConfig::new("http://rm", "ada", "hunter2");
        assert!(!format!("{cfg:?}").contains("hunter2"));
    }
}
