//! Studio batch launcher invocation.
//!
//! The launcher reports through its output streams. Besides ordinary log lines (optionally
//! prefixed with a level such as `INFO: `) it prints sentinel lines:
//!
//! - `EXIT_CODE=<n>`: the launcher's verdict, non-zero on failure;
//! - `RAPIDMINER_ERROR_MSG_FIRST_LINE=<text>`: short error description;
//! - `RAPIDMINER_ERROR_MSG=<text>`: full error description.
//!
//! Each stream is drained by its own listener thread, which returns what it saw as a
//! [`LaunchOutcome`]. Outcomes belong to one launch only, so concurrent launches never see each
//! other's status.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};

use crate::error::{ConnectorError, ConnectorResult};
use crate::observability::{ConnectorLogger, LogSource, Severity};
use crate::resource::Resource;

pub const EXIT_CODE_PREFIX: &str = "EXIT_CODE=";
pub const ERROR_MSG_FIRST_LINE_PREFIX: &str = "RAPIDMINER_ERROR_MSG_FIRST_LINE=";
pub const ERROR_MSG_PREFIX: &str = "RAPIDMINER_ERROR_MSG=";

const LEVEL_PREFIXES: [(&str, Severity); 7] = [
    ("FINEST: ", Severity::Debug),
    ("FINER: ", Severity::Debug),
    ("DEBUG: ", Severity::Debug),
    ("CONFIG: ", Severity::Debug),
    ("INFO: ", Severity::Info),
    ("WARNING: ", Severity::Warning),
    ("SEVERE: ", Severity::Error),
];

/// Classified launcher output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LauncherLine<'a> {
    Log(Severity, &'a str),
    ErrorFirstLine(&'a str),
    ErrorMessage(&'a str),
    ExitCode(i32),
}

/// Classify one output line. Unprefixed lines are informational.
pub fn parse_line(line: &str) -> LauncherLine<'_> {
    for (prefix, level) in LEVEL_PREFIXES {
        if let Some(rest) = line.strip_prefix(prefix) {
            return LauncherLine::Log(level, rest);
        }
    }
    if let Some(rest) = line.strip_prefix(ERROR_MSG_FIRST_LINE_PREFIX) {
        LauncherLine::ErrorFirstLine(rest)
    } else if let Some(rest) = line.strip_prefix(ERROR_MSG_PREFIX) {
        LauncherLine::ErrorMessage(rest)
    } else if let Some(rest) = line.strip_prefix(EXIT_CODE_PREFIX) {
        // An unreadable code counts as success.
        LauncherLine::ExitCode(rest.trim().parse().unwrap_or(0))
    } else {
        LauncherLine::Log(Severity::Info, line)
    }
}

/// Status reported by one launch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchOutcome {
    /// Last `EXIT_CODE=` value seen.
    pub exit_code: Option<i32>,
    /// Last `RAPIDMINER_ERROR_MSG_FIRST_LINE=` text seen.
    pub error_first_line: Option<String>,
    /// Last `RAPIDMINER_ERROR_MSG=` text seen.
    pub error_message: Option<String>,
}

impl LaunchOutcome {
    /// Record a line; returns what should be logged, if anything.
    pub fn observe<'a>(&mut self, line: &'a str) -> Option<(Severity, &'a str)> {
        match parse_line(line) {
            LauncherLine::Log(level, message) => Some((level, message)),
            LauncherLine::ErrorFirstLine(message) => {
                self.error_first_line = Some(message.trim().to_string());
                Some((Severity::Error, message))
            }
            LauncherLine::ErrorMessage(message) => {
                self.error_message = Some(message.trim().to_string());
                Some((Severity::Error, message))
            }
            LauncherLine::ExitCode(code) => {
                self.exit_code = Some(code);
                None
            }
        }
    }

    /// Combine the outcomes of two streams of the same launch.
    pub fn merge(self, other: LaunchOutcome) -> LaunchOutcome {
        LaunchOutcome {
            exit_code: self.exit_code.or(other.exit_code),
            error_first_line: self.error_first_line.or(other.error_first_line),
            error_message: self.error_message.or(other.error_message),
        }
    }

    /// Short error description, falling back to the full one.
    pub fn error_description(&self) -> Option<&str> {
        self.error_first_line.as_deref().or(self.error_message.as_deref())
    }

    /// Whether the launcher reported failure through `EXIT_CODE=`.
    pub fn is_failure(&self) -> bool {
        self.exit_code.is_some_and(|code| code != 0)
    }
}

/// What to pass to one launcher invocation.
#[derive(Debug, Clone, Default)]
pub struct LaunchSpec {
    /// Process to run, passed as given.
    pub process: Option<String>,
    pub inputs: Vec<Resource>,
    pub outputs: Vec<Resource>,
    pub output_dir: Option<PathBuf>,
    pub operator: Option<String>,
    pub credential: Option<String>,
    pub macros: BTreeMap<String, String>,
    /// Scratch directory for stream inputs.
    pub temp_dir: Option<PathBuf>,
}

impl LaunchSpec {
    pub fn needs_temp_dir(&self) -> bool {
        self.inputs.iter().any(Resource::needs_temp_dir)
    }
}

/// Launcher arguments, in the order the launcher expects them.
pub fn build_arguments(launcher_class: &str, spec: &LaunchSpec) -> Vec<String> {
    let mut args = vec![format!("-C{launcher_class}")];
    if let Some(process) = &spec.process {
        args.push(format!("-P{process}"));
    }
    args.extend(spec.inputs.iter().map(|r| format!("-I{}", r.to_launcher_arg())));
    args.extend(spec.outputs.iter().map(|r| format!("-O{}", r.to_launcher_arg())));
    if let Some(dir) = &spec.output_dir {
        args.push(format!("-D{}", dir.display()));
    }
    if let Some(operator) = &spec.operator {
        args.push(format!("-N{operator}"));
    }
    if let Some(credential) = &spec.credential {
        args.push(format!("-X{credential}"));
    }
    args.extend(spec.macros.iter().map(|(k, v)| format!("-M{k}={v}")));
    if let Some(dir) = &spec.temp_dir {
        args.push(format!("-T{}", dir.display()));
    }
    args
}

/// Result of a finished launch.
#[derive(Debug)]
pub struct Launch {
    pub status: ExitStatus,
    pub outcome: LaunchOutcome,
}

impl Launch {
    /// Fail on a reported non-zero `EXIT_CODE=`, then on an abnormal process exit.
    pub fn check(&self) -> ConnectorResult<()> {
        if self.outcome.is_failure() {
            return Err(ConnectorError::BackendReported {
                operation: "executing studio".to_string(),
                kind: None,
                title: None,
                message: self.outcome.error_description().map(str::to_string),
            });
        }
        if !self.status.success() {
            return Err(ConnectorError::transport(
                "executing studio",
                None,
                format!("launcher exited with {}", self.status),
            ));
        }
        Ok(())
    }
}

/// Run `script` with `args`, routing its output to `logger`, and wait for it to exit.
pub fn launch(script: &Path, args: &[String], logger: &ConnectorLogger) -> ConnectorResult<Launch> {
    logger.debug(&format!("launching {}", script.display()));
    let mut child = Command::new(script)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            let message = format!("{}: {e}", script.display());
            ConnectorError::transport("launching studio", None, message)
        })?;

    let stdout = child
        .stdout
        .take()
        .map(|s| spawn_listener("stdout", s, logger.clone()))
        .transpose();
    let stdout = reap_on_error(&mut child, stdout)?;
    let stderr = child
        .stderr
        .take()
        .map(|s| spawn_listener("stderr", s, logger.clone()))
        .transpose();
    let stderr = reap_on_error(&mut child, stderr)?;

    let status = child.wait()?;
    let outcome = join_listener(stdout)?.merge(join_listener(stderr)?);
    Ok(Launch { status, outcome })
}

/// Kill and wait for `child` when `result` is an error, so no zombie is left behind.
fn reap_on_error<T>(child: &mut Child, result: ConnectorResult<T>) -> ConnectorResult<T> {
    if result.is_err() {
        let _ = child.kill();
        let _ = child.wait();
    }
    result
}

fn spawn_listener<R>(
    stream: &str,
    reader: R,
    logger: ConnectorLogger,
) -> ConnectorResult<JoinHandle<LaunchOutcome>>
where
    R: Read + Send + 'static,
{
    let handle = thread::Builder::new()
        .name(format!("studio-{stream}"))
        .spawn(move || drain(BufReader::new(reader), &logger))?;
    Ok(handle)
}

fn join_listener(handle: Option<JoinHandle<LaunchOutcome>>) -> ConnectorResult<LaunchOutcome> {
    match handle {
        Some(handle) => handle.join().map_err(|_| {
            ConnectorError::transport("reading studio output", None, "listener thread panicked")
        }),
        None => Ok(LaunchOutcome::default()),
    }
}

/// Read `reader` to the end, logging every line with source `studio`.
pub fn drain<R: BufRead>(mut reader: R, logger: &ConnectorLogger) -> LaunchOutcome {
    let mut outcome = LaunchOutcome::default();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\r', '\n']);
                if let Some((level, message)) = outcome.observe(line) {
                    if !message.trim().is_empty() {
                        logger.log(level, LogSource::Studio, message);
                    }
                }
            }
            Err(e) => {
                let message = format!("<could not read line: {e}>");
                logger.log(Severity::Debug, LogSource::Studio, &message);
                break;
            }
        }
    }
    outcome
}
