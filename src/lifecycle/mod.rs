//! Job lifecycle shared by both connectors.
//!
//! A run moves through `Created → InputsStaged → Submitted → Polling → {Succeeded, Failed}`.
//! Each backend plugs into [`run_job`] through the [`JobBackend`] trait; the lifecycle owns
//! the bookkeeping both backends need:
//!
//! - inputs are staged one-to-one and outputs are checked against the declared port count;
//! - every transient resource a backend registers with [`JobRun::own`] is released exactly once
//!   when the run ends, whatever the outcome;
//! - cleanup failures are handled according to [`CleanupPolicy`].

pub mod poll;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::{CleanupPolicy, JobOptions};
use crate::error::{ConnectorError, ConnectorResult};
use crate::observability::ConnectorLogger;
use crate::resource::Resource;
use crate::serialization::Payload;

pub use poll::{JobStatus, poll_until_terminal};

/// Lifecycle state of a [`JobRun`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    InputsStaged,
    Submitted,
    Polling,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

/// Cooperative cancellation flag shared between the caller and a running job.
///
/// Cancelling stops a run at its next wait point; cleanup still runs.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A process about to be run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessDefinition {
    /// Repository path (or file) of the process.
    pub path: String,
    /// Process XML, when the backend had to fetch it.
    pub xml: Option<String>,
    /// Number of connected result ports, when known up front. Collected outputs must match it.
    pub output_ports: Option<usize>,
}

impl ProcessDefinition {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            xml: None,
            output_ports: None,
        }
    }
}

/// Bookkeeping of one process run.
#[derive(Debug)]
pub struct JobRun<T> {
    pub process: ProcessDefinition,
    /// Staged inputs, in declared order.
    pub inputs: Vec<Resource>,
    /// Allocated output slots, in declared order.
    pub outputs: Vec<Resource>,
    /// Remote job id, once submitted.
    pub job_id: Option<String>,
    state: JobState,
    transients: Vec<T>,
}

impl<T> JobRun<T> {
    pub fn new(process: ProcessDefinition) -> Self {
        Self {
            process,
            inputs: Vec::new(),
            outputs: Vec::new(),
            job_id: None,
            state: JobState::Created,
            transients: Vec::new(),
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Register a transient resource. It is released when the run ends.
    pub fn own(&mut self, transient: T) {
        self.transients.push(transient);
    }

    pub fn transients(&self) -> &[T] {
        &self.transients
    }

    fn advance(&mut self, next: JobState, logger: &ConnectorLogger) {
        logger.debug(&format!("job state {:?} -> {:?} ({})", self.state, next, self.process.path));
        self.state = next;
    }

    fn take_transients(&mut self) -> Vec<T> {
        std::mem::take(&mut self.transients)
    }
}

/// Backend-specific steps of a process run.
///
/// Implementations stage into, submit to, and collect from one backend. They never release
/// transients themselves: anything registered with [`JobRun::own`] is handed back to
/// [`JobBackend::release`] by [`run_job`].
pub trait JobBackend {
    /// A resource owned by a run and deleted afterwards.
    type Transient: fmt::Display;
    /// What [`JobBackend::submit`] returns for [`JobBackend::await_completion`] to wait on.
    type Handle;

    fn logger(&self) -> &ConnectorLogger;

    /// Resolve the process to run. Nothing is allocated yet.
    fn prepare(&self, process_path: &str) -> ConnectorResult<ProcessDefinition>;

    /// Write each payload to a resource and push it to `run.inputs`, in order.
    fn stage_inputs(
        &self,
        payloads: &[Payload],
        run: &mut JobRun<Self::Transient>,
    ) -> ConnectorResult<()>;

    /// Push the output slots the process will fill to `run.outputs`.
    fn allocate_outputs(&self, run: &mut JobRun<Self::Transient>) -> ConnectorResult<()>;

    fn submit(
        &self,
        run: &mut JobRun<Self::Transient>,
        options: &JobOptions,
    ) -> ConnectorResult<Self::Handle>;

    /// Block until the submitted job reaches a terminal state.
    fn await_completion(&self, handle: &Self::Handle, options: &JobOptions) -> ConnectorResult<()>;

    /// Read the results back, in output order.
    fn collect_outputs(&self, run: &JobRun<Self::Transient>) -> ConnectorResult<Vec<Payload>>;

    fn release(&self, transient: Self::Transient) -> ConnectorResult<()>;
}

/// Run a process on `backend` with `inputs` and return its results.
///
/// Transient resources are always released before returning. When both the run and the cleanup
/// fail, the run's error is returned and the cleanup failure is logged.
pub fn run_job<B>(
    backend: &B,
    process_path: &str,
    inputs: &[Payload],
    options: &JobOptions,
) -> ConnectorResult<Vec<Payload>>
where
    B: JobBackend + ?Sized,
{
    let logger = backend.logger();
    let process = backend.prepare(process_path)?;
    let mut run = JobRun::new(process);

    let result = drive(backend, &mut run, inputs, options);
    let terminal = if result.is_ok() {
        JobState::Succeeded
    } else {
        JobState::Failed
    };
    run.advance(terminal, logger);

    let leaked = release_all(backend, run.take_transients());
    if leaked.is_empty() {
        return result;
    }

    let noun = if leaked.len() == 1 { "resource" } else { "resources" };
    let listing = leaked.join("\n");
    match (result, options.cleanup) {
        (Ok(outputs), CleanupPolicy::LogAndContinue) => {
            logger.warn(&format!("Could not delete the following temporary {noun}:\n{listing}"));
            Ok(outputs)
        }
        (Ok(_), CleanupPolicy::Propagate) => Err(ConnectorError::Cleanup { resources: leaked }),
        (Err(e), _) => {
            logger.warn(&format!("Could not delete the following temporary {noun}:\n{listing}"));
            Err(e)
        }
    }
}

fn drive<B>(
    backend: &B,
    run: &mut JobRun<B::Transient>,
    inputs: &[Payload],
    options: &JobOptions,
) -> ConnectorResult<Vec<Payload>>
where
    B: JobBackend + ?Sized,
{
    let logger = backend.logger();

    backend.stage_inputs(inputs, run)?;
    if run.inputs.len() != inputs.len() {
        return Err(ConnectorError::configuration(format!(
            "staged {} inputs for {} payloads",
            run.inputs.len(),
            inputs.len()
        )));
    }
    run.advance(JobState::InputsStaged, logger);

    backend.allocate_outputs(run)?;
    if let Some(ports) = run.process.output_ports {
        if run.outputs.len() != ports {
            return Err(ConnectorError::configuration(format!(
                "allocated {} outputs for {ports} result ports",
                run.outputs.len()
            )));
        }
    }

    if options.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
        return Err(ConnectorError::CancelledBeforeSubmit {
            process: run.process.path.clone(),
        });
    }
    let handle = backend.submit(run, options)?;
    run.advance(JobState::Submitted, logger);

    run.advance(JobState::Polling, logger);
    backend.await_completion(&handle, options)?;

    let outputs = backend.collect_outputs(run)?;
    if let Some(ports) = run.process.output_ports {
        if outputs.len() != ports {
            return Err(ConnectorError::configuration(format!(
                "process declared {ports} results but {} were returned",
                outputs.len()
            )));
        }
    }
    Ok(outputs)
}

/// Release every transient once. Returns the names of the ones that could not be removed.
fn release_all<B>(backend: &B, transients: Vec<B::Transient>) -> Vec<String>
where
    B: JobBackend + ?Sized,
{
    let logger = backend.logger();
    let mut leaked = Vec::new();
    for transient in transients {
        let name = transient.to_string();
        match backend.release(transient) {
            Ok(()) => logger.debug(&format!("deleted temporary resource {name}")),
            Err(e) => {
                logger.warn(&format!("failed to delete temporary resource {name}: {e}"));
                leaked.push(name);
            }
        }
    }
    leaked
}
