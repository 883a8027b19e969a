//! Error taxonomy for the execution engine

use thiserror::Error;

use crate::report::RunReport;

/// Failures detected while building the dependency graph.
///
/// These are fatal to the whole run: nothing is scheduled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DependencyError {
    #[error("Invalid dependency index {dependency_index} for command {command_index}")]
    InvalidDependency {
        dependency_index: isize,
        command_index: usize,
    },

    #[error("Circular dependency detected")]
    CircularDependency,
}

/// Failure of a single command instance, local to the worker that ran it.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Timeout exceeded for command: {command}")]
    Timeout { command: String },

    #[error("Pipe error: {0}")]
    Pipe(#[source] std::io::Error),

    #[error("Command '{command}' failed to start: {source}")]
    ProcessStart {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Error reading output: {0}")]
    OutputRead(#[source] std::io::Error),

    #[error("No valid input from previous worker (Thread-{worker_id})")]
    PipelineInput { worker_id: usize },

    #[error("Command '{command}' exited with code {code}")]
    CommandFailed { command: String, code: i32 },

    #[error("Panic in Thread-{worker_id}: {message}")]
    Panic { worker_id: usize, message: String },
}

impl WorkerError {
    /// Short machine-readable name used in run reports
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Pipe(_) => "pipe",
            Self::ProcessStart { .. } => "process-start",
            Self::OutputRead(_) => "output-read",
            Self::PipelineInput { .. } => "pipeline-input",
            Self::CommandFailed { .. } => "command-failed",
            Self::Panic { .. } => "panic",
        }
    }
}

/// Outcome of a whole run that did not succeed.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Dependency(#[from] DependencyError),

    /// At least one command failed; every command was still given its chance to run.
    #[error("{}", .0.failure_summary())]
    CommandsFailed(Box<RunReport>),

    #[error("Worker pool closed before command {index} could be dispatched")]
    PoolClosed { index: usize },

    #[error("Failed to start async runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

impl ExecError {
    /// Report of the run, if scheduling got far enough to produce one
    pub fn report(&self) -> Option<&RunReport> {
        match self {
            Self::CommandsFailed(report) => Some(report),
            _ => None,
        }
    }
}
