//! Forkflow - concurrent command runner
//!
//! Executes a set of external commands concurrently on a bounded worker
//! pool, ordered by the dependencies declared between them. In pipeline
//! mode each command's captured output becomes the input of the commands
//! that depend on it.

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod parser;
pub mod report;

// Re-exports
pub use config::{Config, Settings, TimeUnit};
pub use self::core::{execute, execute_blocking, expand, CommandInstance, CommandSpec, Executor};
pub use error::{DependencyError, ExecError, WorkerError};
pub use report::{CommandOutcome, OutcomeStatus, RunReport};
