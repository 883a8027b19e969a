//! Core engine - dependency resolution, worker pool, scheduling and execution

mod command;
mod executor;
mod graph;
mod pool;
mod scheduler;
mod worker;

pub use command::{expand, CommandInstance, CommandSpec};
pub use executor::{execute, execute_blocking, Executor, WorkerEvent};
pub use graph::resolve_execution_order;
pub use pool::{PoolReleaser, WorkerPool};
pub use scheduler::{launcher, process_launcher, LaunchFuture, Launcher, Scheduler};
pub use worker::{
    handoff_slot, run_process, Assignment, Captured, Handoff, OutputPublisher, Predecessor,
    StateHandle, Worker, WorkerState,
};
