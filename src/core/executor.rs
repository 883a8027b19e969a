//! Executor - entry point that resolves, dispatches and aggregates a run
//!
//! Dispatch and aggregation run side by side: the scheduler keeps handing out
//! workers while the aggregator drains events. The event channel doubles as
//! the completion counter, closing only when every dispatched run has
//! released its worker.

use super::graph::resolve_execution_order;
use super::scheduler::{process_launcher, Launcher, Scheduler};
use super::worker::Captured;
use super::{CommandInstance, WorkerPool};
use crate::config::Settings;
use crate::error::{ExecError, WorkerError};
use crate::report::RunReport;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Worker execution event
#[derive(Debug)]
pub enum WorkerEvent {
    Started {
        index: usize,
        worker_id: usize,
    },
    Completed {
        index: usize,
        worker_id: usize,
        captured: Captured,
    },
    Failed {
        index: usize,
        worker_id: usize,
        error: WorkerError,
    },
}

/// Runs a flattened command list under one set of settings
pub struct Executor {
    settings: Arc<Settings>,
    launcher: Launcher,
}

impl Executor {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: Arc::new(settings),
            launcher: process_launcher(),
        }
    }

    /// Replace how assignments are carried out
    pub fn with_launcher(mut self, launcher: Launcher) -> Self {
        self.launcher = launcher;
        self
    }

    /// Run every command to completion
    ///
    /// Dependency errors abort before anything starts. Command failures never
    /// stop other commands; they are collected and returned together once
    /// the whole run has finished.
    pub async fn run(&self, commands: Vec<CommandInstance>) -> Result<RunReport, ExecError> {
        let order = resolve_execution_order(&commands)?;
        log::debug!("Execution order: {:?}", order);

        if commands.is_empty() {
            let mut report = RunReport::new(&commands);
            report.end();
            return Ok(report);
        }

        let mut pool = WorkerPool::new(self.settings.worker_count(commands.len()));
        let scheduler =
            Scheduler::new(Arc::clone(&self.settings)).with_launcher(Arc::clone(&self.launcher));
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let (dispatched, report) = tokio::join!(
            scheduler.dispatch(&commands, &order, &mut pool, event_tx),
            aggregate(&commands, event_rx),
        );

        let dispatched = dispatched?;
        log::debug!("Execution completed, {} commands dispatched", dispatched);
        report.into_result()
    }
}

/// Run `commands` as external processes under `settings`
pub async fn execute(
    commands: Vec<CommandInstance>,
    settings: Settings,
) -> Result<RunReport, ExecError> {
    Executor::new(settings).run(commands).await
}

/// Synchronous wrapper around [`execute`] that owns its own runtime
pub fn execute_blocking(
    commands: Vec<CommandInstance>,
    settings: Settings,
) -> Result<RunReport, ExecError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(ExecError::Runtime)?;
    runtime.block_on(execute(commands, settings))
}

/// Drain worker events until every dispatched run has finished
async fn aggregate(
    commands: &[CommandInstance],
    mut events: mpsc::UnboundedReceiver<WorkerEvent>,
) -> RunReport {
    let mut report = RunReport::new(commands);

    while let Some(event) = events.recv().await {
        match event {
            WorkerEvent::Started { index, worker_id } => {
                report.start_command(index, worker_id);
            }
            WorkerEvent::Completed {
                index,
                worker_id,
                captured,
            } => {
                log::info!("[Thread-{}] Command {} completed", worker_id, index);
                report.complete_command(index, captured.as_deref());
            }
            WorkerEvent::Failed {
                index,
                worker_id,
                error,
            } => {
                log::error!("[Thread-{}] Command {} failed: {}", worker_id, index, error);
                report.fail_command(index, &error);
            }
        }
    }

    report.end();
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::launcher;
    use crate::core::Assignment;
    use crate::error::DependencyError;
    use crate::report::OutcomeStatus;
    use std::time::Duration;

    fn instance(program: &str, args: &[&str], dependency: Option<isize>) -> CommandInstance {
        CommandInstance {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            delay: None,
            dependency,
        }
    }

    fn pipeline() -> Settings {
        Settings {
            pipeline: true,
            ..Settings::default()
        }
    }

    #[tokio::test]
    async fn test_cycle_schedules_nothing() {
        let commands = vec![
            instance("echo", &["a"], Some(1)),
            instance("echo", &["b"], Some(0)),
        ];
        let err = execute(commands, Settings::default()).await.unwrap_err();
        assert!(matches!(
            err,
            ExecError::Dependency(DependencyError::CircularDependency)
        ));
    }

    #[tokio::test]
    async fn test_invalid_dependency_schedules_nothing() {
        let commands = vec![instance("echo", &["a"], Some(4))];
        let err = execute(commands, Settings::default()).await.unwrap_err();
        assert!(matches!(
            err,
            ExecError::Dependency(DependencyError::InvalidDependency { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_run_succeeds() {
        let report = execute(Vec::new(), Settings::default()).await.unwrap();
        assert!(report.outcomes.is_empty());
        assert!(report.ended_at.is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pipeline_feeds_dependency_output() {
        let commands = vec![
            instance("echo", &["hello"], None),
            instance("cat", &[], Some(0)),
        ];
        let report = execute(commands, pipeline()).await.unwrap();

        assert_eq!(report.outcomes[1].captured.as_deref(), Some("hello\n"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pipeline_fan_out_copies_to_every_dependent() {
        let commands = vec![
            instance("echo", &["shared"], None),
            instance("cat", &[], Some(0)),
            instance("cat", &[], Some(0)),
        ];
        let report = execute(commands, pipeline()).await.unwrap();

        assert_eq!(report.outcomes[1].captured.as_deref(), Some("shared\n"));
        assert_eq!(report.outcomes[2].captured.as_deref(), Some("shared\n"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pipeline_forward_reference() {
        // cat is listed first but depends on the echo after it
        let commands = vec![
            instance("cat", &[], Some(1)),
            instance("echo", &["later"], None),
        ];
        let report = execute(commands, pipeline()).await.unwrap();

        assert_eq!(report.outcomes[0].captured.as_deref(), Some("later\n"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pipeline_with_single_worker() {
        let commands = vec![
            instance("echo", &["one"], None),
            instance("cat", &[], Some(0)),
            instance("cat", &[], Some(1)),
        ];
        let settings = Settings {
            thread_count: 1,
            ..pipeline()
        };
        let report = execute(commands, settings).await.unwrap();

        assert_eq!(report.outcomes[2].captured.as_deref(), Some("one\n"));
        assert!(report.outcomes.iter().all(|o| o.worker_id == Some(0)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_dependency_fails_dependent_without_hanging() {
        let commands = vec![
            instance("false", &[], None),
            instance("cat", &[], Some(0)),
            instance("echo", &["independent"], None),
        ];
        let err = execute(commands, pipeline()).await.unwrap_err();
        let report = err.report().unwrap();

        assert_eq!(report.outcomes[0].error_kind.as_deref(), Some("command-failed"));
        assert_eq!(report.outcomes[1].error_kind.as_deref(), Some("pipeline-input"));
        assert_eq!(report.outcomes[2].status, OutcomeStatus::Done);
        assert_eq!(report.failures().count(), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timed_out_dependency_releases_dependent() {
        let commands = vec![
            instance("sleep", &["5"], None),
            instance("cat", &[], Some(0)),
        ];
        let settings = Settings {
            timeout: Duration::from_millis(300),
            ..pipeline()
        };
        let err = execute(commands, settings).await.unwrap_err();
        let report = err.report().unwrap();

        assert_eq!(report.outcomes[0].error_kind.as_deref(), Some("timeout"));
        assert_eq!(report.outcomes[1].status, OutcomeStatus::Failed);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_wait_for_dependencies_orders_completion() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let marker = marker.to_str().unwrap();

        let commands = vec![
            instance("sh", &["-c", &format!("sleep 0.2 && touch {}", marker)], None),
            instance("test", &["-e", marker], Some(0)),
        ];
        let settings = Settings {
            wait_for_dependencies: true,
            ..Settings::default()
        };

        execute(commands, settings).await.unwrap();
    }

    #[tokio::test]
    async fn test_panic_reported_and_others_complete() {
        let commands = vec![
            instance("boom", &[], None),
            instance("ok", &[], None),
            instance("ok", &[], None),
        ];
        let executor = Executor::new(Settings {
            thread_count: 1,
            ..Settings::default()
        })
        .with_launcher(launcher(|a: Assignment| async move {
            if a.command.program == "boom" {
                panic!("worker fault");
            }
            Ok(None)
        }));

        let err = executor.run(commands).await.unwrap_err();
        let report = err.report().unwrap();

        assert_eq!(report.outcomes[0].error_kind.as_deref(), Some("panic"));
        assert!(report.outcomes[0]
            .error
            .as_deref()
            .unwrap()
            .contains("Panic in Thread-0: worker fault"));
        assert_eq!(report.outcomes[1].status, OutcomeStatus::Done);
        assert_eq!(report.outcomes[2].status, OutcomeStatus::Done);
    }

    #[cfg(unix)]
    #[test]
    fn test_blocking_entry_point() {
        let report = execute_blocking(vec![instance("echo", &["sync"], None)], Settings::default())
            .unwrap();
        assert_eq!(report.outcomes[0].captured.as_deref(), Some("sync\n"));
    }
}
