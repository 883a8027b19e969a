//! Task Scheduler - dispatches command instances onto pooled workers in dependency order

use super::executor::WorkerEvent;
use super::worker::{handoff_slot, run_process, Assignment, Captured, OutputPublisher, Predecessor};
use super::{CommandInstance, Worker, WorkerPool};
use crate::config::Settings;
use crate::error::{ExecError, WorkerError};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::pool::PoolReleaser;

/// Future produced by a [`Launcher`] for one assignment
pub type LaunchFuture = Pin<Box<dyn Future<Output = Result<Captured, WorkerError>> + Send>>;

/// What a worker does with its assignment; defaults to running the child process
pub type Launcher = Arc<dyn Fn(Assignment) -> LaunchFuture + Send + Sync>;

/// Wrap an async function into a [`Launcher`]
pub fn launcher<F, Fut>(f: F) -> Launcher
where
    F: Fn(Assignment) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Captured, WorkerError>> + Send + 'static,
{
    Arc::new(move |assignment| -> LaunchFuture { Box::pin(f(assignment)) })
}

/// Launcher that runs every assignment as an external process
pub fn process_launcher() -> Launcher {
    launcher(run_process)
}

/// Dispatches the execution order onto the pool without waiting on completions
pub struct Scheduler {
    settings: Arc<Settings>,
    launcher: Launcher,
}

impl Scheduler {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self {
            settings,
            launcher: process_launcher(),
        }
    }

    pub fn with_launcher(mut self, launcher: Launcher) -> Self {
        self.launcher = launcher;
        self
    }

    /// Dispatch every index of `order` exactly once
    ///
    /// Blocks only while waiting for a free worker. Each dispatched run owns
    /// a clone of `events`; the channel closes once the last run has
    /// returned its worker to the pool.
    pub async fn dispatch(
        &self,
        commands: &[CommandInstance],
        order: &[usize],
        pool: &mut WorkerPool,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Result<usize, ExecError> {
        let releaser = pool.releaser();
        // Slot of the run that executed each command index, for wiring dependents
        let mut history: HashMap<usize, Predecessor> = HashMap::with_capacity(order.len());

        for &index in order {
            let command = &commands[index];
            log::debug!(
                "Scheduling command with index {}: {}",
                index,
                command.display()
            );

            let mut worker = pool
                .acquire()
                .await
                .ok_or(ExecError::PoolClosed { index })?;
            worker.assign(index);

            let predecessor = match command.dependency {
                Some(dependency) => {
                    let wired = history.get(&(dependency as usize)).cloned();
                    if wired.is_none() {
                        log::warn!(
                            "Command {} scheduled before its dependency {}",
                            index,
                            dependency
                        );
                    }
                    wired
                }
                None => None,
            };

            let (publisher, rx) = handoff_slot();
            history.insert(index, Predecessor::new(worker.id(), index, rx));

            let assignment = Assignment {
                worker_id: worker.id(),
                index,
                command: command.clone(),
                predecessor,
                settings: Arc::clone(&self.settings),
                state: worker.state_handle(),
            };

            tokio::spawn(supervise(
                worker,
                assignment,
                publisher,
                Arc::clone(&self.launcher),
                releaser.clone(),
                events.clone(),
            ));
        }

        Ok(order.len())
    }
}

/// Run one assignment behind a panic boundary, then publish and recycle
async fn supervise(
    mut worker: Worker,
    assignment: Assignment,
    publisher: OutputPublisher,
    launcher: Launcher,
    releaser: PoolReleaser,
    events: mpsc::UnboundedSender<WorkerEvent>,
) {
    let worker_id = worker.id();
    let index = assignment.index;
    let _ = events.send(WorkerEvent::Started { index, worker_id });

    let joined = tokio::spawn(async move { launcher(assignment).await }).await;
    let result = match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => {
            let message = panic_message(e.into_panic());
            log::warn!("Recovered from panic in Thread-{}: {}", worker_id, message);
            Err(WorkerError::Panic { worker_id, message })
        }
        Err(e) => Err(WorkerError::Panic {
            worker_id,
            message: e.to_string(),
        }),
    };

    worker.complete();
    match result {
        Ok(captured) => {
            publisher.publish(captured.clone());
            let _ = events.send(WorkerEvent::Completed {
                index,
                worker_id,
                captured,
            });
        }
        Err(error) => {
            publisher.publish(None);
            let _ = events.send(WorkerEvent::Failed {
                index,
                worker_id,
                error,
            });
        }
    }

    releaser.release(worker).await;
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    fn instance(program: &str, dependency: Option<isize>) -> CommandInstance {
        CommandInstance {
            program: program.to_string(),
            args: Vec::new(),
            delay: None,
            dependency,
        }
    }

    async fn drain(mut rx: mpsc::UnboundedReceiver<WorkerEvent>) -> Vec<WorkerEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_dispatch_runs_every_index_once() {
        let commands: Vec<_> = (0..5).map(|_| instance("noop", None)).collect();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);
        let launcher = launcher(move |a: Assignment| {
            recorder.lock().unwrap().push(a.index);
            async { Ok(None) }
        });

        let mut pool = WorkerPool::new(2);
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Scheduler::new(Arc::new(Settings::default())).with_launcher(launcher);

        let dispatched = scheduler
            .dispatch(&commands, &[0, 1, 2, 3, 4], &mut pool, tx)
            .await
            .unwrap();
        drain(rx).await;

        assert_eq!(dispatched, 5);
        let mut seen = seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_pool_bounds_concurrency() {
        let commands: Vec<_> = (0..6).map(|_| instance("noop", None)).collect();
        let running = Arc::new(Mutex::new((0usize, 0usize)));
        let gauge = Arc::clone(&running);
        let launcher = launcher(move |_| {
            let gauge = Arc::clone(&gauge);
            async move {
                {
                    let mut g = gauge.lock().unwrap();
                    g.0 += 1;
                    g.1 = g.1.max(g.0);
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
                gauge.lock().unwrap().0 -= 1;
                Ok(None)
            }
        });

        let mut pool = WorkerPool::new(2);
        let (tx, rx) = mpsc::unbounded_channel();
        Scheduler::new(Arc::new(Settings::default()))
            .with_launcher(launcher)
            .dispatch(&commands, &[0, 1, 2, 3, 4, 5], &mut pool, tx)
            .await
            .unwrap();
        drain(rx).await;

        assert!(running.lock().unwrap().1 <= 2);
    }

    #[tokio::test]
    async fn test_panic_is_isolated_to_its_worker() {
        let commands = vec![instance("boom", None), instance("fine", None)];
        let launcher = launcher(|a: Assignment| async move {
            if a.command.program == "boom" {
                panic!("kaboom");
            }
            Ok(Some(Arc::from(&b"ok"[..])))
        });

        let mut pool = WorkerPool::new(1);
        let (tx, rx) = mpsc::unbounded_channel();
        Scheduler::new(Arc::new(Settings::default()))
            .with_launcher(launcher)
            .dispatch(&commands, &[0, 1], &mut pool, tx)
            .await
            .unwrap();
        let events = drain(rx).await;

        assert!(events.iter().any(|e| matches!(
            e,
            WorkerEvent::Failed {
                index: 0,
                error: WorkerError::Panic { worker_id: 0, message },
                ..
            } if message == "kaboom"
        )));
        // The single worker went back to the pool and ran the second command
        assert!(events
            .iter()
            .any(|e| matches!(e, WorkerEvent::Completed { index: 1, worker_id: 0, .. })));
    }

    #[tokio::test]
    async fn test_dependent_is_wired_to_dependency_slot() {
        let commands = vec![instance("producer", None), instance("consumer", Some(0))];
        let launcher = launcher(|mut a: Assignment| async move {
            match a.predecessor.as_mut() {
                Some(pred) => Ok(pred.wait().await),
                None => Ok(Some(Arc::from(&b"payload"[..]))),
            }
        });

        let mut pool = WorkerPool::new(2);
        let (tx, rx) = mpsc::unbounded_channel();
        Scheduler::new(Arc::new(Settings::default()))
            .with_launcher(launcher)
            .dispatch(&commands, &[0, 1], &mut pool, tx)
            .await
            .unwrap();
        let events = drain(rx).await;

        let consumer = events.iter().find_map(|e| match e {
            WorkerEvent::Completed {
                index: 1, captured, ..
            } => Some(captured.clone()),
            _ => None,
        });
        assert_eq!(consumer.flatten().as_deref(), Some(&b"payload"[..]));
    }
}
