//! Worker - a reusable execution slot that runs one command instance at a time
//!
//! Each assignment gets a fresh hand-off slot. The dispatch boundary publishes
//! into it exactly once when the run completes (success, failure or panic),
//! and any number of dependents wait on it and read the captured output
//! without consuming it.

use super::CommandInstance;
use crate::config::Settings;
use crate::error::WorkerError;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tokio::time::{timeout_at, Instant};

const STREAM_CHUNK: usize = 1024;
// About thirty years; stands in for timeouts too large to add to a clock reading
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Output captured from a command for its dependents
pub type Captured = Option<Arc<[u8]>>;

/// Lifecycle of a worker across one assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Assigned,
    Delaying,
    Running,
    Completed,
}

/// Shared view of a worker's current state
#[derive(Debug, Clone)]
pub struct StateHandle {
    worker_id: usize,
    state: Arc<Mutex<WorkerState>>,
}

impl StateHandle {
    pub fn get(&self) -> WorkerState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set(&self, next: WorkerState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        log::debug!("[Thread-{}] {:?} -> {:?}", self.worker_id, *state, next);
        *state = next;
    }
}

/// A reusable execution slot, identified by its ordinal in the pool
#[derive(Debug)]
pub struct Worker {
    id: usize,
    state: StateHandle,
    runs: usize,
}

impl Worker {
    pub fn new(id: usize) -> Self {
        log::debug!("Creating worker with ID: {}", id);
        Self {
            id,
            state: StateHandle {
                worker_id: id,
                state: Arc::new(Mutex::new(WorkerState::Idle)),
            },
            runs: 0,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        self.state.get()
    }

    /// Number of command instances this worker has been bound to
    pub fn runs(&self) -> usize {
        self.runs
    }

    pub(crate) fn state_handle(&self) -> StateHandle {
        self.state.clone()
    }

    pub(crate) fn assign(&mut self, index: usize) {
        self.runs += 1;
        log::debug!("[Thread-{}] assigned command {}", self.id, index);
        self.state.set(WorkerState::Assigned);
    }

    pub(crate) fn complete(&mut self) {
        self.state.set(WorkerState::Completed);
    }

    pub(crate) fn recycle(&mut self) {
        self.state.set(WorkerState::Idle);
    }
}

/// State of a hand-off slot as seen by dependents
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handoff {
    /// The owning run has not completed yet
    Pending,
    /// The owning run completed with this captured output
    Ready(Arc<[u8]>),
    /// The owning run completed without usable output
    Absent,
}

impl Handoff {
    fn is_settled(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Create the hand-off slot for one assignment
pub fn handoff_slot() -> (OutputPublisher, watch::Receiver<Handoff>) {
    let (tx, rx) = watch::channel(Handoff::Pending);
    (OutputPublisher { tx }, rx)
}

/// Write side of a hand-off slot, consumed by the single publish
#[derive(Debug)]
pub struct OutputPublisher {
    tx: watch::Sender<Handoff>,
}

impl OutputPublisher {
    /// Broadcast completion to every current and future reader
    pub fn publish(self, captured: Captured) {
        let state = match captured {
            Some(bytes) if !bytes.is_empty() => Handoff::Ready(bytes),
            _ => Handoff::Absent,
        };
        self.tx.send_replace(state);
    }
}

/// Read side of the dependency a command is wired to
#[derive(Debug, Clone)]
pub struct Predecessor {
    pub worker_id: usize,
    pub index: usize,
    rx: watch::Receiver<Handoff>,
}

impl Predecessor {
    pub fn new(worker_id: usize, index: usize, rx: watch::Receiver<Handoff>) -> Self {
        Self {
            worker_id,
            index,
            rx,
        }
    }

    /// Wait for the predecessor to complete and take a copy of its output
    ///
    /// Returns `None` when it completed without output, failed, or was torn
    /// down without publishing.
    pub async fn wait(&mut self) -> Captured {
        match self.rx.wait_for(Handoff::is_settled).await {
            Ok(state) => match &*state {
                Handoff::Ready(bytes) => Some(Arc::clone(bytes)),
                _ => None,
            },
            Err(_) => None,
        }
    }
}

/// Everything a worker needs to run one command instance
#[derive(Debug)]
pub struct Assignment {
    pub worker_id: usize,
    pub index: usize,
    pub command: CommandInstance,
    pub predecessor: Option<Predecessor>,
    pub settings: Arc<Settings>,
    pub(crate) state: StateHandle,
}

impl Assignment {
    fn timeout_error(&self) -> WorkerError {
        WorkerError::Timeout {
            command: self.command.program.clone(),
        }
    }

    fn emit_output(&self, chunk: &[u8]) {
        let text = String::from_utf8_lossy(chunk);
        if self.settings.verbose {
            log::debug!("[Thread-{}] Output: {}", self.worker_id, text.trim_end());
        } else {
            println!("[Thread-{}] Output: {}", self.worker_id, text.trim_end());
        }
    }

    /// Resolve the input to feed the process, blocking on the predecessor if needed
    async fn await_input(&mut self, deadline: Instant) -> Result<Captured, WorkerError> {
        let pipeline = self.settings.pipeline;
        let wait_anyway = self.settings.wait_for_dependencies;

        let Some(predecessor) = self.predecessor.as_mut() else {
            return Ok(None);
        };
        if !pipeline && !wait_anyway {
            return Ok(None);
        }

        let predecessor_id = predecessor.worker_id;
        log::debug!(
            "[Thread-{}] waiting on command {} (Thread-{})",
            self.worker_id,
            predecessor.index,
            predecessor_id
        );

        let input = timeout_at(deadline, predecessor.wait())
            .await
            .map_err(|_| self.timeout_error())?;

        if !pipeline {
            return Ok(None);
        }

        match input {
            Some(bytes) => Ok(Some(bytes)),
            None => Err(WorkerError::PipelineInput {
                worker_id: predecessor_id,
            }),
        }
    }
}

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout.min(FAR_FUTURE))
        .unwrap_or_else(|| now + FAR_FUTURE)
}

/// Run the assigned command as a child process under the configured deadline
///
/// The first read of the child's stdout (at most `capture_limit` bytes) is
/// returned for dependents; the rest of the stream is only sent to the output
/// sink.
pub async fn run_process(mut assignment: Assignment) -> Result<Captured, WorkerError> {
    let settings = Arc::clone(&assignment.settings);
    let deadline = deadline_after(settings.timeout);
    let worker_id = assignment.worker_id;

    log::info!(
        "[Thread-{}] Executing command: {}",
        worker_id,
        assignment.command.display()
    );

    if let Some(delay) = assignment.command.delay {
        let pause = settings.delay_duration(delay);
        if pause >= settings.timeout {
            log::debug!(
                "[Thread-{}] delay of {} {} exceeds the timeout",
                worker_id,
                delay,
                settings.time_unit
            );
            return Err(assignment.timeout_error());
        }

        assignment.state.set(WorkerState::Delaying);
        log::info!(
            "[Thread-{}] sleeping for {} {}",
            worker_id,
            delay,
            settings.time_unit
        );
        timeout_at(deadline, tokio::time::sleep(pause))
            .await
            .map_err(|_| assignment.timeout_error())?;
    }

    let input = assignment.await_input(deadline).await?;

    assignment.state.set(WorkerState::Running);
    let mut child = Command::new(&assignment.command.program)
        .args(&assignment.command.args)
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| WorkerError::ProcessStart {
            command: assignment.command.program.clone(),
            source,
        })?;

    let writer = match (input, child.stdin.take()) {
        (Some(bytes), Some(mut stdin)) => Some(tokio::spawn(async move {
            stdin.write_all(&bytes).await?;
            stdin.shutdown().await
        })),
        (Some(_), None) => {
            return Err(WorkerError::Pipe(std::io::Error::other(
                "child stdin was not captured",
            )))
        }
        _ => None,
    };

    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_stderr(worker_id, stderr));
    }

    let mut stdout = child.stdout.take().ok_or_else(|| {
        WorkerError::Pipe(std::io::Error::other("child stdout was not captured"))
    })?;

    let streamed = async {
        let mut captured = vec![0u8; settings.capture_limit.max(1)];
        let read = stdout
            .read(&mut captured)
            .await
            .map_err(WorkerError::OutputRead)?;
        captured.truncate(read);
        if read > 0 {
            assignment.emit_output(&captured);
        }

        let mut chunk = [0u8; STREAM_CHUNK];
        loop {
            let n = stdout
                .read(&mut chunk)
                .await
                .map_err(WorkerError::OutputRead)?;
            if n == 0 {
                break;
            }
            assignment.emit_output(&chunk[..n]);
        }

        let status = child.wait().await.map_err(WorkerError::OutputRead)?;
        Ok::<_, WorkerError>((captured, status))
    };

    let outcome = timeout_at(deadline, streamed).await;
    let (captured, status) = match outcome {
        Ok(result) => result?,
        Err(_) => {
            log::debug!(
                "[Thread-{}] Timeout exceeded for command: {}",
                worker_id,
                assignment.command.program
            );
            if let Err(e) = child.kill().await {
                log::warn!("[Thread-{}] failed to kill child: {}", worker_id, e);
            }
            return Err(assignment.timeout_error());
        }
    };

    if let Some(writer) = writer {
        match writer.await {
            Ok(Err(e)) if e.kind() != std::io::ErrorKind::BrokenPipe => {
                return Err(WorkerError::Pipe(e));
            }
            Ok(_) => {}
            Err(e) => log::warn!("[Thread-{}] stdin writer aborted: {}", worker_id, e),
        }
    }

    if !status.success() {
        return Err(WorkerError::CommandFailed {
            command: assignment.command.program.clone(),
            code: status.code().unwrap_or(-1),
        });
    }

    if captured.is_empty() {
        Ok(None)
    } else {
        Ok(Some(Arc::from(captured)))
    }
}

async fn forward_stderr<R: AsyncRead + Unpin>(worker_id: usize, stderr: R) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        log::warn!("[Thread-{}] stderr: {}", worker_id, line);
    }
}
