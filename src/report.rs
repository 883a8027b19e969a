//! Run report - per-command outcomes of one run, persistable as JSON

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::core::CommandInstance;
use crate::error::{ExecError, WorkerError};

/// A report covers one call to the executor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// One entry per flattened command, in list order
    pub outcomes: Vec<CommandOutcome>,
}

/// What happened to a single command instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub index: usize,
    pub command: String,
    pub worker_id: Option<usize>,
    pub status: OutcomeStatus,
    pub started: Option<DateTime<Utc>>,
    pub ended: Option<DateTime<Utc>>,
    /// Output handed to dependents, decoded lossily
    pub captured: Option<String>,
    pub error: Option<String>,
    pub error_kind: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl RunReport {
    /// Create a report with every command pending
    pub fn new(commands: &[CommandInstance]) -> Self {
        let started_at = Utc::now();
        Self {
            id: started_at.format("%Y-%m-%d-%H-%M-%S").to_string(),
            started_at,
            ended_at: None,
            outcomes: commands
                .iter()
                .enumerate()
                .map(|(index, command)| CommandOutcome {
                    index,
                    command: command.display(),
                    worker_id: None,
                    status: OutcomeStatus::Pending,
                    started: None,
                    ended: None,
                    captured: None,
                    error: None,
                    error_kind: None,
                })
                .collect(),
        }
    }

    pub fn start_command(&mut self, index: usize, worker_id: usize) {
        if let Some(outcome) = self.outcomes.get_mut(index) {
            outcome.worker_id = Some(worker_id);
            outcome.status = OutcomeStatus::Running;
            outcome.started = Some(Utc::now());
        }
    }

    pub fn complete_command(&mut self, index: usize, captured: Option<&[u8]>) {
        if let Some(outcome) = self.outcomes.get_mut(index) {
            outcome.status = OutcomeStatus::Done;
            outcome.ended = Some(Utc::now());
            outcome.captured = captured.map(|bytes| String::from_utf8_lossy(bytes).into_owned());
        }
    }

    pub fn fail_command(&mut self, index: usize, error: &WorkerError) {
        if let Some(outcome) = self.outcomes.get_mut(index) {
            outcome.status = OutcomeStatus::Failed;
            outcome.ended = Some(Utc::now());
            outcome.error = Some(error.to_string());
            outcome.error_kind = Some(error.kind().to_string());
        }
    }

    /// Mark the run as finished
    pub fn end(&mut self) {
        self.ended_at = Some(Utc::now());
    }

    pub fn failures(&self) -> impl Iterator<Item = &CommandOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.status == OutcomeStatus::Failed)
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Every failure on its own `[ERROR]` line
    pub fn failure_summary(&self) -> String {
        self.failures()
            .map(|o| {
                let worker = o
                    .worker_id
                    .map(|id| format!("[Thread-{}] ", id))
                    .unwrap_or_default();
                format!(
                    "[ERROR] {}{}: {}",
                    worker,
                    o.command,
                    o.error.as_deref().unwrap_or("unknown error")
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Turn a finished report into the run's result
    pub fn into_result(self) -> Result<Self, ExecError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ExecError::CommandsFailed(Box::new(self)))
        }
    }

    /// Save report to disk as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Load a report saved with [`RunReport::save`]
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let report: RunReport = serde_json::from_str(&content)?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commands() -> Vec<CommandInstance> {
        crate::core::expand(&[
            crate::core::CommandSpec::new("echo").arg("hi"),
            crate::core::CommandSpec::new("cat").depends_on(0),
        ])
    }

    #[test]
    fn test_report_creation() {
        let report = RunReport::new(&commands());
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.outcomes[0].command, "echo hi");
        assert!(report
            .outcomes
            .iter()
            .all(|o| o.status == OutcomeStatus::Pending));
        assert!(report.ended_at.is_none());
    }

    #[test]
    fn test_outcome_tracking() {
        let mut report = RunReport::new(&commands());
        report.start_command(0, 2);
        assert_eq!(report.outcomes[0].status, OutcomeStatus::Running);

        report.complete_command(0, Some(b"hi\n"));
        report.start_command(1, 0);
        report.fail_command(1, &WorkerError::PipelineInput { worker_id: 2 });
        report.end();

        assert_eq!(report.outcomes[0].captured.as_deref(), Some("hi\n"));
        assert_eq!(report.outcomes[1].error_kind.as_deref(), Some("pipeline-input"));
        assert!(!report.is_success());
        assert_eq!(
            report.failure_summary(),
            "[ERROR] [Thread-0] cat: No valid input from previous worker (Thread-2)"
        );
    }

    #[test]
    fn test_into_result() {
        let mut report = RunReport::new(&commands());
        report.complete_command(0, None);
        report.complete_command(1, None);
        assert!(report.clone().into_result().is_ok());

        report.fail_command(1, &WorkerError::Timeout {
            command: "cat".to_string(),
        });
        let err = report.into_result().unwrap_err();
        assert!(err.to_string().contains("Timeout exceeded for command: cat"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports").join("run.json");

        let mut report = RunReport::new(&commands());
        report.complete_command(0, Some(b"hi\n"));
        report.end();
        report.save(&path).unwrap();

        let loaded = RunReport::load(&path).unwrap();
        assert_eq!(loaded.id, report.id);
        assert_eq!(loaded.outcomes[0].status, OutcomeStatus::Done);
    }
}
