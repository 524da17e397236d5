//! Writes a run's transitions to the history ledger

use chrono::Utc;

use sd_core::{DeployError, RunStatus, Stage};

use crate::history::{EntryStatus, History, HistoryEntry};
use crate::state::DeploymentRun;

/// How a run ended
pub(crate) struct Verdict {
    pub status: RunStatus,
    pub stage: Stage,
    pub message: String,
    pub error: Option<DeployError>,
}

impl Verdict {
    pub fn new(status: RunStatus, stage: Stage, message: impl Into<String>) -> Self {
        Self {
            status,
            stage,
            message: message.into(),
            error: None,
        }
    }

    pub fn error(status: RunStatus, stage: Stage, error: DeployError) -> Self {
        Self {
            status,
            stage,
            message: error.to_string(),
            error: Some(error),
        }
    }

    pub fn failed(stage: Stage, error: DeployError) -> Self {
        Self::error(RunStatus::Failed, stage, error)
    }

    pub fn with_error(mut self, error: DeployError) -> Self {
        self.error = Some(error);
        self
    }
}

/// Owns the run record while the run is in flight
pub(crate) struct RunRecorder<'a> {
    history: &'a History,
    commit: Option<String>,
    pub run: DeploymentRun,
}

impl<'a> RunRecorder<'a> {
    pub fn new(history: &'a History, run: DeploymentRun) -> Self {
        let commit = run.commit().map(String::from);
        Self {
            history,
            commit,
            run,
        }
    }

    /// Commit stamped on entries when the run has no candidate
    pub fn with_commit(mut self, commit: &str) -> Self {
        self.commit = Some(commit.to_string());
        self
    }

    /// Append one transition. A ledger write failure is logged, not fatal.
    pub fn record(&self, stage: Stage, status: EntryStatus, message: impl Into<String>) {
        let entry = HistoryEntry::new(&self.run.id, stage, status, message)
            .with_commit(self.commit.as_deref())
            .with_bypass(self.run.bypass);
        if let Err(e) = self.history.append(&entry) {
            tracing::error!("Failed to record {} in history: {}", stage, e);
        }
    }

    /// Set the terminal status, write the final entry and the report
    pub fn finish(mut self, verdict: Verdict) -> DeploymentRun {
        self.run.finish(verdict.status, Utc::now());
        if let Some(error) = &verdict.error {
            self.run.record_error(verdict.stage, error);
        }
        self.record(verdict.stage, EntryStatus::from(verdict.status), verdict.message);
        if let Err(e) = self.history.write_report(&self.run) {
            tracing::error!("Failed to write report for {}: {}", self.run.id, e);
        }
        self.run
    }
}
