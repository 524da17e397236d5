//! Deployment history ledger
//!
//! Three files live under the state directory:
//! - `history.jsonl`: one [`HistoryEntry`] per stage transition, append-only;
//! - `reports/deploy_<id>.json`: the full [`DeploymentRun`] record, written
//!   once when a run ends;
//! - `last_success`: the commit of the most recent successful promotion.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sd_core::config::DeployConfig;
use sd_core::time::{deploy_id_at, now_rfc3339};
use sd_core::{DeployError, RunStatus, Stage};

use crate::state::DeploymentRun;

/// Outcome recorded for one stage transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Passed,
    Skipped,
    Warning,
    Failed,
    GateFail,
    DryRun,
    TestOnly,
    Success,
    RolledBack,
}

impl From<RunStatus> for EntryStatus {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::GateFail => EntryStatus::GateFail,
            RunStatus::DryRun => EntryStatus::DryRun,
            RunStatus::TestOnly => EntryStatus::TestOnly,
            RunStatus::Success => EntryStatus::Success,
            RunStatus::RolledBack => EntryStatus::RolledBack,
            RunStatus::Failed => EntryStatus::Failed,
            // A pending run has only passed stages so far
            RunStatus::Pending => EntryStatus::Passed,
        }
    }
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Passed => "passed",
            EntryStatus::Skipped => "skipped",
            EntryStatus::Warning => "warning",
            EntryStatus::Failed => "failed",
            EntryStatus::GateFail => "gate_fail",
            EntryStatus::DryRun => "dry_run",
            EntryStatus::TestOnly => "test_only",
            EntryStatus::Success => "success",
            EntryStatus::RolledBack => "rolled_back",
        }
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub deploy_id: String,
    pub status: EntryStatus,
    pub stage: Stage,
    pub message: String,
    /// Commit the run is releasing (or restoring, for rollbacks)
    #[serde(default)]
    pub commit: Option<String>,
    pub timestamp: String,
    /// Set on every entry of an emergency run that skipped the sentinel gate
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub bypass: bool,
}

impl HistoryEntry {
    pub fn new(
        deploy_id: impl Into<String>,
        stage: Stage,
        status: EntryStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            deploy_id: deploy_id.into(),
            status,
            stage,
            message: message.into(),
            commit: None,
            timestamp: now_rfc3339(),
            bypass: false,
        }
    }

    pub fn with_commit(mut self, commit: Option<&str>) -> Self {
        self.commit = commit.map(String::from);
        self
    }

    pub fn with_bypass(mut self, bypass: bool) -> Self {
        self.bypass = bypass;
        self
    }
}

/// File-backed history for one state directory
#[derive(Debug, Clone)]
pub struct History {
    ledger_path: PathBuf,
    reports_dir: PathBuf,
    pointer_path: PathBuf,
}

impl History {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            ledger_path: state_dir.join("history.jsonl"),
            reports_dir: state_dir.join("reports"),
            pointer_path: state_dir.join("last_success"),
        }
    }

    pub fn from_config(config: &DeployConfig) -> Self {
        Self {
            ledger_path: config.history_path(),
            reports_dir: config.reports_dir(),
            pointer_path: config.last_success_path(),
        }
    }

    pub fn ledger_path(&self) -> &Path {
        &self.ledger_path
    }

    /// Append one entry; existing lines are never rewritten
    pub fn append(&self, entry: &HistoryEntry) -> Result<(), DeployError> {
        ensure_parent(&self.ledger_path)?;
        let mut line = serde_json::to_string(entry).map_err(history_err)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.ledger_path)?;
        file.write_all(line.as_bytes())?;
        file.flush()?;

        tracing::debug!(
            deploy_id = %entry.deploy_id,
            stage = %entry.stage,
            status = %entry.status,
            "history entry appended"
        );
        Ok(())
    }

    /// Every entry in ledger order. Unparseable lines are skipped with a warning.
    pub fn entries(&self) -> Result<Vec<HistoryEntry>, DeployError> {
        let content = match fs::read_to_string(&self.ledger_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!(
                    "Skipping malformed history line {} in {}: {}",
                    index + 1,
                    self.ledger_path.display(),
                    e
                ),
            }
        }
        Ok(entries)
    }

    /// Entries of one run, in the order they were written
    pub fn entries_for(&self, deploy_id: &str) -> Result<Vec<HistoryEntry>, DeployError> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|e| e.deploy_id == deploy_id)
            .collect())
    }

    /// The last entry of each of the most recent `limit` runs, newest first
    pub fn recent_runs(&self, limit: usize) -> Result<Vec<HistoryEntry>, DeployError> {
        let mut latest: Vec<HistoryEntry> = Vec::new();
        for entry in self.entries()? {
            match latest.iter_mut().find(|e| e.deploy_id == entry.deploy_id) {
                Some(existing) => *existing = entry,
                None => latest.push(entry),
            }
        }
        latest.reverse();
        latest.truncate(limit);
        Ok(latest)
    }

    /// Id for a run started at `at`, unique within this ledger
    pub fn fresh_deploy_id(&self, at: DateTime<Utc>) -> Result<String, DeployError> {
        let base = deploy_id_at(at);
        let taken: Vec<String> = self.entries()?.into_iter().map(|e| e.deploy_id).collect();
        if !taken.contains(&base) {
            return Ok(base);
        }
        let id = (1..)
            .map(|n| format!("{base}-{n}"))
            .find(|candidate| !taken.contains(candidate))
            .unwrap_or(base);
        Ok(id)
    }

    pub fn report_path(&self, deploy_id: &str) -> PathBuf {
        self.reports_dir.join(format!("deploy_{deploy_id}.json"))
    }

    /// Write the run report; one file per run
    pub fn write_report(&self, run: &DeploymentRun) -> Result<PathBuf, DeployError> {
        fs::create_dir_all(&self.reports_dir)?;
        let path = self.report_path(&run.id);
        let json = serde_json::to_string_pretty(run).map_err(history_err)?;
        fs::write(&path, json)?;
        tracing::info!("Report written to {}", path.display());
        Ok(path)
    }

    pub fn read_report(&self, deploy_id: &str) -> Result<Option<DeploymentRun>, DeployError> {
        let path = self.report_path(deploy_id);
        match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).map(Some).map_err(history_err),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Commit of the last successful promotion, if any
    pub fn last_success(&self) -> Result<Option<String>, DeployError> {
        match fs::read_to_string(&self.pointer_path) {
            Ok(content) => {
                let commit = content.trim();
                Ok((!commit.is_empty()).then(|| commit.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Move the pointer; replaced atomically through a rename
    pub fn set_last_success(&self, commit: &str) -> Result<(), DeployError> {
        ensure_parent(&self.pointer_path)?;
        let tmp = self.pointer_path.with_extension("tmp");
        fs::write(&tmp, format!("{commit}\n"))?;
        fs::rename(&tmp, &self.pointer_path)?;
        tracing::info!("Last successful deployment is now {}", commit);
        Ok(())
    }
}

fn ensure_parent(path: &Path) -> Result<(), DeployError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn history_err(e: serde_json::Error) -> DeployError {
    DeployError::History(e.to_string())
}
