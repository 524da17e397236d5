//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Role a node plays in the gated rollout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    /// Receives new code first and carries no user traffic
    Sentinel,
    /// Serves live traffic; only promoted after the sentinel gate
    Production,
}

impl NodeRole {
    /// Stage prefix used in history entries (`node2_*` / `node1_*`)
    pub fn stage_prefix(&self) -> &'static str {
        match self {
            NodeRole::Sentinel => "node2",
            NodeRole::Production => "node1",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Sentinel => write!(f, "sentinel"),
            NodeRole::Production => write!(f, "production"),
        }
    }
}

impl std::str::FromStr for NodeRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sentinel" | "node2" => Ok(NodeRole::Sentinel),
            "production" | "node1" => Ok(NodeRole::Production),
            other => Err(format!("unknown node role: {other}")),
        }
    }
}

/// The local commit being released, captured once per invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseCandidate {
    /// Full commit hash of local HEAD
    pub commit: String,
    /// Branch HEAD points at
    pub branch: String,
    /// No uncommitted changes
    pub is_clean: bool,
    /// Local commits not yet on the remote
    pub has_unpushed: bool,
}

impl ReleaseCandidate {
    /// Abbreviated commit for log lines
    pub fn short_commit(&self) -> &str {
        short_commit(&self.commit)
    }
}

/// Abbreviate a commit hash to 8 characters
pub fn short_commit(commit: &str) -> &str {
    commit.get(..8).unwrap_or(commit)
}

/// Status of a deployment run; everything but `Pending` is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    GateFail,
    DryRun,
    TestOnly,
    Success,
    Failed,
    RolledBack,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Pending)
    }

    /// Process exit code for a run ending in this status
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Success | RunStatus::DryRun | RunStatus::TestOnly => 0,
            _ => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::GateFail => "gate_fail",
            RunStatus::DryRun => "dry_run",
            RunStatus::TestOnly => "test_only",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
            RunStatus::RolledBack => "rolled_back",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline stage recorded in the history ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    #[serde(rename = "precheck")]
    Precheck,
    #[serde(rename = "node2_deploy")]
    SentinelDeploy,
    #[serde(rename = "node2_test")]
    SentinelGate,
    #[serde(rename = "node1_deploy")]
    ProductionDeploy,
    #[serde(rename = "node1_verify")]
    ProductionVerify,
    #[serde(rename = "rollback")]
    Rollback,
    #[serde(rename = "complete")]
    Complete,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Precheck => "precheck",
            Stage::SentinelDeploy => "node2_deploy",
            Stage::SentinelGate => "node2_test",
            Stage::ProductionDeploy => "node1_deploy",
            Stage::ProductionVerify => "node1_verify",
            Stage::Rollback => "rollback",
            Stage::Complete => "complete",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a health or regression gate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateDecision {
    /// What was checked, e.g. `node2 health`
    pub subject: String,
    pub passed: bool,
    pub message: String,
}

impl GateDecision {
    pub fn pass(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            passed: true,
            message: message.into(),
        }
    }

    pub fn fail(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            passed: false,
            message: message.into(),
        }
    }
}

/// Whether a node can stage code away from its serving directory.
///
/// Detected once per node at run start and threaded through the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagingIsolation {
    /// Sync into the staging root, validate, snapshot, then mirror into live
    Isolated,
    /// Legacy mode: sync directly in the live root
    Direct,
}

impl StagingIsolation {
    pub fn is_isolated(&self) -> bool {
        matches!(self, StagingIsolation::Isolated)
    }
}

impl fmt::Display for StagingIsolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StagingIsolation::Isolated => write!(f, "staged"),
            StagingIsolation::Direct => write!(f, "direct"),
        }
    }
}
