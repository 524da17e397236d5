//! Deployment run record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sd_core::time::elapsed_secs;
use sd_core::{DeployError, GateDecision, NodeRole, ReleaseCandidate, RunStatus, Stage, StagingIsolation};

/// What happened on one node during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
    pub node: String,
    pub role: NodeRole,
    pub isolation: Option<StagingIsolation>,
    /// Commit live before the swap
    pub previous_commit: Option<String>,
    /// Commit live after the swap
    pub deployed_commit: Option<String>,
    pub rebuilt: bool,
    pub reloaded: bool,
    pub healthy: Option<bool>,
}

impl NodeResult {
    pub fn new(node: impl Into<String>, role: NodeRole) -> Self {
        Self {
            node: node.into(),
            role,
            isolation: None,
            previous_commit: None,
            deployed_commit: None,
            rebuilt: false,
            reloaded: false,
            healthy: None,
        }
    }
}

/// Error recorded in a report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    pub kind: String,
    pub message: String,
    pub stage: Stage,
}

/// One invocation of the pipeline (or of a standalone rollback)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRun {
    pub id: String,
    pub candidate: Option<ReleaseCandidate>,
    pub status: RunStatus,
    /// The sentinel gate was skipped by the operator
    #[serde(default)]
    pub bypass: bool,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<f64>,
    pub nodes: Vec<NodeResult>,
    pub gates: Vec<GateDecision>,
    pub error: Option<RunError>,
}

impl DeploymentRun {
    pub fn new(id: impl Into<String>, candidate: Option<ReleaseCandidate>, started_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            candidate,
            status: RunStatus::Pending,
            bypass: false,
            started_at,
            ended_at: None,
            duration_secs: None,
            nodes: Vec::new(),
            gates: Vec::new(),
            error: None,
        }
    }

    pub fn commit(&self) -> Option<&str> {
        self.candidate.as_ref().map(|c| c.commit.as_str())
    }

    /// Result slot for a node, created on first use
    pub fn node_mut(&mut self, node: &str, role: NodeRole) -> &mut NodeResult {
        let index = match self.nodes.iter().position(|n| n.node == node) {
            Some(index) => index,
            None => {
                self.nodes.push(NodeResult::new(node, role));
                self.nodes.len() - 1
            }
        };
        &mut self.nodes[index]
    }

    pub fn node(&self, role: NodeRole) -> Option<&NodeResult> {
        self.nodes.iter().find(|n| n.role == role)
    }

    /// Set the single terminal status. Later calls are ignored.
    pub fn finish(&mut self, status: RunStatus, ended_at: DateTime<Utc>) {
        if self.status.is_terminal() {
            tracing::warn!(
                deploy_id = %self.id,
                "run already ended as {}, ignoring {}",
                self.status,
                status
            );
            return;
        }
        self.status = status;
        self.ended_at = Some(ended_at);
        self.duration_secs = Some(elapsed_secs(self.started_at, ended_at));
    }

    pub fn record_error(&mut self, stage: Stage, error: &DeployError) {
        self.error = Some(RunError {
            kind: error.kind().to_string(),
            message: error.to_string(),
            stage,
        });
    }

    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exactly_one_terminal_status() {
        let mut run = DeploymentRun::new("r1", None, Utc::now());
        assert_eq!(run.status, RunStatus::Pending);

        run.finish(RunStatus::GateFail, Utc::now());
        run.finish(RunStatus::Success, Utc::now());

        assert_eq!(run.status, RunStatus::GateFail);
        assert_eq!(run.exit_code(), 1);
        assert!(run.duration_secs.is_some());
    }

    #[test]
    fn test_node_slots_reused() {
        let mut run = DeploymentRun::new("r1", None, Utc::now());
        run.node_mut("node2", NodeRole::Sentinel).rebuilt = true;
        run.node_mut("node2", NodeRole::Sentinel).reloaded = true;

        assert_eq!(run.nodes.len(), 1);
        let sentinel = run.node(NodeRole::Sentinel).unwrap();
        assert!(sentinel.rebuilt && sentinel.reloaded);
        assert!(run.node(NodeRole::Production).is_none());
    }

    #[test]
    fn test_report_records_error_kind() {
        let mut run = DeploymentRun::new("r1", None, Utc::now());
        let err = DeployError::RegressionTest {
            node: "node2".into(),
            failed: vec!["payment".into()],
        };
        run.record_error(Stage::SentinelGate, &err);
        let json = serde_json::to_value(&run).unwrap();
        assert_eq!(json["error"]["kind"], "regression_test_failure");
        assert_eq!(json["error"]["stage"], "node2_test");
        assert_eq!(json["status"], "pending");
    }
}
