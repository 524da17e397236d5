//! Gate decision state machine
//!
//! ```text
//! PRECHECK -> SENTINEL_DEPLOY -> SENTINEL_GATE -+-> PRODUCTION_DEPLOY -> PRODUCTION_VERIFY -> SUCCESS
//!                                               |                              |
//!                                               +-> GATE_FAIL                  +-> ROLLED_BACK
//!                                               +-> DRY_RUN / TEST_ONLY
//! ```
//!
//! Production is only mutated after the sentinel passed both gates, unless
//! the operator asked for the emergency bypass, which is recorded on every
//! history entry of the run. A pre-flight failure ends the invocation before
//! a run exists, so nothing is written to history.

mod options;
mod recorder;

pub use options::DeployOptions;

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use sd_core::config::DeployConfig;
use sd_core::traits::{SharedExecutor, Transport};
use sd_core::types::short_commit;
use sd_core::{DeployError, NodeRole, ReleaseCandidate, RunStatus, Stage, StagingIsolation};

use crate::drift::DriftDetector;
use crate::health::{health_check, smoke_check};
use crate::history::{EntryStatus, History, HistoryEntry};
use crate::node::{Connector, Node, SshConnector};
use crate::preflight::Preflight;
use crate::regression::regression_test;
use crate::reload::hot_reload;
use crate::rollback::{resolve_target, rollback, RollbackTarget};
use crate::state::DeploymentRun;
use crate::swap::{stage_and_swap, SwapOutcome};
use crate::sync;

use recorder::{RunRecorder, Verdict};

/// One node's view in `status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    pub name: String,
    pub role: NodeRole,
    pub address: String,
    pub transport: Option<Transport>,
    pub isolation: Option<StagingIsolation>,
    pub live_commit: Option<String>,
    pub healthy: bool,
    pub error: Option<String>,
}

/// Snapshot of the deployment state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub last_success: Option<String>,
    pub last_run: Option<HistoryEntry>,
    pub nodes: Vec<NodeStatus>,
}

/// Result of swapping one node, with the follow-up steps
struct NodeDeploy {
    swap: SwapOutcome,
    rebuilt: bool,
    reloaded: bool,
}

/// Drives deployments, rollbacks and status queries for one configuration
pub struct Pipeline {
    config: DeployConfig,
    history: History,
    connector: Arc<dyn Connector>,
    preflight: Box<dyn Preflight>,
    http: reqwest::Client,
}

impl Pipeline {
    pub fn new(config: DeployConfig, connector: Arc<dyn Connector>, preflight: Box<dyn Preflight>) -> Self {
        let history = History::from_config(&config);
        Self {
            config,
            history,
            connector,
            preflight,
            http: reqwest::Client::new(),
        }
    }

    /// Pipeline reaching nodes over SSH (or locally) as configured
    pub fn with_ssh(config: DeployConfig, preflight: Box<dyn Preflight>) -> Self {
        let connector = Arc::new(SshConnector::new(config.clone()));
        Self::new(config, connector, preflight)
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    async fn open_node(
        &self,
        role: NodeRole,
        opened: &mut Vec<SharedExecutor>,
    ) -> Result<Node, DeployError> {
        let profile = self.config.node(role).clone();
        let executor = self.connector.connect(&profile)?;
        opened.push(Arc::clone(&executor));
        Node::open(role, profile, executor, self.config.command_timeout).await
    }

    async fn close_all(opened: Vec<SharedExecutor>) {
        for executor in opened {
            if let Err(e) = executor.close().await {
                tracing::debug!("Closing {} failed: {}", executor.node_name(), e);
            }
        }
    }

    /// Run the gated deployment.
    ///
    /// `Err` means the run never started (bad flags or pre-flight failure).
    /// Every started run returns its record, whatever its terminal status.
    pub async fn deploy(&self, options: &DeployOptions) -> Result<DeploymentRun, DeployError> {
        options.validate()?;
        let started_at = Utc::now();
        let non_interactive = options.non_interactive || self.config.non_interactive;

        tracing::info!("PRECHECK");
        let candidate = self.preflight.check(non_interactive)?;

        let id = self.history.fresh_deploy_id(started_at)?;
        let mut run = DeploymentRun::new(id, Some(candidate.clone()), started_at);
        run.bypass = options.skip_sentinel;
        let mut recorder = RunRecorder::new(&self.history, run);
        tracing::info!(
            "Deployment {} of {} ({})",
            recorder.run.id,
            candidate.short_commit(),
            candidate.branch
        );
        recorder.record(
            Stage::Precheck,
            EntryStatus::Passed,
            format!("pre-flight passed for {} on {}", candidate.short_commit(), candidate.branch),
        );

        let mut opened = Vec::new();
        let verdict = self.drive(&mut recorder, &candidate, options, &mut opened).await;
        Self::close_all(opened).await;

        let run = recorder.finish(verdict);
        tracing::info!("Deployment {} finished: {}", run.id, run.status);
        Ok(run)
    }

    async fn drive(
        &self,
        recorder: &mut RunRecorder<'_>,
        candidate: &ReleaseCandidate,
        options: &DeployOptions,
        opened: &mut Vec<SharedExecutor>,
    ) -> Verdict {
        if options.skip_sentinel {
            tracing::warn!("EMERGENCY BYPASS: promoting to production without the sentinel gate");
            recorder.record(
                Stage::SentinelDeploy,
                EntryStatus::Skipped,
                "emergency bypass: sentinel deploy and gate skipped",
            );
        } else {
            let sentinel = match self.open_node(NodeRole::Sentinel, opened).await {
                Ok(node) => node,
                Err(e) => return Verdict::failed(Stage::SentinelDeploy, e),
            };
            if let Some(verdict) = self.sentinel_stage(recorder, &sentinel, candidate, options).await {
                return verdict;
            }
        }

        let production = match self.open_node(NodeRole::Production, opened).await {
            Ok(node) => node,
            Err(e) => return Verdict::failed(Stage::ProductionDeploy, e),
        };
        self.production_stage(recorder, &production, candidate).await
    }

    /// SENTINEL_DEPLOY and SENTINEL_GATE. `Some` ends the run.
    async fn sentinel_stage(
        &self,
        recorder: &mut RunRecorder<'_>,
        sentinel: &Node,
        candidate: &ReleaseCandidate,
        options: &DeployOptions,
    ) -> Option<Verdict> {
        let result = recorder.run.node_mut(sentinel.name(), NodeRole::Sentinel);
        result.isolation = Some(sentinel.isolation());

        tracing::info!("SENTINEL_DEPLOY on {}", sentinel.name());
        if options.stops_at_gate() {
            let message = match self.plan(sentinel).await {
                Ok(plan) => plan,
                Err(e) => return Some(Verdict::failed(Stage::SentinelDeploy, e)),
            };
            tracing::info!("{}", message);
            recorder.record(Stage::SentinelDeploy, EntryStatus::Skipped, message);
        } else {
            let deployed = match self.deploy_node(sentinel, None).await {
                Ok(deployed) => deployed,
                Err(e) => return Some(Verdict::failed(Stage::SentinelDeploy, e)),
            };
            let result = recorder.run.node_mut(sentinel.name(), NodeRole::Sentinel);
            result.previous_commit = deployed.swap.previous_commit.clone();
            result.deployed_commit = Some(deployed.swap.commit.clone());
            result.rebuilt = deployed.rebuilt;
            result.reloaded = deployed.reloaded;

            if let Err(e) = sync::check_commit(sentinel, &deployed.swap.commit, &candidate.commit) {
                tracing::warn!("{}", e);
                recorder.record(Stage::SentinelDeploy, EntryStatus::Warning, e.to_string());
            }
            recorder.record(
                Stage::SentinelDeploy,
                EntryStatus::Passed,
                format!("{} now at {}", sentinel.name(), short_commit(&deployed.swap.commit)),
            );
        }

        tracing::info!("SENTINEL_GATE on {}", sentinel.name());
        let health = health_check(&self.http, sentinel.profile(), &self.config.health).await;
        recorder.run.node_mut(sentinel.name(), NodeRole::Sentinel).healthy = Some(health.passed);
        recorder.run.gates.push(health.clone());
        if !health.passed {
            let error = DeployError::HealthCheck {
                node: sentinel.name().to_string(),
                message: health.message,
            };
            return Some(Verdict::error(RunStatus::GateFail, Stage::SentinelGate, error));
        }

        let categories = options
            .categories
            .clone()
            .unwrap_or_else(|| self.config.regression.categories.clone());
        let parallel = options.parallel || self.config.regression.parallel;
        let report = regression_test(sentinel, &self.config, &categories, parallel).await;
        let decision = report.decision();
        recorder.run.gates.push(decision.clone());
        if let Some(error) = report.into_error() {
            return Some(Verdict::error(RunStatus::GateFail, Stage::SentinelGate, error));
        }
        recorder.record(
            Stage::SentinelGate,
            EntryStatus::Passed,
            format!("health passed, regression {}", decision.message),
        );

        if options.dry_run {
            return Some(Verdict::new(
                RunStatus::DryRun,
                Stage::Complete,
                "dry run: sentinel gate passed, no node modified",
            ));
        }
        if options.test_only {
            return Some(Verdict::new(
                RunStatus::TestOnly,
                Stage::Complete,
                "test only: sentinel gate passed, production untouched",
            ));
        }
        None
    }

    /// PRODUCTION_DEPLOY and PRODUCTION_VERIFY
    async fn production_stage(
        &self,
        recorder: &mut RunRecorder<'_>,
        production: &Node,
        candidate: &ReleaseCandidate,
    ) -> Verdict {
        tracing::info!("PRODUCTION_DEPLOY on {}", production.name());
        recorder.run.node_mut(production.name(), NodeRole::Production).isolation =
            Some(production.isolation());

        let before = health_check(&self.http, production.profile(), &self.config.health).await;
        if !before.passed {
            tracing::warn!("{} unhealthy before deploy: {}", production.name(), before.message);
            recorder.record(
                Stage::ProductionDeploy,
                EntryStatus::Warning,
                format!("unhealthy before deploy: {}", before.message),
            );
        }

        // The branch tip production will sync to must be exactly what the sentinel gated.
        let tip = match sync::remote_tip(production, self.sync_dir(production), &self.config.branch).await {
            Ok(tip) => tip,
            Err(e) => return Verdict::failed(Stage::ProductionDeploy, e),
        };
        if let Err(e) = sync::check_commit(production, &tip, &candidate.commit) {
            return Verdict::failed(Stage::ProductionDeploy, e);
        }

        let deployed = match self.deploy_node(production, Some(&candidate.commit)).await {
            Ok(deployed) => deployed,
            Err(e) => return Verdict::failed(Stage::ProductionDeploy, e),
        };
        let result = recorder.run.node_mut(production.name(), NodeRole::Production);
        result.previous_commit = deployed.swap.previous_commit.clone();
        result.deployed_commit = Some(deployed.swap.commit.clone());
        result.rebuilt = deployed.rebuilt;
        result.reloaded = deployed.reloaded;
        if !deployed.reloaded {
            let error = DeployError::ReloadTimeout {
                node: production.name().to_string(),
                attempts: self.config.reload.attempts,
            };
            return Verdict::failed(Stage::ProductionDeploy, error);
        }
        recorder.record(
            Stage::ProductionDeploy,
            EntryStatus::Passed,
            format!("{} now at {}", production.name(), short_commit(&deployed.swap.commit)),
        );

        tracing::info!("PRODUCTION_VERIFY on {}", production.name());
        let verify = health_check(&self.http, production.profile(), &self.config.health).await;
        recorder.run.gates.push(verify.clone());
        recorder.run.node_mut(production.name(), NodeRole::Production).healthy = Some(verify.passed);

        if verify.passed {
            self.promote(recorder, production, &deployed.swap.commit).await
        } else {
            recorder.record(Stage::ProductionVerify, EntryStatus::Failed, verify.message.clone());
            let health_error = DeployError::HealthCheck {
                node: production.name().to_string(),
                message: verify.message,
            };
            self.auto_rollback(recorder, production, &deployed.swap, health_error).await
        }
    }

    async fn promote(&self, recorder: &mut RunRecorder<'_>, production: &Node, commit: &str) -> Verdict {
        if let Err(e) = self.history.set_last_success(commit) {
            tracing::error!("Could not advance last-success pointer: {}", e);
            recorder.record(Stage::ProductionVerify, EntryStatus::Warning, e.to_string());
        }
        recorder.record(Stage::ProductionVerify, EntryStatus::Passed, "production healthy");

        if let Some(path) = &self.config.smoke.path {
            let smoke = smoke_check(
                &self.http,
                production.profile(),
                path,
                self.config.health.attempt_timeout,
            )
            .await;
            if !smoke.passed {
                tracing::warn!("Smoke check failed (not gating): {}", smoke.message);
                recorder.record(Stage::ProductionVerify, EntryStatus::Warning, smoke.message.clone());
            }
            recorder.run.gates.push(smoke);
        }

        Verdict::new(
            RunStatus::Success,
            Stage::Complete,
            format!("{} deployed to production", short_commit(commit)),
        )
    }

    async fn auto_rollback(
        &self,
        recorder: &mut RunRecorder<'_>,
        production: &Node,
        swap: &SwapOutcome,
        health_error: DeployError,
    ) -> Verdict {
        tracing::error!("{}", health_error);
        let target = match &swap.previous_commit {
            Some(previous) => RollbackTarget::explicit(previous.clone()),
            None => match resolve_target(None, &self.history) {
                Ok(target) => target,
                Err(e) => {
                    let error = DeployError::Rollback {
                        node: production.name().to_string(),
                        message: e.to_string(),
                    };
                    return Verdict::failed(Stage::Rollback, error);
                }
            },
        };

        match rollback(production, &target, &self.config, &self.http).await {
            Ok(outcome) => {
                let result = recorder.run.node_mut(production.name(), NodeRole::Production);
                result.deployed_commit = Some(outcome.commit.clone());
                result.rebuilt |= outcome.rebuilt;
                result.healthy = Some(true);
                Verdict::new(
                    RunStatus::RolledBack,
                    Stage::Rollback,
                    format!("production restored to {}", short_commit(&outcome.commit)),
                )
                .with_error(health_error)
            }
            Err(e) => {
                recorder.run.node_mut(production.name(), NodeRole::Production).healthy = Some(false);
                Verdict::failed(Stage::Rollback, e)
            }
        }
    }

    /// Swap, drift check and reload on one node
    async fn deploy_node(&self, node: &Node, expected: Option<&str>) -> Result<NodeDeploy, DeployError> {
        let drift = DriftDetector::capture(node, &self.config.compose_files).await?;
        let swap = stage_and_swap(node, &self.config, expected).await?;
        let rebuilt = drift.detect_and_rebuild(node, &self.config.rebuild_command).await?;
        if rebuilt {
            tracing::info!("{}: containers rebuilt after drift", node.name());
        }
        let reloaded = hot_reload(&self.http, node.profile(), &self.config.reload).await;
        Ok(NodeDeploy {
            swap,
            rebuilt,
            reloaded,
        })
    }

    /// Checkout a node syncs: staging when isolated, else live
    fn sync_dir<'n>(&self, node: &'n Node) -> &'n str {
        match (node.isolation(), &node.profile().staging_root) {
            (StagingIsolation::Isolated, Some(staging)) => staging,
            _ => node.live_root(),
        }
    }

    /// What a deploy would change on `node`, read without mutating anything
    async fn plan(&self, node: &Node) -> Result<String, DeployError> {
        let live = node.live_commit().await?;
        let tip = sync::remote_tip(node, self.sync_dir(node), &self.config.branch).await?;
        let live = live.as_deref().map(short_commit).unwrap_or("unknown");
        Ok(if live == short_commit(&tip) {
            format!("{} already at {}; no sync (gate only)", node.name(), live)
        } else {
            format!(
                "{} would move {} -> {}; skipped (gate only)",
                node.name(),
                live,
                short_commit(&tip)
            )
        })
    }

    /// Standalone rollback of one node.
    ///
    /// The target is resolved before any node is contacted. A production
    /// rollback moves the last-success pointer to the restored commit.
    pub async fn rollback(&self, role: NodeRole, target: Option<&str>) -> Result<DeploymentRun, DeployError> {
        let target = resolve_target(target, &self.history)?;
        let started_at = Utc::now();
        let id = self.history.fresh_deploy_id(started_at)?;
        let mut recorder =
            RunRecorder::new(&self.history, DeploymentRun::new(id, None, started_at)).with_commit(&target.commit);

        let mut opened = Vec::new();
        let verdict = match self.open_node(role, &mut opened).await {
            Ok(node) => {
                let result = recorder.run.node_mut(node.name(), role);
                result.isolation = Some(node.isolation());
                result.previous_commit = node.live_commit().await.ok().flatten();

                match rollback(&node, &target, &self.config, &self.http).await {
                    Ok(outcome) => {
                        let result = recorder.run.node_mut(node.name(), role);
                        result.deployed_commit = Some(outcome.commit.clone());
                        result.rebuilt = outcome.rebuilt;
                        result.healthy = Some(true);
                        if role == NodeRole::Production {
                            if let Err(e) = self.history.set_last_success(&outcome.commit) {
                                tracing::error!("Could not move last-success pointer: {}", e);
                            }
                        }
                        Verdict::new(
                            RunStatus::RolledBack,
                            Stage::Rollback,
                            format!("{} restored to {}", node.name(), short_commit(&outcome.commit)),
                        )
                    }
                    Err(e) => Verdict::failed(Stage::Rollback, e),
                }
            }
            Err(e) => Verdict::failed(Stage::Rollback, e),
        };
        Self::close_all(opened).await;

        Ok(recorder.finish(verdict))
    }

    /// Last-success pointer, latest run, and a read-only probe of both nodes
    pub async fn status(&self) -> Result<StatusReport, DeployError> {
        let last_success = self.history.last_success()?;
        let last_run = self.history.entries()?.pop();

        let mut nodes = Vec::new();
        let mut opened = Vec::new();
        for role in [NodeRole::Sentinel, NodeRole::Production] {
            let profile = self.config.node(role);
            let mut status = NodeStatus {
                name: profile.name.clone(),
                role,
                address: profile.address.clone(),
                transport: None,
                isolation: None,
                live_commit: None,
                healthy: false,
                error: None,
            };
            match self.open_node(role, &mut opened).await {
                Ok(node) => {
                    status.transport = Some(node.executor().transport());
                    status.isolation = Some(node.isolation());
                    match node.live_commit().await {
                        Ok(commit) => status.live_commit = commit,
                        Err(e) => status.error = Some(e.to_string()),
                    }
                }
                Err(e) => status.error = Some(e.to_string()),
            }
            status.healthy = health_check(&self.http, profile, &self.config.health).await.passed;
            nodes.push(status);
        }
        Self::close_all(opened).await;

        Ok(StatusReport {
            last_success,
            last_run,
            nodes,
        })
    }
}
