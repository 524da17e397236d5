//! Rollback operator
//!
//! Restores a node to an earlier commit. The rollback snapshot is used when it
//! holds the wanted commit (fast path); otherwise the live checkout is reset
//! with git. Either way the node is hot-reloaded and must pass the health gate.

use serde::{Deserialize, Serialize};

use sd_core::config::DeployConfig;
use sd_core::shell::{quote, quote_join};
use sd_core::types::short_commit;
use sd_core::{DeployError, StagingIsolation};

use crate::drift::DriftDetector;
use crate::health::health_check;
use crate::history::History;
use crate::node::{Node, COMMIT_MARKER};
use crate::reload::hot_reload;
use crate::swap::{mirror_command, stamp};

/// Commit to restore
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackTarget {
    pub commit: String,
    /// Given by the operator (or the pipeline) rather than read from the pointer
    pub explicit: bool,
}

impl RollbackTarget {
    pub fn explicit(commit: impl Into<String>) -> Self {
        Self {
            commit: commit.into(),
            explicit: true,
        }
    }
}

/// How the node was restored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackPath {
    /// Mirrored back from the rollback snapshot
    Snapshot,
    /// `git reset --hard` in the live checkout
    Git,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackOutcome {
    pub commit: String,
    pub path: RollbackPath,
    pub rebuilt: bool,
}

/// Pick the rollback target without contacting any node
pub fn resolve_target(explicit: Option<&str>, history: &History) -> Result<RollbackTarget, DeployError> {
    if let Some(commit) = explicit.map(str::trim).filter(|c| !c.is_empty()) {
        return Ok(RollbackTarget::explicit(commit));
    }
    match history.last_success()? {
        Some(commit) => Ok(RollbackTarget {
            commit,
            explicit: false,
        }),
        None => Err(DeployError::NoRollbackTarget),
    }
}

/// Restore `node` to `target`, then reload and re-verify health.
///
/// Any failure is reported as [`DeployError::Rollback`].
pub async fn rollback(
    node: &Node,
    target: &RollbackTarget,
    config: &DeployConfig,
    http: &reqwest::Client,
) -> Result<RollbackOutcome, DeployError> {
    tracing::warn!(
        "{}: rolling back to {}",
        node.name(),
        short_commit(&target.commit)
    );
    restore_and_verify(node, target, config, http)
        .await
        .map_err(|e| match e {
            DeployError::Rollback { .. } => e,
            other => DeployError::Rollback {
                node: node.name().to_string(),
                message: other.to_string(),
            },
        })
}

async fn restore_and_verify(
    node: &Node,
    target: &RollbackTarget,
    config: &DeployConfig,
    http: &reqwest::Client,
) -> Result<RollbackOutcome, DeployError> {
    let drift = DriftDetector::capture(node, &config.compose_files).await?;
    let live = node.live_root();

    let (path, commit) = match snapshot(node).await? {
        Some((rollback_root, snapshot)) if !target.explicit || snapshot == target.commit => {
            tracing::info!(
                "{}: restoring {} from {}",
                node.name(),
                short_commit(&snapshot),
                rollback_root
            );
            let output = node
                .run(&mirror_command(&rollback_root, live, &config.sync_paths))
                .await?;
            if !output.success() {
                return Err(rollback_error(
                    node,
                    format!("restore from snapshot failed: {}", output.failure_summary()),
                ));
            }
            if node.isolation() == StagingIsolation::Direct {
                // Live is the checkout itself; the next sync must start from the restored commit.
                reset_checkout(node, &snapshot, false).await?;
            }
            stamp(node, live, &snapshot).await?;
            (RollbackPath::Snapshot, snapshot)
        }
        _ => {
            tracing::info!(
                "{}: no usable snapshot for {}, resetting checkout",
                node.name(),
                short_commit(&target.commit)
            );
            reset_checkout(node, &target.commit, true).await?;
            stamp(node, live, &target.commit).await?;
            (RollbackPath::Git, target.commit.clone())
        }
    };

    let rebuilt = drift.detect_and_rebuild(node, &config.rebuild_command).await?;

    if !hot_reload(http, node.profile(), &config.reload).await {
        tracing::warn!("{}: reload after rollback not acknowledged", node.name());
    }

    let decision = health_check(http, node.profile(), &config.health).await;
    if !decision.passed {
        return Err(rollback_error(node, format!("node unhealthy after rollback: {}", decision.message)));
    }

    tracing::info!("{}: rolled back to {}", node.name(), short_commit(&commit));
    Ok(RollbackOutcome {
        commit,
        path,
        rebuilt,
    })
}

/// `git reset --hard` the live checkout to `commit`.
///
/// Without `fetch` the commit is first looked up locally, and origin is only
/// fetched when the checkout does not have it.
async fn reset_checkout(node: &Node, commit: &str, fetch: bool) -> Result<(), DeployError> {
    let cd = format!("cd {}", quote(node.live_root()));
    let commit_q = quote(commit);

    if !fetch {
        let output = node.run(&format!("{cd} && git reset --hard {commit_q}")).await?;
        if output.success() {
            return Ok(());
        }
        tracing::debug!(
            "{}: {} not in the live checkout, fetching",
            node.name(),
            short_commit(commit)
        );
    }

    let output = node
        .run(&format!("{cd} && git fetch origin && git reset --hard {commit_q}"))
        .await?;
    if output.success() {
        Ok(())
    } else {
        Err(rollback_error(
            node,
            format!("git reset failed: {}", output.failure_summary()),
        ))
    }
}

/// Rollback root and the commit its snapshot holds, if one exists
async fn snapshot(node: &Node) -> Result<Option<(String, String)>, DeployError> {
    let Some(root) = &node.profile().rollback_root else {
        return Ok(None);
    };
    let output = node
        .run(&format!("cat {} 2>/dev/null", quote_join(root, COMMIT_MARKER)))
        .await?;
    let commit = output.stdout_trimmed();
    Ok((output.success() && !commit.is_empty()).then(|| (root.clone(), commit.to_string())))
}

fn rollback_error(node: &Node, message: String) -> DeployError {
    DeployError::Rollback {
        node: node.name().to_string(),
        message,
    }
}
