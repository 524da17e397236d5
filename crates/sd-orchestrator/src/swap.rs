//! Staged code swap
//!
//! With staging isolation the release is synced and validated in the staging
//! root, live is snapshotted into the rollback root with a hard-link copy, and
//! only the configured application paths are mirrored into live. Without it
//! the live checkout is synced in place after the same snapshot.
//!
//! The snapshot is always taken before live is mutated.

use serde::{Deserialize, Serialize};

use sd_core::config::DeployConfig;
use sd_core::shell::{quote, quote_join};
use sd_core::types::short_commit;
use sd_core::{DeployError, StagingIsolation};

use crate::node::{stamp_marker_command, Node};
use crate::sync;

/// Result of swapping one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapOutcome {
    /// Commit live after the swap
    pub commit: String,
    /// Commit live before the swap, as recorded in the rollback snapshot
    pub previous_commit: Option<String>,
    pub isolation: StagingIsolation,
}

/// Bring `node` to the branch tip.
///
/// When `expected` is given, a synced commit other than `expected` aborts the
/// swap before live is touched (staged mode) and is an error in direct mode.
pub async fn stage_and_swap(
    node: &Node,
    config: &DeployConfig,
    expected: Option<&str>,
) -> Result<SwapOutcome, DeployError> {
    match node.isolation() {
        StagingIsolation::Isolated => staged_swap(node, config, expected).await,
        StagingIsolation::Direct => direct_swap(node, config, expected).await,
    }
}

async fn staged_swap(
    node: &Node,
    config: &DeployConfig,
    expected: Option<&str>,
) -> Result<SwapOutcome, DeployError> {
    let profile = node.profile();
    let (Some(staging), Some(rollback)) = (&profile.staging_root, &profile.rollback_root) else {
        return direct_swap(node, config, expected).await;
    };

    let commit = sync::sync_node(node, staging, &config.branch).await?;
    tracing::info!("{}: staged {} in {}", node.name(), short_commit(&commit), staging);
    if let Some(expected) = expected {
        sync::check_commit(node, &commit, expected)?;
    }

    validate(node, staging, &config.validate_command).await?;

    let previous_commit = snapshot(node, rollback).await?;

    let mirror = mirror_command(staging, node.live_root(), &config.sync_paths);
    let output = node.run(&mirror).await?;
    if !output.success() {
        return Err(DeployError::Sync {
            node: node.name().to_string(),
            message: format!("mirroring staging into live failed: {}", output.failure_summary()),
        });
    }
    stamp(node, node.live_root(), &commit).await?;

    tracing::info!(
        "{}: live {} -> {}",
        node.name(),
        previous_commit.as_deref().map(short_commit).unwrap_or("unknown"),
        short_commit(&commit)
    );
    Ok(SwapOutcome {
        commit,
        previous_commit,
        isolation: StagingIsolation::Isolated,
    })
}

async fn direct_swap(
    node: &Node,
    config: &DeployConfig,
    expected: Option<&str>,
) -> Result<SwapOutcome, DeployError> {
    let previous_commit = match &node.profile().rollback_root {
        Some(rollback) => snapshot(node, rollback).await?,
        None => {
            tracing::warn!("{}: no rollback root configured, rollback will use git", node.name());
            node.live_commit().await?
        }
    };

    let live = node.live_root();
    let commit = sync::sync_node(node, live, &config.branch).await?;
    stamp(node, live, &commit).await?;
    if let Some(expected) = expected {
        sync::check_commit(node, &commit, expected)?;
    }

    tracing::info!("{}: synced {} in place", node.name(), short_commit(&commit));
    Ok(SwapOutcome {
        commit,
        previous_commit,
        isolation: StagingIsolation::Direct,
    })
}

/// Run the remote syntax check inside `dir`
pub async fn validate(node: &Node, dir: &str, command: &str) -> Result<(), DeployError> {
    let output = node.run(&format!("cd {} && {}", quote(dir), command)).await?;
    if output.success() {
        tracing::debug!("{}: validation passed in {}", node.name(), dir);
        Ok(())
    } else {
        Err(DeployError::Validation {
            node: node.name().to_string(),
            message: output.failure_summary(),
        })
    }
}

/// Hard-link copy of live into `rollback`, stamped with the commit live now
async fn snapshot(node: &Node, rollback: &str) -> Result<Option<String>, DeployError> {
    let live = node.live_root();
    let previous = node.live_commit().await?;

    let output = node
        .run(&format!(
            "rm -rf {rb} && cp -al {live} {rb}",
            rb = quote(rollback),
            live = quote(live)
        ))
        .await?;
    if !output.success() {
        return Err(DeployError::Sync {
            node: node.name().to_string(),
            message: format!("rollback snapshot failed: {}", output.failure_summary()),
        });
    }

    if let Some(previous) = &previous {
        stamp(node, rollback, previous).await?;
    }
    tracing::info!(
        "{}: snapshot of {} taken at {}",
        node.name(),
        previous.as_deref().map(short_commit).unwrap_or("unknown commit"),
        rollback
    );
    Ok(previous)
}

pub(crate) async fn stamp(node: &Node, root: &str, commit: &str) -> Result<(), DeployError> {
    let output = node.run(&stamp_marker_command(root, commit)).await?;
    if output.success() {
        Ok(())
    } else {
        Err(DeployError::Sync {
            node: node.name().to_string(),
            message: format!("cannot record commit in {}: {}", root, output.failure_summary()),
        })
    }
}

/// Deletion-aware mirror of `paths` from `src_root` into `dst_root`.
///
/// Directories are mirrored with `rsync --delete`; a path missing from the
/// source is removed from the destination. Other paths are left alone.
pub(crate) fn mirror_command(src_root: &str, dst_root: &str, paths: &[String]) -> String {
    let steps: Vec<String> = paths
        .iter()
        .map(|path| {
            let path = path.trim_matches('/');
            let src = quote_join(src_root, path);
            let dst = quote_join(dst_root, path);
            let src_dir = quote(&format!("{}/{}/", src_root.trim_end_matches('/'), path));
            let dst_dir = quote(&format!("{}/{}/", dst_root.trim_end_matches('/'), path));
            format!(
                "if [ -d {src} ]; then mkdir -p {dst} && rsync -a --delete {src_dir} {dst_dir}; \
                 elif [ -e {src} ]; then rsync -a {src} {dst}; \
                 else rm -rf {dst}; fi"
            )
        })
        .collect();
    format!("set -e; {}", steps.join("; "))
}
