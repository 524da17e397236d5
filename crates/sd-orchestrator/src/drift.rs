//! Infrastructure drift detection
//!
//! Hot reload only picks up application code. When the orchestration
//! definition files change across a swap, the containers are rebuilt.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use sd_core::shell::quote;
use sd_core::DeployError;

use crate::node::Node;

/// SHA-256 over the concatenated orchestration files of a node's live root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeFingerprint {
    pub node: String,
    pub hash: String,
}

impl ComposeFingerprint {
    pub fn of(node: impl Into<String>, content: &[u8]) -> Self {
        Self {
            node: node.into(),
            hash: hex::encode(Sha256::digest(content)),
        }
    }
}

/// Fingerprint the live orchestration files; missing files hash as empty
pub async fn fingerprint(node: &Node, files: &[String]) -> Result<ComposeFingerprint, DeployError> {
    if files.is_empty() {
        return Ok(ComposeFingerprint::of(node.name(), b""));
    }
    let listed: Vec<String> = files.iter().map(|f| quote(f)).collect();
    let output = node
        .run(&format!(
            "cd {} && cat -- {} 2>/dev/null; true",
            quote(node.live_root()),
            listed.join(" ")
        ))
        .await?;
    Ok(ComposeFingerprint::of(node.name(), output.stdout.as_bytes()))
}

/// Fingerprint captured before a swap
pub struct DriftDetector {
    before: ComposeFingerprint,
    files: Vec<String>,
}

impl DriftDetector {
    pub async fn capture(node: &Node, files: &[String]) -> Result<Self, DeployError> {
        let before = fingerprint(node, files).await?;
        tracing::debug!("{}: compose fingerprint {}", node.name(), &before.hash[..12]);
        Ok(Self {
            before,
            files: files.to_vec(),
        })
    }

    pub fn before(&self) -> &ComposeFingerprint {
        &self.before
    }

    /// Compare with the current fingerprint and rebuild on mismatch.
    ///
    /// Returns whether a rebuild ran.
    pub async fn detect_and_rebuild(
        &self,
        node: &Node,
        rebuild_command: &str,
    ) -> Result<bool, DeployError> {
        let after = fingerprint(node, &self.files).await?;
        if after == self.before {
            tracing::info!("{}: no infrastructure drift", node.name());
            return Ok(false);
        }

        tracing::warn!(
            "{}: INFRA DRIFT detected ({} -> {}), rebuilding containers",
            node.name(),
            &self.before.hash[..12],
            &after.hash[..12]
        );
        let output = node
            .run(&format!("cd {} && {}", quote(node.live_root()), rebuild_command))
            .await?;
        if !output.success() {
            return Err(DeployError::DriftRebuild {
                node: node.name().to_string(),
                message: output.failure_summary(),
            });
        }
        tracing::info!("{}: containers rebuilt", node.name());
        Ok(true)
    }
}
