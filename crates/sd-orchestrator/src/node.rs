//! Nodes as seen by the pipeline
//!
//! A [`Node`] pairs a profile with the executor chosen for it and the
//! staging capability detected once when the node is first contacted.

use std::time::{Duration, Instant};

use sd_core::config::{DeployConfig, NodeProfile};
use sd_core::shell::{quote, quote_join};
use sd_core::traits::{CommandOutput, SharedExecutor};
use sd_core::{ConnectivityError, DeployError, NodeRole, StagingIsolation};

/// File in a root naming the commit its application paths came from
pub const COMMIT_MARKER: &str = ".deploy_commit";

/// Builds executors for node profiles
pub trait Connector: Send + Sync {
    fn connect(&self, profile: &NodeProfile) -> Result<SharedExecutor, ConnectivityError>;
}

/// Production connector: SSH (direct or through a bastion) or local
pub struct SshConnector {
    config: DeployConfig,
}

impl SshConnector {
    pub fn new(config: DeployConfig) -> Self {
        Self { config }
    }
}

impl Connector for SshConnector {
    fn connect(&self, profile: &NodeProfile) -> Result<SharedExecutor, ConnectivityError> {
        sd_remote::executor_for(profile, &self.config)
    }
}

/// A contacted node
pub struct Node {
    role: NodeRole,
    profile: NodeProfile,
    executor: SharedExecutor,
    isolation: StagingIsolation,
    command_timeout: Option<Duration>,
}

impl Node {
    /// Connect and detect the staging capability
    pub async fn open(
        role: NodeRole,
        profile: NodeProfile,
        executor: SharedExecutor,
        command_timeout: Option<Duration>,
    ) -> Result<Self, DeployError> {
        let mut node = Self {
            role,
            profile,
            executor,
            isolation: StagingIsolation::Direct,
            command_timeout,
        };
        node.isolation = node.detect_isolation().await?;
        tracing::info!(
            "{} ({}) reachable via {}, {} mode",
            node.name(),
            role,
            node.executor.transport(),
            node.isolation
        );
        Ok(node)
    }

    async fn detect_isolation(&self) -> Result<StagingIsolation, DeployError> {
        let (Some(staging), Some(_)) = (&self.profile.staging_root, &self.profile.rollback_root) else {
            return Ok(StagingIsolation::Direct);
        };

        let output = self
            .run(&format!("test -d {} && echo yes || echo no", quote(staging)))
            .await?;
        if output.stdout_trimmed() == "yes" {
            Ok(StagingIsolation::Isolated)
        } else {
            tracing::warn!(
                "{}: staging root {} missing, falling back to direct sync in {}",
                self.name(),
                staging,
                self.profile.live_root
            );
            Ok(StagingIsolation::Direct)
        }
    }

    pub fn name(&self) -> &str {
        &self.profile.name
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn profile(&self) -> &NodeProfile {
        &self.profile
    }

    pub fn isolation(&self) -> StagingIsolation {
        self.isolation
    }

    pub fn executor(&self) -> &SharedExecutor {
        &self.executor
    }

    pub fn live_root(&self) -> &str {
        &self.profile.live_root
    }

    /// Run a command with the configured per-command deadline
    pub async fn run(&self, command: &str) -> Result<CommandOutput, DeployError> {
        self.run_with_timeout(command, self.command_timeout).await
    }

    pub async fn run_with_timeout(
        &self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, DeployError> {
        let started = Instant::now();
        let output = self.executor.execute(command, timeout).await?;
        tracing::debug!(
            node = %self.name(),
            transport = %self.executor.transport(),
            exit_status = output.exit_status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "{}",
            command
        );
        Ok(output)
    }

    /// Commit currently live in `root`: the marker when present, else the checkout's HEAD
    pub async fn commit_in(&self, root: &str) -> Result<Option<String>, DeployError> {
        let command = format!(
            "cat {} 2>/dev/null || git -C {} rev-parse HEAD 2>/dev/null",
            quote_join(root, COMMIT_MARKER),
            quote(root)
        );
        let output = self.run(&command).await?;
        let commit = output.stdout_trimmed();
        Ok((output.success() && !commit.is_empty()).then(|| commit.to_string()))
    }

    pub async fn live_commit(&self) -> Result<Option<String>, DeployError> {
        self.commit_in(self.live_root()).await
    }

    /// Release the executor's connection; failures are only logged
    pub async fn close(&self) {
        if let Err(e) = self.executor.close().await {
            tracing::debug!("Closing {} failed: {}", self.name(), e);
        }
    }
}

/// Command that replaces `root`'s commit marker without writing through hard links
pub(crate) fn stamp_marker_command(root: &str, commit: &str) -> String {
    let marker = quote_join(root, COMMIT_MARKER);
    let tmp = quote_join(root, &format!("{COMMIT_MARKER}.tmp"));
    format!(
        "printf '%s\\n' {} > {} && mv -f {} {}",
        quote(commit),
        tmp,
        tmp,
        marker
    )
}
