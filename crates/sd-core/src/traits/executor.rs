//! Remote execution trait

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ConnectivityError;

/// How commands reach a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// Direct SSH session
    Direct,
    /// Direct first, then through the configured bastion
    Tunneled,
    /// Local process on the orchestrator host
    Local,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Direct => write!(f, "direct"),
            Transport::Tunneled => write!(f, "tunneled"),
            Transport::Local => write!(f, "local"),
        }
    }
}

/// Captured result of a remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: u32,
}

impl CommandOutput {
    pub fn new(stdout: impl Into<String>, exit_status: u32) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_status,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_status == 0
    }

    /// Trimmed stdout, the usual way single-value commands are read
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Last non-empty line of stderr, falling back to stdout, for error messages
    pub fn failure_summary(&self) -> String {
        let pick = |s: &str| {
            s.lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .map(|line| line.trim().to_string())
        };
        pick(&self.stderr)
            .or_else(|| pick(&self.stdout))
            .unwrap_or_else(|| format!("exit status {}", self.exit_status))
    }
}

/// Executes shell commands on one node.
///
/// Higher layers only see this interface; which route reached the node is an
/// implementation detail chosen at construction.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Name of the node this executor targets
    fn node_name(&self) -> &str;

    /// Route chosen for this node
    fn transport(&self) -> Transport;

    /// Run `command` and capture its output.
    ///
    /// A non-zero exit status is returned as output, not as an error; errors
    /// mean the node could not be reached or the deadline passed.
    async fn execute(
        &self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, ConnectivityError>;

    /// Release any cached connection
    async fn close(&self) -> Result<(), ConnectivityError> {
        Ok(())
    }
}

/// Executor shared between pipeline components
pub type SharedExecutor = Arc<dyn RemoteExecutor>;
