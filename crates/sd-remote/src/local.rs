//! Local executor for a node that is the orchestrator host itself

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;

use sd_core::traits::{CommandOutput, RemoteExecutor, Transport};
use sd_core::ConnectivityError;

/// Exit status reported when the process was killed by a signal
const SIGNALLED_EXIT_STATUS: u32 = 255;

/// Runs commands through `sh -c` on this machine
pub struct LocalExecutor {
    node: String,
}

impl LocalExecutor {
    pub fn new(node: impl Into<String>) -> Self {
        Self { node: node.into() }
    }
}

#[async_trait]
impl RemoteExecutor for LocalExecutor {
    fn node_name(&self) -> &str {
        &self.node
    }

    fn transport(&self) -> Transport {
        Transport::Local
    }

    async fn execute(
        &self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, ConnectivityError> {
        let started = Instant::now();
        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ConnectivityError::Spawn {
                node: self.node.clone(),
                message: e.to_string(),
            })?;

        let output = match timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| ConnectivityError::Timeout {
                    node: self.node.clone(),
                    after: limit,
                })?,
            None => child.wait_with_output().await,
        }
        .map_err(|e| ConnectivityError::Spawn {
            node: self.node.clone(),
            message: e.to_string(),
        })?;

        let exit_status = output
            .status
            .code()
            .and_then(|c| u32::try_from(c).ok())
            .unwrap_or(SIGNALLED_EXIT_STATUS);

        tracing::debug!(
            node = %self.node,
            transport = "local",
            exit_status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "command finished"
        );

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_captures_stdout_and_status() {
        let executor = LocalExecutor::new("node1");
        let output = executor.execute("echo hello", None).await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout_trimmed(), "hello");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_not_an_error() {
        let executor = LocalExecutor::new("node1");
        let output = executor
            .execute("echo boom >&2; exit 3", None)
            .await
            .unwrap();
        assert_eq!(output.exit_status, 3);
        assert_eq!(output.failure_summary(), "boom");
    }

    #[tokio::test]
    async fn test_timeout_is_connectivity_error() {
        let executor = LocalExecutor::new("node1");
        let err = executor
            .execute("sleep 5", Some(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectivityError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_runs_in_given_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker"), "abc123\n").unwrap();
        let executor = LocalExecutor::new("node1");
        let command = format!("cat {}/marker", dir.path().display());
        let output = executor.execute(&command, None).await.unwrap();
        assert_eq!(output.stdout_trimmed(), "abc123");
    }
}
