//! Deployment configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::{duration_secs, opt_duration_secs};
use super::NodeProfile;
use crate::error::ConfigError;
use crate::retry::RetryPolicy;
use crate::types::NodeRole;

/// Immutable configuration for one invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Local repository being released
    pub repo_path: PathBuf,

    /// Branch nodes sync to
    pub branch: String,

    /// Directory holding the history ledger, reports and last-success pointer
    pub state_dir: PathBuf,

    /// Fail instead of prompting (e.g. to push unpushed commits)
    pub non_interactive: bool,

    /// Local source trees checked for syntax errors during preflight
    pub source_dirs: Vec<String>,

    /// Paths (relative to the roots) mirrored from staging into live
    pub sync_paths: Vec<String>,

    /// Orchestration definition files fingerprinted for drift detection
    pub compose_files: Vec<String>,

    /// Syntax check run inside a node checkout before it goes live
    pub validate_command: String,

    /// Full container rebuild run in the live root on orchestration drift
    pub rebuild_command: String,

    /// SSH connect deadline
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Deadline for a single remote command; 0 disables
    #[serde(with = "opt_duration_secs")]
    pub command_timeout: Option<Duration>,

    /// SSH credentials
    pub ssh: SshConfig,

    /// Health gate polling
    pub health: RetryPolicy,

    /// Hot reload attempts
    pub reload: RetryPolicy,

    /// Regression gate
    pub regression: RegressionConfig,

    /// Best-effort business check after a successful promotion
    pub smoke: SmokeConfig,

    /// The two nodes
    pub nodes: NodesConfig,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            repo_path: PathBuf::from("."),
            branch: "main".to_string(),
            state_dir: PathBuf::from(".deploy"),
            non_interactive: false,
            source_dirs: vec!["backend".to_string()],
            sync_paths: vec![
                "backend".to_string(),
                "frontend".to_string(),
                "docker-compose.yml".to_string(),
            ],
            compose_files: vec!["docker-compose.yml".to_string()],
            validate_command: "python3 -m compileall -q backend".to_string(),
            rebuild_command: "docker compose up -d --build --force-recreate".to_string(),
            connect_timeout: Duration::from_secs(10),
            command_timeout: Some(Duration::from_secs(600)),
            ssh: SshConfig::default(),
            health: RetryPolicy::fixed(5, Duration::from_secs(3))
                .with_timeout(Duration::from_secs(5)),
            reload: RetryPolicy::fixed(3, Duration::from_secs(2))
                .with_timeout(Duration::from_secs(10)),
            regression: RegressionConfig::default(),
            smoke: SmokeConfig::default(),
            nodes: NodesConfig::default(),
        }
    }
}

impl DeployConfig {
    /// Profile for a role
    pub fn node(&self, role: NodeRole) -> &NodeProfile {
        match role {
            NodeRole::Sentinel => &self.nodes.sentinel,
            NodeRole::Production => &self.nodes.production,
        }
    }

    /// Path of the last-success pointer file
    pub fn last_success_path(&self) -> PathBuf {
        self.state_dir.join("last_success")
    }

    /// Path of the append-only history ledger
    pub fn history_path(&self) -> PathBuf {
        self.state_dir.join("history.jsonl")
    }

    /// Directory holding one JSON report per run
    pub fn reports_dir(&self) -> PathBuf {
        self.state_dir.join("reports")
    }

    /// Apply `SD_*` environment overrides.
    ///
    /// `lookup` abstracts `std::env::var` so precedence can be tested.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SD_REPO_PATH") {
            self.repo_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("SD_BRANCH") {
            self.branch = v;
        }
        if let Some(v) = lookup("SD_STATE_DIR") {
            self.state_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("SD_NON_INTERACTIVE") {
            self.non_interactive = parse_bool("SD_NON_INTERACTIVE", &v)?;
        }
        if let Some(v) = lookup("SD_CONNECT_TIMEOUT") {
            self.connect_timeout = Duration::from_secs(parse_u64("SD_CONNECT_TIMEOUT", &v)?);
        }
        if let Some(v) = lookup("SD_SSH_USER") {
            self.ssh.user = v;
        }
        if let Some(v) = lookup("SD_SSH_KEY") {
            self.ssh.private_key_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("SD_SSH_PASSWORD") {
            self.ssh.password = Some(v);
        }
        if let Some(v) = lookup("SD_SENTINEL_ADDRESS") {
            self.nodes.sentinel.address = v;
        }
        if let Some(v) = lookup("SD_PRODUCTION_ADDRESS") {
            self.nodes.production.address = v;
        }
        if let Some(v) = lookup("SD_REGRESSION_CATEGORIES") {
            self.regression.categories = split_list(&v);
        }
        Ok(())
    }

    /// Reject configurations the pipeline cannot run safely
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.branch.trim().is_empty() {
            return Err(ConfigError::MissingField("branch".into()));
        }
        for role in [NodeRole::Sentinel, NodeRole::Production] {
            let node = self.node(role);
            if node.address.trim().is_empty() {
                return Err(ConfigError::MissingField(format!("nodes.{role}.address")));
            }
            if node.live_root.trim().is_empty() {
                return Err(ConfigError::MissingField(format!("nodes.{role}.live_root")));
            }
            if node.staging_root.is_some() && node.rollback_root.is_none() {
                return Err(ConfigError::Invalid(format!(
                    "nodes.{role}: staging_root requires rollback_root"
                )));
            }
            if node.staging_root.as_deref() == Some(node.live_root.as_str())
                || node.rollback_root.as_deref() == Some(node.live_root.as_str())
            {
                return Err(ConfigError::Invalid(format!(
                    "nodes.{role}: staging/rollback roots must differ from live_root"
                )));
            }
        }
        if self.nodes.sentinel.name == self.nodes.production.name {
            return Err(ConfigError::Invalid(
                "sentinel and production nodes must have distinct names".into(),
            ));
        }
        if self.sync_paths.iter().any(|p| p.contains("..") || p.starts_with('/')) {
            return Err(ConfigError::Invalid(
                "sync_paths must be relative paths inside the node roots".into(),
            ));
        }
        if self.regression.categories.is_empty() {
            return Err(ConfigError::MissingField("regression.categories".into()));
        }
        for (name, policy) in [("health", &self.health), ("reload", &self.reload)] {
            policy
                .check()
                .map_err(|e| ConfigError::Invalid(format!("{name}: {e}")))?;
        }
        Ok(())
    }
}

/// SSH credentials shared by both nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// Default user for nodes without their own
    pub user: String,

    /// Pre-shared identity; tried first
    pub private_key_path: Option<PathBuf>,

    /// Credential fallback when key authentication is rejected
    #[serde(skip_serializing)]
    pub password: Option<String>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: whoami::username(),
            private_key_path: dirs::home_dir().map(|home| home.join(".ssh").join("id_ed25519")),
            password: None,
        }
    }
}

/// Where the regression harness runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegressionMode {
    /// Inside the sentinel's own runtime, through the remote channel
    Remote,
    /// From the orchestrator host against the sentinel
    Local,
}

/// Regression gate settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegressionConfig {
    /// Default categories when `--tests` is not given
    pub categories: Vec<String>,

    /// Command template; `{env}` and `{category}` are substituted
    pub command: String,

    /// Environment selector passed as `{env}`
    pub env_name: String,

    pub mode: RegressionMode,

    /// Run categories concurrently
    pub parallel: bool,

    /// Deadline per category; 0 disables
    #[serde(with = "opt_duration_secs")]
    pub timeout: Option<Duration>,
}

impl Default for RegressionConfig {
    fn default() -> Self {
        Self {
            categories: vec!["health".into(), "api".into(), "payment".into()],
            command: "docker compose exec -T backend python -m tests.regression --env {env} --category {category}"
                .to_string(),
            env_name: "node2".to_string(),
            mode: RegressionMode::Remote,
            parallel: false,
            timeout: Some(Duration::from_secs(900)),
        }
    }
}

/// Post-promotion smoke check; never gates the run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SmokeConfig {
    /// Path requested on the production node; disabled when unset
    pub path: Option<String>,
}

/// Sentinel and production profiles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodesConfig {
    pub sentinel: NodeProfile,
    pub production: NodeProfile,
}

impl Default for NodesConfig {
    fn default() -> Self {
        Self {
            sentinel: NodeProfile::new("node2", "", "/opt/app", "http://127.0.0.1:8000"),
            production: NodeProfile::new("node1", "", "/opt/app", "http://127.0.0.1:8000"),
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(ConfigError::Invalid(format!("{key}: not a boolean: {other}"))),
    }
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{key}: not a number: {value}")))
}

/// Split a comma-separated list, dropping empty items
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
