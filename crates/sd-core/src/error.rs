//! Error taxonomy for sentinel-deploy

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Maximum number of offending files listed in a syntax preflight failure
pub const MAX_LISTED_SYNTAX_ERRORS: usize = 10;

/// Top-level error type for a deployment run
#[derive(Error, Debug)]
pub enum DeployError {
    /// Local repository checks failed before any node was contacted
    #[error("Preflight failed: {0}")]
    Preflight(#[from] PreflightError),

    /// A node could not be reached
    #[error("Connectivity error: {0}")]
    Connectivity(#[from] ConnectivityError),

    /// fetch/pull/reset failed, or the node is not at the expected commit
    #[error("Sync failed on {node}: {message}")]
    Sync { node: String, message: String },

    /// Remote syntax validation failed
    #[error("Validation failed on {node}: {message}")]
    Validation { node: String, message: String },

    /// Container rebuild after an orchestration change failed
    #[error("Container rebuild failed on {node}: {message}")]
    DriftRebuild { node: String, message: String },

    /// Hot reload was not acknowledged
    #[error("Hot reload not acknowledged by {node} after {attempts} attempts")]
    ReloadTimeout { node: String, attempts: u32 },

    /// Health gate did not pass
    #[error("Health check failed on {node}: {message}")]
    HealthCheck { node: String, message: String },

    /// Regression gate did not pass
    #[error("Regression tests failed on {node}: {}", .failed.join(", "))]
    RegressionTest { node: String, failed: Vec<String> },

    /// Rollback could not restore the node
    #[error("ROLLBACK FAILED on {node}: {message} (node state unknown, manual intervention required)")]
    Rollback { node: String, message: String },

    /// No rollback target is known
    #[error("No rollback target: no explicit commit given and no last successful deployment recorded")]
    NoRollbackTarget,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// History ledger could not be read or written
    #[error("History ledger error: {0}")]
    History(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeployError {
    /// Soft errors are logged as warnings and do not abort the pipeline
    /// unless the caller escalates them.
    pub fn is_soft(&self) -> bool {
        matches!(self, DeployError::ReloadTimeout { .. })
    }

    /// Stable, machine-readable class name used in run reports
    pub fn kind(&self) -> &'static str {
        match self {
            DeployError::Preflight(_) => "preflight_error",
            DeployError::Connectivity(_) => "connectivity_error",
            DeployError::Sync { .. } => "sync_error",
            DeployError::Validation { .. } => "validation_error",
            DeployError::DriftRebuild { .. } => "drift_rebuild_error",
            DeployError::ReloadTimeout { .. } => "reload_timeout_error",
            DeployError::HealthCheck { .. } => "health_check_failure",
            DeployError::RegressionTest { .. } => "regression_test_failure",
            DeployError::Rollback { .. } => "rollback_failure",
            DeployError::NoRollbackTarget => "no_rollback_target",
            DeployError::Config(_) => "config_error",
            DeployError::History(_) => "history_error",
            DeployError::Io(_) => "io_error",
        }
    }
}

/// Local repository problems found before a run starts
#[derive(Error, Debug)]
pub enum PreflightError {
    /// Uncommitted changes in the working tree
    #[error("working tree has {} uncommitted change(s): {}", .0.len(), .0.join(", "))]
    DirtyTree(Vec<String>),

    /// Local commits not yet on the remote
    #[error("{0} unpushed commit(s) on the current branch")]
    UnpushedCommits(usize),

    /// Local branch is not the one nodes deploy from
    #[error("on branch '{actual}' but nodes deploy '{expected}'")]
    WrongBranch { expected: String, actual: String },

    /// Interactive push of unpushed commits failed or was declined
    #[error("push to origin failed: {0}")]
    PushFailed(String),

    /// HEAD is not on a branch
    #[error("HEAD is detached; check out a branch before deploying")]
    DetachedHead,

    /// Static syntax validation failed
    #[error("syntax errors in {total} file(s): {}", list_files(.files))]
    SyntaxErrors { files: Vec<String>, total: usize },

    /// A local git command could not be run
    #[error("git: {0}")]
    Git(String),
}

impl PreflightError {
    /// Build a syntax failure keeping at most the first ten offending files
    pub fn syntax(mut files: Vec<String>) -> Self {
        let total = files.len();
        files.truncate(MAX_LISTED_SYNTAX_ERRORS);
        PreflightError::SyntaxErrors { files, total }
    }
}

fn list_files(files: &[String]) -> String {
    files.join(", ")
}

/// Remote execution failures
#[derive(Error, Debug)]
pub enum ConnectivityError {
    /// Connection could not be established
    #[error("{node} unreachable: {reason}")]
    Unreachable { node: String, reason: String },

    /// Every configured authentication method was rejected
    #[error("authentication rejected by {node}")]
    AuthenticationFailed { node: String },

    /// Host key did not match the configured fingerprint
    #[error("host key mismatch for {node}: expected {expected}, got {actual}")]
    HostKeyMismatch {
        node: String,
        expected: String,
        actual: String,
    },

    /// Connect or command deadline exceeded
    #[error("{node} timed out after {after:?}")]
    Timeout { node: String, after: Duration },

    /// The session channel failed mid-command
    #[error("channel error on {node}: {message}")]
    Channel { node: String, message: String },

    /// A local process could not be spawned
    #[error("failed to spawn command for {node}: {message}")]
    Spawn { node: String, message: String },
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Result alias for deployment operations
pub type Result<T> = std::result::Result<T, DeployError>;
