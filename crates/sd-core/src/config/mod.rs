//! Configuration management for sentinel-deploy
//!
//! Precedence, highest first: CLI flags (applied by the binary), `SD_*`
//! environment variables, the config file, built-in defaults.

mod deploy;
mod node;
pub mod serde_utils;

pub use deploy::{
    split_list, DeployConfig, NodesConfig, RegressionConfig, RegressionMode, SmokeConfig,
    SshConfig,
};
pub use node::{BastionProfile, NodeProfile, LOCAL_ADDRESS};

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// File name looked up in the working directory
pub const LOCAL_CONFIG_FILE: &str = "sentinel-deploy.toml";

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sentinel-deploy")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// First existing config file: `./sentinel-deploy.toml`, then the user config dir
pub fn discover_config_path() -> Option<PathBuf> {
    [PathBuf::from(LOCAL_CONFIG_FILE), default_config_path()]
        .into_iter()
        .find(|p| p.exists())
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Resolve the deployment configuration from file and environment.
///
/// An explicit `path` must exist; otherwise discovery is attempted and
/// defaults are used when nothing is found. The result is validated.
pub fn resolve_deploy_config(path: Option<&Path>) -> Result<DeployConfig, ConfigError> {
    let config = merge_deploy_config(path)?;
    config.validate()?;
    Ok(config)
}

/// File and environment merged, without validation.
///
/// Enough for commands that only read the state directory.
pub fn merge_deploy_config(path: Option<&Path>) -> Result<DeployConfig, ConfigError> {
    let mut config: DeployConfig = match path {
        Some(path) => load_config(path)?,
        None => match discover_config_path() {
            Some(found) => {
                tracing::debug!("Using config file {}", found.display());
                load_config(&found)?
            }
            None => {
                tracing::info!("No config file found, using defaults");
                DeployConfig::default()
            }
        },
    };

    config.apply_env(|key| std::env::var(key).ok())?;
    Ok(config)
}
