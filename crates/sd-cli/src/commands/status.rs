//! Status command implementation

use anyhow::{Context, Result};

use sd_core::config::DeployConfig;
use sd_orchestrator::{GitPreflight, Pipeline};

use crate::output::format_status;

/// Execute the status command
pub async fn status_command(config: DeployConfig, json: bool) -> Result<()> {
    let preflight = GitPreflight::new(config.repo_path.clone(), config.branch.clone());
    let pipeline = Pipeline::with_ssh(config, Box::new(preflight));

    let status = pipeline
        .status()
        .await
        .context("Failed to read deployment status")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print!("{}", format_status(&status));
    }

    Ok(())
}
