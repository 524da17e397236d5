//! Rollback command implementation

use anyhow::Result;

use sd_core::config::DeployConfig;
use sd_core::types::short_commit;
use sd_core::{DeployError, NodeRole, RunStatus};
use sd_orchestrator::{GitPreflight, Pipeline};

use crate::output::{format_run, print_error, print_info, print_success};

/// Execute the rollback command; returns the process exit code.
///
/// A rollback that restored the node exits 0.
pub async fn rollback_command(config: DeployConfig, role: NodeRole, target: Option<&str>) -> Result<i32> {
    let node = config.node(role).name.clone();
    let preflight = GitPreflight::new(config.repo_path.clone(), config.branch.clone());
    let pipeline = Pipeline::with_ssh(config, Box::new(preflight));

    match target {
        Some(commit) => print_info(&format!("Rolling back {} to {}", node, short_commit(commit))),
        None => print_info(&format!("Rolling back {} to the last successful deployment", node)),
    }

    let run = match pipeline.rollback(role, target).await {
        Ok(run) => run,
        Err(e @ DeployError::NoRollbackTarget) => {
            print_error(&e.to_string());
            print_info("Pass a commit explicitly: sentinel-deploy rollback <COMMIT>");
            return Ok(1);
        }
        Err(e) => return Err(e.into()),
    };

    print!("{}", format_run(&run));
    if run.status == RunStatus::RolledBack {
        let restored = run
            .node(role)
            .and_then(|n| n.deployed_commit.as_deref())
            .map(short_commit)
            .unwrap_or("unknown");
        print_success(&format!("{} restored to {}", node, restored));
        Ok(0)
    } else {
        let message = run
            .error
            .as_ref()
            .map(|e| e.message.clone())
            .unwrap_or_else(|| run.status.to_string());
        print_error(&message);
        Ok(1)
    }
}
