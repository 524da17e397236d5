//! Deploy command implementation

use std::io::Write;

use anyhow::Result;

use sd_core::config::DeployConfig;
use sd_core::DeployError;
use sd_orchestrator::{DeployOptions, GitPreflight, Pipeline};

use crate::output::{format_run, print_error, print_info, print_verdict, print_warning};

/// Execute the deploy command; returns the process exit code
pub async fn deploy_command(config: DeployConfig, options: DeployOptions) -> Result<i32> {
    tracing::debug!(
        ?options,
        repo = %config.repo_path.display(),
        branch = %config.branch,
        "Starting deploy"
    );

    if options.skip_sentinel {
        print_warning("EMERGENCY BYPASS: production will be deployed without the sentinel gate");
    }
    if options.dry_run {
        print_info("Dry run: gating the sentinel as it is, no node will be modified");
    }

    let preflight = GitPreflight::new(config.repo_path.clone(), config.branch.clone())
        .with_source_dirs(&config.source_dirs)
        .with_confirm(Box::new(confirm));
    let pipeline = Pipeline::with_ssh(config, Box::new(preflight));

    let run = match pipeline.deploy(&options).await {
        Ok(run) => run,
        Err(DeployError::Preflight(e)) => {
            print_error(&format!("Pre-flight failed: {}", e));
            return Ok(1);
        }
        Err(e) => return Err(e.into()),
    };

    print!("{}", format_run(&run));
    print_verdict(&run);
    print_info(&format!(
        "Report: {}",
        pipeline.history().report_path(&run.id).display()
    ));

    Ok(run.exit_code())
}

/// Ask on the terminal; anything but `y` declines
fn confirm(question: &str) -> bool {
    print!("{} [y/N] ", question);
    if std::io::stdout().flush().is_err() {
        return false;
    }

    let mut input = String::new();
    if std::io::stdin().read_line(&mut input).is_err() {
        return false;
    }
    input.trim().eq_ignore_ascii_case("y")
}
