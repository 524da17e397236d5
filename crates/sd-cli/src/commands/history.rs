//! History command implementation

use anyhow::{Context, Result};

use sd_core::config::DeployConfig;
use sd_orchestrator::History;

use crate::output::{format_history, format_run, print_warning};

/// Execute the history command
pub fn history_command(
    config: &DeployConfig,
    limit: usize,
    deploy_id: Option<&str>,
    json: bool,
) -> Result<()> {
    let history = History::from_config(config);

    let Some(deploy_id) = deploy_id else {
        let runs = history
            .recent_runs(limit)
            .with_context(|| format!("Failed to read {}", history.ledger_path().display()))?;
        if json {
            println!("{}", serde_json::to_string_pretty(&runs)?);
        } else {
            println!("{}", format_history(&runs));
        }
        return Ok(());
    };

    let entries = history.entries_for(deploy_id)?;
    if entries.is_empty() {
        print_warning(&format!("No history entries for {}", deploy_id));
        return Ok(());
    }
    let report = history.read_report(deploy_id)?;

    if json {
        let value = serde_json::json!({ "entries": entries, "report": report });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{}", format_history(&entries));
        if let Some(run) = report {
            print!("{}", format_run(&run));
        }
    }

    Ok(())
}
