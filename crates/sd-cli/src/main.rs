//! sentinel-deploy CLI
//!
//! Releases the local branch to the sentinel node, gates it on health and
//! regression checks, and only then promotes it to production.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sd_core::config::{self, split_list, DeployConfig};
use sd_core::NodeRole;
use sd_orchestrator::DeployOptions;
use sentinel_deploy::commands;

#[derive(Parser)]
#[command(name = "sentinel-deploy")]
#[command(author, version, about = "Gated two-node deployment with automatic rollback")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding history, reports and the last-success pointer
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy the current branch: sentinel first, production if it passes
    Deploy {
        /// Run the sentinel gate against what is live; modify nothing
        #[arg(long)]
        dry_run: bool,
        /// Gate the sentinel as it is live; leave production alone
        #[arg(long)]
        test_only: bool,
        /// EMERGENCY: promote straight to production without the sentinel gate
        #[arg(long = "skip-node2")]
        skip_node2: bool,
        /// Fail instead of prompting
        #[arg(long)]
        non_interactive: bool,
        /// Regression categories to run, comma separated
        #[arg(long, value_name = "a,b,c")]
        tests: Option<String>,
        /// Run regression categories concurrently
        #[arg(long)]
        parallel: bool,
    },

    /// Restore a node to an earlier commit
    Rollback {
        /// Commit to restore (defaults to the last successful deployment)
        target: Option<String>,
        /// Node to roll back: production (node1) or sentinel (node2)
        #[arg(long, default_value = "production")]
        node: NodeRole,
    },

    /// Show the deployment history
    History {
        /// Number of runs to show
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
        /// Show every entry of one run
        #[arg(long)]
        deploy_id: Option<String>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show the last successful deployment and both nodes' state
    Status {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Get a specific config value
    Get { key: String },
    /// Show which config file is used
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config_path = cli.config.as_deref();
    let state_dir = cli.state_dir.clone();
    let with_overrides = |mut config: DeployConfig| {
        if let Some(dir) = &state_dir {
            config.state_dir = dir.clone();
        }
        config
    };

    let exit_code = match cli.command {
        Commands::Deploy {
            dry_run,
            test_only,
            skip_node2,
            non_interactive,
            tests,
            parallel,
        } => {
            let options = DeployOptions {
                dry_run,
                test_only,
                skip_sentinel: skip_node2,
                non_interactive,
                categories: tests.as_deref().map(split_list),
                parallel,
            };
            options.validate()?;
            let config = with_overrides(config::resolve_deploy_config(config_path)?);
            commands::deploy_command(config, options).await?
        }
        Commands::Rollback { target, node } => {
            let config = with_overrides(config::resolve_deploy_config(config_path)?);
            commands::rollback_command(config, node, target.as_deref()).await?
        }
        Commands::History {
            limit,
            deploy_id,
            json,
        } => {
            let config = with_overrides(config::merge_deploy_config(config_path)?);
            commands::history_command(&config, limit, deploy_id.as_deref(), json)?;
            0
        }
        Commands::Status { json } => {
            let config = with_overrides(config::resolve_deploy_config(config_path)?);
            commands::status_command(config, json).await?;
            0
        }
        Commands::Config { action } => {
            match action {
                ConfigAction::Show => {
                    let config = with_overrides(config::merge_deploy_config(config_path)?);
                    commands::config_show(&config)?;
                }
                ConfigAction::Get { key } => {
                    let config = with_overrides(config::merge_deploy_config(config_path)?);
                    commands::config_get(&config, &key)?;
                }
                ConfigAction::Path => commands::config_path(config_path),
            }
            0
        }
    };

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}
