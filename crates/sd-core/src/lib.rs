//! sd-core: Core abstractions and configuration for sentinel-deploy
//!
//! This crate provides the shared types, error taxonomy, configuration
//! structures, retry combinator and the remote-execution trait used by the
//! orchestrator, the remote executors and the CLI.

pub mod config;
pub mod error;
pub mod retry;
pub mod shell;
pub mod time;
pub mod traits;
pub mod types;

pub use error::{ConfigError, ConnectivityError, DeployError, PreflightError};
pub use types::{GateDecision, NodeRole, ReleaseCandidate, RunStatus, Stage, StagingIsolation};
