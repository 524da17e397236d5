//! sd-cli: Command-line interface for sentinel-deploy
//!
//! Provides the `sentinel-deploy` binary: gated deployments, rollbacks,
//! history and status queries.

pub mod commands;
pub mod output;
