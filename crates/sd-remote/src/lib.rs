//! sd-remote: Remote execution channel for sentinel-deploy
//!
//! Provides the concrete [`RemoteExecutor`] implementations. The route to
//! each node is picked once, at construction, by [`executor_for`]:
//! - `address = "local"` runs commands on the orchestrator host;
//! - a node without `tunnel_via` gets a [`DirectExecutor`];
//! - a node with `tunnel_via` gets a [`TunneledExecutor`], which tries the
//!   direct route first and falls back to the bastion.
//!
//! Key authentication is always tried first, the configured password second.

pub mod local;
pub mod ssh;

use std::sync::Arc;

use sd_core::config::{DeployConfig, NodeProfile};
use sd_core::traits::SharedExecutor;
use sd_core::ConnectivityError;

pub use local::LocalExecutor;
pub use ssh::{Credentials, DirectExecutor, TunneledExecutor};

/// Build the executor for a node according to its configured route
pub fn executor_for(
    node: &NodeProfile,
    config: &DeployConfig,
) -> Result<SharedExecutor, ConnectivityError> {
    if node.is_local() {
        tracing::debug!(node = %node.name, "using local executor");
        return Ok(Arc::new(LocalExecutor::new(&node.name)));
    }

    let credentials = Arc::new(Credentials::load(&config.ssh, &node.name)?);
    let user = node.user.clone().unwrap_or_else(|| config.ssh.user.clone());
    let direct = DirectExecutor::new(node, user, Arc::clone(&credentials), config.connect_timeout);

    let executor: SharedExecutor = match &node.tunnel_via {
        Some(bastion) => Arc::new(TunneledExecutor::new(
            direct,
            bastion,
            config.ssh.user.clone(),
            credentials,
            config.connect_timeout,
        )),
        None => Arc::new(direct),
    };

    tracing::debug!(
        node = %node.name,
        transport = %executor.transport(),
        "executor selected"
    );
    Ok(executor)
}
