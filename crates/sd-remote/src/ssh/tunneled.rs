//! Bastion-aware SSH executor
//!
//! Tries the node directly first. When the node cannot be reached, a session
//! to the bastion is opened and a second SSH session to the node is carried
//! over a `direct-tcpip` channel. Once the bastion route has been needed it is
//! preferred for the rest of the invocation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::Handle;
use russh::Disconnect;
use tokio::sync::Mutex;

use sd_core::config::BastionProfile;
use sd_core::traits::{CommandOutput, RemoteExecutor, Transport};
use sd_core::ConnectivityError;

use super::client::{self, ClientHandler, Credentials, Endpoint};
use super::direct::DirectExecutor;

/// Originator reported to the bastion for forwarded channels
const TUNNEL_ORIGIN: (&str, u32) = ("127.0.0.1", 0);

struct Tunnel {
    bastion: Handle<ClientHandler>,
    node: Handle<ClientHandler>,
}

impl Tunnel {
    fn is_closed(&self) -> bool {
        self.bastion.is_closed() || self.node.is_closed()
    }
}

/// Direct route with bastion fallback
pub struct TunneledExecutor {
    direct: DirectExecutor,
    bastion_label: String,
    bastion_target: String,
    bastion_user: String,
    bastion_host_key: Option<String>,
    credentials: Arc<Credentials>,
    connect_timeout: Duration,
    prefer_bastion: AtomicBool,
    tunnel: Mutex<Option<Tunnel>>,
}

impl TunneledExecutor {
    pub fn new(
        direct: DirectExecutor,
        bastion: &BastionProfile,
        default_user: String,
        credentials: Arc<Credentials>,
        connect_timeout: Duration,
    ) -> Self {
        let bastion_label = format!("{} (bastion {})", direct.node_name(), bastion.address);
        Self {
            direct,
            bastion_label,
            bastion_target: bastion.ssh_target(),
            bastion_user: bastion.user.clone().unwrap_or(default_user),
            bastion_host_key: bastion.host_key.clone(),
            credentials,
            connect_timeout,
            prefer_bastion: AtomicBool::new(false),
            tunnel: Mutex::new(None),
        }
    }

    async fn open_tunnel(&self) -> Result<Tunnel, ConnectivityError> {
        let bastion_endpoint = Endpoint {
            node: &self.bastion_label,
            target: &self.bastion_target,
            user: &self.bastion_user,
            host_key: self.bastion_host_key.as_deref(),
        };
        let bastion =
            client::connect(&bastion_endpoint, &self.credentials, self.connect_timeout).await?;

        let (host, port) = self.direct.address();
        tracing::debug!("Opening tunnel to {}:{} via {}", host, port, self.bastion_target);
        let channel = bastion
            .channel_open_direct_tcpip(host, u32::from(port), TUNNEL_ORIGIN.0, TUNNEL_ORIGIN.1)
            .await
            .map_err(|e| ConnectivityError::Unreachable {
                node: self.direct.node_name().to_string(),
                reason: format!("bastion could not forward: {}", e),
            })?;

        let node = client::connect_over(
            channel.into_stream(),
            &self.direct.endpoint(),
            &self.credentials,
            self.connect_timeout,
        )
        .await?;

        tracing::info!(
            "Connected to {} through bastion {}",
            self.direct.node_name(),
            self.bastion_target
        );
        Ok(Tunnel { bastion, node })
    }

    async fn run_tunneled(
        &self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, ConnectivityError> {
        let mut tunnel = self.tunnel.lock().await;
        let open = match tunnel.take() {
            Some(existing) if !existing.is_closed() => existing,
            _ => self.open_tunnel().await?,
        };

        let result =
            client::run_with_timeout(&open.node, self.direct.node_name(), command, timeout).await;

        // Keep the tunnel only while it is known to be healthy.
        if result.is_ok() {
            *tunnel = Some(open);
        }
        result
    }
}

#[async_trait]
impl RemoteExecutor for TunneledExecutor {
    fn node_name(&self) -> &str {
        self.direct.node_name()
    }

    fn transport(&self) -> Transport {
        Transport::Tunneled
    }

    async fn execute(
        &self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, ConnectivityError> {
        if !self.prefer_bastion.load(Ordering::Relaxed) {
            match self.direct.ensure_connected().await {
                Ok(()) => return self.direct.run(command, timeout).await,
                Err(e @ ConnectivityError::Unreachable { .. })
                | Err(e @ ConnectivityError::Timeout { .. }) => {
                    tracing::warn!("{}; retrying through bastion {}", e, self.bastion_target);
                    self.prefer_bastion.store(true, Ordering::Relaxed);
                }
                // Authentication and host key problems are not routing problems.
                Err(e) => return Err(e),
            }
        }

        self.run_tunneled(command, timeout).await
    }

    async fn close(&self) -> Result<(), ConnectivityError> {
        self.direct.close().await?;
        if let Some(tunnel) = self.tunnel.lock().await.take() {
            let _ = tunnel
                .node
                .disconnect(Disconnect::ByApplication, "deployment finished", "en")
                .await;
            tunnel
                .bastion
                .disconnect(Disconnect::ByApplication, "deployment finished", "en")
                .await
                .map_err(|e| ConnectivityError::Channel {
                    node: self.bastion_label.clone(),
                    message: e.to_string(),
                })?;
        }
        Ok(())
    }
}
