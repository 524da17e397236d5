//! Direct SSH executor

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::Handle;
use russh::Disconnect;
use tokio::sync::Mutex;

use sd_core::config::NodeProfile;
use sd_core::traits::{CommandOutput, RemoteExecutor, Transport};
use sd_core::ConnectivityError;

use super::client::{self, ClientHandler, Credentials, Endpoint};

/// Executes commands over a direct SSH connection, reusing one session
pub struct DirectExecutor {
    node: String,
    address: String,
    port: u16,
    target: String,
    user: String,
    host_key: Option<String>,
    credentials: Arc<Credentials>,
    connect_timeout: Duration,
    session: Mutex<Option<Handle<ClientHandler>>>,
}

impl DirectExecutor {
    pub fn new(
        node: &NodeProfile,
        user: String,
        credentials: Arc<Credentials>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            node: node.name.clone(),
            address: node.address.clone(),
            port: node.port,
            target: node.ssh_target(),
            user,
            host_key: node.host_key.clone(),
            credentials,
            connect_timeout,
            session: Mutex::new(None),
        }
    }

    /// Host and port as seen from a bastion
    pub(crate) fn address(&self) -> (&str, u16) {
        (&self.address, self.port)
    }

    pub(crate) fn endpoint(&self) -> Endpoint<'_> {
        Endpoint {
            node: &self.node,
            target: &self.target,
            user: &self.user,
            host_key: self.host_key.as_deref(),
        }
    }

    /// Open the session if none is cached (or the cached one closed)
    pub(crate) async fn ensure_connected(&self) -> Result<(), ConnectivityError> {
        let mut session = self.session.lock().await;
        if session.as_ref().map_or(true, |h| h.is_closed()) {
            let handle = client::connect(&self.endpoint(), &self.credentials, self.connect_timeout).await?;
            tracing::debug!("Connected to {} at {}", self.node, self.target);
            *session = Some(handle);
        }
        Ok(())
    }

    /// Run a command on the cached session, dropping it on timeout
    pub(crate) async fn run(
        &self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, ConnectivityError> {
        let mut session = self.session.lock().await;
        let handle = session.as_ref().ok_or_else(|| ConnectivityError::Unreachable {
            node: self.node.clone(),
            reason: "no session".to_string(),
        })?;

        let result = client::run_with_timeout(handle, &self.node, command, timeout).await;

        if result.is_err() {
            // Channel state is unknown; reconnect on the next call.
            *session = None;
        }
        result
    }
}

#[async_trait]
impl RemoteExecutor for DirectExecutor {
    fn node_name(&self) -> &str {
        &self.node
    }

    fn transport(&self) -> Transport {
        Transport::Direct
    }

    async fn execute(
        &self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, ConnectivityError> {
        self.ensure_connected().await?;
        self.run(command, timeout).await
    }

    async fn close(&self) -> Result<(), ConnectivityError> {
        if let Some(handle) = self.session.lock().await.take() {
            handle
                .disconnect(Disconnect::ByApplication, "deployment finished", "en")
                .await
                .map_err(|e| ConnectivityError::Channel {
                    node: self.node.clone(),
                    message: e.to_string(),
                })?;
        }
        Ok(())
    }
}
