//! SSH session establishment and command execution

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use russh::client::{self, Config, Handle};
use russh::ChannelMsg;
use russh_keys::key::{KeyPair, PublicKey};
use tokio::io::{AsyncRead, AsyncWrite};

use sd_core::config::SshConfig;
use sd_core::traits::CommandOutput;
use sd_core::ConnectivityError;

/// Extended-data stream id carrying stderr
const SSH_EXTENDED_DATA_STDERR: u32 = 1;

/// Authentication material shared by every route to a node
pub struct Credentials {
    key: Option<Arc<KeyPair>>,
    password: Option<String>,
}

impl Credentials {
    /// Load the pre-shared identity (if present) and the fallback password
    pub fn load(ssh: &SshConfig, node: &str) -> Result<Self, ConnectivityError> {
        let key = match &ssh.private_key_path {
            Some(path) if path.exists() => match russh_keys::load_secret_key(path, None) {
                Ok(key) => Some(Arc::new(key)),
                Err(e) => {
                    tracing::warn!("Failed to load private key {}: {}", path.display(), e);
                    None
                }
            },
            Some(path) => {
                tracing::debug!("Private key {} not found", path.display());
                None
            }
            None => None,
        };

        if key.is_none() && ssh.password.is_none() {
            tracing::error!("No SSH key or password available for {}", node);
            return Err(ConnectivityError::AuthenticationFailed {
                node: node.to_string(),
            });
        }

        Ok(Self {
            key,
            password: ssh.password.clone(),
        })
    }
}

/// SSH client handler; verifies the host key when a fingerprint is configured
pub(crate) struct ClientHandler {
    expected_host_key: Option<String>,
    observed_host_key: Arc<Mutex<Option<String>>>,
}

impl ClientHandler {
    fn new(expected_host_key: Option<String>) -> (Self, Arc<Mutex<Option<String>>>) {
        let observed = Arc::new(Mutex::new(None));
        (
            Self {
                expected_host_key,
                observed_host_key: Arc::clone(&observed),
            },
            observed,
        )
    }
}

fn normalize_fingerprint(fingerprint: &str) -> &str {
    fingerprint.trim().trim_start_matches("SHA256:")
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint();
        tracing::debug!("Server host key: {}", fingerprint);

        if let Ok(mut observed) = self.observed_host_key.lock() {
            *observed = Some(fingerprint.clone());
        }

        match &self.expected_host_key {
            Some(expected)
                if normalize_fingerprint(expected) != normalize_fingerprint(&fingerprint) =>
            {
                tracing::error!(
                    "Host key mismatch: expected {}, got {}",
                    expected,
                    fingerprint
                );
                Ok(false)
            }
            _ => Ok(true),
        }
    }
}

/// Target of one SSH hop
pub(crate) struct Endpoint<'a> {
    pub node: &'a str,
    pub target: &'a str,
    pub user: &'a str,
    pub host_key: Option<&'a str>,
}

/// Connect to `endpoint` over TCP and authenticate
pub(crate) async fn connect(
    endpoint: &Endpoint<'_>,
    credentials: &Credentials,
    connect_timeout: Duration,
) -> Result<Handle<ClientHandler>, ConnectivityError> {
    let (handler, observed) = ClientHandler::new(endpoint.host_key.map(String::from));
    let config = Arc::new(Config::default());

    tracing::debug!("Connecting to {} ({})", endpoint.node, endpoint.target);
    let handle = tokio::time::timeout(
        connect_timeout,
        client::connect(config, endpoint.target, handler),
    )
    .await
    .map_err(|_| ConnectivityError::Timeout {
        node: endpoint.node.to_string(),
        after: connect_timeout,
    })?
    .map_err(|e| connect_error(endpoint, &observed, e))?;

    authenticate(handle, endpoint, credentials).await
}

/// Run a second SSH session over an already-open stream (a bastion channel)
pub(crate) async fn connect_over<S>(
    stream: S,
    endpoint: &Endpoint<'_>,
    credentials: &Credentials,
    connect_timeout: Duration,
) -> Result<Handle<ClientHandler>, ConnectivityError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (handler, observed) = ClientHandler::new(endpoint.host_key.map(String::from));
    let config = Arc::new(Config::default());

    let handle = tokio::time::timeout(
        connect_timeout,
        client::connect_stream(config, stream, handler),
    )
    .await
    .map_err(|_| ConnectivityError::Timeout {
        node: endpoint.node.to_string(),
        after: connect_timeout,
    })?
    .map_err(|e| connect_error(endpoint, &observed, e))?;

    authenticate(handle, endpoint, credentials).await
}

fn connect_error(
    endpoint: &Endpoint<'_>,
    observed: &Arc<Mutex<Option<String>>>,
    error: anyhow::Error,
) -> ConnectivityError {
    let observed = observed.lock().ok().and_then(|o| o.clone());
    match (endpoint.host_key, observed) {
        (Some(expected), Some(actual))
            if normalize_fingerprint(expected) != normalize_fingerprint(&actual) =>
        {
            ConnectivityError::HostKeyMismatch {
                node: endpoint.node.to_string(),
                expected: expected.to_string(),
                actual,
            }
        }
        _ => ConnectivityError::Unreachable {
            node: endpoint.node.to_string(),
            reason: error.to_string(),
        },
    }
}

/// Key first, then password
async fn authenticate(
    mut handle: Handle<ClientHandler>,
    endpoint: &Endpoint<'_>,
    credentials: &Credentials,
) -> Result<Handle<ClientHandler>, ConnectivityError> {
    if let Some(key) = &credentials.key {
        tracing::debug!("Authenticating to {} as '{}' with key", endpoint.node, endpoint.user);
        match handle.authenticate_publickey(endpoint.user, Arc::clone(key)).await {
            Ok(true) => return Ok(handle),
            Ok(false) => tracing::debug!("Key rejected by {}", endpoint.node),
            Err(e) => tracing::debug!("Key authentication error on {}: {}", endpoint.node, e),
        }
    }

    if let Some(password) = &credentials.password {
        tracing::info!("Falling back to password authentication for {}", endpoint.node);
        match handle.authenticate_password(endpoint.user, password).await {
            Ok(true) => return Ok(handle),
            Ok(false) => {}
            Err(e) => {
                return Err(ConnectivityError::Channel {
                    node: endpoint.node.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    Err(ConnectivityError::AuthenticationFailed {
        node: endpoint.node.to_string(),
    })
}

/// [`run_command`] bounded by an optional deadline
pub(crate) async fn run_with_timeout(
    handle: &Handle<ClientHandler>,
    node: &str,
    command: &str,
    timeout: Option<Duration>,
) -> Result<CommandOutput, ConnectivityError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, run_command(handle, node, command))
            .await
            .unwrap_or_else(|_| {
                Err(ConnectivityError::Timeout {
                    node: node.to_string(),
                    after: limit,
                })
            }),
        None => run_command(handle, node, command).await,
    }
}

/// Execute one command on an authenticated session and collect its output
pub(crate) async fn run_command(
    handle: &Handle<ClientHandler>,
    node: &str,
    command: &str,
) -> Result<CommandOutput, ConnectivityError> {
    let started = Instant::now();
    let channel_err = |e: russh::Error| ConnectivityError::Channel {
        node: node.to_string(),
        message: e.to_string(),
    };

    let mut channel = handle.channel_open_session().await.map_err(channel_err)?;
    channel.exec(true, command).await.map_err(channel_err)?;

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut exit_status = None;

    // Output may still arrive after the exit status; read until the channel closes.
    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
            ChannelMsg::ExtendedData { ref data, ext } if ext == SSH_EXTENDED_DATA_STDERR => {
                stderr.extend_from_slice(data)
            }
            ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
            _ => {}
        }
    }

    let exit_status = exit_status.ok_or_else(|| ConnectivityError::Channel {
        node: node.to_string(),
        message: "channel closed without an exit status".to_string(),
    })?;

    tracing::debug!(
        node,
        exit_status,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "command finished"
    );

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        exit_status,
    })
}
