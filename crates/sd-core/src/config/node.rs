//! Node profile configuration

use serde::{Deserialize, Serialize};

/// Address value that selects the local executor instead of SSH
pub const LOCAL_ADDRESS: &str = "local";

/// Profile for one deployment node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeProfile {
    /// Short name used in logs and history stages (`node1`, `node2`)
    pub name: String,

    /// SSH host or IP, or `local` to run on the orchestrator host
    pub address: String,

    /// SSH port
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// SSH user (falls back to `[ssh].user`)
    #[serde(default)]
    pub user: Option<String>,

    /// Bastion to tunnel through when the node is not directly reachable
    #[serde(default)]
    pub tunnel_via: Option<BastionProfile>,

    /// SHA256 host key fingerprint; verified when set
    #[serde(default)]
    pub host_key: Option<String>,

    /// Directory served by the running processes
    pub live_root: String,

    /// Checkout not visible to serving processes
    #[serde(default)]
    pub staging_root: Option<String>,

    /// Hard-link snapshot of live taken before each swap
    #[serde(default)]
    pub rollback_root: Option<String>,

    /// Base URL of the application's control plane, e.g. `http://10.0.0.2:8000`
    pub service_url: String,

    /// Health endpoint path
    #[serde(default = "default_health_path")]
    pub health_path: String,

    /// Hot-reload endpoint path
    #[serde(default = "default_reload_path")]
    pub reload_path: String,
}

/// Jump host used to reach a node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BastionProfile {
    pub address: String,

    #[serde(default = "default_ssh_port")]
    pub port: u16,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub host_key: Option<String>,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_reload_path() -> String {
    "/api/admin/reload".to_string()
}

impl NodeProfile {
    /// Create a profile with default ports and endpoint paths
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        live_root: impl Into<String>,
        service_url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            port: default_ssh_port(),
            user: None,
            tunnel_via: None,
            host_key: None,
            live_root: live_root.into(),
            staging_root: None,
            rollback_root: None,
            service_url: service_url.into(),
            health_path: default_health_path(),
            reload_path: default_reload_path(),
        }
    }

    /// Set staging and rollback roots
    pub fn with_staging(mut self, staging_root: impl Into<String>, rollback_root: impl Into<String>) -> Self {
        self.staging_root = Some(staging_root.into());
        self.rollback_root = Some(rollback_root.into());
        self
    }

    /// Whether commands run on the orchestrator host
    pub fn is_local(&self) -> bool {
        self.address.eq_ignore_ascii_case(LOCAL_ADDRESS)
    }

    /// `host:port` for the SSH connection
    pub fn ssh_target(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn health_url(&self) -> String {
        join_url(&self.service_url, &self.health_path)
    }

    pub fn reload_url(&self) -> String {
        join_url(&self.service_url, &self.reload_path)
    }

    /// URL for an arbitrary path on the service
    pub fn url(&self, path: &str) -> String {
        join_url(&self.service_url, path)
    }
}

impl BastionProfile {
    pub fn ssh_target(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
