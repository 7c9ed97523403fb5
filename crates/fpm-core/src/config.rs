use crate::timing::Timing;
use crate::types::{FarmId, NodeId};
use crate::{CONTROL_PORT, DEFAULT_CONTROL_INTERFACE};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;

fn default_key_path() -> String {
    "/var/lib/fpm/identity.key".to_string()
}

fn default_listen() -> String {
    format!("0.0.0.0:{}", CONTROL_PORT)
}

fn default_peer_port() -> u16 {
    CONTROL_PORT
}

fn default_control_interface() -> String {
    DEFAULT_CONTROL_INTERFACE.to_string()
}

fn default_public_interface() -> String {
    "public".to_string()
}

fn default_shutdown_command() -> Vec<String> {
    vec!["poweroff".to_string()]
}

fn default_reboot_command() -> Vec<String> {
    vec!["reboot".to_string()]
}

/// Per-node agent configuration
/// Loaded once at startup from a TOML file or the environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node_id: u32,
    pub farm_id: u32,
    /// Hex-encoded ed25519 seed of the node identity.
    #[serde(default = "default_key_path")]
    pub key_path: String,
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Control port of the neighbors.
    #[serde(default = "default_peer_port")]
    pub peer_port: u16,
    #[serde(default = "default_control_interface")]
    pub control_interface: String,
    #[serde(default = "default_public_interface")]
    pub public_interface: String,
    /// Base URL of the ledger gateway.
    pub ledger_url: String,
    /// Initial leadership, until the elector says otherwise.
    #[serde(default)]
    pub leader: bool,
    #[serde(default = "default_shutdown_command")]
    pub shutdown_command: Vec<String>,
    #[serde(default = "default_reboot_command")]
    pub reboot_command: Vec<String>,
    /// Report shutdown as unsupported so the node reboots into an update cycle.
    #[serde(default)]
    pub emulate_shutdown: bool,
    #[serde(default)]
    pub timing: Timing,
}

impl NodeConfig {
    /// Load node config from TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;
        let config: NodeConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load node config from environment variables
    /// Useful for containerized deployments
    pub fn load_from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let node_id: u32 = std::env::var("FPM_NODE_ID")
            .map_err(|_| "FPM_NODE_ID not set")?
            .parse()?;

        let farm_id: u32 = std::env::var("FPM_FARM_ID")
            .map_err(|_| "FPM_FARM_ID not set")?
            .parse()?;

        let ledger_url = std::env::var("FPM_LEDGER_URL").map_err(|_| "FPM_LEDGER_URL not set")?;

        let key_path = std::env::var("FPM_KEY_PATH").unwrap_or_else(|_| default_key_path());
        let listen = std::env::var("FPM_LISTEN").unwrap_or_else(|_| default_listen());

        let peer_port: u16 = match std::env::var("FPM_PEER_PORT") {
            Ok(port) => port.parse()?,
            Err(_) => default_peer_port(),
        };

        let control_interface = std::env::var("FPM_CONTROL_INTERFACE")
            .unwrap_or_else(|_| default_control_interface());
        let public_interface = std::env::var("FPM_PUBLIC_INTERFACE")
            .unwrap_or_else(|_| default_public_interface());

        Ok(Self {
            node_id,
            farm_id,
            key_path,
            listen,
            peer_port,
            control_interface,
            public_interface,
            ledger_url,
            leader: env_flag("FPM_LEADER"),
            shutdown_command: default_shutdown_command(),
            reboot_command: default_reboot_command(),
            emulate_shutdown: env_flag("FPM_EMULATE_SHUTDOWN"),
            timing: Timing::default(),
        })
    }

    /// Save node config to TOML file
    pub fn save_to_file(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.node_id == 0 {
            return Err("node_id cannot be zero".to_string());
        }

        if self.farm_id == 0 {
            return Err("farm_id cannot be zero".to_string());
        }

        if self.ledger_url.is_empty() {
            return Err("ledger_url cannot be empty".to_string());
        }

        if self.control_interface.is_empty() {
            return Err("control_interface cannot be empty".to_string());
        }

        if self.peer_port == 0 {
            return Err("Invalid peer port".to_string());
        }

        self.listen_addr()?;

        if self.shutdown_command.is_empty() || self.reboot_command.is_empty() {
            return Err("shutdown and reboot commands cannot be empty".to_string());
        }

        if self.timing.heartbeat_jitter_units == 0 {
            return Err("timing.heartbeat_jitter_units must be positive".to_string());
        }

        if self.timing.full_sync_interval_secs == 0
            || self.timing.full_sync_retry_secs == 0
            || self.timing.event_reconnect_secs == 0
        {
            return Err("sync, retry and reconnect intervals must be positive".to_string());
        }

        Ok(())
    }

    pub fn node(&self) -> NodeId {
        NodeId(self.node_id)
    }

    pub fn farm(&self) -> FarmId {
        FarmId(self.farm_id)
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, String> {
        self.listen
            .parse()
            .map_err(|e| format!("Invalid listen address '{}': {}", self.listen, e))
    }
}

fn env_flag(name: &str) -> bool {
    matches!(
        std::env::var(name).unwrap_or_default().as_str(),
        "1" | "true" | "yes"
    )
}
