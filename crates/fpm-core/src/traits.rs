//! Capabilities the power orchestrator consumes.
//!
//! Every external collaborator (ledger, event bus, election, OS networking,
//! init system) sits behind one of these traits so the orchestrator is
//! constructed once with its dependencies injected.

use crate::error::Result;
use crate::types::{FarmId, InboundRequest, NodeId, NodeRecord, PowerChangeEvent, PowerState};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Stream of power change events. The channel closing means the feed failed.
pub type EventStream = mpsc::Receiver<PowerChangeEvent>;

/// Read/write access to the authoritative ledger.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn get_node(&self, id: NodeId) -> Result<NodeRecord>;

    async fn farm_nodes(&self, farm: FarmId) -> Result<Vec<NodeId>>;

    /// Record this node's power state.
    async fn set_power_state(&self, node: NodeId, state: PowerState) -> Result<()>;

    async fn report_uptime(&self, node: NodeId, uptime_secs: u64) -> Result<()>;
}

#[async_trait]
pub trait EventFeed: Send + Sync {
    async fn subscribe(&self) -> Result<EventStream>;
}

pub trait LeaderOracle: Send + Sync {
    fn is_leader(&self) -> bool;
}

/// Answers whether an IP sits on the control-plane link with no gateway hop.
#[async_trait]
pub trait LinkProbe: Send + Sync {
    async fn is_direct(&self, ip: &str) -> Result<bool>;
}

/// Powers a neighbor on.
#[async_trait]
pub trait Waker: Send + Sync {
    async fn power_up(&self, node: &NodeRecord) -> Result<()>;
}

/// Asks a neighbor to power itself down. Delivery is best-effort.
#[async_trait]
pub trait PeerPower: Send + Sync {
    async fn request_power_down(&self, ip: &str, leader: NodeId, node: NodeId) -> Result<()>;
}

/// The host init system.
#[async_trait]
pub trait PowerControl: Send + Sync {
    /// Fails with `PowerError::NotSupported` where shutdown has to be emulated.
    async fn shutdown(&self) -> Result<()>;

    async fn reboot(&self) -> Result<()>;
}

#[async_trait]
pub trait UptimeReporter: Send + Sync {
    /// Resolves once at least one uptime report reached the ledger.
    async fn ready(&self);

    async fn send_now(&self) -> Result<()>;
}

#[async_trait]
pub trait PublicConfigSource: Send + Sync {
    async fn has_public_config(&self) -> Result<bool>;
}

/// Maps a signed request to the chain identity that signed it.
#[async_trait]
pub trait RequestVerifier: Send + Sync {
    async fn verify_and_identify(&self, request: &InboundRequest) -> Result<NodeId>;
}
