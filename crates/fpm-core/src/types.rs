use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire value of the only power target a peer may request.
pub const DOWN_TARGET: &str = "down";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FarmId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for FarmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A network interface as registered on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    pub name: String,
    pub mac: String,
    #[serde(default)]
    pub ips: Vec<String>,
}

/// Desired power state recorded on the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerTarget {
    Up,
    Down,
}

impl PowerTarget {
    pub fn is_up(self) -> bool {
        matches!(self, PowerTarget::Up)
    }
}

/// Last power state a node reported about itself.
/// A node that went down records the leader that ordered it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "status")]
pub enum PowerState {
    Up,
    Down { leader: NodeId },
}

impl PowerState {
    pub fn is_down(&self) -> bool {
        matches!(self, PowerState::Down { .. })
    }
}

/// Target and state are independent axes: all four combinations are valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePower {
    pub target: PowerTarget,
    pub state: PowerState,
    /// Unix seconds of the last uptime report.
    #[serde(default)]
    pub last_up_time: u64,
}

/// Immutable per-read snapshot of a node as recorded on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub farm_id: FarmId,
    /// Hex-encoded ed25519 public key of the node's chain identity.
    pub public_key: String,
    #[serde(default)]
    pub interfaces: Vec<Interface>,
    pub power: NodePower,
}

impl NodeRecord {
    pub fn interface(&self, name: &str) -> Option<&Interface> {
        self.interfaces.iter().find(|inf| inf.name == name)
    }
}

/// Body of `POST /power`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerRequest {
    pub leader: u32,
    pub node: u32,
    pub target: String,
}

impl PowerRequest {
    pub fn down(leader: NodeId, node: NodeId) -> Self {
        Self {
            leader: leader.0,
            node: node.0,
            target: DOWN_TARGET.to_string(),
        }
    }

    pub fn is_down(&self) -> bool {
        self.target == DOWN_TARGET
    }
}

/// Target carried by a power change event. Unknown values decode to `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventTarget {
    Up,
    Down,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerChangeEvent {
    pub farm_id: FarmId,
    pub node_id: NodeId,
    pub target: EventTarget,
}

/// Body of `GET /self`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfInfo {
    pub id: u32,
    pub farm: u32,
    /// Hex-encoded public key.
    pub address: String,
    /// Whether an externally reachable network configuration exists.
    pub access: bool,
}

/// The parts of an inbound HTTP request needed to authenticate its sender.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundRequest {
    pub method: String,
    pub path: String,
    pub signer: Option<String>,
    pub timestamp: Option<String>,
    pub signature: Option<String>,
    pub body: Vec<u8>,
}
