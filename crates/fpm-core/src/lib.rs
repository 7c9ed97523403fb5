// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// FARM POWER MANAGER (FPM) - CORE MODULE
//
// Shared vocabulary for every fpm crate:
// - Ledger snapshots of node power target/state and farm membership
// - The peer power request wire value and power change events
// - The closed error taxonomy used across reconciliation and the HTTP API
// - Timing constants and the heartbeat nudge policy
// - Capability traits for every external collaborator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub mod config;
pub mod error;
pub mod timing;
pub mod traits;
pub mod types;

pub use config::NodeConfig;
pub use error::{ErrorKind, PowerError, Result};
pub use timing::{unix_now, Timing};
pub use traits::{
    EventFeed, EventStream, LeaderOracle, Ledger, LinkProbe, PeerPower, PowerControl,
    PublicConfigSource, RequestVerifier, UptimeReporter, Waker,
};
pub use types::{
    EventTarget, FarmId, InboundRequest, Interface, NodeId, NodePower, NodeRecord,
    PowerChangeEvent, PowerRequest, PowerState, PowerTarget, SelfInfo, DOWN_TARGET,
};

/// Fixed control port every agent listens on for `/self` and `/power`.
pub const CONTROL_PORT: u16 = 8039;

/// Bridge carrying the control-plane LAN (WoL, direct-link checks, peer requests).
pub const DEFAULT_CONTROL_INTERFACE: &str = "zos";
