// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// FARM POWER MANAGER (FPM) - NETWORK MODULE
//
// Everything that leaves the box:
// - Direct-link probe over the kernel route table
// - Wake-on-LAN magic packets on the control bridge
// - Signed, best-effort power-down requests to neighbors
// - REST ledger gateway client and its power event stream
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub mod direct;
pub mod peer;
pub mod rest;
pub mod wake;

pub use direct::{interface_index, DirectLinkProbe, IpRouteLookup, Route, RouteLookup};
pub use peer::{power_url, PeerPowerClient, POWER_PATH};
pub use rest::{RestEventFeed, RestLedger, UptimeReport};
pub use wake::{enable_wol, enable_wol_in, magic_packet, parse_mac, WakeTrigger};
