// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// FARM POWER MANAGER (FPM) - NODE AGENT
//
// Per-node power agent:
// - Reconciles ledger power targets into Wake-on-LAN and peer power-down
// - Consumes power change events and runs a periodic full farm sync
// - Serves the signed control API (/self, /power) and Prometheus metrics
// - Shuts the host down when the ledger or the farm leader asks for it
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub mod auth;
pub mod host;
pub mod leader;
pub mod metrics;
pub mod orchestrator;
pub mod server;

#[cfg(test)]
mod testing;

pub use auth::LedgerSignatureVerifier;
pub use host::{CommandPowerControl, InterfacePublicConfig, LedgerUptime};
pub use leader::SharedLeadership;
pub use metrics::PowerMetrics;
pub use orchestrator::{PowerDeps, PowerOrchestrator};
