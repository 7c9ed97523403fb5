use crate::types::NodeId;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Timing constants of the reconciliation loops and the control API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    /// Period of the full farm sync.
    pub full_sync_interval_secs: u64,
    /// Delay before retrying a failed farm listing.
    pub full_sync_retry_secs: u64,
    /// Delay before re-subscribing to the power event feed.
    pub event_reconnect_secs: u64,
    /// Heartbeat window base, in units of `heartbeat_unit_secs`.
    pub heartbeat_base_units: u64,
    /// Per-node jitter span: node `id` adds `id % span` units.
    pub heartbeat_jitter_units: u64,
    /// Seconds per heartbeat unit.
    pub heartbeat_unit_secs: u64,
    /// Bound on the public network config lookup behind `/self`.
    pub self_lookup_timeout_secs: u64,
    /// Bound on outbound peer and ledger HTTP requests.
    pub peer_request_timeout_secs: u64,
    /// Accepted clock skew of signed request timestamps.
    pub signature_max_skew_secs: u64,
    /// Period of the uptime report loop.
    pub uptime_report_secs: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            full_sync_interval_secs: 3600,
            full_sync_retry_secs: 60,
            event_reconnect_secs: 10,
            heartbeat_base_units: 24,
            heartbeat_jitter_units: 24,
            heartbeat_unit_secs: 1200,
            self_lookup_timeout_secs: 5,
            peer_request_timeout_secs: 10,
            signature_max_skew_secs: 300,
            uptime_report_secs: 2400,
        }
    }
}

impl Timing {
    pub fn full_sync_interval(&self) -> Duration {
        Duration::from_secs(self.full_sync_interval_secs)
    }

    pub fn full_sync_retry(&self) -> Duration {
        Duration::from_secs(self.full_sync_retry_secs)
    }

    pub fn event_reconnect(&self) -> Duration {
        Duration::from_secs(self.event_reconnect_secs)
    }

    pub fn self_lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.self_lookup_timeout_secs)
    }

    pub fn peer_request_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_request_timeout_secs)
    }

    pub fn uptime_report(&self) -> Duration {
        Duration::from_secs(self.uptime_report_secs)
    }

    /// Expected time of the node's next uptime report.
    ///
    /// The window is jittered per node id so a farm's heartbeats don't all
    /// fall due at once.
    pub fn nudge_deadline(&self, id: NodeId, last_up_time: u64) -> u64 {
        let jitter = (id.0 as u64)
            .checked_rem(self.heartbeat_jitter_units)
            .unwrap_or(0);
        let window = (self.heartbeat_base_units + jitter).saturating_mul(self.heartbeat_unit_secs);
        last_up_time.saturating_add(window)
    }

    /// Whether a node that last reported at `last_up_time` is overdue at `now`.
    pub fn need_nudge(&self, id: NodeId, last_up_time: u64, now: u64) -> bool {
        now >= self.nudge_deadline(id, last_up_time)
    }
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
