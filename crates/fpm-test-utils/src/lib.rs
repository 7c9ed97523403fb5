#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

//! # FPM Test Utilities
//!
//! In-memory ledger, a test-driven event feed and recording doubles for the
//! host and network capabilities the power orchestrator consumes.

pub mod doubles;
pub mod feed;
pub mod ledger;

pub use doubles::{
    HostAction, ReadyUptime, RecordingHost, RecordingPeers, RecordingWaker, SentRequest,
    StaticProbe, StaticPublicConfig,
};
pub use feed::ChannelEventFeed;
pub use ledger::MemoryLedger;

use fpm_core::{
    unix_now, FarmId, Interface, NodeId, NodePower, NodeRecord, PowerState, PowerTarget,
};
use std::sync::{Mutex, MutexGuard};

pub(crate) fn safe_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// An up node with a fresh heartbeat and one `zos` interface.
///
/// Node `n` gets MAC `02:00:00:00:HH:LL` and IP `10.0.HH.LL`.
pub fn node_record(id: u32, farm: u32) -> NodeRecord {
    let hi = (id >> 8) & 0xff;
    let lo = id & 0xff;
    NodeRecord {
        id: NodeId(id),
        farm_id: FarmId(farm),
        public_key: String::new(),
        interfaces: vec![Interface {
            name: "zos".into(),
            mac: format!("02:00:00:00:{:02x}:{:02x}", hi, lo),
            ips: vec![format!("10.0.{}.{}", hi, lo)],
        }],
        power: NodePower {
            target: PowerTarget::Up,
            state: PowerState::Up,
            last_up_time: unix_now(),
        },
    }
}
