use crate::safe_lock;
use async_trait::async_trait;
use fpm_core::{unix_now, FarmId, Ledger, NodeId, NodeRecord, PowerError, PowerState, Result};
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Default)]
struct LedgerState {
    nodes: BTreeMap<NodeId, NodeRecord>,
    transactions: Vec<(NodeId, PowerState)>,
    uptimes: Vec<(NodeId, u64)>,
    reads: usize,
    listings: usize,
    fail_writes: bool,
    fail_reads: bool,
    fail_listings: usize,
}

/// Ledger held in memory. Writes update the stored records.
#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_nodes(records: impl IntoIterator<Item = NodeRecord>) -> Self {
        let ledger = Self::new();
        for record in records {
            ledger.insert(record);
        }
        ledger
    }

    pub fn insert(&self, record: NodeRecord) {
        safe_lock(&self.state).nodes.insert(record.id, record);
    }

    pub fn node(&self, id: NodeId) -> Option<NodeRecord> {
        safe_lock(&self.state).nodes.get(&id).cloned()
    }

    /// Power state transactions in submission order.
    pub fn transactions(&self) -> Vec<(NodeId, PowerState)> {
        safe_lock(&self.state).transactions.clone()
    }

    pub fn uptimes(&self) -> Vec<(NodeId, u64)> {
        safe_lock(&self.state).uptimes.clone()
    }

    pub fn reads(&self) -> usize {
        safe_lock(&self.state).reads
    }

    pub fn listings(&self) -> usize {
        safe_lock(&self.state).listings
    }

    pub fn set_fail_writes(&self, fail: bool) {
        safe_lock(&self.state).fail_writes = fail;
    }

    pub fn set_fail_reads(&self, fail: bool) {
        safe_lock(&self.state).fail_reads = fail;
    }

    /// Fail the next `n` farm listings.
    pub fn fail_next_listings(&self, n: usize) {
        safe_lock(&self.state).fail_listings = n;
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn get_node(&self, id: NodeId) -> Result<NodeRecord> {
        let mut state = safe_lock(&self.state);
        state.reads += 1;
        if state.fail_reads {
            return Err(PowerError::Connection("ledger unreachable".into()));
        }
        state
            .nodes
            .get(&id)
            .cloned()
            .ok_or_else(|| PowerError::Validation(format!("node {} not found", id)))
    }

    async fn farm_nodes(&self, farm: FarmId) -> Result<Vec<NodeId>> {
        let mut state = safe_lock(&self.state);
        state.listings += 1;
        if state.fail_listings > 0 {
            state.fail_listings -= 1;
            return Err(PowerError::Connection("ledger unreachable".into()));
        }
        Ok(state
            .nodes
            .values()
            .filter(|n| n.farm_id == farm)
            .map(|n| n.id)
            .collect())
    }

    async fn set_power_state(&self, node: NodeId, power: PowerState) -> Result<()> {
        let mut state = safe_lock(&self.state);
        if state.fail_writes {
            return Err(PowerError::Ledger("transaction rejected".into()));
        }
        state.transactions.push((node, power));
        if let Some(record) = state.nodes.get_mut(&node) {
            record.power.state = power;
        }
        Ok(())
    }

    async fn report_uptime(&self, node: NodeId, uptime_secs: u64) -> Result<()> {
        let mut state = safe_lock(&self.state);
        if state.fail_writes {
            return Err(PowerError::Ledger("transaction rejected".into()));
        }
        state.uptimes.push((node, uptime_secs));
        if let Some(record) = state.nodes.get_mut(&node) {
            record.power.last_up_time = unix_now();
        }
        Ok(())
    }
}
