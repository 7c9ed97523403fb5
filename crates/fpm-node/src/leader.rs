use fpm_core::LeaderOracle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Leadership flag shared between the elector and the control API.
#[derive(Debug, Clone, Default)]
pub struct SharedLeadership {
    leader: Arc<AtomicBool>,
}

impl SharedLeadership {
    pub fn new(leader: bool) -> Self {
        Self {
            leader: Arc::new(AtomicBool::new(leader)),
        }
    }

    pub fn set_leader(&self, leader: bool) {
        let was = self.leader.swap(leader, Ordering::SeqCst);
        if was != leader {
            tracing::info!(leader, "farm leadership changed");
        }
    }
}

impl LeaderOracle for SharedLeadership {
    fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }
}
