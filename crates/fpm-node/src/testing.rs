//! Wiring shared by the orchestrator and server tests.

use crate::auth::LedgerSignatureVerifier;
use crate::leader::SharedLeadership;
use crate::metrics::PowerMetrics;
use crate::orchestrator::{PowerDeps, PowerOrchestrator};
use fpm_core::{
    unix_now, InboundRequest, NodeConfig, NodeId, PowerRequest, PowerState, PowerTarget,
};
use fpm_crypto::{signed, Identity};
use fpm_test_utils::{
    node_record, ChannelEventFeed, MemoryLedger, ReadyUptime, RecordingHost, RecordingPeers,
    RecordingWaker, StaticProbe, StaticPublicConfig,
};
use std::sync::Arc;

pub const SELF: u32 = 1;
pub const FARM: u32 = 7;

pub struct Harness {
    pub ledger: Arc<MemoryLedger>,
    pub feed: Arc<ChannelEventFeed>,
    pub leadership: SharedLeadership,
    pub waker: Arc<RecordingWaker>,
    pub peers: Arc<RecordingPeers>,
    pub host: Arc<RecordingHost>,
    pub uptime: Arc<ReadyUptime>,
    pub metrics: Arc<PowerMetrics>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_host(RecordingHost::new())
    }

    pub fn with_host(host: RecordingHost) -> Self {
        Self {
            ledger: Arc::new(MemoryLedger::with_nodes([node_record(SELF, FARM)])),
            feed: Arc::new(ChannelEventFeed::new()),
            leadership: SharedLeadership::new(false),
            waker: Arc::new(RecordingWaker::new()),
            peers: Arc::new(RecordingPeers::new()),
            host: Arc::new(host),
            uptime: Arc::new(ReadyUptime::new(true)),
            metrics: PowerMetrics::new().unwrap(),
        }
    }

    pub fn set_self_power(&self, target: PowerTarget, state: PowerState) {
        let mut me = self.ledger.node(NodeId(SELF)).unwrap();
        me.power.target = target;
        me.power.state = state;
        self.ledger.insert(me);
    }

    pub fn build(&self, probe: StaticProbe, public: StaticPublicConfig) -> Arc<PowerOrchestrator> {
        let config: NodeConfig = toml::from_str(&format!(
            "node_id = {}\nfarm_id = {}\nledger_url = \"http://ledger\"\n",
            SELF, FARM
        ))
        .unwrap();
        let deps = PowerDeps {
            ledger: self.ledger.clone(),
            events: self.feed.clone(),
            leader: Arc::new(self.leadership.clone()),
            probe: Arc::new(probe),
            waker: self.waker.clone(),
            peers: self.peers.clone(),
            host: self.host.clone(),
            uptime: self.uptime.clone(),
            public_config: Arc::new(public),
            verifier: Arc::new(LedgerSignatureVerifier::new(self.ledger.clone(), 300)),
            metrics: self.metrics.clone(),
        };
        Arc::new(PowerOrchestrator::new(
            &config,
            Arc::new(Identity::generate()),
            deps,
        ))
    }

    pub fn orchestrator(&self) -> Arc<PowerOrchestrator> {
        self.build(StaticProbe::default(), StaticPublicConfig::Answer(true))
    }
}

pub struct Leader {
    pub identity: Identity,
    pub id: u32,
}

/// Put a node with a fresh identity on the ledger.
pub fn register_leader(h: &Harness, id: u32, farm: u32) -> Leader {
    let identity = Identity::generate();
    let mut record = node_record(id, farm);
    record.public_key = identity.public_key_hex();
    h.ledger.insert(record);
    Leader { identity, id }
}

pub fn power_request(leader: &Leader, body: &PowerRequest) -> InboundRequest {
    let body = serde_json::to_vec(body).unwrap();
    let headers =
        signed::sign_request(&leader.identity, leader.id, "POST", "/power", unix_now(), &body);
    InboundRequest {
        method: "POST".into(),
        path: "/power".into(),
        signer: Some(headers.signer),
        timestamp: Some(headers.timestamp),
        signature: Some(headers.signature),
        body,
    }
}
