// ========================================
// INTEGRATION TESTS FOR FARM POWER MANAGER (FPM)
// ========================================
//
// Test Scenarios:
// 1. Leader powers a neighbor down over the control API
// 2. A leader refuses power-down requests
// 3. Signed /self answers across the wire
// 4. A power-up event wakes a neighbor with a magic packet
//
// Usage:
//   cargo test --test integration_test -- --nocapture
//
// ========================================

use fpm_core::{
    unix_now, EventTarget, FarmId, NodeConfig, NodeId, PeerPower, PowerChangeEvent,
    PowerRequest, PowerState, PowerTarget, SelfInfo, Waker,
};
use fpm_crypto::{signed, Identity};
use fpm_network::{magic_packet, parse_mac, PeerPowerClient, WakeTrigger};
use fpm_node::{
    LedgerSignatureVerifier, PowerDeps, PowerMetrics, PowerOrchestrator, SharedLeadership,
};
use fpm_test_utils::{
    node_record, ChannelEventFeed, HostAction, MemoryLedger, ReadyUptime, RecordingHost,
    RecordingPeers, RecordingWaker, StaticProbe, StaticPublicConfig,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::watch;

const FARM: u32 = 7;
const LEADER: u32 = 1;
const FOLLOWER: u32 = 2;

fn config(node: u32) -> NodeConfig {
    toml::from_str(&format!(
        "node_id = {}\nfarm_id = {}\nledger_url = \"http://ledger\"\nlisten = \"127.0.0.1:0\"\n",
        node, FARM
    ))
    .unwrap()
}

/// Two nodes of one farm on a shared ledger, both reachable on loopback.
fn farm() -> (Arc<MemoryLedger>, Arc<Identity>, Arc<Identity>) {
    let leader = Arc::new(Identity::generate());
    let follower = Arc::new(Identity::generate());

    let mut leader_record = node_record(LEADER, FARM);
    leader_record.public_key = leader.public_key_hex();
    let mut follower_record = node_record(FOLLOWER, FARM);
    follower_record.public_key = follower.public_key_hex();
    follower_record.interfaces[0].ips = vec!["127.0.0.1".into()];

    let ledger = Arc::new(MemoryLedger::with_nodes([leader_record, follower_record]));
    (ledger, leader, follower)
}

struct Agent {
    orchestrator: Arc<PowerOrchestrator>,
    host: Arc<RecordingHost>,
    feed: Arc<ChannelEventFeed>,
}

fn agent(
    node: u32,
    identity: Arc<Identity>,
    ledger: Arc<MemoryLedger>,
    leader: bool,
    peers: Arc<dyn PeerPower>,
    waker: Arc<dyn Waker>,
) -> Agent {
    let host = Arc::new(RecordingHost::new());
    let feed = Arc::new(ChannelEventFeed::new());
    let deps = PowerDeps {
        ledger: ledger.clone(),
        events: feed.clone(),
        leader: Arc::new(SharedLeadership::new(leader)),
        probe: Arc::new(StaticProbe::new(["127.0.0.1"])),
        waker,
        peers,
        host: host.clone(),
        uptime: Arc::new(ReadyUptime::new(true)),
        public_config: Arc::new(StaticPublicConfig::Answer(true)),
        verifier: Arc::new(LedgerSignatureVerifier::new(ledger, 300)),
        metrics: PowerMetrics::new().unwrap(),
    };
    Agent {
        orchestrator: Arc::new(PowerOrchestrator::new(&config(node), identity, deps)),
        host,
        feed,
    }
}

fn serve(agent: &Agent) -> (SocketAddr, watch::Sender<bool>, tokio::task::JoinHandle<()>) {
    let (stop_tx, stop_rx) = watch::channel(false);
    let (addr, handle) = agent
        .orchestrator
        .spawn("127.0.0.1:0".parse().unwrap(), stop_rx)
        .unwrap();
    (addr, stop_tx, handle)
}

fn set_target(ledger: &MemoryLedger, node: u32, target: PowerTarget) {
    let mut record = ledger.node(NodeId(node)).unwrap();
    record.power.target = target;
    ledger.insert(record);
}

// ========================================
// TEST 1: LEADER POWERS A NEIGHBOR DOWN
// ========================================
#[tokio::test]
async fn test_leader_powers_down_neighbor_over_http() {
    let (ledger, leader_id, follower_id) = farm();

    let follower = agent(
        FOLLOWER,
        follower_id,
        ledger.clone(),
        false,
        Arc::new(RecordingPeers::new()),
        Arc::new(RecordingWaker::new()),
    );
    let (addr, stop, handle) = serve(&follower);

    let client = PeerPowerClient::new(
        leader_id.clone(),
        NodeId(LEADER),
        addr.port(),
        Duration::from_secs(5),
    )
    .unwrap();
    let leader = agent(
        LEADER,
        leader_id,
        ledger.clone(),
        true,
        Arc::new(client),
        Arc::new(RecordingWaker::new()),
    );

    set_target(&ledger, FOLLOWER, PowerTarget::Down);
    leader.orchestrator.sync_node(NodeId(FOLLOWER)).await.unwrap();

    assert!(ledger.transactions().contains(&(
        NodeId(FOLLOWER),
        PowerState::Down {
            leader: NodeId(LEADER)
        }
    )));
    assert_eq!(
        ledger.node(NodeId(FOLLOWER)).unwrap().power.state,
        PowerState::Down {
            leader: NodeId(LEADER)
        }
    );
    assert!(follower.host.actions().contains(&HostAction::Shutdown));

    stop.send(true).unwrap();
    handle.await.unwrap();
}

// ========================================
// TEST 2: A LEADER REFUSES POWER-DOWN
// ========================================
#[tokio::test]
async fn test_leader_refuses_power_down() {
    let (ledger, leader_id, follower_id) = farm();

    // both claim leadership
    let target = agent(
        FOLLOWER,
        follower_id.clone(),
        ledger.clone(),
        true,
        Arc::new(RecordingPeers::new()),
        Arc::new(RecordingWaker::new()),
    );
    let (addr, stop, handle) = serve(&target);

    let body = serde_json::to_vec(&PowerRequest::down(NodeId(LEADER), NodeId(FOLLOWER))).unwrap();
    let headers = signed::sign_request(&leader_id, LEADER, "POST", "/power", unix_now(), &body);
    let mut request = reqwest::Client::new()
        .post(format!("http://{}/power", addr))
        .header("content-type", "application/json");
    for (name, value) in headers.pairs() {
        request = request.header(name, value);
    }
    let resp = request.body(body).send().await.unwrap();

    assert_eq!(resp.status(), reqwest::StatusCode::FORBIDDEN);
    let signature = resp
        .headers()
        .get(signed::SIGNATURE_HEADER)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let timestamp: u64 = resp
        .headers()
        .get(signed::TIMESTAMP_HEADER)
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    let bytes = resp.bytes().await.unwrap();
    assert!(signed::verify_response(
        "/power",
        timestamp,
        &bytes,
        &signature,
        &follower_id.public_key_hex()
    ));

    let reply: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(reply["status"], "error");
    assert_eq!(reply["code"], 403);
    assert!(ledger.transactions().is_empty());
    assert!(target.host.actions().is_empty());

    stop.send(true).unwrap();
    handle.await.unwrap();
}

// ========================================
// TEST 3: SIGNED /self ACROSS THE WIRE
// ========================================
#[tokio::test]
async fn test_self_info_is_signed_by_node() {
    let (ledger, _, follower_id) = farm();
    let follower = agent(
        FOLLOWER,
        follower_id.clone(),
        ledger,
        false,
        Arc::new(RecordingPeers::new()),
        Arc::new(RecordingWaker::new()),
    );
    let (addr, stop, handle) = serve(&follower);

    let resp = reqwest::get(format!("http://{}/self", addr)).await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let signer = resp
        .headers()
        .get(signed::SIGNER_HEADER)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let signature = resp
        .headers()
        .get(signed::SIGNATURE_HEADER)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let timestamp: u64 = resp
        .headers()
        .get(signed::TIMESTAMP_HEADER)
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    let bytes = resp.bytes().await.unwrap();

    assert_eq!(signer, FOLLOWER.to_string());
    let info: SelfInfo = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(info.id, FOLLOWER);
    assert_eq!(info.farm, FARM);
    assert_eq!(info.address, follower_id.public_key_hex());
    assert!(info.access);
    assert!(signed::verify_response(
        "/self",
        timestamp,
        &bytes,
        &signature,
        &info.address
    ));

    stop.send(true).unwrap();
    handle.await.unwrap();
}

// ========================================
// TEST 4: POWER-UP EVENT SENDS A MAGIC PACKET
// ========================================
#[tokio::test]
async fn test_power_up_event_wakes_neighbor() {
    let (ledger, leader_id, _) = farm();
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let destination = socket.local_addr().unwrap();

    let leader = agent(
        LEADER,
        leader_id,
        ledger.clone(),
        true,
        Arc::new(RecordingPeers::new()),
        Arc::new(WakeTrigger::with_destination("zos", destination)),
    );
    let (_, stop, handle) = serve(&leader);
    leader.feed.wait_for_subscriptions(1).await;

    set_target(&ledger, FOLLOWER, PowerTarget::Up);
    assert!(leader.feed.publish(PowerChangeEvent {
        farm_id: FarmId(FARM),
        node_id: NodeId(FOLLOWER),
        target: EventTarget::Up,
    }));

    let mut buf = [0u8; 256];
    let (len, _) = tokio::time::timeout(Duration::from_secs(5), socket.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();

    let mac = ledger.node(NodeId(FOLLOWER)).unwrap().interfaces[0].mac.clone();
    assert_eq!(&buf[..len], &magic_packet(&parse_mac(&mac).unwrap())[..]);

    stop.send(true).unwrap();
    handle.await.unwrap();
}
