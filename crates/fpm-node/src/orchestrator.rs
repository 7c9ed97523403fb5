//! Power state reconciliation against the ledger.
//!
//! Three activities share one shutdown signal: the event consumer, the
//! periodic full farm sync and the control API (see `server`). None of them
//! caches ledger records beyond a single pass.

use crate::metrics::PowerMetrics;
use fpm_core::{
    unix_now, EventFeed, EventTarget, FarmId, InboundRequest, LeaderOracle, Ledger, LinkProbe,
    NodeConfig, NodeId, NodeRecord, PeerPower, PowerChangeEvent, PowerControl, PowerError,
    PowerRequest, PowerState, PublicConfigSource, RequestVerifier, Result, SelfInfo, Timing,
    UptimeReporter, Waker,
};
use fpm_crypto::Identity;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Collaborators injected into the orchestrator.
#[derive(Clone)]
pub struct PowerDeps {
    pub ledger: Arc<dyn Ledger>,
    pub events: Arc<dyn EventFeed>,
    pub leader: Arc<dyn LeaderOracle>,
    pub probe: Arc<dyn LinkProbe>,
    pub waker: Arc<dyn Waker>,
    pub peers: Arc<dyn PeerPower>,
    pub host: Arc<dyn PowerControl>,
    pub uptime: Arc<dyn UptimeReporter>,
    pub public_config: Arc<dyn PublicConfigSource>,
    pub verifier: Arc<dyn RequestVerifier>,
    pub metrics: Arc<PowerMetrics>,
}

pub struct PowerOrchestrator {
    node: NodeId,
    farm: FarmId,
    identity: Arc<Identity>,
    control_interface: String,
    timing: Timing,
    deps: PowerDeps,
}

/// Resolves once shutdown is signalled or its sender is gone.
/// Holds no `watch::Ref` past its own await.
pub(crate) async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}

/// Sleep for `delay` unless shutdown is signalled first. True when stopped.
pub(crate) async fn wait_or_stop(stop: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    if *stop.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        _ = stopped(stop) => true,
    }
}

impl PowerOrchestrator {
    pub fn new(config: &NodeConfig, identity: Arc<Identity>, deps: PowerDeps) -> Self {
        Self {
            node: config.node(),
            farm: config.farm(),
            identity,
            control_interface: config.control_interface.clone(),
            timing: config.timing.clone(),
            deps,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn farm(&self) -> FarmId {
        self.farm
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn metrics(&self) -> &PowerMetrics {
        &self.deps.metrics
    }

    /// Align this node with its own ledger record.
    pub async fn sync_self(&self) -> Result<()> {
        let record = self.deps.ledger.get_node(self.node).await?;
        let power = record.power;

        if power.target.is_up() {
            // powered on but never confirmed
            if power.state.is_down() {
                tracing::info!(node = %self.node, "recording power state up");
                self.deps
                    .ledger
                    .set_power_state(self.node, PowerState::Up)
                    .await?;
            }
            return Ok(());
        }

        // woken only to report uptime
        if power.state.is_down() {
            return self.shutdown().await;
        }

        Ok(())
    }

    pub async fn sync_node(&self, id: NodeId) -> Result<()> {
        let record = self.deps.ledger.get_node(id).await?;
        let power = record.power;

        if power.target.is_up() || power.state.is_down() {
            if self
                .timing
                .need_nudge(id, power.last_up_time, unix_now())
            {
                return self.power_up(&record).await;
            }
            return Ok(());
        }

        self.power_down(&record).await
    }

    /// One pass over every neighbor in the farm.
    pub async fn sync_nodes(&self) -> Result<()> {
        let ids = self.deps.ledger.farm_nodes(self.farm).await?;
        self.deps.metrics.farm_nodes.set(ids.len() as i64);

        for id in ids.into_iter().filter(|id| *id != self.node) {
            if let Err(e) = self.sync_node(id).await {
                tracing::error!(node = %id, error = %e, "failed to sync node power status");
            }
        }
        Ok(())
    }

    /// Full sync loop. Runs until `stop` flips.
    pub async fn synchronize(&self, mut stop: watch::Receiver<bool>) {
        loop {
            let delay = match self.sync_nodes().await {
                Ok(()) => {
                    self.deps.metrics.full_sync_runs_total.inc();
                    self.timing.full_sync_interval()
                }
                Err(e) => {
                    self.deps.metrics.full_sync_failures_total.inc();
                    tracing::error!(error = %e, "failed to synchronize neighbors power target");
                    self.timing.full_sync_retry()
                }
            };

            if wait_or_stop(&mut stop, delay).await {
                return;
            }
        }
    }

    pub async fn power_up(&self, record: &NodeRecord) -> Result<()> {
        tracing::info!(node = %record.id, "powering on node");
        match self.deps.waker.power_up(record).await {
            Ok(()) => {
                self.deps.metrics.wake_packets_total.inc();
                Ok(())
            }
            Err(e) => {
                self.deps.metrics.wake_failures_total.inc();
                Err(e)
            }
        }
    }

    /// Ask every directly attached address of `record` to power down.
    pub async fn power_down(&self, record: &NodeRecord) -> Result<()> {
        tracing::debug!(node = %record.id, "powering off node");

        let ips = record
            .interface(&self.control_interface)
            .map(|inf| inf.ips.as_slice())
            .unwrap_or_default();

        for ip in ips {
            match self.deps.probe.is_direct(ip).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    tracing::error!(target_node = %record.id, ip = %ip, error = %e, "failed to send power down request");
                    continue;
                }
            }

            match self
                .deps
                .peers
                .request_power_down(ip, self.node, record.id)
                .await
            {
                Ok(()) => self.deps.metrics.power_down_requests_total.inc(),
                Err(e) => {
                    tracing::error!(target_node = %record.id, ip = %ip, error = %e, "failed to send power down request");
                }
            }
        }
        Ok(())
    }

    pub async fn handle_event(&self, event: &PowerChangeEvent) -> Result<()> {
        if event.farm_id != self.farm {
            return Ok(());
        }
        tracing::debug!(farm = %self.farm, node = %event.node_id, power_target = ?event.target, "received power event for farm");

        // self changes come through sync_self and /power
        if event.node_id == self.node {
            return Ok(());
        }

        match event.target {
            EventTarget::Down => {
                let record = self.deps.ledger.get_node(event.node_id).await?;
                tracing::info!(target_node = %event.node_id, "received an event to power down");
                self.power_down(&record).await
            }
            EventTarget::Up => {
                let record = self.deps.ledger.get_node(event.node_id).await?;
                tracing::info!(target_node = %event.node_id, "received an event to power up");
                self.power_up(&record).await
            }
            EventTarget::Other => Ok(()),
        }
    }

    /// Consume one event stream. Ok when stopped, Err when the stream failed.
    pub async fn recv(&self, stop: &mut watch::Receiver<bool>) -> Result<()> {
        let mut stream = self.deps.events.subscribe().await.map_err(|e| {
            PowerError::Connection(format!("failed to subscribe to power events: {}", e))
        })?;
        tracing::info!("listening for power events");

        loop {
            tokio::select! {
                event = stream.recv() => match event {
                    Some(event) => {
                        self.deps.metrics.events_processed_total.inc();
                        if let Err(e) = self.handle_event(&event).await {
                            tracing::error!(node = %event.node_id, error = %e, "failed to process power event");
                        }
                    }
                    None => return Err(PowerError::Stream("power event stream closed".into())),
                },
                _ = stopped(stop) => return Ok(()),
            }
        }
    }

    /// Event loop: wait for the first uptime report, sync self, then follow
    /// the event stream, reconnecting after every failure.
    pub async fn events_loop(&self, mut stop: watch::Receiver<bool>) {
        tokio::select! {
            _ = self.deps.uptime.ready() => {}
            _ = stopped(&mut stop) => return,
        }

        if let Err(e) = self.sync_self().await {
            tracing::error!(error = %e, "failed to synchronize power status with ledger");
        }

        loop {
            match self.recv(&mut stop).await {
                Ok(()) => return,
                Err(PowerError::Connection(msg)) => {
                    tracing::error!(error = %msg, "failed to connect to power event feed");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "power event stream terminated");
                }
            }

            if wait_or_stop(&mut stop, self.timing.event_reconnect()).await {
                return;
            }
            self.deps.metrics.stream_reconnects_total.inc();
        }
    }

    /// Final uptime report, then shutdown; reboot where shutdown is unsupported.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!(node = %self.node, "shutting down node because of ledger");
        if let Err(e) = self.deps.uptime.send_now().await {
            tracing::error!(error = %e, "failed to send uptime before shutting down");
        }

        match self.deps.host.shutdown().await {
            Err(PowerError::NotSupported(_)) => {
                tracing::info!("node does not support shutdown, rebooting to update");
                self.deps.host.reboot().await
            }
            other => other,
        }
    }

    /// Body of `GET /self`.
    pub async fn self_info(&self) -> Result<SelfInfo> {
        let access = tokio::time::timeout(
            self.timing.self_lookup_timeout(),
            self.deps.public_config.has_public_config(),
        )
        .await
        .map_err(|_| PowerError::Connection("public config lookup timed out".into()))?
        .map_err(|e| PowerError::Connection(format!("failed to get public config: {}", e)))?;

        Ok(SelfInfo {
            id: self.node.0,
            farm: self.farm.0,
            address: self.identity.public_key_hex(),
            access,
        })
    }

    /// Handle `POST /power`. Ok means shutdown was initiated.
    pub async fn power(&self, request: &InboundRequest) -> Result<()> {
        if self.deps.leader.is_leader() {
            return Err(PowerError::Forbidden("is a leader node".into()));
        }

        let body: PowerRequest = serde_json::from_slice(&request.body)
            .map_err(|e| PowerError::Validation(format!("invalid request body: {}", e)))?;

        if !body.is_down() {
            return Err(PowerError::Validation(format!(
                "unknown power target '{}'",
                body.target
            )));
        }
        if body.node != self.node.0 {
            return Err(PowerError::Validation(format!(
                "request is addressed to node {}",
                body.node
            )));
        }

        let signer = self.deps.verifier.verify_and_identify(request).await?;
        if signer.0 != body.leader {
            return Err(PowerError::Unauthorized(
                "invalid leader id in request".into(),
            ));
        }

        let leader = self.deps.ledger.get_node(signer).await?;
        if leader.farm_id != self.farm {
            return Err(PowerError::Unauthorized(
                "requesting node is not in the same farm".into(),
            ));
        }

        self.deps
            .ledger
            .set_power_state(self.node, PowerState::Down { leader: signer })
            .await?;

        tracing::info!(leader = %signer, "power down accepted");
        self.shutdown().await
    }

    /// Start the control API and both background loops.
    ///
    /// The returned task completes once `shutdown` flips and all three have
    /// drained.
    pub fn spawn(
        self: &Arc<Self>,
        listen: SocketAddr,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(SocketAddr, JoinHandle<()>)> {
        let (addr, server) = crate::server::bind(self.clone(), listen, shutdown.clone())?;
        tracing::info!(%addr, node = %self.node, farm = %self.farm, "power manager listening");

        let me = self.clone();
        let stop = shutdown.clone();
        let events = tokio::spawn(async move { me.events_loop(stop).await });

        let me = self.clone();
        let stop = shutdown;
        let sync = tokio::spawn(async move { me.synchronize(stop).await });

        let handle = tokio::spawn(async move {
            server.await;
            if let Err(e) = events.await {
                tracing::error!(error = %e, "event loop panicked");
            }
            if let Err(e) = sync.await {
                tracing::error!(error = %e, "sync loop panicked");
            }
            tracing::info!("power manager stopped");
        });

        Ok((addr, handle))
    }

    pub async fn run(self: Arc<Self>, listen: SocketAddr, shutdown: watch::Receiver<bool>) -> Result<()> {
        let (_, handle) = self.spawn(listen, shutdown)?;
        handle
            .await
            .map_err(|e| PowerError::Fatal(format!("power manager task failed: {}", e)))
    }
}
