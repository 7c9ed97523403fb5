//! Recording stand-ins for host and network capabilities.

use crate::safe_lock;
use async_trait::async_trait;
use fpm_core::{
    LinkProbe, NodeId, NodeRecord, PeerPower, PowerControl, PowerError, PublicConfigSource, Result,
    UptimeReporter, Waker,
};
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Default)]
pub struct RecordingWaker {
    woken: Mutex<Vec<NodeId>>,
    fail: AtomicBool,
}

impl RecordingWaker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn woken(&self) -> Vec<NodeId> {
        safe_lock(&self.woken).clone()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Waker for RecordingWaker {
    async fn power_up(&self, node: &NodeRecord) -> Result<()> {
        safe_lock(&self.woken).push(node.id);
        if self.fail.load(Ordering::SeqCst) {
            return Err(PowerError::Capability("wol socket unavailable".into()));
        }
        Ok(())
    }
}

/// A power-down request as sent to a neighbor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentRequest {
    pub ip: String,
    pub leader: NodeId,
    pub node: NodeId,
}

#[derive(Default)]
pub struct RecordingPeers {
    sent: Mutex<Vec<SentRequest>>,
}

impl RecordingPeers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentRequest> {
        safe_lock(&self.sent).clone()
    }
}

#[async_trait]
impl PeerPower for RecordingPeers {
    async fn request_power_down(&self, ip: &str, leader: NodeId, node: NodeId) -> Result<()> {
        safe_lock(&self.sent).push(SentRequest {
            ip: ip.to_string(),
            leader,
            node,
        });
        Ok(())
    }
}

/// Reports a fixed set of addresses as directly attached.
#[derive(Default)]
pub struct StaticProbe {
    direct: HashSet<String>,
}

impl StaticProbe {
    pub fn new<I, S>(direct: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            direct: direct.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl LinkProbe for StaticProbe {
    async fn is_direct(&self, ip: &str) -> Result<bool> {
        if ip.parse::<IpAddr>().is_err() {
            return Err(PowerError::Validation(format!("invalid address: {}", ip)));
        }
        Ok(self.direct.contains(ip))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostAction {
    Shutdown,
    Reboot,
}

/// Records init system calls instead of performing them.
#[derive(Default)]
pub struct RecordingHost {
    actions: Mutex<Vec<HostAction>>,
    shutdown_unsupported: AtomicBool,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shutdown answers `NotSupported`, as on hosts that emulate it.
    pub fn without_shutdown() -> Self {
        let host = Self::default();
        host.shutdown_unsupported.store(true, Ordering::SeqCst);
        host
    }

    pub fn actions(&self) -> Vec<HostAction> {
        safe_lock(&self.actions).clone()
    }
}

#[async_trait]
impl PowerControl for RecordingHost {
    async fn shutdown(&self) -> Result<()> {
        safe_lock(&self.actions).push(HostAction::Shutdown);
        if self.shutdown_unsupported.load(Ordering::SeqCst) {
            return Err(PowerError::NotSupported("shutdown".into()));
        }
        Ok(())
    }

    async fn reboot(&self) -> Result<()> {
        safe_lock(&self.actions).push(HostAction::Reboot);
        Ok(())
    }
}

/// Uptime reporter whose readiness the test controls.
pub struct ReadyUptime {
    ready: watch::Sender<bool>,
    sent: AtomicUsize,
    fail: AtomicBool,
}

impl ReadyUptime {
    pub fn new(ready: bool) -> Self {
        let (tx, _) = watch::channel(ready);
        Self {
            ready: tx,
            sent: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        }
    }

    pub fn mark_ready(&self) {
        self.ready.send_replace(true);
    }

    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl UptimeReporter for ReadyUptime {
    async fn ready(&self) {
        let mut rx = self.ready.subscribe();
        let _ = rx.wait_for(|ready| *ready).await;
    }

    async fn send_now(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PowerError::Connection("ledger unreachable".into()));
        }
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub enum StaticPublicConfig {
    Answer(bool),
    Failing,
    /// Answers after the given delay.
    Slow(Duration),
}

#[async_trait]
impl PublicConfigSource for StaticPublicConfig {
    async fn has_public_config(&self) -> Result<bool> {
        match self {
            StaticPublicConfig::Answer(v) => Ok(*v),
            StaticPublicConfig::Failing => {
                Err(PowerError::Capability("network daemon unavailable".into()))
            }
            StaticPublicConfig::Slow(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(true)
            }
        }
    }
}
