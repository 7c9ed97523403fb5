//! Host capabilities: init system, public network config, uptime reports.

use async_trait::async_trait;
use fpm_core::{
    Ledger, NodeConfig, NodeId, PowerControl, PowerError, PublicConfigSource, Result,
    UptimeReporter,
};
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::watch;

/// Shutdown and reboot through configured commands.
pub struct CommandPowerControl {
    shutdown: Vec<String>,
    reboot: Vec<String>,
    emulate_shutdown: bool,
}

impl CommandPowerControl {
    pub fn new(shutdown: Vec<String>, reboot: Vec<String>, emulate_shutdown: bool) -> Self {
        Self {
            shutdown,
            reboot,
            emulate_shutdown,
        }
    }

    pub fn from_config(config: &NodeConfig) -> Self {
        Self::new(
            config.shutdown_command.clone(),
            config.reboot_command.clone(),
            config.emulate_shutdown,
        )
    }
}

async fn run_command(what: &str, argv: &[String]) -> Result<()> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| PowerError::NotSupported(format!("no {} command configured", what)))?;

    tracing::info!(command = %argv.join(" "), "requesting {}", what);
    let status = Command::new(program).args(args).status().await.map_err(|e| {
        if e.kind() == IoErrorKind::NotFound {
            PowerError::NotSupported(format!("{}: {} not found", what, program))
        } else {
            PowerError::Capability(format!("{} failed: {}", what, e))
        }
    })?;

    if !status.success() {
        return Err(PowerError::Capability(format!(
            "{} exited with {}",
            what, status
        )));
    }
    Ok(())
}

#[async_trait]
impl PowerControl for CommandPowerControl {
    async fn shutdown(&self) -> Result<()> {
        if self.emulate_shutdown {
            return Err(PowerError::NotSupported("shutdown is emulated".into()));
        }
        run_command("shutdown", &self.shutdown).await
    }

    async fn reboot(&self) -> Result<()> {
        run_command("reboot", &self.reboot).await
    }
}

/// Reports whether the public interface exists on the host.
pub struct InterfacePublicConfig {
    interface: String,
    sys_root: PathBuf,
}

impl InterfacePublicConfig {
    pub fn new(interface: &str) -> Self {
        Self::with_root(interface, Path::new("/sys"))
    }

    pub fn with_root(interface: &str, sys_root: &Path) -> Self {
        Self {
            interface: interface.to_string(),
            sys_root: sys_root.to_path_buf(),
        }
    }
}

#[async_trait]
impl PublicConfigSource for InterfacePublicConfig {
    async fn has_public_config(&self) -> Result<bool> {
        let path = self.sys_root.join("class/net").join(&self.interface);
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| PowerError::Capability(format!("{}: {}", path.display(), e)))
    }
}

/// Reports host uptime to the ledger.
pub struct LedgerUptime {
    ledger: Arc<dyn Ledger>,
    node: NodeId,
    source: PathBuf,
    ready: watch::Sender<bool>,
}

impl LedgerUptime {
    pub fn new(ledger: Arc<dyn Ledger>, node: NodeId) -> Self {
        Self::with_source(ledger, node, Path::new("/proc/uptime"))
    }

    /// Read uptime from a `/proc/uptime` formatted file.
    pub fn with_source(ledger: Arc<dyn Ledger>, node: NodeId, source: &Path) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            ledger,
            node,
            source: source.to_path_buf(),
            ready,
        }
    }

    async fn read_uptime(&self) -> Result<u64> {
        let content = tokio::fs::read_to_string(&self.source)
            .await
            .map_err(|e| PowerError::Capability(format!("{}: {}", self.source.display(), e)))?;
        parse_uptime(&content)
    }

    /// Report every `interval` until `shutdown` flips.
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                return;
            }
            if let Err(e) = self.send_now().await {
                tracing::error!(error = %e, "failed to report uptime");
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => return,
            }
        }
    }
}

/// Seconds from the first field of `/proc/uptime`.
pub fn parse_uptime(content: &str) -> Result<u64> {
    let first = content
        .split_whitespace()
        .next()
        .ok_or_else(|| PowerError::Capability("empty uptime".into()))?;
    let secs: f64 = first
        .parse()
        .map_err(|_| PowerError::Capability(format!("malformed uptime: {}", first)))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(PowerError::Capability(format!("malformed uptime: {}", first)));
    }
    Ok(secs as u64)
}

#[async_trait]
impl UptimeReporter for LedgerUptime {
    async fn ready(&self) {
        let mut rx = self.ready.subscribe();
        let _ = rx.wait_for(|ready| *ready).await;
    }

    async fn send_now(&self) -> Result<()> {
        let uptime = self.read_uptime().await?;
        self.ledger.report_uptime(self.node, uptime).await?;
        tracing::debug!(uptime, "uptime reported");
        self.ready.send_replace(true);
        Ok(())
    }
}
