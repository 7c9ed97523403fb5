// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// FARM POWER MANAGER (FPM) - NODE AGENT BINARY
//
// Main entry point for the fpm-node binary.
// Loads the node config and identity, enables Wake-on-LAN on the control
// bridge, wires the ledger gateway and host capabilities into the power
// orchestrator and serves the control API until SIGTERM/SIGINT.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use clap::Parser;
use fpm_core::NodeConfig;
use fpm_crypto::Identity;
use fpm_network::{enable_wol, DirectLinkProbe, PeerPowerClient, RestEventFeed, RestLedger, WakeTrigger};
use fpm_node::{
    CommandPowerControl, InterfacePublicConfig, LedgerSignatureVerifier, LedgerUptime, PowerDeps,
    PowerMetrics, PowerOrchestrator, SharedLeadership,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fpm-node")]
#[command(about = "Farm power manager node agent", long_about = None)]
#[command(version)]
struct Cli {
    /// Node config file (TOML). Without it the FPM_* environment is used.
    #[arg(short, long, env = "FPM_CONFIG")]
    config: Option<PathBuf>,

    /// Write a new identity to the configured key path and exit
    #[arg(long)]
    generate_key: bool,

    /// Start as farm leader
    #[arg(long)]
    leader: bool,

    /// Override the control API listen address
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("fpm=info".parse()?))
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => NodeConfig::load_from_file(path)?,
        None => NodeConfig::load_from_env()?,
    };
    if cli.leader {
        config.leader = true;
    }
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    config.validate()?;

    let key_path = Path::new(&config.key_path);
    if cli.generate_key {
        let identity = Identity::generate();
        identity.save_to_file(key_path)?;
        println!("{}", identity.public_key_hex());
        tracing::info!(path = %key_path.display(), "identity written");
        return Ok(());
    }
    let identity = Arc::new(Identity::load_from_file(key_path)?);

    let nics = enable_wol(&config.control_interface).await?;
    tracing::info!(bridge = %config.control_interface, ?nics, "wake-on-lan enabled");

    let timing = config.timing.clone();
    let ledger = Arc::new(RestLedger::new(
        &config.ledger_url,
        identity.clone(),
        config.node(),
        timing.peer_request_timeout(),
    )?);
    let events = Arc::new(RestEventFeed::new(
        &config.ledger_url,
        timing.peer_request_timeout(),
    )?);
    let leadership = SharedLeadership::new(config.leader);
    let uptime = Arc::new(LedgerUptime::new(ledger.clone(), config.node()));
    let metrics = PowerMetrics::new()?;

    let deps = PowerDeps {
        ledger: ledger.clone(),
        events,
        leader: Arc::new(leadership.clone()),
        probe: Arc::new(DirectLinkProbe::new(&config.control_interface)?),
        waker: Arc::new(WakeTrigger::new(&config.control_interface)),
        peers: Arc::new(PeerPowerClient::new(
            identity.clone(),
            config.node(),
            config.peer_port,
            timing.peer_request_timeout(),
        )?),
        host: Arc::new(CommandPowerControl::from_config(&config)),
        uptime: uptime.clone(),
        public_config: Arc::new(InterfacePublicConfig::new(&config.public_interface)),
        verifier: Arc::new(LedgerSignatureVerifier::new(
            ledger,
            timing.signature_max_skew_secs,
        )),
        metrics,
    };

    tracing::info!(
        node = %config.node(),
        farm = %config.farm(),
        public_key = %identity.public_key_hex(),
        leader = config.leader,
        "starting farm power manager"
    );

    let orchestrator = Arc::new(PowerOrchestrator::new(&config, identity, deps));
    let (stop_tx, stop_rx) = watch::channel(false);

    let reporter = tokio::spawn(uptime.run(timing.uptime_report(), stop_rx.clone()));
    let (_, agent) = orchestrator.spawn(config.listen_addr()?, stop_rx)?;

    wait_for_signals(&leadership).await;
    tracing::info!("shutdown signal received, stopping");
    let _ = stop_tx.send(true);

    agent.await?;
    reporter.await?;
    Ok(())
}

/// Block until SIGTERM or SIGINT.
///
/// SIGUSR1 and SIGUSR2 hand leadership to and take it away from this node.
#[cfg(unix)]
async fn wait_for_signals(leadership: &SharedLeadership) {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint, mut promote, mut demote) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
        signal(SignalKind::user_defined1()),
        signal(SignalKind::user_defined2()),
    ) {
        (Ok(term), Ok(int), Ok(usr1), Ok(usr2)) => (term, int, usr1, usr2),
        _ => {
            tracing::error!("failed to register signal handlers, falling back to ctrl-c");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    loop {
        tokio::select! {
            _ = sigterm.recv() => return,
            _ = sigint.recv() => return,
            _ = promote.recv() => leadership.set_leader(true),
            _ = demote.recv() => leadership.set_leader(false),
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signals(_leadership: &SharedLeadership) {
    let _ = tokio::signal::ctrl_c().await;
}
