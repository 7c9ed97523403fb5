// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// FARM POWER MANAGER (FPM) - METRICS MODULE
//
// Prometheus counters for the reconciliation loops and the control API.
// Exposed in text format via the /metrics endpoint.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

pub struct PowerMetrics {
    registry: Registry,

    // Neighbor actions
    pub wake_packets_total: IntCounter,
    pub wake_failures_total: IntCounter,
    pub power_down_requests_total: IntCounter,

    // Event stream
    pub events_processed_total: IntCounter,
    pub stream_reconnects_total: IntCounter,

    // Full sync
    pub full_sync_runs_total: IntCounter,
    pub full_sync_failures_total: IntCounter,
    pub farm_nodes: IntGauge,

    // Control API
    /// Rejected `/power` requests, by HTTP status
    pub api_rejections_total: IntCounterVec,
}

fn counter(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntCounter> {
    let c = IntCounter::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(c.clone()))?;
    Ok(c)
}

impl PowerMetrics {
    pub fn new() -> Result<Arc<Self>, Box<dyn std::error::Error>> {
        let registry = Registry::new();

        let wake_packets_total = counter(
            &registry,
            "fpm_wake_packets_total",
            "Wake-on-LAN packets sent to neighbors",
        )?;
        let wake_failures_total = counter(
            &registry,
            "fpm_wake_failures_total",
            "Wake-on-LAN attempts that failed locally",
        )?;
        let power_down_requests_total = counter(
            &registry,
            "fpm_power_down_requests_total",
            "Power-down requests sent to directly attached neighbors",
        )?;
        let events_processed_total = counter(
            &registry,
            "fpm_events_processed_total",
            "Power change events received from the feed",
        )?;
        let stream_reconnects_total = counter(
            &registry,
            "fpm_stream_reconnects_total",
            "Times the power event stream was re-established",
        )?;
        let full_sync_runs_total =
            counter(&registry, "fpm_full_sync_runs_total", "Completed full farm syncs")?;
        let full_sync_failures_total = counter(
            &registry,
            "fpm_full_sync_failures_total",
            "Full farm syncs aborted because the farm could not be listed",
        )?;

        let farm_nodes = IntGauge::with_opts(Opts::new(
            "fpm_farm_nodes",
            "Nodes listed in the farm at the last full sync",
        ))?;
        registry.register(Box::new(farm_nodes.clone()))?;

        let api_rejections_total = IntCounterVec::new(
            Opts::new("fpm_api_rejections_total", "Rejected power requests"),
            &["code"],
        )?;
        registry.register(Box::new(api_rejections_total.clone()))?;

        Ok(Arc::new(Self {
            registry,
            wake_packets_total,
            wake_failures_total,
            power_down_requests_total,
            events_processed_total,
            stream_reconnects_total,
            full_sync_runs_total,
            full_sync_failures_total,
            farm_nodes,
            api_rejections_total,
        }))
    }

    pub fn reject(&self, code: u16) {
        self.api_rejections_total
            .with_label_values(&[&code.to_string()])
            .inc();
    }

    /// Export metrics in Prometheus text format
    pub fn export(&self) -> Result<String, Box<dyn std::error::Error>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
