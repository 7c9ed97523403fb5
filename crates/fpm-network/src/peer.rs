use async_trait::async_trait;
use fpm_core::{unix_now, NodeId, PeerPower, PowerError, PowerRequest, Result};
use fpm_crypto::{signed, Identity};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

pub const POWER_PATH: &str = "/power";

/// `http://{ip}:{port}/power`, bracketing IPv6 addresses.
pub fn power_url(ip: &str, port: u16) -> Result<String> {
    let addr: IpAddr = ip
        .parse()
        .map_err(|_| PowerError::Validation(format!("invalid address: {}", ip)))?;
    Ok(format!("http://{}{}", SocketAddr::new(addr, port), POWER_PATH))
}

/// Sends signed power-down requests to neighbors.
///
/// Delivery is fire-and-forget: the response and any transport failure are
/// dropped, the ledger stays the source of truth.
pub struct PeerPowerClient {
    identity: Arc<Identity>,
    node: NodeId,
    port: u16,
    http: reqwest::Client,
}

impl PeerPowerClient {
    pub fn new(identity: Arc<Identity>, node: NodeId, port: u16, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PowerError::Fatal(format!("failed to build http client: {}", e)))?;
        Ok(Self {
            identity,
            node,
            port,
            http,
        })
    }
}

#[async_trait]
impl PeerPower for PeerPowerClient {
    async fn request_power_down(&self, ip: &str, leader: NodeId, node: NodeId) -> Result<()> {
        let url = power_url(ip, self.port)?;
        let body = serde_json::to_vec(&PowerRequest::down(leader, node))
            .map_err(|e| PowerError::Validation(format!("failed to encode request: {}", e)))?;

        let headers = signed::sign_request(
            &self.identity,
            self.node.0,
            "POST",
            POWER_PATH,
            unix_now(),
            &body,
        );

        let mut request = self
            .http
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        for (name, value) in headers.pairs() {
            request = request.header(name, value);
        }

        match request.body(body).send().await {
            Ok(resp) => {
                tracing::debug!(ip, node = %node, status = %resp.status(), "power down request delivered");
            }
            Err(e) => {
                tracing::debug!(ip, node = %node, error = %e, "power down request not delivered");
            }
        }
        Ok(())
    }
}
