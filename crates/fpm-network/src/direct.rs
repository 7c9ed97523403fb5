//! Same-LAN reachability test for peer power requests.
//!
//! A neighbor is "direct" when the kernel's best route to it leaves through
//! the control-plane bridge without a gateway hop. Routes are looked up
//! live on every call.

use async_trait::async_trait;
use fpm_core::{LinkProbe, PowerError, Result};
use serde::Deserialize;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::process::Command;

/// One route returned by the kernel for a destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub gateway: Option<String>,
    /// Outbound interface index, 0 when the device could not be resolved.
    pub link_index: u32,
}

#[async_trait]
pub trait RouteLookup: Send + Sync {
    async fn routes(&self, ip: IpAddr) -> Result<Vec<Route>>;
}

#[derive(Debug, Deserialize)]
struct RawRoute {
    dev: String,
    #[serde(default)]
    gateway: Option<String>,
}

/// Parse the output of `ip -j route get`, resolving each device name with `index_of`.
pub fn parse_routes(json: &[u8], index_of: impl Fn(&str) -> Option<u32>) -> Result<Vec<Route>> {
    let raw: Vec<RawRoute> = serde_json::from_slice(json)
        .map_err(|e| PowerError::Capability(format!("malformed route table output: {}", e)))?;

    Ok(raw
        .into_iter()
        .map(|r| Route {
            link_index: index_of(&r.dev).unwrap_or(0),
            gateway: r.gateway,
        })
        .collect())
}

/// Kernel index of a named network interface.
#[cfg(unix)]
pub fn interface_index(name: &str) -> Option<u32> {
    let c_name = std::ffi::CString::new(name).ok()?;
    // SAFETY: c_name is a valid NUL-terminated string for the duration of the call.
    let index = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
    if index == 0 {
        None
    } else {
        Some(index)
    }
}

#[cfg(not(unix))]
pub fn interface_index(_name: &str) -> Option<u32> {
    None
}

/// Route lookup backed by iproute2.
#[derive(Debug, Default, Clone)]
pub struct IpRouteLookup;

#[async_trait]
impl RouteLookup for IpRouteLookup {
    async fn routes(&self, ip: IpAddr) -> Result<Vec<Route>> {
        let output = Command::new("ip")
            .args(["-j", "route", "get", &ip.to_string()])
            .output()
            .await
            .map_err(|e| PowerError::Capability(format!("failed to run ip route: {}", e)))?;

        if !output.status.success() {
            return Err(PowerError::Capability(format!(
                "route lookup for {} failed: {}",
                ip,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        parse_routes(&output.stdout, interface_index)
    }
}

pub struct DirectLinkProbe {
    link_index: u32,
    lookup: Arc<dyn RouteLookup>,
}

impl DirectLinkProbe {
    /// Resolve the control interface once. A missing interface is fatal.
    pub fn new(interface: &str) -> Result<Self> {
        let link_index = interface_index(interface).ok_or_else(|| {
            PowerError::Fatal(format!("failed to resolve interface '{}'", interface))
        })?;
        Ok(Self::with_lookup(link_index, Arc::new(IpRouteLookup)))
    }

    pub fn with_lookup(link_index: u32, lookup: Arc<dyn RouteLookup>) -> Self {
        Self { link_index, lookup }
    }
}

#[async_trait]
impl LinkProbe for DirectLinkProbe {
    async fn is_direct(&self, ip: &str) -> Result<bool> {
        let addr: IpAddr = ip
            .parse()
            .map_err(|_| PowerError::Validation(format!("invalid address: {}", ip)))?;

        let routes = match self.lookup.routes(addr).await {
            Ok(routes) => routes,
            Err(e) => {
                tracing::debug!(ip, error = %e, "route lookup failed, treating as not direct");
                return Ok(false);
            }
        };

        Ok(routes
            .iter()
            .any(|r| r.gateway.is_none() && r.link_index == self.link_index))
    }
}
