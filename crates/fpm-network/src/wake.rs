//! Wake-on-LAN.

use async_trait::async_trait;
use fpm_core::{NodeRecord, PowerError, Result, Waker};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::Path;
use tokio::net::UdpSocket;
use tokio::process::Command;

pub const MAC_LEN: usize = 6;
pub const MAGIC_PACKET_LEN: usize = 6 + 16 * MAC_LEN;

/// Discard port conventionally used for magic packets.
pub const WOL_PORT: u16 = 9;

/// Parse `aa:bb:cc:dd:ee:ff` (or dash separated).
pub fn parse_mac(mac: &str) -> Result<[u8; MAC_LEN]> {
    let invalid = || PowerError::Validation(format!("invalid mac address: {}", mac));

    let parts: Vec<&str> = mac.split(|c| c == ':' || c == '-').collect();
    if parts.len() != MAC_LEN {
        return Err(invalid());
    }

    let mut out = [0u8; MAC_LEN];
    for (byte, part) in out.iter_mut().zip(parts) {
        if part.len() != 2 {
            return Err(invalid());
        }
        *byte = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
    }
    Ok(out)
}

/// Six 0xFF bytes followed by the MAC repeated sixteen times.
pub fn magic_packet(mac: &[u8; MAC_LEN]) -> [u8; MAGIC_PACKET_LEN] {
    let mut packet = [0xFFu8; MAGIC_PACKET_LEN];
    for chunk in packet[MAC_LEN..].chunks_exact_mut(MAC_LEN) {
        chunk.copy_from_slice(mac);
    }
    packet
}

pub struct WakeTrigger {
    /// Interface whose MAC is looked up in the node record.
    interface: String,
    /// Device the socket is pinned to, if any.
    device: Option<String>,
    destination: SocketAddr,
}

impl WakeTrigger {
    /// Broadcast magic packets out of `interface`.
    pub fn new(interface: &str) -> Self {
        Self {
            interface: interface.to_string(),
            device: Some(interface.to_string()),
            destination: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, WOL_PORT)),
        }
    }

    /// Send to a fixed address without pinning the socket to a device.
    pub fn with_destination(interface: &str, destination: SocketAddr) -> Self {
        Self {
            interface: interface.to_string(),
            device: None,
            destination,
        }
    }

    pub async fn send_magic(&self, mac: &[u8; MAC_LEN]) -> Result<()> {
        let bind: SocketAddr = if self.destination.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind)
            .await
            .map_err(|e| PowerError::Capability(format!("failed to open wol socket: {}", e)))?;
        socket
            .set_broadcast(true)
            .map_err(|e| PowerError::Capability(format!("failed to enable broadcast: {}", e)))?;

        if let Some(device) = &self.device {
            bind_to_device(&socket, device)?;
        }

        socket
            .send_to(&magic_packet(mac), self.destination)
            .await
            .map_err(|e| PowerError::Capability(format!("failed to send wol packet: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl Waker for WakeTrigger {
    async fn power_up(&self, node: &NodeRecord) -> Result<()> {
        let inf = node.interface(&self.interface).ok_or_else(|| {
            PowerError::Capability(format!("can't find mac address of node {}", node.id))
        })?;
        let mac = parse_mac(&inf.mac)?;

        tracing::debug!(node = %node.id, mac = %inf.mac, "sending wake-on-lan packet");
        self.send_magic(&mac).await
    }
}

#[cfg(target_os = "linux")]
fn bind_to_device(socket: &UdpSocket, device: &str) -> Result<()> {
    use std::os::fd::AsRawFd;

    let name = device.as_bytes();
    // SAFETY: fd is owned by `socket` and stays open; the option value points
    // at `name` which outlives the call.
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_BINDTODEVICE,
            name.as_ptr() as *const libc::c_void,
            name.len() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(PowerError::Capability(format!(
            "failed to bind wol socket to {}: {}",
            device,
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn bind_to_device(_socket: &UdpSocket, device: &str) -> Result<()> {
    Err(PowerError::Capability(format!(
        "binding to device {} is not supported on this platform",
        device
    )))
}

/// Enable magic-packet wake on every NIC enslaved to `bridge`.
pub async fn enable_wol(bridge: &str) -> Result<Vec<String>> {
    enable_wol_in(Path::new("/sys"), bridge).await
}

/// Like [`enable_wol`] with an explicit sysfs root.
///
/// A missing bridge is fatal; a NIC that refuses the setting is only logged.
pub async fn enable_wol_in(sys_root: &Path, bridge: &str) -> Result<Vec<String>> {
    let brif = sys_root.join("class/net").join(bridge).join("brif");
    let entries = std::fs::read_dir(&brif).map_err(|e| {
        PowerError::Fatal(format!("failed to list nics of bridge {}: {}", bridge, e))
    })?;

    let mut nics: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    nics.sort();

    for nic in &nics {
        match Command::new("ethtool")
            .args(["-s", nic, "wol", "g"])
            .output()
            .await
        {
            Ok(out) if out.status.success() => {
                tracing::info!(nic = %nic, "enabled wake-on-lan");
            }
            Ok(out) => {
                tracing::warn!(
                    nic = %nic,
                    stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                    "failed to enable wake-on-lan"
                );
            }
            Err(e) => {
                tracing::warn!(nic = %nic, error = %e, "failed to run ethtool");
            }
        }
    }

    Ok(nics)
}
