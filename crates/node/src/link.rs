//! Uplink state read from sysfs, plus the device id derived from the
//! interface's hardware address.

use std::fs;
use std::io;
use std::path::PathBuf;

use tokio::net::TcpStream;
use tracing::{debug, warn};

use telemetry_uplink::Network;

pub const FALLBACK_DEVICE_ID: &str = "000000000000";

/// Link collaborator backed by `/sys/class/net/<iface>/operstate`.
#[derive(Debug, Clone)]
pub struct LinkMonitor {
    interface: Option<String>,
    sys_root: PathBuf,
}

impl LinkMonitor {
    pub fn new(interface: Option<String>) -> Self {
        Self {
            interface,
            sys_root: PathBuf::from("/sys/class/net"),
        }
    }

    #[cfg(test)]
    fn with_sys_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sys_root = root.into();
        self
    }

    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    fn read_attr(&self, attr: &str) -> Option<String> {
        let iface = self.interface.as_ref()?;
        let path = self.sys_root.join(iface).join(attr);
        match fs::read_to_string(&path) {
            Ok(s) => Some(s.trim().to_string()),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "sysfs read failed");
                None
            }
        }
    }

    /// Hardware address of the monitored interface, separators stripped
    /// and upper-cased.
    pub fn device_id_from_mac(&self) -> Option<String> {
        let mac = self.read_attr("address")?;
        let id: String = mac
            .chars()
            .filter(|c| c.is_ascii_hexdigit())
            .map(|c| c.to_ascii_uppercase())
            .collect();
        if id.is_empty() || id.chars().all(|c| c == '0') {
            None
        } else {
            Some(id)
        }
    }

    /// Configured id first, then the MAC, then all zeroes.
    pub fn resolve_device_id(&self, configured: Option<&str>) -> String {
        if let Some(id) = configured {
            return id.to_string();
        }
        match self.device_id_from_mac() {
            Some(id) => id,
            None => {
                warn!(
                    interface = ?self.interface,
                    "no device id configured and no MAC available, using {FALLBACK_DEVICE_ID}"
                );
                FALLBACK_DEVICE_ID.to_string()
            }
        }
    }
}

impl Network for LinkMonitor {
    type Socket = TcpStream;

    /// Point-to-point links (ppp, wwan) report `unknown` while passing
    /// traffic, so only an explicit down state counts as offline.
    fn is_connected(&self) -> bool {
        if self.interface.is_none() {
            return true;
        }
        matches!(self.read_attr("operstate").as_deref(), Some("up" | "unknown"))
    }

    async fn connect(&self, host: &str, port: u16) -> io::Result<TcpStream> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}
