//! Hand-rolled FTP upload client.
//!
//! One [`FtpClient::upload`] call is one complete session for one file:
//! login, collision-free name negotiation, passive data channel, chunked
//! transfer with stall detection, and a commit-by-rename to the canonical
//! name.  Sessions never outlive the call.

mod client;
pub mod command;
pub mod naming;
pub mod passive;
pub mod reply;

use std::time::Duration;

use serde::Deserialize;

pub use client::FtpClient;
pub use command::Command;
pub use reply::{ControlReplyReader, Reply};

/// Bytes written to the data channel per write.
pub const CHUNK_SIZE: usize = 512;

/// Transfer attempts per session.
pub const SESSION_ATTEMPTS: u8 = 3;

#[derive(Debug, Clone)]
pub struct FtpSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    /// Goes into the canonical remote name.
    pub device_id: String,
    pub timeouts: FtpTimeouts,
}

impl FtpSettings {
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>, pass: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            pass: pass.into(),
            device_id: String::from("000000000000"),
            timeouts: FtpTimeouts::default(),
        }
    }

    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = device_id.into();
        self
    }

    pub fn with_timeouts(mut self, timeouts: FtpTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }
}

/// Per-step deadlines, in milliseconds on the wire so they read naturally
/// from a config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FtpTimeouts {
    pub connect_ms: u64,
    pub reply_ms: u64,
    pub epsv_ms: u64,
    pub pasv_ms: u64,
    pub preliminary_ms: u64,
    pub transfer_end_ms: u64,
    pub abort_ms: u64,
    pub drain_ms: u64,
    pub drain_quiet_ms: u64,
    pub stall_ms: u64,
    pub listing_ms: u64,
}

impl Default for FtpTimeouts {
    fn default() -> Self {
        Self {
            connect_ms: 8_000,
            reply_ms: 12_000,
            epsv_ms: 6_000,
            pasv_ms: 8_000,
            preliminary_ms: 2_000,
            transfer_end_ms: 30_000,
            abort_ms: 5_000,
            drain_ms: 200,
            drain_quiet_ms: 50,
            stall_ms: 8_000,
            listing_ms: 8_000,
        }
    }
}

impl FtpTimeouts {
    pub(crate) fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }
    pub(crate) fn reply(&self) -> Duration {
        Duration::from_millis(self.reply_ms)
    }
    pub(crate) fn epsv(&self) -> Duration {
        Duration::from_millis(self.epsv_ms)
    }
    pub(crate) fn pasv(&self) -> Duration {
        Duration::from_millis(self.pasv_ms)
    }
    pub(crate) fn preliminary(&self) -> Duration {
        Duration::from_millis(self.preliminary_ms)
    }
    pub(crate) fn transfer_end(&self) -> Duration {
        Duration::from_millis(self.transfer_end_ms)
    }
    pub(crate) fn abort(&self) -> Duration {
        Duration::from_millis(self.abort_ms)
    }
    pub(crate) fn drain(&self) -> Duration {
        Duration::from_millis(self.drain_ms)
    }
    pub(crate) fn drain_quiet(&self) -> Duration {
        Duration::from_millis(self.drain_quiet_ms)
    }
    pub(crate) fn stall(&self) -> Duration {
        Duration::from_millis(self.stall_ms)
    }
    pub(crate) fn listing(&self) -> Duration {
        Duration::from_millis(self.listing_ms)
    }
}

/// Outcome of a successful session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    /// Name the data was stored under.
    pub remote_name: String,
    /// Final name after the commit rename, if the server accepted it.
    pub canonical_name: Option<String>,
    pub bytes: u64,
}
