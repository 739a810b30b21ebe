//! Error type shared by the delivery pipeline.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, UplinkError>;

#[derive(Error, Debug)]
pub enum UplinkError {
    /// The link is down; the attempt was never made.
    #[error("network unavailable")]
    Offline,

    /// The server answered with a code the step does not accept.
    #[error("{step}: unexpected reply {code} ({line})")]
    Protocol {
        step: &'static str,
        code: u16,
        line: String,
    },

    /// No complete reply arrived within the step deadline.
    #[error("{0}: timed out")]
    Timeout(&'static str),

    /// The control connection was closed by the peer.
    #[error("control connection closed")]
    ConnectionClosed,

    /// Data channel accepted no bytes within the inactivity window.
    #[error("transfer stalled after {sent} bytes")]
    TransferStall { sent: u64 },

    /// The passive data connection could not be opened or broke mid-way.
    #[error("data channel on port {port}: {reason}")]
    DataChannel { port: u16, reason: &'static str },

    #[error("giving up on {path} after {tries} tries")]
    RetriesExhausted { path: String, tries: u8 },

    #[error("local file {path}: {source}")]
    LocalIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("persisting queue to {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("delivery queue is full ({capacity} tasks)")]
    QueueFull { capacity: usize },

    #[error("local path is empty")]
    EmptyPath,

    #[error("network i/o: {0}")]
    Network(#[from] io::Error),
}

impl UplinkError {
    pub(crate) fn local(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::LocalIo {
            path: path.into(),
            source,
        }
    }

    /// True when the control connection can no longer be used and the
    /// session must log in again before the next attempt.
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            Self::ConnectionClosed | Self::Network(_) | Self::Timeout(_)
        )
    }
}

// ===========================================================================
// Tests
// ===========================================================================
