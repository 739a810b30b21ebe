//! The two narrow seams the pipeline consumes from the rest of the node:
//! link state plus a socket factory, and a watchdog to feed during long
//! transfers.

use std::io;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Link collaborator.  Sockets returned by `connect` are owned by the caller
/// and closed when dropped.
#[allow(async_fn_in_trait)]
pub trait Network {
    type Socket: AsyncRead + AsyncWrite + Unpin;

    /// Whether an uplink is currently available.
    fn is_connected(&self) -> bool;

    /// Open a fresh connection to `host:port`.
    async fn connect(&self, host: &str, port: u16) -> io::Result<Self::Socket>;
}

/// Plain TCP over whatever route the OS has.  Reports the link as always up.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpNetwork;

impl Network for TcpNetwork {
    type Socket = TcpStream;

    fn is_connected(&self) -> bool {
        true
    }

    async fn connect(&self, host: &str, port: u16) -> io::Result<TcpStream> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// Hook fed between transfer chunks so a long upload is not mistaken for a
/// hung device.
pub trait Watchdog {
    fn feed(&self);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoWatchdog;

impl Watchdog for NoWatchdog {
    fn feed(&self) {}
}

impl<W: Watchdog + ?Sized> Watchdog for std::sync::Arc<W> {
    fn feed(&self) {
        (**self).feed()
    }
}
