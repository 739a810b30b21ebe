//! Reliable file delivery for a telemetry node on an unreliable link.
//!
//! Producers hand finished files to a persistent [`DeliveryQueue`]; a
//! [`DeliveryScheduler`] ticked from the node's main loop pushes the queue
//! head to an FTP server one session at a time, with retry and backoff that
//! survive a reboot.

pub mod clock;
pub mod error;
pub mod ftp;
pub mod net;
pub mod queue;
pub mod rotation;
pub mod scheduler;

#[cfg(test)]
mod testing;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use error::{Result, UplinkError};
pub use ftp::{FtpClient, FtpSettings, FtpTimeouts, UploadReport};
pub use net::{Network, NoWatchdog, TcpNetwork, Watchdog};
pub use queue::{DeliveryQueue, DeliveryTask, QueueSettings, QueueStats};
pub use rotation::{GenerationSet, LogSealer, SnapshotFeeder, SnapshotPolicy};
pub use scheduler::{DeliveryScheduler, Uploader};
