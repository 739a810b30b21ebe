//! Software watchdog.  The main loop and the FTP transfer loop feed it; if
//! neither does for `timeout`, the process exits and the supervisor restarts
//! it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;

use telemetry_uplink::Watchdog;

#[derive(Debug)]
pub struct SoftWatchdog {
    origin: Instant,
    /// Milliseconds since `origin` at the last feed.
    last_fed_ms: AtomicU64,
    timeout: Duration,
}

impl SoftWatchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            origin: Instant::now(),
            last_fed_ms: AtomicU64::new(0),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn elapsed_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    pub fn since_last_feed(&self) -> Duration {
        let last = self.last_fed_ms.load(Ordering::Relaxed);
        Duration::from_millis(self.elapsed_ms().saturating_sub(last))
    }

    /// Resolves once the watchdog has gone unfed for longer than its
    /// timeout.
    pub async fn starved(&self) {
        loop {
            let idle = self.since_last_feed();
            if idle > self.timeout {
                return;
            }
            tokio::time::sleep(self.timeout - idle + Duration::from_millis(1)).await;
        }
    }
}

impl Watchdog for SoftWatchdog {
    fn feed(&self) {
        self.last_fed_ms.store(self.elapsed_ms(), Ordering::Relaxed);
    }
}
