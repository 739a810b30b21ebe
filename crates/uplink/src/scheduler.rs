//! Delivery scheduler: a cooperative tick that advances the queue head by at
//! most one upload session per call.
//!
//! ```text
//! head? ──no──▶ idle
//!   │ due? ──no──▶ idle
//!   │ link up? ──no──▶ defer head (no try charged)
//!   ▼
//! upload ──ok──▶ delete local copy, pop
//!    └──err──▶ tries+1 ──▶ back off, or drop at max_retries
//! ```
//!
//! Processing is strictly single-lane: a head that keeps failing holds back
//! everything behind it until it runs out of retries.

use std::path::Path;

use tracing::{debug, error, info, warn};

use crate::clock::{Clock, MonotonicClock};
use crate::error::{Result, UplinkError};
use crate::ftp::{FtpClient, UploadReport};
use crate::net::{Network, Watchdog};
use crate::queue::{DeliveryQueue, FailureOutcome, QueueStats};

/// Something that can deliver one local file into a remote directory.
#[allow(async_fn_in_trait)]
pub trait Uploader {
    async fn upload(&self, local: &Path, remote_dir: &str) -> Result<UploadReport>;
}

impl<N: Network, W: Watchdog> Uploader for FtpClient<N, W> {
    async fn upload(&self, local: &Path, remote_dir: &str) -> Result<UploadReport> {
        FtpClient::upload(self, local, remote_dir).await
    }
}

pub struct DeliveryScheduler<L, U, C = MonotonicClock> {
    queue: DeliveryQueue<C>,
    link: L,
    uploader: U,
}

impl<L: Network, U: Uploader, C: Clock> DeliveryScheduler<L, U, C> {
    pub fn new(queue: DeliveryQueue<C>, link: L, uploader: U) -> Self {
        Self {
            queue,
            link,
            uploader,
        }
    }

    /// Run at most one unit of queue work.  Returns true when an upload was
    /// attempted, whatever its outcome.
    pub async fn tick(&mut self) -> bool {
        let Some(task) = self.queue.head().cloned() else {
            return false;
        };
        if task.next_attempt_at_ms > self.queue.now_ms() {
            return false;
        }
        if !self.link.is_connected() {
            debug!(local = %task.local_path, "link down, deferring upload");
            self.queue.defer_head();
            return false;
        }

        info!(
            local = %task.local_path,
            dir = %task.remote_dir,
            attempt = task.tries.saturating_add(1),
            max = self.queue.settings().max_retries,
            "delivery attempt"
        );

        let result = self
            .uploader
            .upload(Path::new(&task.local_path), &task.remote_dir)
            .await;

        match result {
            Ok(report) => {
                info!(
                    local = %task.local_path,
                    remote = report.canonical_name.as_deref().unwrap_or(&report.remote_name),
                    bytes = report.bytes,
                    "delivered"
                );
                self.queue.complete_head();
            }
            Err(UplinkError::Offline) => {
                debug!(local = %task.local_path, "link dropped before upload, deferring");
                self.queue.defer_head();
                return false;
            }
            Err(e) => match self.queue.fail_head() {
                Some(FailureOutcome::Rescheduled {
                    tries, backoff_ms, ..
                }) => {
                    warn!(local = %task.local_path, tries, backoff_ms, error = %e, "delivery failed, backing off");
                }
                Some(FailureOutcome::Dropped(dropped)) => {
                    let gave_up = UplinkError::RetriesExhausted {
                        path: dropped.local_path,
                        tries: dropped.tries,
                    };
                    error!(error = %gave_up, last_error = %e, "delivery abandoned");
                }
                None => {}
            },
        }
        true
    }

    // -- queue facade -------------------------------------------------------

    pub fn enqueue(&mut self, local_path: &str, remote_dir: &str) -> Result<()> {
        self.queue.enqueue(local_path, remote_dir)
    }

    pub fn size(&self) -> usize {
        self.queue.size()
    }

    pub fn clear(&mut self) -> Result<()> {
        self.queue.clear()
    }

    pub fn stats_snapshot(&self) -> QueueStats {
        self.queue.stats_snapshot()
    }

    pub fn stats_json(&self) -> String {
        self.queue.stats_json()
    }

    pub fn set_max_retries(&mut self, max_retries: u8) {
        self.queue.set_max_retries(max_retries);
    }

    pub fn set_delete_local_on_success(&mut self, enabled: bool) {
        self.queue.set_delete_local_on_success(enabled);
    }

    pub fn queue(&self) -> &DeliveryQueue<C> {
        &self.queue
    }

    /// For producers that enqueue through their own logic.
    pub fn queue_mut(&mut self) -> &mut DeliveryQueue<C> {
        &mut self.queue
    }
}

// ===========================================================================
// Tests
// ===========================================================================
