//! Persistent delivery queue.
//!
//! A bounded FIFO of [`DeliveryTask`]s held in memory and mirrored to a text
//! file after every mutation, one record per line:
//!
//! ```text
//! tries,backoffMs,nextAtMs,pct(remoteDir),pct(localPath)
//! ```
//!
//! The mirror is rewritten through a sibling temp file and a rename, so a
//! power cut leaves either the old or the new queue on disk.  Only the head
//! is ever worked on; see [`crate::scheduler`].

use std::collections::VecDeque;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, MonotonicClock};
use crate::error::{Result, UplinkError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSettings {
    pub capacity: usize,
    pub max_retries: u8,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Delay applied to the head while the link is down.  Costs no retry.
    pub offline_retry_ms: u64,
    pub delete_local_on_success: bool,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            capacity: 128,
            max_retries: 5,
            initial_backoff_ms: 5_000,
            max_backoff_ms: 120_000,
            offline_retry_ms: 3_000,
            delete_local_on_success: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryTask {
    pub local_path: String,
    pub remote_dir: String,
    pub tries: u8,
    pub backoff_ms: u64,
    /// Monotonic milliseconds; only meaningful within one boot.
    pub next_attempt_at_ms: u64,
}

impl DeliveryTask {
    fn to_record(&self) -> String {
        format!(
            "{},{},{},{},{}",
            self.tries,
            self.backoff_ms,
            self.next_attempt_at_ms,
            pct_encode(&self.remote_dir),
            pct_encode(&self.local_path)
        )
    }

    fn from_record(line: &str) -> Option<Self> {
        let mut fields = line.splitn(5, ',');
        let tries = fields.next()?.trim().parse().ok()?;
        let backoff_ms = fields.next()?.trim().parse().ok()?;
        let next_attempt_at_ms = fields.next()?.trim().parse().ok()?;
        let remote_dir = pct_decode(fields.next()?);
        let local_path = pct_decode(fields.next()?);
        if local_path.is_empty() {
            return None;
        }
        Some(Self {
            local_path,
            remote_dir,
            tries,
            backoff_ms,
            next_attempt_at_ms,
        })
    }
}

/// What a failed attempt did to the head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    Rescheduled {
        tries: u8,
        backoff_ms: u64,
        next_attempt_at_ms: u64,
    },
    /// Retries exhausted; the task is gone from the queue.
    Dropped(DeliveryTask),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub size: usize,
    /// Milliseconds until the head is due; `None` when empty.
    pub next_due_ms: Option<u64>,
    pub items: Vec<QueueItemView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueItemView {
    pub local: String,
    pub dir: String,
    pub tries: u8,
    pub backoff_ms: u64,
    pub next_at_ms: u64,
    pub due_in_ms: u64,
}

pub struct DeliveryQueue<C = MonotonicClock> {
    path: PathBuf,
    tasks: VecDeque<DeliveryTask>,
    settings: QueueSettings,
    clock: C,
}

impl<C: Clock> DeliveryQueue<C> {
    /// Load the queue mirrored at `path`, creating an empty mirror if none
    /// exists yet.
    pub fn open(path: impl Into<PathBuf>, settings: QueueSettings, clock: C) -> Result<Self> {
        let mut queue = Self {
            path: path.into(),
            tasks: VecDeque::new(),
            settings,
            clock,
        };
        queue.load()?;
        Ok(queue)
    }

    fn load(&mut self) -> Result<()> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.persist()?;
                info!(path = %self.path.display(), "created empty delivery queue");
                return Ok(());
            }
            Err(source) => {
                return Err(UplinkError::Persist {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let now = self.clock.now_ms();
        let initial = self.settings.initial_backoff_ms;
        let max = self.settings.max_backoff_ms.max(initial);
        let mut skipped = 0usize;

        for line in text.lines().map(|l| l.trim_end_matches('\r')) {
            if line.trim().is_empty() {
                continue;
            }
            if self.tasks.len() >= self.settings.capacity {
                warn!(capacity = self.settings.capacity, "queue mirror exceeds capacity, extra records ignored");
                break;
            }
            let Some(mut task) = DeliveryTask::from_record(line) else {
                skipped += 1;
                continue;
            };
            task.backoff_ms = task.backoff_ms.clamp(initial, max);
            // The monotonic clock restarted at boot.
            if task.next_attempt_at_ms > now.saturating_add(task.backoff_ms) {
                task.next_attempt_at_ms = now;
            }
            self.tasks.push_back(task);
        }

        if skipped > 0 {
            warn!(skipped, path = %self.path.display(), "malformed queue records skipped");
        }
        info!(path = %self.path.display(), tasks = self.tasks.len(), "delivery queue loaded");
        Ok(())
    }

    /// Rewrite the mirror from the in-memory queue.
    pub fn persist(&self) -> Result<()> {
        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let write = || -> io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            for task in &self.tasks {
                writeln!(file, "{}", task.to_record())?;
            }
            file.sync_all()?;
            fs::rename(&tmp, &self.path)
        };
        write().map_err(|source| UplinkError::Persist {
            path: self.path.clone(),
            source,
        })
    }

    /// Mutations keep their in-memory effect even when the mirror cannot be
    /// written.
    fn persist_logged(&self) {
        if let Err(e) = self.persist() {
            error!(error = %e, "queue mirror not updated");
        }
    }

    // -- producer side ------------------------------------------------------

    /// Append a task due immediately.
    pub fn enqueue(&mut self, local_path: &str, remote_dir: &str) -> Result<()> {
        if local_path.is_empty() {
            return Err(UplinkError::EmptyPath);
        }
        if self.tasks.len() >= self.settings.capacity {
            warn!(local = local_path, capacity = self.settings.capacity, "delivery queue full");
            return Err(UplinkError::QueueFull {
                capacity: self.settings.capacity,
            });
        }
        self.tasks.push_back(DeliveryTask {
            local_path: local_path.to_string(),
            remote_dir: remote_dir.to_string(),
            tries: 0,
            backoff_ms: self.settings.initial_backoff_ms,
            next_attempt_at_ms: self.clock.now_ms(),
        });
        self.persist_logged();
        info!(local = local_path, dir = remote_dir, size = self.tasks.len(), "task enqueued");
        Ok(())
    }

    // -- head operations ----------------------------------------------------

    pub fn head(&self) -> Option<&DeliveryTask> {
        self.tasks.front()
    }

    pub fn is_head_due(&self) -> bool {
        self.head()
            .is_some_and(|t| t.next_attempt_at_ms <= self.clock.now_ms())
    }

    /// Push the head back by the offline delay without charging a try.
    pub fn defer_head(&mut self) {
        let at = self.clock.now_ms().saturating_add(self.settings.offline_retry_ms);
        let Some(task) = self.tasks.front_mut() else {
            return;
        };
        task.next_attempt_at_ms = at;
        self.persist_logged();
    }

    /// The head was delivered: delete its local file if configured, pop it
    /// and persist.
    pub fn complete_head(&mut self) -> Option<DeliveryTask> {
        let task = self.tasks.pop_front()?;
        if self.settings.delete_local_on_success {
            match fs::remove_file(&task.local_path) {
                Ok(()) => debug!(local = %task.local_path, "local copy removed"),
                Err(e) => warn!(local = %task.local_path, error = %e, "could not remove delivered file"),
            }
        }
        self.persist_logged();
        Some(task)
    }

    /// The head failed: charge a try, then either back off or drop it.
    pub fn fail_head(&mut self) -> Option<FailureOutcome> {
        let now = self.clock.now_ms();
        let max_retries = self.settings.max_retries;
        let max_backoff = self.settings.max_backoff_ms;

        let head = self.tasks.front_mut()?;
        head.tries = head.tries.saturating_add(1);

        let outcome = if head.tries >= max_retries {
            let task = self.tasks.pop_front()?;
            FailureOutcome::Dropped(task)
        } else {
            head.backoff_ms = next_backoff(head.backoff_ms, max_backoff);
            head.next_attempt_at_ms = now.saturating_add(head.backoff_ms);
            FailureOutcome::Rescheduled {
                tries: head.tries,
                backoff_ms: head.backoff_ms,
                next_attempt_at_ms: head.next_attempt_at_ms,
            }
        };
        self.persist_logged();
        Some(outcome)
    }

    // -- maintenance --------------------------------------------------------

    pub fn clear(&mut self) -> Result<()> {
        self.tasks.clear();
        info!("delivery queue cleared");
        self.persist()
    }

    pub fn size(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeliveryTask> {
        self.tasks.iter()
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    pub fn set_max_retries(&mut self, max_retries: u8) {
        self.settings.max_retries = max_retries;
    }

    pub fn set_delete_local_on_success(&mut self, enabled: bool) {
        self.settings.delete_local_on_success = enabled;
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn stats_snapshot(&self) -> QueueStats {
        let now = self.clock.now_ms();
        let items: Vec<QueueItemView> = self
            .tasks
            .iter()
            .map(|t| QueueItemView {
                local: t.local_path.clone(),
                dir: t.remote_dir.clone(),
                tries: t.tries,
                backoff_ms: t.backoff_ms,
                next_at_ms: t.next_attempt_at_ms,
                due_in_ms: t.next_attempt_at_ms.saturating_sub(now),
            })
            .collect();
        QueueStats {
            size: items.len(),
            next_due_ms: items.first().map(|i| i.due_in_ms),
            items,
        }
    }

    pub fn stats_json(&self) -> String {
        serde_json::to_string(&self.stats_snapshot()).unwrap_or_else(|e| {
            warn!(error = %e, "queue stats not serialisable");
            String::from("{}")
        })
    }
}

fn next_backoff(current: u64, max: u64) -> u64 {
    current.saturating_mul(2).min(max)
}

// ---------------------------------------------------------------------------
// Percent encoding for record fields
// ---------------------------------------------------------------------------

fn pct_encode(s: &str) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'/' | b'_' | b'.' | b'-') {
            out.push(char::from(b));
        } else {
            out.push('%');
            out.push(char::from(HEX[usize::from(b >> 4)]));
            out.push(char::from(HEX[usize::from(b & 0x0f)]));
        }
    }
    out
}

/// Accepts either hex case; malformed escapes pass through untouched.
fn pct_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let (Some(hi), Some(lo)) = (
                bytes.get(i + 1).and_then(|b| hex_val(*b)),
                bytes.get(i + 2).and_then(|b| hex_val(*b)),
            ) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_val(b: u8) -> Option<u8> {
    char::from(b).to_digit(16).map(|d| d as u8)
}

// ===========================================================================
// Tests
// ===========================================================================
