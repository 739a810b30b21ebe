//! File generations and the producers that feed the delivery queue.
//!
//! The data log is a three-slot ring (`current`, `_1`, `_2`) that only
//! rotates once a snapshot of `current` has been delivered.
//! [`SnapshotFeeder`] takes the snapshots; [`LogSealer`] handles the
//! simpler alarm log, which is sealed and shipped whole.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::clock::{epoch_secs, Clock};
use crate::error::{Result, UplinkError};
use crate::queue::DeliveryQueue;

const COPY_CHUNK: usize = 1024;

// ---------------------------------------------------------------------------
// File helpers
// ---------------------------------------------------------------------------

/// Size in bytes; a missing file counts as empty.
pub fn file_size(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Copy `from` into a new file `to`.  A partially written destination is
/// removed.
pub fn copy_file(from: &Path, to: &Path) -> Result<u64> {
    let mut src = File::open(from).map_err(|e| UplinkError::local(from, e))?;
    let mut dst = File::create(to).map_err(|e| UplinkError::local(to, e))?;
    match pump(&mut src, &mut dst) {
        Ok(bytes) => Ok(bytes),
        Err(e) => {
            drop(dst);
            if let Err(rm) = fs::remove_file(to) {
                warn!(path = %to.display(), error = %rm, "partial copy left behind");
            }
            Err(UplinkError::local(to, e))
        }
    }
}

fn pump(src: &mut File, dst: &mut File) -> io::Result<u64> {
    let mut buf = [0u8; COPY_CHUNK];
    let mut total = 0u64;
    loop {
        let n = src.read(&mut buf)?;
        if n == 0 {
            break;
        }
        dst.write_all(&buf[..n])?;
        total += n as u64;
    }
    dst.sync_all()?;
    Ok(total)
}

/// First `<stem>_<n>.<ext>` in `dir` that does not exist yet, counting up
/// from `n`.
fn free_stamped_path(dir: &Path, stem: &str, ext: &str, mut n: i64) -> PathBuf {
    loop {
        let candidate = dir.join(format!("{stem}_{n}.{ext}"));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

// ---------------------------------------------------------------------------
// Generation set
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GenerationSet {
    dir: PathBuf,
    base: String,
}

impl GenerationSet {
    pub fn new(dir: impl Into<PathBuf>, base: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            base: base.into(),
        }
    }

    /// The data log of a device: `D_<id>.txt` and its generations.
    pub fn for_device(dir: impl Into<PathBuf>, device_id: &str) -> Self {
        Self::new(dir, format!("D_{device_id}"))
    }

    pub fn current(&self) -> PathBuf {
        self.dir.join(format!("{}.txt", self.base))
    }

    /// `n` = 1 or 2.
    pub fn generation(&self, n: u8) -> PathBuf {
        self.dir.join(format!("{}_{n}.txt", self.base))
    }

    /// Append `line` plus CRLF to `current`, creating it if needed.
    pub fn append_line(&self, line: &str) -> Result<()> {
        let path = self.current();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| UplinkError::local(&path, e))?;
        file.write_all(line.as_bytes())
            .and_then(|()| file.write_all(b"\r\n"))
            .map_err(|e| UplinkError::local(&path, e))
    }

    /// Shift `_1 -> _2`, `current -> _1` and start an empty `current`.
    /// Stops at the first failed rename; whatever moved stays moved.
    pub fn rotate_after_send(&self) -> Result<()> {
        let current = self.current();
        let gen1 = self.generation(1);
        let gen2 = self.generation(2);

        if gen2.exists() {
            if let Err(e) = fs::remove_file(&gen2) {
                warn!(path = %gen2.display(), error = %e, "old generation not removed, renaming over it");
            }
        }
        if gen1.exists() {
            fs::rename(&gen1, &gen2).map_err(|e| UplinkError::local(&gen1, e))?;
        }
        if current.exists() {
            fs::rename(&current, &gen1).map_err(|e| UplinkError::local(&current, e))?;
        }
        File::create(&current).map_err(|e| UplinkError::local(&current, e))?;

        info!(base = %self.base, "data log rotated");
        Ok(())
    }

    /// `<base>_UP_<epoch>.txt`, bumping the epoch past existing files.
    pub fn snapshot_path(&self, epoch: i64) -> PathBuf {
        free_stamped_path(&self.dir, &format!("{}_UP", self.base), "txt", epoch)
    }

    /// Epoch stamp of `path` if it names one of this set's snapshots.
    pub fn snapshot_epoch(&self, path: &Path) -> Option<i64> {
        let name = path.file_name()?.to_str()?;
        name.strip_prefix(&self.base)?
            .strip_prefix("_UP_")?
            .strip_suffix(".txt")?
            .parse()
            .ok()
    }

    /// Snapshots lying in the data directory, oldest first.
    pub fn snapshots_on_disk(&self) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut found: Vec<(i64, PathBuf)> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter_map(|path| self.snapshot_epoch(&path).map(|epoch| (epoch, path)))
            .collect();
        found.sort();
        found.into_iter().map(|(_, path)| path).collect()
    }
}

// ---------------------------------------------------------------------------
// Snapshot feeder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotPolicy {
    pub size_limit_bytes: u64,
    pub send_interval_ms: u64,
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self {
            size_limit_bytes: 100 * 1024,
            send_interval_ms: 3_600_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotTrigger {
    Size,
    Interval,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedOutcome {
    Idle,
    /// A snapshot is still queued; nothing new is taken.
    AwaitingDelivery,
    Enqueued {
        snapshot: PathBuf,
        trigger: SnapshotTrigger,
    },
    Failed,
}

/// Snapshots the data log into the queue and rotates it once the snapshot
/// is gone, which the queue only does after a confirmed delivery with
/// local deletion enabled.
pub struct SnapshotFeeder {
    generations: GenerationSet,
    remote_dir: String,
    policy: SnapshotPolicy,
    pending: Option<PathBuf>,
    /// Set once the in-flight snapshot of a previous run has been looked up.
    recovered: bool,
    last_interval_ms: u64,
}

impl SnapshotFeeder {
    pub fn new(generations: GenerationSet, remote_dir: impl Into<String>, policy: SnapshotPolicy, now_ms: u64) -> Self {
        Self {
            generations,
            remote_dir: remote_dir.into(),
            policy,
            pending: None,
            recovered: false,
            last_interval_ms: now_ms,
        }
    }

    pub fn generations(&self) -> &GenerationSet {
        &self.generations
    }

    pub fn pending(&self) -> Option<&Path> {
        self.pending.as_deref()
    }

    pub fn poll<C: Clock>(&mut self, queue: &mut DeliveryQueue<C>) -> FeedOutcome {
        let now = queue.now_ms();

        if !self.recovered {
            self.recovered = true;
            if self.pending.is_none() {
                self.pending = self.recover_pending(queue);
            }
        }

        if let Some(snapshot) = &self.pending {
            if snapshot.exists() {
                return FeedOutcome::AwaitingDelivery;
            }
            debug!(snapshot = %snapshot.display(), "snapshot delivered");
            if let Err(e) = self.generations.rotate_after_send() {
                error!(error = %e, "rotation after delivery failed, will retry");
                return FeedOutcome::Failed;
            }
            self.pending = None;
        }

        let current = self.generations.current();
        let size = file_size(&current);
        let trigger = if size >= self.policy.size_limit_bytes {
            SnapshotTrigger::Size
        } else if now.saturating_sub(self.last_interval_ms) >= self.policy.send_interval_ms {
            SnapshotTrigger::Interval
        } else {
            return FeedOutcome::Idle;
        };

        if size == 0 {
            debug!("data log empty, nothing to send this interval");
            self.last_interval_ms = now;
            return FeedOutcome::Idle;
        }

        let snapshot = self.generations.snapshot_path(epoch_secs());
        if let Err(e) = copy_file(&current, &snapshot) {
            error!(error = %e, "snapshot copy failed");
            return FeedOutcome::Failed;
        }
        if let Err(e) = queue.enqueue(&snapshot.to_string_lossy(), &self.remote_dir) {
            error!(snapshot = %snapshot.display(), error = %e, "snapshot not enqueued, removing it");
            if let Err(rm) = fs::remove_file(&snapshot) {
                warn!(snapshot = %snapshot.display(), error = %rm, "orphan snapshot left behind");
            }
            return FeedOutcome::Failed;
        }

        if trigger == SnapshotTrigger::Interval {
            self.last_interval_ms = now;
        }
        info!(snapshot = %snapshot.display(), bytes = size, ?trigger, "snapshot enqueued");
        self.pending = Some(snapshot.clone());
        FeedOutcome::Enqueued { snapshot, trigger }
    }

    /// The snapshot a previous run left in flight: the one still queued, or
    /// else the newest one on disk, which is queued again.
    fn recover_pending<C: Clock>(&self, queue: &mut DeliveryQueue<C>) -> Option<PathBuf> {
        let queued = queue
            .iter()
            .map(|task| PathBuf::from(&task.local_path))
            .find(|path| self.generations.snapshot_epoch(path).is_some());
        if let Some(snapshot) = queued {
            info!(snapshot = %snapshot.display(), "snapshot from a previous run still queued");
            return Some(snapshot);
        }

        let snapshot = self.generations.snapshots_on_disk().pop()?;
        match queue.enqueue(&snapshot.to_string_lossy(), &self.remote_dir) {
            Ok(()) => {
                warn!(snapshot = %snapshot.display(), "unqueued snapshot found on disk, queued it again");
                Some(snapshot)
            }
            Err(e) => {
                error!(snapshot = %snapshot.display(), error = %e, "leftover snapshot not queued");
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Log sealer
// ---------------------------------------------------------------------------

/// A side log that is shipped whole once it grows past a limit.
pub struct LogSealer {
    path: PathBuf,
    remote_dir: String,
    size_limit_bytes: u64,
}

impl LogSealer {
    pub fn new(path: impl Into<PathBuf>, remote_dir: impl Into<String>, size_limit_bytes: u64) -> Self {
        Self {
            path: path.into(),
            remote_dir: remote_dir.into(),
            size_limit_bytes,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ensure_exists(&self) -> Result<()> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map(drop)
            .map_err(|e| UplinkError::local(&self.path, e))
    }

    /// Seal and enqueue if the log has reached its limit.
    pub fn poll<C: Clock>(&self, queue: &mut DeliveryQueue<C>) -> Option<PathBuf> {
        if file_size(&self.path) < self.size_limit_bytes {
            return None;
        }
        match self.seal_now(queue) {
            Ok(sealed) => sealed,
            Err(e) => {
                error!(log = %self.path.display(), error = %e, "sealing log failed");
                None
            }
        }
    }

    /// Seal regardless of size.  An empty log is left alone.
    pub fn seal_now<C: Clock>(&self, queue: &mut DeliveryQueue<C>) -> Result<Option<PathBuf>> {
        if file_size(&self.path) == 0 {
            return Ok(None);
        }
        let sealed = self.sealed_path(epoch_secs());
        fs::rename(&self.path, &sealed).map_err(|e| UplinkError::local(&self.path, e))?;
        if let Err(e) = File::create(&self.path) {
            warn!(log = %self.path.display(), error = %e, "fresh log not created");
        }

        if let Err(e) = queue.enqueue(&sealed.to_string_lossy(), &self.remote_dir) {
            error!(sealed = %sealed.display(), "sealed log not enqueued, it stays on disk");
            return Err(e);
        }
        info!(sealed = %sealed.display(), "log sealed and enqueued");
        Ok(Some(sealed))
    }

    fn sealed_path(&self, epoch: i64) -> PathBuf {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| String::from("log"));
        let ext = self
            .path
            .extension()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| String::from("txt"));
        free_stamped_path(dir, &stem, &ext, epoch)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::queue::QueueSettings;

    fn queue_in(dir: &tempfile::TempDir, clock: &ManualClock) -> DeliveryQueue<ManualClock> {
        DeliveryQueue::open(dir.path().join("queue.txt"), QueueSettings::default(), clock.clone())
            .unwrap()
    }

    fn read(path: &Path) -> String {
        fs::read_to_string(path).unwrap()
    }

    // -- helpers ------------------------------------------------------------

    #[test]
    fn file_size_of_missing_file_is_zero() {
        assert_eq!(file_size(Path::new("/nonexistent/file")), 0);
    }

    #[test]
    fn append_line_creates_and_terminates() {
        let dir = tempfile::tempdir().unwrap();
        let set = GenerationSet::for_device(dir.path(), "AABB");
        set.append_line("one").unwrap();
        set.append_line("two").unwrap();
        assert_eq!(read(&dir.path().join("D_AABB.txt")), "one\r\ntwo\r\n");
    }

    #[test]
    fn copy_file_is_byte_exact() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let body: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&src, &body).unwrap();
        let dst = dir.path().join("dst");

        assert_eq!(copy_file(&src, &dst).unwrap(), 5000);
        assert_eq!(fs::read(&dst).unwrap(), body);
    }

    #[test]
    fn copy_from_missing_source_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let dst = dir.path().join("dst");
        let err = copy_file(&dir.path().join("missing"), &dst).unwrap_err();
        assert!(matches!(err, UplinkError::LocalIo { .. }));
        assert!(!dst.exists());
    }

    #[test]
    fn snapshot_path_skips_taken_names() {
        let dir = tempfile::tempdir().unwrap();
        let set = GenerationSet::for_device(dir.path(), "AA");
        fs::write(dir.path().join("D_AA_UP_100.txt"), b"").unwrap();
        fs::write(dir.path().join("D_AA_UP_101.txt"), b"").unwrap();
        assert_eq!(set.snapshot_path(100), dir.path().join("D_AA_UP_102.txt"));
        assert_eq!(set.snapshot_path(50), dir.path().join("D_AA_UP_50.txt"));
    }

    // -- rotation -----------------------------------------------------------

    #[test]
    fn rotation_shifts_generations() {
        let dir = tempfile::tempdir().unwrap();
        let set = GenerationSet::for_device(dir.path(), "AA");

        for cycle in 1..=4 {
            set.append_line(&format!("cycle {cycle}")).unwrap();
            let gen1_before = fs::read_to_string(set.generation(1)).ok();

            set.rotate_after_send().unwrap();

            assert_eq!(read(&set.current()), "");
            assert_eq!(read(&set.generation(1)), format!("cycle {cycle}\r\n"));
            assert_eq!(fs::read_to_string(set.generation(2)).ok(), gen1_before);
        }
    }

    #[test]
    fn rotation_from_nothing_creates_current() {
        let dir = tempfile::tempdir().unwrap();
        let set = GenerationSet::for_device(dir.path(), "AA");
        set.rotate_after_send().unwrap();
        assert!(set.current().exists());
        assert!(!set.generation(1).exists());
        assert!(!set.generation(2).exists());
    }

    // -- snapshot feeder ----------------------------------------------------

    fn small_policy() -> SnapshotPolicy {
        SnapshotPolicy {
            size_limit_bytes: 16,
            send_interval_ms: 60_000,
        }
    }

    #[test]
    fn size_trigger_enqueues_one_snapshot_at_a_time() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::new(0);
        let mut queue = queue_in(&dir, &clock);
        let set = GenerationSet::for_device(dir.path(), "AA");
        let mut feeder = SnapshotFeeder::new(set.clone(), "/Dane", small_policy(), 0);

        assert_eq!(feeder.poll(&mut queue), FeedOutcome::Idle);

        set.append_line("0123456789abcdef").unwrap();
        let FeedOutcome::Enqueued { snapshot, trigger } = feeder.poll(&mut queue) else {
            panic!("expected a snapshot");
        };
        assert_eq!(trigger, SnapshotTrigger::Size);
        assert_eq!(read(&snapshot), read(&set.current()));
        assert_eq!(queue.size(), 1);
        assert_eq!(queue.head().unwrap().local_path, snapshot.to_string_lossy());
        assert_eq!(queue.head().unwrap().remote_dir, "/Dane");

        set.append_line("more data while waiting").unwrap();
        assert_eq!(feeder.poll(&mut queue), FeedOutcome::AwaitingDelivery);
        assert_eq!(queue.size(), 1);
    }

    #[test]
    fn delivery_of_snapshot_rotates_the_log() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::new(0);
        let mut queue = queue_in(&dir, &clock);
        let set = GenerationSet::for_device(dir.path(), "AA");
        let mut feeder = SnapshotFeeder::new(set.clone(), "/Dane", small_policy(), 0);

        set.append_line("0123456789abcdef").unwrap();
        let FeedOutcome::Enqueued { snapshot, .. } = feeder.poll(&mut queue) else {
            panic!("expected a snapshot");
        };

        // the scheduler delivered it
        queue.complete_head();
        assert!(!snapshot.exists());

        assert_eq!(feeder.poll(&mut queue), FeedOutcome::Idle);
        assert!(feeder.pending().is_none());
        assert_eq!(read(&set.current()), "");
        assert_eq!(read(&set.generation(1)), "0123456789abcdef\r\n");
    }

    #[test]
    fn interval_trigger_only_advances_on_interval_sends() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::new(0);
        let mut queue = queue_in(&dir, &clock);
        let set = GenerationSet::for_device(dir.path(), "AA");
        let mut feeder = SnapshotFeeder::new(set.clone(), "/Dane", small_policy(), 0);

        set.append_line("tiny").unwrap();
        clock.set(59_999);
        assert_eq!(feeder.poll(&mut queue), FeedOutcome::Idle);

        clock.set(60_000);
        let FeedOutcome::Enqueued { trigger, .. } = feeder.poll(&mut queue) else {
            panic!("expected interval snapshot");
        };
        assert_eq!(trigger, SnapshotTrigger::Interval);

        queue.complete_head();
        assert_eq!(feeder.poll(&mut queue), FeedOutcome::Idle);

        // size-triggered cycle in between does not restart the interval
        set.append_line("0123456789abcdef").unwrap();
        clock.set(70_000);
        assert!(matches!(
            feeder.poll(&mut queue),
            FeedOutcome::Enqueued { trigger: SnapshotTrigger::Size, .. }
        ));
        queue.complete_head();
        assert_eq!(feeder.poll(&mut queue), FeedOutcome::Idle);

        set.append_line("tiny").unwrap();
        clock.set(119_999);
        assert_eq!(feeder.poll(&mut queue), FeedOutcome::Idle);
        clock.set(120_000);
        assert!(matches!(
            feeder.poll(&mut queue),
            FeedOutcome::Enqueued { trigger: SnapshotTrigger::Interval, .. }
        ));
    }

    #[test]
    fn restart_resumes_the_queued_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::new(0);
        let set = GenerationSet::for_device(dir.path(), "AA");
        let snapshot = {
            let mut queue = queue_in(&dir, &clock);
            let mut feeder = SnapshotFeeder::new(set.clone(), "/Dane", small_policy(), 0);
            set.append_line("0123456789abcdef").unwrap();
            let FeedOutcome::Enqueued { snapshot, .. } = feeder.poll(&mut queue) else {
                panic!("expected a snapshot");
            };
            snapshot
        };

        let mut queue = queue_in(&dir, &clock);
        let mut feeder = SnapshotFeeder::new(set.clone(), "/Dane", small_policy(), 0);
        assert_eq!(feeder.poll(&mut queue), FeedOutcome::AwaitingDelivery);
        assert_eq!(feeder.pending(), Some(snapshot.as_path()));
        assert_eq!(queue.size(), 1);

        queue.complete_head();
        assert_eq!(feeder.poll(&mut queue), FeedOutcome::Idle);
        assert_eq!(read(&set.generation(1)), "0123456789abcdef\r\n");
        assert_eq!(read(&set.current()), "");
    }

    #[test]
    fn restart_requeues_snapshot_left_only_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::new(0);
        let mut queue = queue_in(&dir, &clock);
        let set = GenerationSet::for_device(dir.path(), "AA");
        set.append_line("0123456789abcdef").unwrap();
        let older = dir.path().join("D_AA_UP_100.txt");
        let newer = dir.path().join("D_AA_UP_200.txt");
        fs::write(&older, "old").unwrap();
        fs::write(&newer, "new").unwrap();
        fs::write(dir.path().join("D_BB_UP_300.txt"), "other device").unwrap();

        let mut feeder = SnapshotFeeder::new(set.clone(), "/Dane", small_policy(), 0);
        assert_eq!(feeder.poll(&mut queue), FeedOutcome::AwaitingDelivery);
        assert_eq!(feeder.pending(), Some(newer.as_path()));
        assert_eq!(queue.size(), 1);
        assert_eq!(queue.head().unwrap().local_path, newer.to_string_lossy());
    }

    #[test]
    fn snapshot_names_are_recognised() {
        let set = GenerationSet::for_device("/data", "AA");
        assert_eq!(set.snapshot_epoch(Path::new("/data/D_AA_UP_1700000000.txt")), Some(1_700_000_000));
        assert_eq!(set.snapshot_epoch(&set.snapshot_path(42)), Some(42));
        assert_eq!(set.snapshot_epoch(Path::new("/data/D_AA.txt")), None);
        assert_eq!(set.snapshot_epoch(Path::new("/data/D_AA_1.txt")), None);
        assert_eq!(set.snapshot_epoch(Path::new("/data/D_AAB_UP_5.txt")), None);
        assert_eq!(set.snapshot_epoch(Path::new("/data/D_AA_UP_x.txt")), None);
    }

    #[test]
    fn empty_log_is_not_sent_on_interval() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::new(0);
        let mut queue = queue_in(&dir, &clock);
        let set = GenerationSet::for_device(dir.path(), "AA");
        let mut feeder = SnapshotFeeder::new(set, "/Dane", small_policy(), 0);

        clock.set(60_000);
        assert_eq!(feeder.poll(&mut queue), FeedOutcome::Idle);
        assert!(queue.is_empty());
    }

    #[test]
    fn rejected_enqueue_removes_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let settings = QueueSettings {
            capacity: 0,
            ..Default::default()
        };
        let mut queue =
            DeliveryQueue::open(dir.path().join("q.txt"), settings, ManualClock::new(0)).unwrap();
        let set = GenerationSet::for_device(dir.path(), "AA");
        let mut feeder = SnapshotFeeder::new(set.clone(), "/Dane", small_policy(), 0);
        set.append_line("0123456789abcdef").unwrap();

        assert_eq!(feeder.poll(&mut queue), FeedOutcome::Failed);

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains("_UP_"))
            .collect();
        assert!(leftovers.is_empty());
        assert!(feeder.pending().is_none());
    }

    // -- log sealer ---------------------------------------------------------

    #[test]
    fn sealer_waits_for_limit() {
        let dir = tempfile::tempdir().unwrap();
        let mut queue = queue_in(&dir, &ManualClock::new(0));
        let log = dir.path().join("alarmy_AA.txt");
        fs::write(&log, b"short").unwrap();
        let sealer = LogSealer::new(&log, "/Alarmy", 64);

        assert_eq!(sealer.poll(&mut queue), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn sealer_renames_recreates_and_enqueues() {
        let dir = tempfile::tempdir().unwrap();
        let mut queue = queue_in(&dir, &ManualClock::new(0));
        let log = dir.path().join("alarmy_AA.txt");
        fs::write(&log, vec![b'a'; 64]).unwrap();
        let sealer = LogSealer::new(&log, "/Alarmy", 64);

        let sealed = sealer.poll(&mut queue).expect("sealed");

        assert!(sealed
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("alarmy_AA_"));
        assert_eq!(fs::read(&sealed).unwrap().len(), 64);
        assert_eq!(file_size(&log), 0);
        assert!(log.exists());
        assert_eq!(queue.head().unwrap().remote_dir, "/Alarmy");
    }

    #[test]
    fn empty_log_is_never_sealed() {
        let dir = tempfile::tempdir().unwrap();
        let mut queue = queue_in(&dir, &ManualClock::new(0));
        let log = dir.path().join("alarmy_AA.txt");
        let sealer = LogSealer::new(&log, "/Alarmy", 64);
        sealer.ensure_exists().unwrap();

        assert_eq!(sealer.seal_now(&mut queue).unwrap(), None);
        assert!(queue.is_empty());
    }
}
