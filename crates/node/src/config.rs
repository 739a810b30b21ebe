//! TOML config file loading, environment overrides and validation.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use telemetry_uplink::{FtpSettings, FtpTimeouts, QueueSettings, SnapshotPolicy};

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceSection,
    pub ftp: FtpSection,
    pub queue: QueueSection,
    pub snapshot: SnapshotSection,
    pub alarm_log: AlarmLogSection,
    pub link: LinkSection,
    pub node: NodeSection,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DeviceSection {
    /// Goes into every file name.  Falls back to the link's MAC address.
    pub id: Option<String>,
    pub data_dir: String,
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            id: None,
            data_dir: "data".into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct FtpSection {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub dir: String,
    pub timeouts: FtpTimeouts,
}

impl Default for FtpSection {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 21,
            user: String::new(),
            pass: String::new(),
            dir: "/Dane".into(),
            timeouts: FtpTimeouts::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct QueueSection {
    /// Relative paths live under `device.data_dir`.
    pub file: String,
    pub capacity: usize,
    pub max_retries: u8,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub offline_retry_ms: u64,
    pub delete_local_on_success: bool,
}

impl Default for QueueSection {
    fn default() -> Self {
        let d = QueueSettings::default();
        Self {
            file: "queue.txt".into(),
            capacity: d.capacity,
            max_retries: d.max_retries,
            initial_backoff_ms: d.initial_backoff_ms,
            max_backoff_ms: d.max_backoff_ms,
            offline_retry_ms: d.offline_retry_ms,
            delete_local_on_success: d.delete_local_on_success,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SnapshotSection {
    pub size_limit_bytes: u64,
    pub send_interval_sec: u64,
}

impl Default for SnapshotSection {
    fn default() -> Self {
        Self {
            size_limit_bytes: 100 * 1024,
            send_interval_sec: 3600,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AlarmLogSection {
    /// Defaults to `alarmy_<device id>.txt` in the data directory.
    pub path: Option<String>,
    pub size_limit_bytes: u64,
}

impl Default for AlarmLogSection {
    fn default() -> Self {
        Self {
            path: None,
            size_limit_bytes: 50 * 1024,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LinkSection {
    /// Interface whose operstate gates uploads.  Unset = always up.
    pub interface: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    pub tick_ms: u64,
    pub record_every_s: u64,
    pub watchdog_sec: u64,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            tick_ms: 250,
            record_every_s: 300,
            watchdog_sec: 60,
        }
    }
}

// ---------------------------------------------------------------------------
// Derived settings
// ---------------------------------------------------------------------------

impl Config {
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.device.data_dir)
    }

    pub fn queue_path(&self) -> PathBuf {
        self.data_dir().join(&self.queue.file)
    }

    pub fn alarm_log_path(&self, device_id: &str) -> PathBuf {
        match &self.alarm_log.path {
            Some(path) => self.data_dir().join(path),
            None => self.data_dir().join(format!("alarmy_{device_id}.txt")),
        }
    }

    pub fn queue_settings(&self) -> QueueSettings {
        let q = &self.queue;
        QueueSettings {
            capacity: q.capacity,
            max_retries: q.max_retries,
            initial_backoff_ms: q.initial_backoff_ms,
            max_backoff_ms: q.max_backoff_ms,
            offline_retry_ms: q.offline_retry_ms,
            delete_local_on_success: q.delete_local_on_success,
        }
    }

    pub fn ftp_settings(&self, device_id: &str) -> FtpSettings {
        let f = &self.ftp;
        FtpSettings::new(&f.host, f.port, &f.user, &f.pass)
            .with_device_id(device_id)
            .with_timeouts(f.timeouts)
    }

    pub fn snapshot_policy(&self) -> SnapshotPolicy {
        SnapshotPolicy {
            size_limit_bytes: self.snapshot.size_limit_bytes,
            send_interval_ms: self.snapshot.send_interval_sec.saturating_mul(1000),
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.node.tick_ms)
    }
}

// ---------------------------------------------------------------------------
// Environment overrides
// ---------------------------------------------------------------------------

impl Config {
    /// Apply `FTP_HOST`, `FTP_PORT`, `FTP_USER`, `FTP_PASS`, `NODE_ID` and
    /// `DATA_DIR` on top of the file.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(host) = get("FTP_HOST") {
            self.ftp.host = host;
        }
        if let Some(port) = get("FTP_PORT").and_then(|s| s.parse().ok()) {
            self.ftp.port = port;
        }
        if let Some(user) = get("FTP_USER") {
            self.ftp.user = user;
        }
        if let Some(pass) = get("FTP_PASS") {
            self.ftp.pass = pass;
        }
        if let Some(id) = get("NODE_ID") {
            self.device.id = Some(id);
        }
        if let Some(dir) = get("DATA_DIR") {
            self.device.data_dir = dir;
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all sections. Returns `Ok(())` or an error describing every
    /// violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_device(&mut errors);
        self.validate_ftp(&mut errors);
        self.validate_queue(&mut errors);
        self.validate_producers(&mut errors);
        self.validate_node(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_device(&self, errors: &mut Vec<String>) {
        if let Some(id) = &self.device.id {
            if id.is_empty() {
                errors.push("device.id is empty".into());
            } else if !id.chars().all(|c| c.is_ascii_alphanumeric()) {
                errors.push(format!(
                    "device.id '{id}' must be ASCII letters and digits only"
                ));
            }
        }
        if self.device.data_dir.trim().is_empty() {
            errors.push("device.data_dir is empty".into());
        }
    }

    fn validate_ftp(&self, errors: &mut Vec<String>) {
        let f = &self.ftp;
        if f.host.trim().is_empty() {
            errors.push("ftp.host is empty".into());
        }
        if f.port == 0 {
            errors.push("ftp.port must be non-zero".into());
        }
        if f.user.trim().is_empty() {
            errors.push("ftp.user is empty".into());
        }

        let t = &f.timeouts;
        let named = [
            ("connect_ms", t.connect_ms),
            ("reply_ms", t.reply_ms),
            ("epsv_ms", t.epsv_ms),
            ("pasv_ms", t.pasv_ms),
            ("preliminary_ms", t.preliminary_ms),
            ("transfer_end_ms", t.transfer_end_ms),
            ("abort_ms", t.abort_ms),
            ("drain_ms", t.drain_ms),
            ("drain_quiet_ms", t.drain_quiet_ms),
            ("stall_ms", t.stall_ms),
            ("listing_ms", t.listing_ms),
        ];
        for (name, value) in named {
            if value == 0 {
                errors.push(format!("ftp.timeouts.{name} must be positive"));
            }
        }
    }

    fn validate_queue(&self, errors: &mut Vec<String>) {
        let q = &self.queue;
        if q.file.trim().is_empty() {
            errors.push("queue.file is empty".into());
        }
        if q.capacity == 0 {
            errors.push("queue.capacity must be positive".into());
        }
        if q.max_retries == 0 {
            errors.push("queue.max_retries must be positive".into());
        }
        if q.initial_backoff_ms == 0 {
            errors.push("queue.initial_backoff_ms must be positive".into());
        }
        if q.max_backoff_ms < q.initial_backoff_ms {
            errors.push(format!(
                "queue.max_backoff_ms ({}) is below initial_backoff_ms ({})",
                q.max_backoff_ms, q.initial_backoff_ms
            ));
        }
    }

    fn validate_producers(&self, errors: &mut Vec<String>) {
        if self.snapshot.size_limit_bytes == 0 {
            errors.push("snapshot.size_limit_bytes must be positive".into());
        }
        if self.snapshot.send_interval_sec == 0 {
            errors.push("snapshot.send_interval_sec must be positive".into());
        }
        if self.alarm_log.size_limit_bytes == 0 {
            errors.push("alarm_log.size_limit_bytes must be positive".into());
        }
    }

    fn validate_node(&self, errors: &mut Vec<String>) {
        let n = &self.node;
        if n.tick_ms == 0 {
            errors.push("node.tick_ms must be positive".into());
        }
        if n.record_every_s == 0 {
            errors.push("node.record_every_s must be positive".into());
        }
        if n.watchdog_sec == 0 {
            errors.push("node.watchdog_sec must be positive".into());
        } else if n.watchdog_sec.saturating_mul(1000) <= self.ftp.timeouts.transfer_end_ms {
            errors.push(format!(
                "node.watchdog_sec ({}) must outlast ftp.timeouts.transfer_end_ms ({})",
                n.watchdog_sec, self.ftp.timeouts.transfer_end_ms
            ));
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read and parse a TOML config file, apply environment overrides, and
/// validate the result.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let mut config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config.apply_env();
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
