mod config;
mod link;
mod record;
mod watchdog;

use anyhow::{Context, Result};
use std::{env, sync::Arc, time::Duration};
use time::OffsetDateTime;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use telemetry_uplink::{
    DeliveryQueue, DeliveryScheduler, FtpClient, GenerationSet, LogSealer, MonotonicClock,
    SnapshotFeeder, Watchdog,
};

use config::Config;
use link::LinkMonitor;
use watchdog::SoftWatchdog;

type Scheduler = DeliveryScheduler<LinkMonitor, FtpClient<LinkMonitor, Arc<SoftWatchdog>>>;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "node.toml".to_string());
    let config = config::load(&config_path)?;

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data dir: {}", data_dir.display()))?;

    let link = LinkMonitor::new(config.link.interface.clone());
    let device_id = link.resolve_device_id(config.device.id.as_deref());
    info!(
        device = %device_id,
        host = %config.ftp.host,
        port = config.ftp.port,
        dir = %config.ftp.dir,
        interface = ?link.interface(),
        "telemetry node starting"
    );

    if !config.queue.delete_local_on_success {
        warn!("delete_local_on_success is off: snapshots are never removed, so the data log will not rotate");
    }

    let queue = DeliveryQueue::open(config.queue_path(), config.queue_settings(), MonotonicClock::new())
        .with_context(|| format!("failed to open queue: {}", config.queue_path().display()))?;

    let watchdog = Arc::new(SoftWatchdog::new(Duration::from_secs(config.node.watchdog_sec)));
    let client = FtpClient::new(link.clone(), config.ftp_settings(&device_id))
        .with_watchdog(Arc::clone(&watchdog));
    let mut scheduler = DeliveryScheduler::new(queue, link, client);

    let now_ms = scheduler.queue().now_ms();
    let mut feeder = SnapshotFeeder::new(
        GenerationSet::for_device(&data_dir, &device_id),
        config.ftp.dir.clone(),
        config.snapshot_policy(),
        now_ms,
    );
    let sealer = LogSealer::new(
        config.alarm_log_path(&device_id),
        config.ftp.dir.clone(),
        config.alarm_log.size_limit_bytes,
    );
    sealer
        .ensure_exists()
        .with_context(|| format!("failed to create alarm log: {}", sealer.path().display()))?;

    tokio::select! {
        res = run(&config, &device_id, &mut scheduler, &mut feeder, &sealer, &watchdog) => res,
        _ = watchdog.starved() => {
            error!(
                timeout_s = watchdog.timeout().as_secs(),
                "watchdog starved, exiting for restart"
            );
            std::process::exit(1);
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down, queue is persisted");
            Ok(())
        }
    }
}

async fn run(
    config: &Config,
    device_id: &str,
    scheduler: &mut Scheduler,
    feeder: &mut SnapshotFeeder,
    sealer: &LogSealer,
    watchdog: &SoftWatchdog,
) -> Result<()> {
    let started = Instant::now();
    let record_every = Duration::from_secs(config.node.record_every_s);
    let mut next_record = started;

    loop {
        if Instant::now() >= next_record {
            write_heartbeat(feeder.generations(), device_id, started, scheduler.size());
            debug!(stats = %scheduler.stats_json(), "queue state");
            next_record += record_every;
        }

        feeder.poll(scheduler.queue_mut());
        sealer.poll(scheduler.queue_mut());

        scheduler.tick().await;
        watchdog.feed();

        sleep(config.tick_interval()).await;
    }
}

fn write_heartbeat(log: &GenerationSet, device_id: &str, started: Instant, queue_size: usize) {
    let line = match record::heartbeat_record(
        device_id,
        OffsetDateTime::now_utc(),
        started.elapsed().as_secs(),
        queue_size,
    ) {
        Ok(line) => line,
        Err(e) => {
            warn!(error = %e, "heartbeat record not built");
            return;
        }
    };
    if let Err(e) = log.append_line(&line) {
        warn!(log = %log.current().display(), error = %e, "heartbeat not written");
    }
}
