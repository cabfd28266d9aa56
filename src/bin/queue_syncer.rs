use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use anchor_checkin::config;
use anchor_checkin::db;
use anchor_checkin::delivery::HttpAttendanceClient;
use anchor_checkin::{OfflineQueue, SubmissionCoordinator};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Deliver all offline-queued scans and exit when the queue is empty"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Give up after this many drain passes that still leave scans behind
    #[arg(long, default_value = "5")]
    max_passes: u32,

    /// Wait between passes, in milliseconds
    #[arg(long, default_value = "2000")]
    retry_delay_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let store = db::open_store(&cfg.database_url())
        .await
        .context("failed to open local queue store")?;
    let queue = OfflineQueue::new(Arc::new(store), cfg.app.queue_key.clone());
    let service = HttpAttendanceClient::from_config(&cfg)?;
    let coordinator = SubmissionCoordinator::start(Arc::new(service), queue).await?;

    let initial = coordinator.pending_count();
    info!(pending = initial, "starting offline queue sync");
    if initial == 0 {
        info!("no queued scans, exiting");
        return Ok(());
    }

    let mut total_delivered = 0usize;
    for pass in 1..=args.max_passes {
        match coordinator.drain().await {
            Ok(Some(delivered)) => {
                total_delivered += delivered;
                let pending = coordinator.pending_count();
                info!(pass, delivered, pending, "sync pass finished");
                if pending == 0 {
                    info!(total_delivered, "all queued scans delivered");
                    return Ok(());
                }
            }
            Ok(None) => warn!(pass, "another sync holds the queue; retrying"),
            Err(err) => error!(?err, pass, "sync pass failed"),
        }
        if pass < args.max_passes {
            tokio::time::sleep(Duration::from_millis(args.retry_delay_ms)).await;
        }
    }

    let pending = coordinator.refresh_pending().await?;
    warn!(
        total_delivered,
        pending,
        max_passes = args.max_passes,
        "giving up with scans still queued; they stay on disk for the next run"
    );
    Ok(())
}
