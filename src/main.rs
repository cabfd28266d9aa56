use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use anchor_checkin::capture::{CaptureError, CaptureState, FallbackDetector, NoCamera, Scanner};
use anchor_checkin::config::{self, Config};
use anchor_checkin::connectivity::{self, ConnectivityObserver, HttpProbe};
use anchor_checkin::db;
use anchor_checkin::delivery::HttpAttendanceClient;
use anchor_checkin::{AttendancePayload, OfflineQueue, SubmissionCoordinator, SubmissionOutcome};

#[derive(Debug, Parser)]
#[command(author, version, about = "Anchor chapter check-in kiosk")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check in a member
    Member {
        #[arg(long)]
        name: String,
        #[arg(long)]
        id: String,
    },
    /// Check in a guest
    Guest {
        #[arg(long)]
        name: String,
        #[arg(long)]
        referrer: String,
    },
    /// Submit scanned or pasted payload text as-is
    Text { payload: String },
    /// Show queued scans
    Status,
    /// Run one drain pass over the offline queue
    Sync,
    /// Kiosk loop: keep syncing in the background, read manual entries from stdin
    Run,
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

    match args.command {
        Command::Member { name, id } => report(coordinator.submit_member(&name, &id).await?),
        Command::Guest { name, referrer } => {
            report(coordinator.submit_guest(&name, &referrer).await?)
        }
        Command::Text { payload } => report(coordinator.submit_text(&payload).await?),
        Command::Status => {
            let entries = coordinator.queue().load().await?;
            println!("{} scan(s) pending", entries.len());
            for entry in entries {
                let who = AttendancePayload::parse(&entry.payload)
                    .map(|p| format!("{} ({})", p.name(), p.kind().as_str()))
                    .unwrap_or_else(|| "manual entry".to_string());
                println!("  {}  {}  {}", entry.enqueued_at.to_rfc3339(), entry.id, who);
            }
        }
        Command::Sync => match coordinator.drain().await? {
            Some(delivered) => println!(
                "delivered {} scan(s), {} pending",
                delivered,
                coordinator.pending_count()
            ),
            None => println!("a sync is already running"),
        },
        Command::Run => run(&cfg, coordinator).await?,
    }

    Ok(())
}

fn report(outcome: SubmissionOutcome) {
    match outcome {
        SubmissionOutcome::Delivered { message } => println!("{}", message),
        SubmissionOutcome::Queued { id } => {
            println!("Saved locally as {}, will sync when back online", id)
        }
    }
}

async fn run(cfg: &Config, coordinator: SubmissionCoordinator) -> Result<()> {
    let observer = Arc::new(ConnectivityObserver::new(false));
    let probe = HttpProbe::from_config(cfg)?;
    connectivity::spawn_probe_loop(
        observer.clone(),
        Arc::new(probe),
        cfg.service.probe_interval(),
    );
    connectivity::spawn_reconnect_sync(&observer, coordinator.clone());
    coordinator.spawn_periodic_sync(cfg.app.sync_interval(), observer.subscribe());

    let mut notices = coordinator.subscribe_notices();
    tokio::spawn(async move {
        while let Ok(notice) = notices.recv().await {
            println!("» {}", notice.text());
        }
    });

    // This host has no camera; the scanner reports it and manual entry takes over.
    let scanner = Scanner::new(
        Arc::new(NoCamera::new(CaptureError::NoCamera)),
        Arc::new(FallbackDetector::new()),
        coordinator.notice_sender(),
    )
    .with_repeat_cooldown(cfg.scanner.repeat_cooldown());
    if let CaptureState::Ready(mut session) = scanner.activate().await {
        let scan_coordinator = coordinator.clone();
        let poll = cfg.scanner.poll_interval();
        tokio::spawn(async move {
            loop {
                if let Err(err) = scan_coordinator.submit_next_scan(&mut session, poll).await {
                    error!(?err, "scanner stopped");
                    break;
                }
            }
        });
    }

    info!(pending = coordinator.pending_count(), "kiosk ready; enter one payload per line");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        if let Err(err) = coordinator.submit_text(&line).await {
            warn!(%err, "entry not submitted");
        }
    }

    info!("stdin closed; final sync before exit");
    if let Err(err) = coordinator.drain().await {
        error!(?err, "final drain failed");
    }
    Ok(())
}
