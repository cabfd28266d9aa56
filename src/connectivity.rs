//! Online/offline tracking and the reconnect trigger for queue drains.
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::coordinator::SubmissionCoordinator;
use crate::delivery::service_root;

#[derive(Debug)]
pub struct ConnectivityObserver {
    status: watch::Sender<bool>,
}

impl ConnectivityObserver {
    pub fn new(initially_online: bool) -> Self {
        let (status, _) = watch::channel(initially_online);
        Self { status }
    }

    pub fn is_online(&self) -> bool {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.status.subscribe()
    }

    /// Record the latest status. Returns `true` only for an offline to
    /// online transition.
    pub fn set_online(&self, online: bool) -> bool {
        let mut came_online = false;
        let changed = self.status.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            came_online = online;
            *current = online;
            true
        });
        if changed {
            info!(online, "connectivity changed");
        }
        came_online
    }
}

/// Drain the queue once each time the observer flips back to online.
pub fn spawn_reconnect_sync(
    observer: &ConnectivityObserver,
    coordinator: SubmissionCoordinator,
) -> JoinHandle<()> {
    let mut rx = observer.subscribe();
    // read before spawning so a flip that lands before the task first runs
    // still counts as a transition
    let mut was_online = *rx.borrow_and_update();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let online = *rx.borrow_and_update();
            if online && !was_online {
                info!("back online; draining offline queue");
                match coordinator.drain().await {
                    Ok(Some(delivered)) => debug!(delivered, "reconnect drain done"),
                    Ok(None) => debug!("reconnect drain skipped; another drain running"),
                    Err(err) => error!(?err, "reconnect drain failed"),
                }
            }
            was_online = online;
        }
    })
}

#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn check(&self) -> bool;
}

/// Reachability check against the attendance service's health endpoint.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    http: Client,
    url: Url,
}

impl HttpProbe {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let base = Url::parse(&cfg.service.base_url).context("invalid service.base_url")?;
        let url = service_root(base)
            .join(&cfg.service.health_path)
            .context("invalid service.health_path")?;
        Ok(Self::new(url, cfg.service.request_timeout()))
    }

    pub fn new(url: Url, timeout: Duration) -> Self {
        let http = Client::builder()
            .user_agent("anchor-checkin/0.1")
            .timeout(timeout)
            .build()
            .expect("reqwest client");
        Self { http, url }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn check(&self) -> bool {
        match self.http.get(self.url.clone()).send().await {
            Ok(res) => res.status().is_success(),
            Err(err) => {
                debug!(%err, "connectivity probe failed");
                false
            }
        }
    }
}

/// Feed probe results into the observer every `interval`.
pub fn spawn_probe_loop(
    observer: Arc<ConnectivityObserver>,
    probe: Arc<dyn ConnectivityProbe>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let online = probe.check().await;
            observer.set_online(online);
        }
    })
}
