//! Turns payload text into a delivered or queued attendance record, and
//! drains the offline queue.
use crate::capture::{CaptureError, ScanSession};
use crate::delivery::AttendanceService;
use crate::model::{Notice, SubmissionOutcome};
use crate::payload::{build_guest_payload, build_member_payload, PayloadError};
use crate::queue::OfflineQueue;
use crate::store::StorageError;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

const NOTICE_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum CheckinError {
    #[error("validation failed: {0}")]
    Validation(#[from] PayloadError),
    #[error("could not persist scan: {0}")]
    Storage(#[from] StorageError),
    #[error("scanner stopped: {0}")]
    Capture(#[from] CaptureError),
}

/// Cheap to clone; clones share the queue, the drain guard and the channels.
#[derive(Clone)]
pub struct SubmissionCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    service: Arc<dyn AttendanceService>,
    queue: OfflineQueue,
    drain_guard: Mutex<()>,
    pending: watch::Sender<usize>,
    notices: broadcast::Sender<Notice>,
}

impl SubmissionCoordinator {
    pub fn new(service: Arc<dyn AttendanceService>, queue: OfflineQueue) -> Self {
        let (pending, _) = watch::channel(0);
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                service,
                queue,
                drain_guard: Mutex::new(()),
                pending,
                notices,
            }),
        }
    }

    /// Build the coordinator and seed the pending mirror from storage.
    pub async fn start(
        service: Arc<dyn AttendanceService>,
        queue: OfflineQueue,
    ) -> Result<Self, StorageError> {
        let coordinator = Self::new(service, queue);
        coordinator.refresh_pending().await?;
        Ok(coordinator)
    }

    pub fn queue(&self) -> &OfflineQueue {
        &self.inner.queue
    }

    /// Last known number of queued scans. Display only; storage is the
    /// source of truth.
    pub fn pending_count(&self) -> usize {
        *self.inner.pending.borrow()
    }

    pub fn subscribe_pending(&self) -> watch::Receiver<usize> {
        self.inner.pending.subscribe()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.inner.notices.subscribe()
    }

    pub fn notice_sender(&self) -> broadcast::Sender<Notice> {
        self.inner.notices.clone()
    }

    pub async fn refresh_pending(&self) -> Result<usize, StorageError> {
        let pending = self.inner.queue.len().await?;
        self.inner.pending.send_replace(pending);
        Ok(pending)
    }

    fn notify(&self, notice: Notice) {
        debug!(notice = %notice.text(), "notice");
        // no subscribers is fine
        let _ = self.inner.notices.send(notice);
    }

    /// Attempt one delivery; on any failure the payload is queued offline.
    /// Only a storage failure while queueing is returned as an error.
    #[instrument(skip_all)]
    pub async fn submit(&self, payload: &str) -> Result<SubmissionOutcome, CheckinError> {
        match self.inner.service.submit_attendance(payload).await {
            Ok(message) => {
                info!("scan delivered");
                self.notify(Notice::Delivered {
                    message: message.clone(),
                });
                match self.refresh_pending().await {
                    Ok(pending) if pending > 0 => {
                        debug!(pending, "delivery succeeded with backlog; draining");
                        self.spawn_drain();
                    }
                    Ok(_) => {}
                    Err(err) => warn!(?err, "could not read offline queue after delivery"),
                }
                Ok(SubmissionOutcome::Delivered { message })
            }
            Err(err) => {
                warn!(?err, "delivery failed; saving scan offline");
                let (entry, pending) = self.inner.queue.enqueue(payload).await?;
                self.inner.pending.send_replace(pending);
                info!(id = %entry.id, pending, "scan saved offline");
                self.notify(Notice::SavedOffline { pending });
                Ok(SubmissionOutcome::Queued { id: entry.id })
            }
        }
    }

    /// Manual entry: forwarded verbatim, only blank input is refused.
    pub async fn submit_text(&self, text: &str) -> Result<SubmissionOutcome, CheckinError> {
        if text.trim().is_empty() {
            return Err(self.reject(PayloadError::EmptyField("payload")));
        }
        self.submit(text).await
    }

    pub async fn submit_member(
        &self,
        name: &str,
        membership_id: &str,
    ) -> Result<SubmissionOutcome, CheckinError> {
        let payload = build_member_payload(name, membership_id).map_err(|e| self.reject(e))?;
        self.submit(&payload).await
    }

    pub async fn submit_guest(
        &self,
        name: &str,
        referrer: &str,
    ) -> Result<SubmissionOutcome, CheckinError> {
        let payload = build_guest_payload(name, referrer).map_err(|e| self.reject(e))?;
        self.submit(&payload).await
    }

    fn reject(&self, err: PayloadError) -> CheckinError {
        warn!(%err, "submission rejected before delivery");
        self.notify(Notice::ValidationFailed {
            reason: err.to_string(),
        });
        CheckinError::Validation(err)
    }

    /// Wait for the next decoded code from `session` and submit it.
    pub async fn submit_next_scan(
        &self,
        session: &mut ScanSession,
        poll_interval: Duration,
    ) -> Result<SubmissionOutcome, CheckinError> {
        let code = session.next_code(poll_interval).await?;
        self.submit_text(&code).await
    }

    /// One pass over the offline queue.
    ///
    /// Every entry present at the start is attempted in enqueue order; a
    /// failure keeps that entry and moves on. Delivered ids are then removed
    /// from the latest persisted list in one write.
    ///
    /// Returns `Some(delivered)` or `None` when another pass was already
    /// running. `Some(0)` does not tell an empty queue from a pass where
    /// everything failed; compare [`pending_count`](Self::pending_count).
    #[instrument(skip_all)]
    pub async fn drain(&self) -> Result<Option<usize>, StorageError> {
        let Ok(_guard) = self.inner.drain_guard.try_lock() else {
            debug!("drain already in flight; trigger ignored");
            return Ok(None);
        };

        let snapshot = self.inner.queue.load().await?;
        if snapshot.is_empty() {
            self.inner.pending.send_replace(0);
            return Ok(Some(0));
        }

        info!(queued = snapshot.len(), "draining offline queue");
        let mut delivered: HashSet<String> = HashSet::new();
        for entry in &snapshot {
            match self.inner.service.submit_attendance(&entry.payload).await {
                Ok(message) => {
                    debug!(id = %entry.id, %message, "queued scan delivered");
                    delivered.insert(entry.id.clone());
                }
                Err(err) => {
                    warn!(?err, id = %entry.id, "queued scan still undeliverable");
                }
            }
        }

        let pending = self.inner.queue.remove(&delivered).await?;
        self.inner.pending.send_replace(pending);

        let count = delivered.len();
        info!(delivered = count, pending, "drain finished");
        if count > 0 {
            self.notify(Notice::Synced {
                delivered: count,
                pending,
            });
        }
        Ok(Some(count))
    }

    /// Run [`drain`](Self::drain) in the background.
    pub fn spawn_drain(&self) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(err) = this.drain().await {
                error!(?err, "background drain failed");
            }
        })
    }

    /// Opportunistic drain every `interval` while online with a persisted
    /// backlog.
    pub fn spawn_periodic_sync(
        &self,
        interval: Duration,
        online: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !*online.borrow() {
                    continue;
                }
                // storage is shared with other processes; the mirror may lag
                match this.refresh_pending().await {
                    Ok(0) => continue,
                    Ok(_) => {}
                    Err(err) => {
                        error!(?err, "periodic sync could not read queue");
                        continue;
                    }
                }
                if let Err(err) = this.drain().await {
                    error!(?err, "periodic drain failed");
                }
            }
        })
    }
}
