//! Drives queue delivery: direct submits, one-at-a-time sync passes, and
//! automatic passes after connectivity returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::client::{SubmitError, SubmitReceipt};
use crate::error::Result;
use crate::models::{QueuedSubmission, SubmissionId, SyncReport};
use crate::network::NetworkStatus;
use crate::queue::{OfflineQueue, SubmissionTransport};

/// Delay after coming back online before syncing, letting the link settle.
pub const DEFAULT_RECONNECT_SETTLE: Duration = Duration::from_secs(2);

/// Result of [`SyncCoordinator::submit_or_queue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Delivered(SubmitReceipt),
    Queued {
        id: SubmissionId,
        /// Why the direct attempt was skipped or failed
        reason: String,
    },
}

/// Clears the in-flight flag when a pass ends or its future is dropped.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SyncCoordinator<T> {
    queue: OfflineQueue,
    transport: Arc<T>,
    in_flight: AtomicBool,
    blocked_until: Mutex<Option<Instant>>,
}

impl<T: SubmissionTransport> SyncCoordinator<T> {
    pub const fn new(queue: OfflineQueue, transport: Arc<T>) -> Self {
        Self {
            queue,
            transport,
            in_flight: AtomicBool::new(false),
            blocked_until: Mutex::new(None),
        }
    }

    pub const fn queue(&self) -> &OfflineQueue {
        &self.queue
    }

    pub fn is_syncing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Time left before the server's `Retry-After` expires.
    pub fn blocked_for(&self) -> Option<Duration> {
        let blocked_until = *self
            .blocked_until
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        blocked_until
            .map(|until| until.saturating_duration_since(Instant::now()))
            .filter(|remaining| !remaining.is_zero())
    }

    fn block_for(&self, secs: u64) {
        *self
            .blocked_until
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) =
            Some(Instant::now() + Duration::from_secs(secs));
    }

    /// Run one sync pass unless another is in flight or the server asked us
    /// to back off, in which case `None` is returned.
    pub async fn sync_now(&self) -> Option<SyncReport> {
        self.sync_with_progress(|current, total, item| {
            tracing::debug!(current, total, submission_id = %item.id, "Syncing queued submission");
        })
        .await
    }

    pub async fn sync_with_progress<P>(&self, on_progress: P) -> Option<SyncReport>
    where
        P: FnMut(usize, usize, &QueuedSubmission) + Send,
    {
        if let Some(remaining) = self.blocked_for() {
            tracing::info!(
                remaining_secs = remaining.as_secs(),
                "Skipping sync while rate limited"
            );
            return None;
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Sync already in progress");
            return None;
        }
        let _guard = InFlightGuard(&self.in_flight);

        let report = self.queue.sync(self.transport.as_ref(), on_progress).await;
        if let Some(secs) = report.rate_limited_for {
            self.block_for(secs);
        }
        Some(report)
    }

    /// Submit directly when online; otherwise, or on a transient failure,
    /// queue the payload under the same idempotency key.
    pub async fn submit_or_queue(&self, data: Value, online: bool) -> Result<SubmitOutcome> {
        let id = SubmissionId::new();
        if !online {
            let id = self.queue.enqueue_with_id(id, data)?;
            return Ok(SubmitOutcome::Queued {
                id,
                reason: "offline".to_string(),
            });
        }

        match self.transport.submit(&data, &id).await {
            Ok(receipt) => Ok(SubmitOutcome::Delivered(receipt)),
            Err(error) if error.is_transient() => {
                if let SubmitError::RateLimited { retry_after_secs } = error {
                    self.block_for(retry_after_secs);
                }
                tracing::warn!(%error, "Direct submission failed; queueing for later");
                let id = self.queue.enqueue_with_id(id, data)?;
                Ok(SubmitOutcome::Queued {
                    id,
                    reason: error.to_string(),
                })
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Sync whenever `status` goes from offline to online, after `settle`.
    ///
    /// Runs until the sender side of the channel is dropped.
    pub async fn run_on_reconnect(
        &self,
        mut status: watch::Receiver<NetworkStatus>,
        settle: Duration,
    ) {
        let mut was_online = status.borrow_and_update().online;
        if was_online && self.queue.has_pending() {
            self.sync_now().await;
        }

        while status.changed().await.is_ok() {
            let online = status.borrow_and_update().online;
            let reconnected = online && !was_online;
            was_online = online;
            if !reconnected {
                continue;
            }

            tracing::info!("Connection restored; syncing offline queue");
            tokio::time::sleep(settle).await;
            if !status.borrow().online {
                tracing::debug!("Connection dropped again before sync");
                continue;
            }
            if let Some(report) = self.sync_now().await {
                tracing::info!(
                    successful = report.successful,
                    failed = report.failed,
                    "Reconnect sync finished"
                );
            }
        }
    }
}
