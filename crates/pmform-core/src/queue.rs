//! Durable queue of form submissions awaiting delivery.
//!
//! The whole queue lives under one storage key and is rewritten after every
//! single-item transition, so a crash mid-sync leaves a consistent list that
//! the next pass resumes. Delivery is at-least-once: a crash between the
//! server accepting an item and the `completed` write re-sends it, which is
//! why every attempt carries the item id as its idempotency key.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;

use crate::client::{SubmitError, SubmitReceipt};
use crate::error::StorageError;
use crate::models::{QueueStats, QueuedSubmission, SubmissionId, SubmissionStatus, SyncReport};
use crate::storage::LocalStore;

/// Storage key holding the serialized queue.
pub const QUEUE_KEY: &str = "offline_queue";

/// Failed attempts after which an item stops being retried automatically.
pub const MAX_RETRIES: u32 = 3;

/// Pause between consecutive submissions in one sync pass.
pub const DEFAULT_ITEM_SPACING: Duration = Duration::from_millis(500);

/// Delivers one queued payload to the form API.
pub trait SubmissionTransport: Send + Sync {
    fn submit(
        &self,
        payload: &Value,
        idempotency_key: &SubmissionId,
    ) -> impl Future<Output = Result<SubmitReceipt, SubmitError>> + Send;
}

/// Offline submission queue over a [`LocalStore`].
#[derive(Clone)]
pub struct OfflineQueue {
    store: LocalStore,
    write_lock: Arc<Mutex<()>>,
    item_spacing: Duration,
    max_retries: u32,
}

impl OfflineQueue {
    pub fn new(store: LocalStore) -> Self {
        Self {
            store,
            write_lock: Arc::new(Mutex::new(())),
            item_spacing: DEFAULT_ITEM_SPACING,
            max_retries: MAX_RETRIES,
        }
    }

    #[must_use]
    pub const fn with_item_spacing(mut self, spacing: Duration) -> Self {
        self.item_spacing = spacing;
        self
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn load(&self) -> Vec<QueuedSubmission> {
        self.store.get(QUEUE_KEY).unwrap_or_default()
    }

    /// Load, mutate and persist the whole list as one step.
    fn modify<R>(
        &self,
        mutate: impl FnOnce(&mut Vec<QueuedSubmission>) -> R,
    ) -> Result<R, StorageError> {
        let _guard = self.guard();
        let mut queue = self.load();
        let result = mutate(&mut queue);
        self.store.set(QUEUE_KEY, &queue)?;
        Ok(result)
    }

    /// Apply `update` to the item with `id`; storage failures are logged by
    /// the store and reported as `false`.
    fn update_item(&self, id: &SubmissionId, update: impl FnOnce(&mut QueuedSubmission)) -> bool {
        self.modify(|queue| {
            queue
                .iter_mut()
                .find(|item| &item.id == id)
                .map(update)
                .is_some()
        })
        .unwrap_or(false)
    }

    /// Append a new pending submission and persist the queue.
    pub fn enqueue(&self, data: Value) -> Result<SubmissionId, StorageError> {
        self.enqueue_with_id(SubmissionId::new(), data)
    }

    /// Queue under an id already used as the idempotency key of a direct
    /// attempt, so a retry cannot append twice.
    pub fn enqueue_with_id(
        &self,
        id: SubmissionId,
        data: Value,
    ) -> Result<SubmissionId, StorageError> {
        let submission = QueuedSubmission {
            id: id.clone(),
            ..QueuedSubmission::new(data)
        };
        self.modify(|queue| queue.push(submission))?;
        tracing::info!(submission_id = %id, "Added submission to offline queue");
        Ok(id)
    }

    /// Every queued item in insertion order.
    pub fn list(&self) -> Vec<QueuedSubmission> {
        self.load()
    }

    pub fn get(&self, id: &SubmissionId) -> Option<QueuedSubmission> {
        self.load().into_iter().find(|item| &item.id == id)
    }

    /// Items a sync pass would attempt, oldest first.
    pub fn pending_submissions(&self) -> Vec<QueuedSubmission> {
        let mut pending: Vec<_> = self
            .load()
            .into_iter()
            .filter(|item| item.status.is_syncable())
            .collect();
        // Stable: equal timestamps keep insertion order.
        pending.sort_by_key(|item| item.queued_at);
        pending
    }

    pub fn has_pending(&self) -> bool {
        !self.pending_submissions().is_empty()
    }

    pub fn oldest_pending(&self) -> Option<QueuedSubmission> {
        self.pending_submissions().into_iter().next()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats::from_items(&self.load())
    }

    pub fn remove(&self, id: &SubmissionId) -> Result<bool, StorageError> {
        let removed = self.modify(|queue| {
            let before = queue.len();
            queue.retain(|item| &item.id != id);
            queue.len() != before
        })?;
        if removed {
            tracing::info!(submission_id = %id, "Removed submission from queue");
        }
        Ok(removed)
    }

    /// Purge completed items, returning how many were removed.
    pub fn clear_completed(&self) -> Result<usize, StorageError> {
        let cleared = self.modify(|queue| {
            let before = queue.len();
            queue.retain(|item| item.status != SubmissionStatus::Completed);
            before - queue.len()
        })?;
        if cleared > 0 {
            tracing::info!(cleared, "Cleared completed submissions from queue");
        }
        Ok(cleared)
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        let _guard = self.guard();
        self.store.remove(QUEUE_KEY)?;
        tracing::info!("Cleared offline queue");
        Ok(())
    }

    /// Move every `failed` item back to `pending` and clear its error.
    /// Retry counts are kept.
    pub fn retry_failed(&self) -> Result<usize, StorageError> {
        let reset = self.modify(|queue| {
            let mut reset = 0;
            for item in queue
                .iter_mut()
                .filter(|item| item.status == SubmissionStatus::Failed)
            {
                item.status = SubmissionStatus::Pending;
                item.error = None;
                reset += 1;
            }
            reset
        })?;
        tracing::info!(reset, "Reset failed submissions to pending");
        Ok(reset)
    }

    /// Return items stranded in `syncing` by an interrupted pass to `pending`.
    pub fn recover_interrupted(&self) -> Result<usize, StorageError> {
        let recovered = self.modify(|queue| {
            let mut recovered = 0;
            for item in queue
                .iter_mut()
                .filter(|item| item.status == SubmissionStatus::Syncing)
            {
                item.status = SubmissionStatus::Pending;
                recovered += 1;
            }
            recovered
        })?;
        if recovered > 0 {
            tracing::warn!(
                recovered,
                "Recovered submissions left mid-sync; they may be delivered twice"
            );
        }
        Ok(recovered)
    }

    /// Deliver every pending or failed item, oldest first, then purge the
    /// completed ones.
    ///
    /// Callers must not run two passes at once; see
    /// [`SyncCoordinator`](crate::sync::SyncCoordinator).
    pub async fn sync<T, P>(&self, transport: &T, mut on_progress: P) -> SyncReport
    where
        T: SubmissionTransport,
        P: FnMut(usize, usize, &QueuedSubmission) + Send,
    {
        let pending = self.pending_submissions();
        let mut report = SyncReport {
            total: pending.len(),
            ..SyncReport::default()
        };
        if pending.is_empty() {
            tracing::debug!("No pending submissions to sync");
            return report;
        }

        tracing::info!(total = report.total, "Starting offline queue sync");

        for (index, submission) in pending.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.item_spacing).await;
            }

            self.update_item(&submission.id, |item| {
                item.status = SubmissionStatus::Syncing;
                item.last_attempt = Some(Utc::now());
            });
            on_progress(index + 1, report.total, submission);

            match transport.submit(&submission.data, &submission.id).await {
                Ok(receipt) => {
                    let marked = self.update_item(&submission.id, |item| {
                        item.status = SubmissionStatus::Completed;
                        item.error = None;
                    });
                    if !marked {
                        tracing::warn!(
                            submission_id = %submission.id,
                            "Delivered submission could not be marked completed in the queue"
                        );
                    }
                    report.successful += 1;
                    tracing::info!(
                        submission_id = %submission.id,
                        server_id = receipt.submission_id.as_str(),
                        "Synced queued submission"
                    );
                }
                Err(SubmitError::RateLimited { retry_after_secs }) => {
                    self.update_item(&submission.id, |item| {
                        item.status = SubmissionStatus::Pending;
                        item.error = Some(format!(
                            "Rate limited, retry after {retry_after_secs}s"
                        ));
                    });
                    report.rate_limited_for = Some(retry_after_secs);
                    tracing::warn!(
                        submission_id = %submission.id,
                        retry_after_secs,
                        "Server rate limited queue sync; stopping pass"
                    );
                    break;
                }
                Err(error) => {
                    let max_retries = self.max_retries;
                    self.update_item(&submission.id, |item| {
                        item.retries += 1;
                        item.status = if item.retries >= max_retries {
                            SubmissionStatus::Failed
                        } else {
                            SubmissionStatus::Pending
                        };
                        item.error = Some(error.to_string());
                    });
                    report.failed += 1;
                    tracing::error!(
                        submission_id = %submission.id,
                        %error,
                        "Failed to sync queued submission"
                    );
                }
            }
        }

        if let Err(error) = self.clear_completed() {
            tracing::warn!(%error, "Failed to purge completed submissions");
        }

        tracing::info!(
            successful = report.successful,
            failed = report.failed,
            total = report.total,
            "Offline queue sync finished"
        );
        report
    }
}
