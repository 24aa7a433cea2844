//! Queued submission model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

const SUBMISSION_ID_PREFIX: &str = "submission_";

/// Identifier of a queued submission, `submission_<uuid v7>` (time-sortable).
///
/// Also sent as the `Idempotency-Key` on every delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmissionId(String);

impl SubmissionId {
    /// Create a new unique submission ID
    #[must_use]
    pub fn new() -> Self {
        Self(format!("{SUBMISSION_ID_PREFIX}{}", Uuid::now_v7().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SubmissionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SubmissionId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err("submission id must not be empty".to_string());
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// Delivery state of a queued submission.
///
/// `pending -> syncing -> completed`, or back to `pending` / on to `failed`
/// once the retry cap is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Pending,
    Syncing,
    Failed,
    Completed,
}

impl SubmissionStatus {
    /// Whether a sync pass should attempt this item.
    pub const fn is_syncable(self) -> bool {
        matches!(self, Self::Pending | Self::Failed)
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Failed => "failed",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A form payload persisted locally until the server accepts it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedSubmission {
    pub id: SubmissionId,
    /// Opaque form payload, never re-validated once queued
    pub data: Value,
    pub queued_at: DateTime<Utc>,
    pub retries: u32,
    pub status: SubmissionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt: Option<DateTime<Utc>>,
}

impl QueuedSubmission {
    #[must_use]
    pub fn new(data: Value) -> Self {
        Self {
            id: SubmissionId::new(),
            data,
            queued_at: Utc::now(),
            retries: 0,
            status: SubmissionStatus::Pending,
            error: None,
            last_attempt: None,
        }
    }
}

/// Per-status counts of the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub syncing: usize,
    pub failed: usize,
    pub completed: usize,
}

impl QueueStats {
    pub fn from_items<'a>(items: impl IntoIterator<Item = &'a QueuedSubmission>) -> Self {
        let mut stats = Self::default();
        for item in items {
            stats.total += 1;
            match item.status {
                SubmissionStatus::Pending => stats.pending += 1,
                SubmissionStatus::Syncing => stats.syncing += 1,
                SubmissionStatus::Failed => stats.failed += 1,
                SubmissionStatus::Completed => stats.completed += 1,
            }
        }
        stats
    }
}

/// Outcome of one sync pass over the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub successful: usize,
    pub failed: usize,
    pub total: usize,
    /// Set when the server rate limited the pass; seconds to wait.
    pub rate_limited_for: Option<u64>,
}
