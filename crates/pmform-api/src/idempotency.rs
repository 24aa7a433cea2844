//! Replay cache for the `Idempotency-Key` request header.
//!
//! Clients resend a queued submission under the same key after a lost
//! response. The first accepted request records its submission id and
//! later requests with that key get the same id back without another
//! append. Entries live in process memory for the configured TTL.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::http::HeaderMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
const MAX_KEY_LEN: usize = 255;

#[derive(Debug, Clone)]
struct Entry {
    submission_id: String,
    stored_at: Instant,
}

#[derive(Clone)]
pub struct IdempotencyCache {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    ttl: Duration,
}

impl IdempotencyCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Submission id previously accepted under `key`, if still live.
    pub fn lookup(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if now.duration_since(entry.stored_at) < self.ttl => {
                Some(entry.submission_id.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn remember(&self, key: &str, submission_id: &str) {
        self.lock().insert(
            key.to_string(),
            Entry {
                submission_id: submission_id.to_string(),
                stored_at: Instant::now(),
            },
        );
    }

    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| now.duration_since(entry.stored_at) < self.ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = cache.sweep_expired();
                tracing::debug!(removed, "Swept expired idempotency keys");
            }
        })
    }
}

/// The request's idempotency key; absent, blank or oversized keys are ignored.
pub fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(IDEMPOTENCY_KEY_HEADER)?.to_str().ok()?.trim();
    if value.is_empty() || value.len() > MAX_KEY_LEN {
        return None;
    }
    Some(value.to_string())
}
