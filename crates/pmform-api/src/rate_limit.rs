//! Fixed-window request limiting keyed by client address.
//!
//! Counters live in process memory, so limits are per instance. Anything
//! shared across instances plugs in behind [`RateLimitStore`].

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::http::HeaderMap;
use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::config::AppConfig;

/// Counter state for one client within its current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRecord {
    pub count: u32,
    pub reset_time_ms: i64,
}

impl RateLimitRecord {
    const fn is_expired(&self, now_ms: i64) -> bool {
        self.reset_time_ms < now_ms
    }
}

/// Backing storage for rate-limit counters.
///
/// `increment` must be atomic per key: two concurrent callers may never both
/// observe the same pre-increment count.
pub trait RateLimitStore: Send + Sync + 'static {
    /// Count one request, opening a fresh window when none is live.
    fn increment(&self, key: &str, now_ms: i64, window_ms: i64) -> RateLimitRecord;

    /// Live record for `key` without counting a request.
    fn peek(&self, key: &str, now_ms: i64) -> Option<RateLimitRecord>;

    fn reset(&self, key: &str);

    fn clear(&self);

    /// Drop expired records, returning how many were removed.
    fn sweep_expired(&self, now_ms: i64) -> usize;

    /// Number of clients with a record, live or not yet swept.
    fn tracked(&self) -> usize;
}

#[derive(Debug, Default)]
pub struct InMemoryRateLimitStore {
    records: Mutex<HashMap<String, RateLimitRecord>>,
}

impl InMemoryRateLimitStore {
    fn records(&self) -> MutexGuard<'_, HashMap<String, RateLimitRecord>> {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl RateLimitStore for InMemoryRateLimitStore {
    fn increment(&self, key: &str, now_ms: i64, window_ms: i64) -> RateLimitRecord {
        let mut records = self.records();
        let record = records
            .entry(key.to_string())
            .and_modify(|record| {
                if record.is_expired(now_ms) {
                    *record = RateLimitRecord {
                        count: 1,
                        reset_time_ms: now_ms + window_ms,
                    };
                } else {
                    record.count = record.count.saturating_add(1);
                }
            })
            .or_insert(RateLimitRecord {
                count: 1,
                reset_time_ms: now_ms + window_ms,
            });
        *record
    }

    fn peek(&self, key: &str, now_ms: i64) -> Option<RateLimitRecord> {
        self.records()
            .get(key)
            .copied()
            .filter(|record| !record.is_expired(now_ms))
    }

    fn reset(&self, key: &str) {
        self.records().remove(key);
    }

    fn clear(&self) {
        self.records().clear();
    }

    fn sweep_expired(&self, now_ms: i64) -> usize {
        let mut records = self.records();
        let before = records.len();
        records.retain(|_, record| !record.is_expired(now_ms));
        before - records.len()
    }

    fn tracked(&self) -> usize {
        self.records().len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window: Duration::from_secs(60),
        }
    }
}

/// Outcome of a rate-limit check, mirrored into the `X-RateLimit-*` headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub limit: u32,
    pub reset_in_secs: u64,
    /// Window end, epoch milliseconds
    pub reset_at_ms: i64,
}

#[derive(Default)]
struct RateLimitMetrics {
    allowed: AtomicU64,
    limited: AtomicU64,
    swept: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RateLimitMetricsSnapshot {
    pub allowed: u64,
    pub limited: u64,
    pub swept: u64,
    pub tracked_clients: usize,
}

pub struct RateLimiter<S: RateLimitStore = InMemoryRateLimitStore> {
    store: Arc<S>,
    policy: RateLimitPolicy,
    metrics: Arc<RateLimitMetrics>,
}

impl<S: RateLimitStore> Clone for RateLimiter<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            policy: self.policy,
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl RateLimiter<InMemoryRateLimitStore> {
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            InMemoryRateLimitStore::default(),
            RateLimitPolicy {
                max_requests: config.rate_limit_max_requests,
                window: config.rate_limit_window,
            },
        )
    }
}

impl<S: RateLimitStore> RateLimiter<S> {
    pub fn new(store: S, policy: RateLimitPolicy) -> Self {
        Self {
            store: Arc::new(store),
            policy,
            metrics: Arc::new(RateLimitMetrics::default()),
        }
    }

    pub const fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    fn window_ms(&self) -> i64 {
        i64::try_from(self.policy.window.as_millis()).unwrap_or(i64::MAX)
    }

    pub fn check(&self, identifier: &str) -> RateLimitDecision {
        self.check_at(identifier, now_ms())
    }

    /// Count a request from `identifier` at `now_ms`.
    pub fn check_at(&self, identifier: &str, now_ms: i64) -> RateLimitDecision {
        let record = self.store.increment(identifier, now_ms, self.window_ms());
        let decision = self.decide(record, now_ms, record.count <= self.policy.max_requests);

        if decision.allowed {
            self.metrics.allowed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.metrics.limited.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                client = client_fingerprint(identifier),
                count = record.count,
                retry_after_secs = decision.reset_in_secs,
                "Rate limit exceeded"
            );
        }
        decision
    }

    /// Current standing of `identifier` without counting a request.
    pub fn status(&self, identifier: &str) -> Option<RateLimitDecision> {
        self.status_at(identifier, now_ms())
    }

    pub fn status_at(&self, identifier: &str, now_ms: i64) -> Option<RateLimitDecision> {
        self.store
            .peek(identifier, now_ms)
            .map(|record| self.decide(record, now_ms, record.count < self.policy.max_requests))
    }

    fn decide(&self, record: RateLimitRecord, now_ms: i64, allowed: bool) -> RateLimitDecision {
        let remaining_ms = (record.reset_time_ms - now_ms).max(0);
        RateLimitDecision {
            allowed,
            remaining: self.policy.max_requests.saturating_sub(record.count),
            limit: self.policy.max_requests,
            reset_in_secs: u64::try_from(remaining_ms).unwrap_or(0).div_ceil(1_000),
            reset_at_ms: record.reset_time_ms,
        }
    }

    pub fn reset(&self, identifier: &str) {
        self.store.reset(identifier);
    }

    pub fn clear(&self) {
        self.store.clear();
    }

    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(now_ms())
    }

    pub fn sweep_expired_at(&self, now_ms: i64) -> usize {
        let removed = self.store.sweep_expired(now_ms);
        self.metrics.swept.fetch_add(
            u64::try_from(removed).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
        removed
    }

    /// Sweep expired records every `every` until the task is aborted.
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // The first tick fires immediately; nothing has expired yet.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = limiter.sweep_expired();
                tracing::debug!(removed, "Swept expired rate-limit records");
            }
        })
    }

    pub fn metrics_snapshot(&self) -> RateLimitMetricsSnapshot {
        RateLimitMetricsSnapshot {
            allowed: self.metrics.allowed.load(Ordering::Relaxed),
            limited: self.metrics.limited.load(Ordering::Relaxed),
            swept: self.metrics.swept.load(Ordering::Relaxed),
            tracked_clients: self.store.tracked(),
        }
    }
}

/// Client address from proxy headers, nearest trusted edge first.
pub fn client_ip(headers: &HeaderMap) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };
    let first_entry = |value: &str| value.split(',').next().unwrap_or_default().trim().to_string();

    if let Some(ip) = header("cf-connecting-ip") {
        return ip.to_string();
    }
    if let Some(forwarded) = header("x-forwarded-for") {
        return first_entry(forwarded);
    }
    if let Some(ip) = header("x-real-ip") {
        return ip.to_string();
    }
    if let Some(forwarded) = header("x-vercel-forwarded-for") {
        return first_entry(forwarded);
    }
    "unknown".to_string()
}

/// Stable hash of a client identifier for logs.
pub fn client_fingerprint(identifier: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    identifier.hash(&mut hasher);
    hasher.finish()
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;
    use pretty_assertions::assert_eq;

    use super::*;

    const T0: i64 = 1_700_000_000_000;

    fn limiter(max_requests: u32) -> RateLimiter {
        RateLimiter::new(
            InMemoryRateLimitStore::default(),
            RateLimitPolicy {
                max_requests,
                window: Duration::from_secs(60),
            },
        )
    }

    #[test]
    fn blocks_exactly_after_max_requests() {
        let limiter = limiter(10);

        for attempt in 1..=10 {
            let decision = limiter.check_at("10.0.0.1", T0 + i64::from(attempt));
            assert!(decision.allowed, "attempt {attempt} should pass");
            assert_eq!(decision.remaining, 10 - attempt);
        }
        for attempt in 11..=13 {
            let decision = limiter.check_at("10.0.0.1", T0 + i64::from(attempt));
            assert!(!decision.allowed, "attempt {attempt} should be limited");
            assert_eq!(decision.remaining, 0);
        }

        let metrics = limiter.metrics_snapshot();
        assert_eq!((metrics.allowed, metrics.limited), (10, 3));
    }

    #[test]
    fn identifiers_are_independent() {
        let limiter = limiter(2);
        limiter.check_at("a", T0);
        limiter.check_at("a", T0);
        assert!(!limiter.check_at("a", T0).allowed);

        let other = limiter.check_at("b", T0);
        assert!(other.allowed);
        assert_eq!(other.remaining, 1);
    }

    #[test]
    fn expired_window_starts_fresh() {
        let limiter = limiter(3);
        for _ in 0..4 {
            limiter.check_at("a", T0);
        }

        let decision = limiter.check_at("a", T0 + 60_001);

        assert!(decision.allowed);
        assert_eq!(decision.remaining, 2);
        assert_eq!(decision.reset_at_ms, T0 + 60_001 + 60_000);
        assert_eq!(decision.reset_in_secs, 60);
    }

    #[test]
    fn reset_in_rounds_up_to_whole_seconds() {
        let limiter = limiter(5);
        limiter.check_at("a", T0);

        let decision = limiter.check_at("a", T0 + 59_500);

        assert_eq!(decision.reset_in_secs, 1);
        assert_eq!(decision.reset_at_ms, T0 + 60_000);
    }

    #[test]
    fn status_peeks_without_counting() {
        let limiter = limiter(2);
        assert_eq!(limiter.status_at("a", T0), None);

        limiter.check_at("a", T0);
        let status = limiter.status_at("a", T0).unwrap();
        assert!(status.allowed);
        assert_eq!(status.remaining, 1);
        assert_eq!(limiter.status_at("a", T0).unwrap(), status);

        limiter.check_at("a", T0);
        assert!(!limiter.status_at("a", T0).unwrap().allowed);
        assert_eq!(limiter.status_at("a", T0 + 60_001), None);
    }

    #[test]
    fn reset_and_clear_forget_clients() {
        let limiter = limiter(1);
        limiter.check_at("a", T0);
        limiter.check_at("b", T0);

        limiter.reset("a");
        assert!(limiter.check_at("a", T0).allowed);

        limiter.clear();
        assert_eq!(limiter.metrics_snapshot().tracked_clients, 0);
    }

    #[test]
    fn sweep_removes_only_expired_records() {
        let limiter = limiter(5);
        limiter.check_at("old", T0);
        limiter.check_at("new", T0 + 30_000);

        assert_eq!(limiter.sweep_expired_at(T0 + 60_001), 1);
        assert!(limiter.status_at("new", T0 + 60_001).is_some());
        assert_eq!(limiter.metrics_snapshot().swept, 1);
    }

    #[test]
    fn concurrent_checks_never_over_admit() {
        let limiter = limiter(50);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || {
                    (0..25)
                        .filter(|_| limiter.check_at("shared", T0).allowed)
                        .count()
                })
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 50);
    }

    #[test]
    fn client_ip_prefers_edge_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers), "unknown");

        headers.insert("x-vercel-forwarded-for", HeaderValue::from_static("4.4.4.4, 9.9.9.9"));
        assert_eq!(client_ip(&headers), "4.4.4.4");

        headers.insert("x-real-ip", HeaderValue::from_static("3.3.3.3"));
        assert_eq!(client_ip(&headers), "3.3.3.3");

        headers.insert("x-forwarded-for", HeaderValue::from_static(" 2.2.2.2 , 8.8.8.8"));
        assert_eq!(client_ip(&headers), "2.2.2.2");

        headers.insert("cf-connecting-ip", HeaderValue::from_static("1.1.1.1"));
        assert_eq!(client_ip(&headers), "1.1.1.1");
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_runs_on_interval() {
        let limiter = RateLimiter::new(
            InMemoryRateLimitStore::default(),
            RateLimitPolicy {
                max_requests: 5,
                window: Duration::from_millis(1),
            },
        );
        limiter.check_at("a", T0);

        let task = limiter.spawn_sweeper(Duration::from_secs(600));
        tokio::time::sleep(Duration::from_secs(601)).await;

        assert_eq!(limiter.metrics_snapshot().tracked_clients, 0);
        task.abort();
    }
}
