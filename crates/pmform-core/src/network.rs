//! Online/offline tracking.
//!
//! Two signals feed one [`NetworkStatus`]: reports from the platform (or from
//! real request outcomes) and a periodic health probe. The probe only
//! corrects the state when it disagrees, so flapping probes never emit
//! spurious transitions.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connectivity check against the form API.
pub trait HealthProbe: Send + Sync {
    /// `true` when the server answered successfully.
    fn probe(&self) -> impl Future<Output = bool> + Send;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatus {
    pub online: bool,
    pub last_online: Option<DateTime<Utc>>,
    pub last_offline: Option<DateTime<Utc>>,
    /// A health probe is in flight
    pub checking: bool,
}

impl NetworkStatus {
    fn apply(&mut self, online: bool) -> bool {
        if self.online == online {
            return false;
        }
        self.online = online;
        if online {
            self.last_online = Some(Utc::now());
        } else {
            self.last_offline = Some(Utc::now());
        }
        true
    }
}

/// Shared handle publishing [`NetworkStatus`] on a watch channel.
#[derive(Debug, Clone)]
pub struct NetworkMonitor {
    tx: Arc<watch::Sender<NetworkStatus>>,
}

impl NetworkMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (tx, _rx) = watch::channel(NetworkStatus {
            online: initially_online,
            ..NetworkStatus::default()
        });
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<NetworkStatus> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> NetworkStatus {
        self.tx.borrow().clone()
    }

    pub fn is_online(&self) -> bool {
        self.tx.borrow().online
    }

    /// Record a platform connectivity signal. Returns whether the state changed.
    pub fn report_native(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|status| status.apply(online));
        if changed {
            tracing::info!(online, "Network status changed");
        }
        changed
    }

    /// Run one probe bounded by `timeout`; a timeout counts as offline.
    pub async fn check_now<P: HealthProbe>(&self, probe: &P, timeout: Duration) -> bool {
        self.tx.send_modify(|status| status.checking = true);
        let reachable = tokio::time::timeout(timeout, probe.probe())
            .await
            .unwrap_or_else(|_| {
                tracing::debug!(?timeout, "Health probe timed out");
                false
            });

        let mut changed = false;
        self.tx.send_modify(|status| {
            status.checking = false;
            changed = status.apply(reachable);
        });
        if changed {
            tracing::info!(online = reachable, "Network status corrected by health probe");
        }
        reachable
    }

    /// Probe every `interval` until the returned task is aborted.
    pub fn spawn_polling<P>(&self, probe: Arc<P>, interval: Duration, timeout: Duration) -> JoinHandle<()>
    where
        P: HealthProbe + 'static,
    {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                monitor.check_now(probe.as_ref(), timeout).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use pretty_assertions::assert_eq;

    use super::*;

    struct FlagProbe(AtomicBool);

    impl HealthProbe for FlagProbe {
        async fn probe(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    struct HangingProbe;

    impl HealthProbe for HangingProbe {
        async fn probe(&self) -> bool {
            std::future::pending::<bool>().await
        }
    }

    #[test]
    fn native_reports_stamp_transitions_only() {
        let monitor = NetworkMonitor::new(true);
        assert!(!monitor.report_native(true));
        assert_eq!(monitor.current().last_online, None);

        assert!(monitor.report_native(false));
        let offline = monitor.current();
        assert!(!offline.online);
        assert!(offline.last_offline.is_some());

        assert!(!monitor.report_native(false));
        assert_eq!(monitor.current().last_offline, offline.last_offline);

        assert!(monitor.report_native(true));
        assert!(monitor.current().last_online.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn probe_timeout_counts_as_offline() {
        let monitor = NetworkMonitor::new(true);
        let started = tokio::time::Instant::now();

        assert!(!monitor.check_now(&HangingProbe, DEFAULT_PROBE_TIMEOUT).await);

        assert_eq!(started.elapsed(), DEFAULT_PROBE_TIMEOUT);
        let status = monitor.current();
        assert!(!status.online);
        assert!(!status.checking);
    }

    #[tokio::test(start_paused = true)]
    async fn polling_corrects_disagreeing_state() {
        let monitor = NetworkMonitor::new(true);
        let probe = Arc::new(FlagProbe(AtomicBool::new(false)));
        let mut rx = monitor.subscribe();

        let task = monitor.spawn_polling(Arc::clone(&probe), DEFAULT_POLL_INTERVAL, DEFAULT_PROBE_TIMEOUT);
        rx.wait_for(|status| !status.online).await.unwrap();

        probe.0.store(true, Ordering::SeqCst);
        tokio::time::sleep(DEFAULT_POLL_INTERVAL).await;
        rx.wait_for(|status| status.online).await.unwrap();

        task.abort();
        assert!(monitor.current().last_offline.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn agreeing_probe_leaves_timestamps_alone() {
        let monitor = NetworkMonitor::new(true);
        let probe = FlagProbe(AtomicBool::new(true));

        assert!(monitor.check_now(&probe, DEFAULT_PROBE_TIMEOUT).await);
        assert_eq!(monitor.current().last_online, None);
    }
}
