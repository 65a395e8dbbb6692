//! Periodic connection health probe.
//!
//! The [`HealthMonitor`] is the only automatic recovery path for a lost
//! store connection. Every `interval` it issues a trivial query; on failure
//! it logs and asks the store to reconnect so that later calls succeed
//! without the caller doing anything. The cadence is fixed: no backoff and
//! no failure budget.
//!
//! The loop is bound to a shutdown signal rather than running forever, and
//! [`HealthMonitor::run_for`] runs a bounded number of probes for tests.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::balance_store::BalanceStore;

/// Default time between probes.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(10);

/// Tally of what the monitor has done.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthReport {
    /// Probes issued.
    pub probes: u64,
    /// Probes that failed.
    pub failures: u64,
    /// Successful reconnections after a failed probe.
    pub reconnects: u64,
}

/// Fixed-cadence connection prober for a [`BalanceStore`].
pub struct HealthMonitor<S> {
    store: Arc<S>,
    interval: Duration,
}

impl<S: BalanceStore> HealthMonitor<S> {
    /// Create a monitor probing `store` every `interval`.
    pub const fn new(store: Arc<S>, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// The time between probes.
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Issue one probe and reconnect if it fails.
    pub async fn probe_once(&self, report: &mut HealthReport) {
        report.probes = report.probes.saturating_add(1);

        let Err(e) = self.store.probe().await else {
            tracing::trace!("store connection healthy");
            return;
        };

        report.failures = report.failures.saturating_add(1);
        tracing::warn!(
            error = %e,
            retry_in_secs = self.interval.as_secs(),
            "store connection issue, reconnecting"
        );

        match self.store.reconnect().await {
            Ok(()) => {
                report.reconnects = report.reconnects.saturating_add(1);
                tracing::info!("store connection re-established");
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    retry_in_secs = self.interval.as_secs(),
                    "store reconnection failed, will try again"
                );
            }
        }
    }

    /// Run exactly `iterations` probes, sleeping `interval` between them.
    pub async fn run_for(&self, iterations: u64) -> HealthReport {
        let mut report = HealthReport::default();
        for n in 0..iterations {
            if n > 0 {
                tokio::time::sleep(self.interval).await;
            }
            self.probe_once(&mut report).await;
        }
        report
    }

    /// Run until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// The first probe runs immediately; each later probe is scheduled one
    /// `interval` after the previous one finished.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> HealthReport {
        let mut report = HealthReport::default();
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "store health monitor started"
        );

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            self.probe_once(&mut report).await;

            tokio::select! {
                () = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!(
            probes = report.probes,
            failures = report.failures,
            reconnects = report.reconnects,
            "store health monitor stopped"
        );
        report
    }

    /// Spawn [`run`](Self::run) on a background task.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<HealthReport> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}
