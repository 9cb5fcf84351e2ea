//! Health Monitor - periodic reconciliation of tracked state with the runtime
//!
//! Two tasks cooperate:
//! - the scanner wakes on a fixed interval, inspects every active resource
//!   concurrently and sends each [`DriftFinding`] over a channel
//! - the applier feeds findings into [`LifecycleController::apply_drift`],
//!   the same locked mutation path callers use
//!
//! The scanner never holds a resource lock while the runtime is queried.

use crate::controller::{DriftFinding, DriftOutcome, LifecycleController};
use crate::state::ResourceState;
use futures::future::join_all;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

const FINDING_BUFFER: usize = 64;
/// Shortest accepted scan period; `tokio::time::interval` rejects zero
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Clone)]
pub struct HealthMonitor {
    controller: LifecycleController,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(controller: LifecycleController, interval: Duration) -> Self {
        if interval < MIN_INTERVAL {
            warn!(
                interval_ms = interval.as_millis() as u64,
                "Health interval too short, using {}ms",
                MIN_INTERVAL.as_millis()
            );
        }
        let interval = interval.max(MIN_INTERVAL);
        Self {
            controller,
            interval,
        }
    }

    /// Monitor using the configured interval
    pub fn from_config(controller: LifecycleController) -> Self {
        let interval = controller.config().health.interval();
        Self::new(controller, interval)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Inspect every running or paused resource once
    pub async fn scan(&self) -> Vec<DriftFinding> {
        let active: Vec<_> = self
            .controller
            .list()
            .into_iter()
            .filter(|r| matches!(r.state, ResourceState::Running | ResourceState::Paused))
            .collect();

        let probes = active.iter().map(|record| self.controller.observe(record));
        let mut findings = Vec::new();
        for (record, result) in active.iter().zip(join_all(probes).await) {
            match result {
                Ok(Some(finding)) => findings.push(finding),
                Ok(None) => {}
                Err(e) => {
                    // Unreachable runtime: try again next round
                    debug!(resource = %record.name, "Health probe failed: {}", e);
                }
            }
        }
        findings
    }

    /// One scan with every finding applied, in order
    pub async fn reconcile_once(&self) -> Vec<(String, DriftOutcome)> {
        let mut outcomes = Vec::new();
        for finding in self.scan().await {
            let name = finding.name.clone();
            match self.controller.apply_drift(finding).await {
                Ok(outcome) => outcomes.push((name, outcome)),
                Err(e) => warn!(resource = %name, "Drift correction failed: {}", e),
            }
        }
        outcomes
    }

    /// Run in the background until [`HealthHandle::shutdown`]
    pub fn spawn(self) -> HealthHandle {
        let (shutdown, mut stop) = watch::channel(false);
        let (findings_tx, mut findings_rx) = mpsc::channel::<DriftFinding>(FINDING_BUFFER);

        let applier = {
            let controller = self.controller.clone();
            tokio::spawn(async move {
                while let Some(finding) = findings_rx.recv().await {
                    let name = finding.name.clone();
                    match controller.apply_drift(finding).await {
                        Ok(outcome) => debug!(resource = %name, ?outcome, "Drift applied"),
                        Err(e) => warn!(resource = %name, "Drift correction failed: {}", e),
                    }
                }
            })
        };

        info!(interval_ms = self.interval.as_millis() as u64, "Health monitor started");
        let scanner = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        for finding in self.scan().await {
                            if findings_tx.send(finding).await.is_err() {
                                return;
                            }
                        }
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Health monitor stopped");
        });

        HealthHandle {
            shutdown,
            scanner,
            applier,
        }
    }
}

/// Running monitor
pub struct HealthHandle {
    shutdown: watch::Sender<bool>,
    scanner: JoinHandle<()>,
    applier: JoinHandle<()>,
}

impl HealthHandle {
    pub fn is_running(&self) -> bool {
        !self.scanner.is_finished()
    }

    /// Stop scanning, let queued findings drain, and wait for both tasks
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        // The applier ends once the scanner drops its sender
        if let Err(e) = self.scanner.await {
            error!("Health scanner task failed: {}", e);
        }
        if let Err(e) = self.applier.await {
            error!("Drift applier task failed: {}", e);
        }
    }
}
