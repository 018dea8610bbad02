//! Reconciliation loop and scheduler

use crate::config::SchedulerConfig;
use berth_deployment::{ReconcileReport, Reconciler};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Scheduler state
pub struct Scheduler {
    config: SchedulerConfig,
    reconciler: Reconciler,
    reconcile_tx: mpsc::Sender<()>,
    running: Arc<RwLock<bool>>,
}

impl Scheduler {
    /// Create a new scheduler
    pub fn new(
        config: SchedulerConfig,
        reconciler: Reconciler,
    ) -> (Arc<Self>, mpsc::Receiver<()>) {
        let (reconcile_tx, reconcile_rx) = mpsc::channel(10);

        let scheduler = Arc::new(Self {
            config,
            reconciler,
            reconcile_tx,
            running: Arc::new(RwLock::new(false)),
        });

        (scheduler, reconcile_rx)
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Trigger an immediate reconciliation
    pub async fn trigger_reconcile(&self) {
        let _ = self.reconcile_tx.send(()).await;
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Run the startup pass, then reconcile on every interval tick and
    /// trigger until stopped
    pub async fn start(self: Arc<Self>, mut reconcile_rx: mpsc::Receiver<()>) {
        {
            let mut running = self.running.write().await;
            *running = true;
        }

        let report = self.reconciler.start().await;
        tracing::info!(deployed = report.deployed.len(), "Scheduler started");

        let mut interval = interval(Duration::from_secs(self.config.check_interval_secs.max(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the startup pass covered it
        interval.tick().await;

        loop {
            let triggered = tokio::select! {
                _ = interval.tick() => false,
                Some(_) = reconcile_rx.recv() => true,
                else => break,
            };

            if !self.is_running().await {
                break;
            }

            let report = self.reconcile().await;
            if triggered {
                tracing::debug!(checked = report.checked, "Triggered reconciliation complete");
            }
        }

        tracing::info!("Scheduler stopped");
    }

    /// Stop the scheduler; the loop exits at its next wake-up
    pub async fn stop(&self) {
        {
            let mut running = self.running.write().await;
            *running = false;
        }
        let _ = self.reconcile_tx.try_send(());
    }

    /// Perform one reconciliation pass
    pub async fn reconcile(&self) -> ReconcileReport {
        let report = self.reconciler.tick().await;
        for name in &report.failed {
            tracing::warn!(app = %name, "Deployment failed, retrying on the next pass");
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_deployment::{DeploymentEngine, HostConfig};
    use berth_registry::InMemoryHost;
    use std::fs;
    use std::path::Path;

    fn reconciler(root: &Path) -> Reconciler {
        let mut config = HostConfig::new(root.join("apps"), root.join("conf"));
        config.transient_recheck_delay_ms = 0;
        let host = Arc::new(InMemoryHost::new("localhost"));
        Reconciler::new(Arc::new(DeploymentEngine::new(config, host).unwrap()))
    }

    fn app_dir(root: &Path, name: &str) {
        let dir = root.join("apps").join(name).join("WEB-INF");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("web.xml"), b"<web-app/>").unwrap();
    }

    #[tokio::test]
    async fn test_trigger_and_stop() {
        let root = tempfile::tempdir().unwrap();
        app_dir(root.path(), "shop");

        let config = SchedulerConfig {
            check_interval_secs: 3600,
        };
        let (scheduler, rx) = Scheduler::new(config, reconciler(root.path()));
        let handle = tokio::spawn(scheduler.clone().start(rx));

        let engine = scheduler.reconciler().engine().clone();
        for _ in 0..100 {
            if engine.is_deployed("/shop") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(engine.is_deployed("/shop"));
        assert!(scheduler.is_running().await);

        app_dir(root.path(), "blog");
        scheduler.trigger_reconcile().await;
        for _ in 0..100 {
            if engine.is_deployed("/blog") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(engine.is_deployed("/blog"));

        scheduler.stop().await;
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(!scheduler.is_running().await);
    }

    #[tokio::test]
    async fn test_manual_pass() {
        let root = tempfile::tempdir().unwrap();
        let (scheduler, _rx) = Scheduler::new(SchedulerConfig::default(), reconciler(root.path()));

        app_dir(root.path(), "notes");
        let report = scheduler.reconcile().await;
        assert_eq!(report.deployed, vec!["/notes".to_string()]);
    }
}
