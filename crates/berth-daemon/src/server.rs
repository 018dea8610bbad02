//! Daemon setup and lifecycle management

use crate::config::DaemonConfig;
use crate::error::{DaemonError, DaemonResult};
use crate::scheduler::Scheduler;
use berth_deployment::{DeploymentEngine, Reconciler};
use berth_registry::{Host, InMemoryHost};
use berth_types::{DeployEventEnvelope, EventSeverity};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

/// Berth daemon managing one host
pub struct Server {
    config: DaemonConfig,
    engine: Arc<DeploymentEngine>,
    scheduler: Arc<Scheduler>,
    reconcile_rx: mpsc::Receiver<()>,
}

impl Server {
    /// Create a new server with the given configuration
    pub fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let host: Arc<dyn Host> = Arc::new(InMemoryHost::new(config.host.name.clone()));
        let engine = Arc::new(DeploymentEngine::new(config.host.clone(), host)?);

        let (scheduler, reconcile_rx) =
            Scheduler::new(config.scheduler.clone(), Reconciler::new(engine.clone()));

        Ok(Self {
            config,
            engine,
            scheduler,
            reconcile_rx,
        })
    }

    pub fn engine(&self) -> &Arc<DeploymentEngine> {
        &self.engine
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Run until a shutdown signal arrives
    pub async fn run(self) -> DaemonResult<()> {
        tracing::info!(
            host = %self.config.host.name,
            app_base = %self.engine.app_base().display(),
            config_base = %self.engine.config_base().display(),
            interval_secs = self.config.scheduler.check_interval_secs,
            "Berth daemon starting"
        );

        let events = self.engine.subscribe();
        tokio::spawn(log_events(events));

        let scheduler = self.scheduler.clone();
        let handle = tokio::spawn(scheduler.start(self.reconcile_rx));

        shutdown_signal().await;

        tracing::info!("Berth daemon shutting down");
        self.scheduler.stop().await;
        handle
            .await
            .map_err(|e| DaemonError::Scheduler(e.to_string()))?;

        Ok(())
    }
}

async fn log_events(mut events: broadcast::Receiver<DeployEventEnvelope>) {
    loop {
        match events.recv().await {
            Ok(envelope) => match envelope.severity {
                EventSeverity::Info => {
                    tracing::debug!(app = %envelope.event.name(), event = ?envelope.event, "Deployment event")
                }
                EventSeverity::Warning | EventSeverity::Error => {
                    tracing::warn!(app = %envelope.event.name(), event = ?envelope.event, "Deployment event")
                }
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event log lagged behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_creates_bases() {
        let root = tempfile::tempdir().unwrap();
        let mut config = DaemonConfig::default();
        config.host.app_base = root.path().join("apps");
        config.host.config_base = root.path().join("conf/localhost");

        let server = Server::new(config).unwrap();
        assert!(root.path().join("apps").is_dir());
        assert!(root.path().join("conf/localhost").is_dir());
        assert!(server.engine().registry().is_empty());
    }

    #[test]
    fn test_missing_app_base_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let mut config = DaemonConfig::default();
        config.host.app_base = root.path().join("apps");
        config.host.config_base = root.path().join("conf");
        config.host.create_dirs = false;

        let err = Server::new(config).err().unwrap();
        assert!(matches!(err, DaemonError::Engine(_)));
    }
}
