//! Reconciliation passes
//!
//! A pass checks every tracked unit against the file system, then discovers
//! new units and deploys them on the worker pool. Discovery runs one batch
//! per packaging, descriptors first, and waits for each batch before starting
//! the next so the precedence between packagings holds under concurrency.

use crate::engine::DeploymentEngine;
use crate::error::Result;
use crate::pool::DeployPool;
use crate::watcher::Verdict;
use berth_types::UnitKind;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

/// Summary of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Tracked units checked for changes
    pub checked: usize,
    pub reloaded: Vec<String>,
    pub redeployed_in_place: Vec<String>,
    pub undeployed: Vec<String>,
    /// Units deployed by discovery, including failed placeholders
    pub deployed: Vec<String>,
    /// Units whose deployment aborted and will be retried
    pub failed: Vec<String>,
    /// Old versions retired by the sweep
    pub retired: Vec<String>,
}

impl ReconcileReport {
    pub fn is_quiet(&self) -> bool {
        self.reloaded.is_empty()
            && self.redeployed_in_place.is_empty()
            && self.undeployed.is_empty()
            && self.deployed.is_empty()
            && self.failed.is_empty()
            && self.retired.is_empty()
    }

    fn record_verdict(&mut self, name: String, verdict: &Verdict) {
        match verdict {
            Verdict::Unchanged => {}
            Verdict::Reload => self.reloaded.push(name),
            Verdict::RedeployInPlace { .. } => self.redeployed_in_place.push(name),
            Verdict::Undeploy { .. } => self.undeployed.push(name),
        }
    }
}

/// Drives the engine from async code
#[derive(Clone)]
pub struct Reconciler {
    engine: Arc<DeploymentEngine>,
    pool: DeployPool,
}

impl Reconciler {
    pub fn new(engine: Arc<DeploymentEngine>) -> Self {
        let pool = DeployPool::new(engine.config().max_concurrent_deployments);
        Self { engine, pool }
    }

    pub fn engine(&self) -> &Arc<DeploymentEngine> {
        &self.engine
    }

    /// Initial discovery pass, run once when the host starts
    #[instrument(skip(self), fields(host = %self.engine.config().name))]
    pub async fn start(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        if self.engine.config().deploy_on_startup {
            self.discovery_pass(&mut report).await;
        }
        info!(deployed = report.deployed.len(), "Host started");
        report
    }

    /// One periodic pass: check tracked units, discover new ones, then
    /// retire idle old versions. Does nothing when auto-deploy is off.
    #[instrument(skip(self), fields(host = %self.engine.config().name))]
    pub async fn tick(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        if !self.engine.config().auto_deploy {
            return report;
        }

        let engine = self.engine.clone();
        match tokio::task::spawn_blocking(move || engine.check_all()).await {
            Ok(verdicts) => {
                report.checked = verdicts.len();
                for (name, verdict) in verdicts {
                    report.record_verdict(name, &verdict);
                }
            }
            Err(e) => error!(error = %e, "Resource check pass panicked"),
        }

        self.discovery_pass(&mut report).await;

        if self.engine.config().undeploy_old_versions {
            let engine = self.engine.clone();
            match tokio::task::spawn_blocking(move || engine.undeploy_old_versions()).await {
                Ok(retired) => report.retired = retired,
                Err(e) => error!(error = %e, "Old version sweep panicked"),
            }
        }

        if report.is_quiet() {
            debug!(checked = report.checked, "Reconciliation pass found no changes");
        } else {
            info!(
                checked = report.checked,
                reloaded = report.reloaded.len(),
                undeployed = report.undeployed.len(),
                deployed = report.deployed.len(),
                failed = report.failed.len(),
                retired = report.retired.len(),
                "Reconciliation pass complete"
            );
        }
        report
    }

    /// Administrative check of one unit, skipping the skew tolerance.
    ///
    /// Marks the unit serviced for the duration of the check and returns
    /// `None` without checking when another task holds the mark.
    pub async fn check_unit(&self, name: &str) -> Result<Option<Verdict>> {
        if !self.engine.serviced().try_add(name) {
            debug!(app = %name, "Unit is serviced elsewhere, skipping check");
            return Ok(None);
        }
        let engine = self.engine.clone();
        let owned = name.to_string();
        let result = tokio::task::spawn_blocking(move || engine.check(&owned)).await;
        self.engine.serviced().remove(name);
        result?
    }

    async fn discovery_pass(&self, report: &mut ReconcileReport) {
        for kind in UnitKind::DISCOVERY_ORDER {
            let engine = self.engine.clone();
            let units = match tokio::task::spawn_blocking(move || engine.discover(kind)).await {
                Ok(units) => units,
                Err(e) => {
                    error!(kind = %kind, error = %e, "Discovery panicked");
                    continue;
                }
            };
            if units.is_empty() {
                continue;
            }

            let names: Vec<String> = units
                .iter()
                .map(|unit| unit.identity.name().to_string())
                .collect();
            let tasks: Vec<_> = units
                .into_iter()
                .map(|unit| {
                    let engine = self.engine.clone();
                    move || engine.deploy_claimed(&unit)
                })
                .collect();

            let results = self.pool.run_batch(tasks).await;
            for (name, result) in names.into_iter().zip(results) {
                match result {
                    Ok(Ok(outcome)) if outcome.registered => report.deployed.push(name),
                    Ok(Ok(_)) | Ok(Err(_)) => report.failed.push(name),
                    Err(e) => {
                        // The worker never released the unit
                        self.engine.serviced().remove(&name);
                        error!(app = %name, error = %e, "Deployment task failed");
                        report.failed.push(name);
                    }
                }
            }
            debug!(kind = %kind, "Discovery batch complete");
        }
    }
}
