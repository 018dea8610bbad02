//! Deployment engine
//!
//! [`DeploymentEngine`] owns everything one host's deployment lifecycle
//! needs: the bases, the locator, the shared descriptor parser, the archive
//! reader, the listener table, the registry and the serviced set. All of its
//! operations are blocking; the [`Reconciler`](crate::Reconciler) moves them
//! onto worker threads.
//!
//! ## Serviced units
//!
//! Discovery and periodic checks mark a unit as serviced while they work on
//! it and skip units someone else marked. An administrative caller marks the
//! unit itself before calling [`check`](DeploymentEngine::check). This
//! is bookkeeping, not a lock: a caller that changes a unit without marking
//! it can still race a periodic pass.

use crate::archive::{ArchiveReader, TarArchiveReader};
use crate::cleanup::ResourceCleaner;
use crate::config::HostConfig;
use crate::descriptor::{DescriptorParser, TomlDescriptorParser};
use crate::deployer::DeployOutcome;
use crate::error::{DeployError, Result};
use crate::fsutil::{canonical_or_absolute, is_single_component, last_modified, remove_path};
use crate::listener::ListenerFactory;
use crate::locator::UnitLocator;
use crate::watcher::{ResourceWatcher, UndeployCause, Verdict};
use berth_registry::{
    AppInstance, DeployedApplicationRegistry, Host, RegistryError, ServicedSet,
};
use berth_types::{
    has_archive_extension, DeployEvent, DeployEventEnvelope, LocatedUnit, TrackedApplication,
    UndeployReason, UnitIdentity, UnitKind, SENTINEL_MTIME,
};
use dashmap::DashSet;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

/// Deployment lifecycle engine of one host
pub struct DeploymentEngine {
    pub(crate) config: HostConfig,
    pub(crate) app_base: PathBuf,
    pub(crate) config_base: PathBuf,
    pub(crate) global_defaults: Vec<PathBuf>,
    pub(crate) locator: UnitLocator,
    pub(crate) parser: Mutex<Box<dyn DescriptorParser>>,
    pub(crate) archives: Arc<dyn ArchiveReader>,
    pub(crate) listeners: ListenerFactory,
    pub(crate) host: Arc<dyn Host>,
    pub(crate) registry: DeployedApplicationRegistry,
    pub(crate) serviced: ServicedSet,
    pub(crate) watcher: ResourceWatcher,
    pub(crate) cleaner: ResourceCleaner,
    invalid_names: DashSet<String>,
    event_tx: broadcast::Sender<DeployEventEnvelope>,
}

impl DeploymentEngine {
    /// Create an engine for `host`.
    ///
    /// Missing bases are created when `create_dirs` is set. Fails if the
    /// application base is not a directory or the ignore pattern is invalid.
    pub fn new(config: HostConfig, host: Arc<dyn Host>) -> Result<Self> {
        if config.create_dirs {
            for base in [&config.app_base, &config.config_base] {
                fs::create_dir_all(base).map_err(DeployError::io(base))?;
            }
        }
        if !config.app_base.is_dir() {
            return Err(DeployError::InvalidAppBase(config.app_base.clone()));
        }

        let app_base = fs::canonicalize(&config.app_base).map_err(DeployError::io(&config.app_base))?;
        let config_base = canonical_or_absolute(&config.config_base);
        let global_defaults: Vec<PathBuf> = config
            .global_defaults
            .iter()
            .map(|path| canonical_or_absolute(path))
            .collect();

        let locator = UnitLocator::new(config.deploy_ignore.as_deref())?;
        let watcher = ResourceWatcher::new(config.auto_deploy, config.transient_recheck_delay());
        let cleaner = ResourceCleaner::new(
            app_base.clone(),
            config_base.clone(),
            global_defaults.clone(),
        );
        let (event_tx, _) = broadcast::channel(1024);

        info!(
            host = %config.name,
            app_base = %app_base.display(),
            config_base = %config_base.display(),
            "Deployment engine created"
        );

        Ok(Self {
            config,
            app_base,
            config_base,
            global_defaults,
            locator,
            parser: Mutex::new(Box::new(TomlDescriptorParser::new())),
            archives: Arc::new(TarArchiveReader::new()),
            listeners: ListenerFactory::new(),
            host,
            registry: DeployedApplicationRegistry::new(),
            serviced: ServicedSet::new(),
            watcher,
            cleaner,
            invalid_names: DashSet::new(),
            event_tx,
        })
    }

    pub fn with_descriptor_parser(mut self, parser: Box<dyn DescriptorParser>) -> Self {
        self.parser = Mutex::new(parser);
        self
    }

    pub fn with_archive_reader(mut self, archives: Arc<dyn ArchiveReader>) -> Self {
        self.archives = archives;
        self
    }

    pub fn with_listener_factory(mut self, listeners: ListenerFactory) -> Self {
        self.listeners = listeners;
        self
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Canonical application base
    pub fn app_base(&self) -> &Path {
        &self.app_base
    }

    pub fn config_base(&self) -> &Path {
        &self.config_base
    }

    pub fn host(&self) -> &Arc<dyn Host> {
        &self.host
    }

    pub fn registry(&self) -> &DeployedApplicationRegistry {
        &self.registry
    }

    pub fn serviced(&self) -> &ServicedSet {
        &self.serviced
    }

    /// Subscribe to deployment events
    pub fn subscribe(&self) -> broadcast::Receiver<DeployEventEnvelope> {
        self.event_tx.subscribe()
    }

    pub(crate) fn emit(&self, event: DeployEvent) {
        let _ = self
            .event_tx
            .send(DeployEventEnvelope::new(event, self.config.name.clone()));
    }

    /// Whether a unit is registered or present in the container
    pub fn deployment_exists(&self, name: &str) -> bool {
        self.registry.contains(name) || self.host.find_child(name).is_some()
    }

    pub fn is_deployed(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    /// Locate units of `kind` that still need deploying and mark each one
    /// serviced. Every returned unit must go through
    /// [`deploy_claimed`](Self::deploy_claimed).
    pub fn discover(&self, kind: UnitKind) -> Vec<LocatedUnit> {
        let candidates = match kind {
            UnitKind::Descriptor => self.locator.locate_descriptors(&self.config_base),
            UnitKind::Archive => self.locator.locate_archives(&self.app_base),
            UnitKind::Directory => self.locator.locate_directories(&self.app_base),
        };

        let mut claimed = Vec::new();
        for unit in candidates {
            let source_name = unit
                .source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if self.invalid_names.contains(&source_name) {
                continue;
            }
            if !unit.identity.is_canonical() {
                error!(
                    file = %source_name,
                    kind = %kind,
                    "Unit name has an empty version, ignoring it"
                );
                self.invalid_names.insert(source_name);
                continue;
            }

            let name = unit.identity.name().to_string();
            if !self.serviced.try_add(&name) {
                continue;
            }

            if self.deployment_exists(&name) {
                if kind == UnitKind::Archive {
                    self.check_overlapping_directory(&unit.identity);
                }
                self.serviced.remove(&name);
                continue;
            }

            if !is_single_component(unit.identity.base_name()) {
                error!(
                    file = %source_name,
                    kind = %kind,
                    "Unit name resolves outside its base directory, ignoring it"
                );
                self.invalid_names.insert(source_name);
                self.serviced.remove(&name);
                continue;
            }

            claimed.push(unit);
        }

        debug!(kind = %kind, count = claimed.len(), "Discovered units");
        claimed
    }

    /// Deploy a unit claimed by [`discover`](Self::discover) and release it
    pub fn deploy_claimed(&self, unit: &LocatedUnit) -> Result<DeployOutcome> {
        let result = self.deploy(unit);
        self.serviced.remove(unit.identity.name());
        if let Err(e) = &result {
            error!(
                app = %unit.identity.name(),
                source = %unit.source.display(),
                error = %e,
                "Deployment failed, will retry on the next pass"
            );
        }
        result
    }

    /// Deploy one located unit according to its packaging
    pub fn deploy(&self, unit: &LocatedUnit) -> Result<DeployOutcome> {
        match unit.kind {
            UnitKind::Descriptor => self.deploy_descriptor(&unit.identity, &unit.source),
            UnitKind::Archive => self.deploy_archive(&unit.identity, &unit.source),
            UnitKind::Directory => self.deploy_directory(&unit.identity, &unit.source),
        }
    }

    /// Deploy the unit called `name` if it is not deployed yet, preferring a
    /// descriptor over an archive over a directory
    #[instrument(skip(self))]
    pub fn deploy_named(&self, name: &str) -> Result<Option<DeployOutcome>> {
        let identity = UnitIdentity::from_file_name(name, false);
        if self.deployment_exists(identity.name()) {
            return Ok(None);
        }
        if !is_single_component(identity.base_name()) || !identity.is_canonical() {
            warn!(app = %name, "Unit name is not a valid deployment name");
            return Ok(None);
        }

        let descriptor = self.config_base.join(identity.descriptor_file_name());
        if descriptor.exists() {
            return self.deploy_descriptor(&identity, &descriptor).map(Some);
        }
        let archive = self.app_base.join(identity.archive_file_name());
        if archive.exists() {
            return self.deploy_archive(&identity, &archive).map(Some);
        }
        let dir = self.app_base.join(identity.base_name());
        if dir.exists() {
            return self.deploy_directory(&identity, &dir).map(Some);
        }
        Ok(None)
    }

    fn check_overlapping_directory(&self, identity: &UnitIdentity) {
        let name = identity.name();
        let Some(app) = self.registry.get(name) else {
            return;
        };
        let unpack = self
            .host
            .find_child(name)
            .map(|instance| self.unpack_for(&instance))
            .unwrap_or(self.config.unpack_archives);
        if unpack {
            return;
        }

        let dir = self.app_base.join(identity.base_name());
        if dir.exists() {
            if !app.logged_dir_warning {
                warn!(
                    app = %name,
                    dir = %dir.display(),
                    "Directory shadows a deployed archive while unpacking is disabled; it is ignored"
                );
                self.registry.update(name, |a| a.logged_dir_warning = true);
            }
        } else if app.logged_dir_warning {
            self.registry.update(name, |a| a.logged_dir_warning = false);
        }
    }

    /// Check one tracked unit and act on the verdict.
    ///
    /// Returns `None` when the unit is not registered.
    #[instrument(skip(self))]
    pub fn check_resources(&self, name: &str, skip_skew: bool) -> Option<Verdict> {
        let mut app = self.registry.get(name)?;
        let verdict = self.watcher.check(&mut app, skip_skew);

        match &verdict {
            Verdict::Unchanged => {
                self.registry.replace_existing(app);
            }
            Verdict::Reload => {
                self.registry.replace_existing(app);
                self.reload(name);
            }
            Verdict::RedeployInPlace { archive } => {
                self.redeploy_in_place(&mut app, archive);
                self.registry.replace_existing(app);
            }
            Verdict::Undeploy { cause, stale, .. } => {
                let reason = match cause {
                    UndeployCause::Modified => UndeployReason::Redeploy,
                    UndeployCause::Missing => UndeployReason::Removed,
                };
                self.undeploy(name, reason);
                self.cleaner.delete_resources(stale);
            }
        }
        Some(verdict)
    }

    /// Periodic staleness pass over every tracked unit not serviced elsewhere
    pub fn check_all(&self) -> Vec<(String, Verdict)> {
        let mut verdicts = Vec::new();
        for name in self.registry.names() {
            if !self.serviced.try_add(&name) {
                debug!(app = %name, "Unit is serviced, skipping check");
                continue;
            }
            if let Some(verdict) = self.check_resources(&name, false) {
                verdicts.push((name.clone(), verdict));
            }
            self.serviced.remove(&name);
        }
        verdicts
    }

    /// Administrative check of one unit: apply any change immediately, then
    /// deploy the unit if it is not deployed
    ///
    /// Does not consult the serviced set: the caller marks the unit first.
    /// [`Reconciler::check_unit`](crate::Reconciler::check_unit) does both.
    #[instrument(skip(self))]
    pub fn check(&self, name: &str) -> Result<Option<Verdict>> {
        let verdict = self.check_resources(name, true);
        self.deploy_named(name).map(|_| verdict)
    }

    /// Reload an instance in place; an instance that is not available is
    /// started instead
    pub fn reload(&self, name: &str) {
        let Some(instance) = self.host.find_child(name) else {
            warn!(app = %name, "Cannot reload, application is not in the container");
            return;
        };

        if instance.is_available() {
            if instance.reload().is_err() {
                return;
            }
        } else if let Err(e) = instance.start() {
            warn!(app = %name, error = %e, "Application still fails to start");
            return;
        }
        self.emit(DeployEvent::Reloaded {
            name: name.to_string(),
        });
    }

    fn redeploy_in_place(&self, app: &mut TrackedApplication, archive: &Path) {
        let name = app.name().to_string();
        let Some(instance) = self.host.find_child(&name) else {
            return;
        };
        let unpack = self.unpack_for(&instance);
        let expanded = self.app_base.join(app.identity.base_name());

        let swap = |target: &AppInstance| {
            if let Some(content) = target.content_location() {
                if !has_archive_extension(&content.to_string_lossy()) {
                    if let Err(e) = remove_path(&content) {
                        warn!(app = %name, dir = %content.display(), error = %e, "Failed to remove expanded content");
                    }
                    target.set_content_location(Some(archive.to_path_buf()));
                }
            }
            if unpack {
                match self.archives.expand(archive, &expanded) {
                    Ok(dir) => target.set_content_location(Some(dir)),
                    Err(e) => error!(app = %name, error = %e, "Failed to expand changed archive"),
                }
            }
        };

        let result = if instance.is_available() {
            instance.reload_with(swap)
        } else {
            swap(&*instance);
            instance.start()
        };
        if let Err(e) = result {
            warn!(app = %name, error = %e, "Application failed to start after content swap");
        }

        app.touch();
        let content_root = if unpack {
            instance.content_location()
        } else {
            None
        };
        self.add_watched_resources(app, content_root.as_deref(), &instance);
        self.emit(DeployEvent::RedeployedInPlace { name });
    }

    /// Remove a unit from the container and the registry
    pub fn undeploy(&self, name: &str, reason: UndeployReason) -> bool {
        let removed_child = self.host.remove_child(name).is_some();
        let removed_entry = self.registry.remove(name).is_some();
        if !(removed_child || removed_entry) {
            return false;
        }

        info!(app = %name, reason = ?reason, "Application undeployed");
        self.emit(DeployEvent::Undeployed {
            name: name.to_string(),
            reason,
        });
        true
    }

    /// Retire older parallel versions whose successor is available and
    /// which have no active sessions. Returns the retired names.
    #[instrument(skip(self))]
    pub fn undeploy_old_versions(&self) -> Vec<String> {
        let names = self.registry.names();
        if names.len() < 2 {
            return Vec::new();
        }

        let mut by_path: BTreeMap<String, Vec<UnitIdentity>> = BTreeMap::new();
        for name in &names {
            let identity = UnitIdentity::from_file_name(name, false);
            by_path
                .entry(identity.path().to_string())
                .or_default()
                .push(identity);
        }

        let mut retired = Vec::new();
        for versions in by_path.values_mut() {
            versions.sort_by(|a, b| a.version().cmp(b.version()));
            for pair in versions.windows(2) {
                let (previous, current) = (&pair[0], &pair[1]);
                if self.retire_if_idle(previous, current) {
                    retired.push(previous.name().to_string());
                }
            }
        }
        retired
    }

    fn retire_if_idle(&self, previous: &UnitIdentity, current: &UnitIdentity) -> bool {
        let (Some(previous_instance), Some(current_instance)) = (
            self.host.find_child(previous.name()),
            self.host.find_child(current.name()),
        ) else {
            return false;
        };
        if !current_instance.is_available() || !self.serviced.try_add(previous.name()) {
            return false;
        }

        let mut retired = false;
        if previous_instance.active_sessions() == 0 {
            if let Some(app) = self.registry.get(previous.name()) {
                info!(
                    app = %previous.name(),
                    successor = %current.name(),
                    "Undeploying old version with no active sessions"
                );
                let mut stale = app.redeploy_resources.paths();
                stale.extend(app.reload_resources.paths());
                self.undeploy(previous.name(), UndeployReason::OldVersion);
                self.cleaner.delete_resources(&stale);
                retired = true;
            }
        }
        self.serviced.remove(previous.name());
        retired
    }

    /// Register and start an instance configured outside discovery
    #[instrument(skip(self, instance), fields(app = %instance.name()))]
    pub fn manage_app(&self, instance: Arc<AppInstance>) -> Result<()> {
        let name = instance.name();
        if self.registry.contains(&name) {
            debug!("Application already managed");
            return Ok(());
        }

        let identity = instance.identity();
        let mut tracked = TrackedApplication::new(identity.clone(), false);

        let location = instance
            .content_location()
            .map(|location| self.resolve_app_path(location))
            .or_else(|| {
                instance
                    .descriptor()
                    .and_then(|d| d.doc_base.as_deref())
                    .map(|doc_base| self.resolve_app_path(doc_base))
            });
        tracked.redeploy_resources.insert(
            self.config_base.join(identity.descriptor_file_name()),
            SENTINEL_MTIME,
        );
        let mut is_archive = false;
        if let Some(location) = &location {
            tracked
                .redeploy_resources
                .insert(location.clone(), last_modified(location));
            is_archive = has_archive_extension(&location.to_string_lossy());
        }

        let unpack = self.unpack_for(&instance);
        let expanded = self.app_base.join(identity.base_name());
        match &location {
            Some(archive) if is_archive && unpack && archive.is_file() => {
                let dir = self.archives.expand(archive, &expanded)?;
                instance.set_content_location(Some(dir));
            }
            Some(location) => instance.set_content_location(Some(location.clone())),
            None => {}
        }

        match self.host.add_child(instance.clone()) {
            Ok(()) => {}
            Err(e @ RegistryError::AlreadyExists(_)) => return Err(e.into()),
            Err(e) => warn!(error = %e, "Managed application failed to start"),
        }

        if is_archive && unpack {
            tracked
                .redeploy_resources
                .insert(expanded.clone(), last_modified(&expanded));
            self.add_watched_resources(&mut tracked, Some(&expanded), &instance);
        } else {
            self.add_watched_resources(&mut tracked, None, &instance);
        }

        self.registry.insert(tracked);
        info!("Application managed");
        self.emit(DeployEvent::Managed { name });
        Ok(())
    }

    /// Drop a unit from the registry and the container unconditionally
    #[instrument(skip(self))]
    pub fn unmanage_app(&self, name: &str) -> bool {
        self.undeploy(name, UndeployReason::Administrative)
    }

    pub(crate) fn resolve_app_path(&self, location: impl AsRef<Path>) -> PathBuf {
        let path = location.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.app_base.join(path)
        }
    }

    pub(crate) fn unpack_for(&self, instance: &AppInstance) -> bool {
        instance
            .descriptor()
            .map(|d| d.unpack_or(self.config.unpack_archives))
            .unwrap_or(self.config.unpack_archives)
    }
}
