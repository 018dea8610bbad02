//! Deployment procedures
//!
//! One procedure per packaging. Each builds an application instance, adds it
//! to the container and records the resources whose change must trigger a
//! redeploy or a reload. The order of the redeploy resources matters: when
//! one of them changes, only the resources recorded after it are deleted.
//!
//! Parse, listener and illegal-content failures still deploy a failed
//! placeholder so the unit keeps its slot. File-system failures while
//! expanding or copying abort the unit, which stays undeployed until the
//! next discovery pass.

use crate::archive::EXPANSION_TRACKER;
use crate::engine::DeploymentEngine;
use crate::error::{DeployError, Result};
use crate::fsutil::{canonical_or_absolute, last_modified, with_suffix};
use berth_registry::{AppInstance, AppKind};
use berth_types::{
    has_archive_extension, AppDescriptor, DeployEvent, TrackedApplication, UnitIdentity,
    UnitKind, ARCHIVE_EXTENSION, EMBEDDED_DESCRIPTOR, HOST_DEFAULTS_FILE, SENTINEL_MTIME,
};
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Result of one deployment
#[derive(Debug, Clone)]
pub struct DeployOutcome {
    /// The instance started from a real configuration
    pub success: bool,
    /// The container holds the instance and the registry tracks it
    pub registered: bool,
    pub tracked: TrackedApplication,
}

impl DeploymentEngine {
    /// Deploy a standalone descriptor from the configuration base
    #[instrument(skip(self, identity, descriptor_file), fields(app = %identity.name()))]
    pub fn deploy_descriptor(
        &self,
        identity: &UnitIdentity,
        descriptor_file: &Path,
    ) -> Result<DeployOutcome> {
        info!(descriptor = %descriptor_file.display(), "Deploying descriptor");

        let mut tracked = TrackedApplication::new(identity.clone(), true);
        let mut external = false;
        let mut external_archive = false;

        let prepared = self
            .parse_descriptor_file(descriptor_file)
            .and_then(|mut descriptor| {
                if let Some(doc_base) = descriptor.doc_base.clone() {
                    let location = self.resolve_app_path(&doc_base);
                    if !canonical_or_absolute(&location).starts_with(&self.app_base) {
                        external = true;
                        external_archive = has_archive_extension(&doc_base);
                        tracked
                            .redeploy_resources
                            .insert(descriptor_file.to_path_buf(), last_modified(descriptor_file));
                        tracked
                            .redeploy_resources
                            .insert(location.clone(), last_modified(&location));
                        self.warn_hidden_content(identity);
                    } else {
                        warn!(
                            doc_base = %doc_base,
                            "doc_base inside the application base is ignored"
                        );
                        descriptor.doc_base = None;
                    }
                }
                self.configure(identity, descriptor, Some(descriptor_file.to_path_buf()))
            })
            .and_then(|instance| {
                self.bind_descriptor_content(identity, &instance)?;
                Ok(instance)
            });
        let instance = self.recover(identity, prepared)?;
        let started = self.add_to_host(&instance);

        let doc_base = instance.descriptor().and_then(|d| d.doc_base.clone());
        let expanded = match doc_base.as_deref() {
            Some(doc_base) if !has_archive_extension(doc_base) => self.resolve_app_path(doc_base),
            _ => self.app_base.join(identity.base_name()),
        };
        let unpack = self.unpack_for(&instance);

        if external_archive {
            if unpack {
                tracked
                    .redeploy_resources
                    .insert(expanded.clone(), last_modified(&expanded));
                self.add_watched_resources(&mut tracked, Some(&expanded), &instance);
            } else {
                self.add_watched_resources(&mut tracked, None, &instance);
            }
        } else {
            if !external {
                // Catches an archive added to the application base later
                let archive = with_suffix(&expanded, ARCHIVE_EXTENSION);
                let modified = last_modified(&archive);
                tracked.redeploy_resources.insert(archive, modified);
            }
            if unpack {
                tracked
                    .redeploy_resources
                    .insert(expanded.clone(), last_modified(&expanded));
                self.add_watched_resources(&mut tracked, Some(&expanded), &instance);
            } else {
                self.add_watched_resources(&mut tracked, None, &instance);
            }
            if !external {
                tracked
                    .redeploy_resources
                    .insert(descriptor_file.to_path_buf(), last_modified(descriptor_file));
            }
        }
        self.add_global_defaults(&mut tracked);

        Ok(self.finish(UnitKind::Descriptor, &instance, tracked, started))
    }

    /// Deploy a packaged archive from the application base
    #[instrument(skip(self, identity, archive), fields(app = %identity.name()))]
    pub fn deploy_archive(&self, identity: &UnitIdentity, archive: &Path) -> Result<DeployOutcome> {
        info!(archive = %archive.display(), "Deploying archive");

        let expanded = self.app_base.join(identity.base_name());
        let tracker = expanded.join(EXPANSION_TRACKER);
        let copied_descriptor = self.config_base.join(identity.descriptor_file_name());
        let mut descriptor_path = expanded.join(EMBEDDED_DESCRIPTOR);
        let deploy_this = self.config.deploy_descriptor;

        let embedded = match self.archives.contains_entry(archive, EMBEDDED_DESCRIPTOR) {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "Cannot inspect archive for an embedded descriptor");
                false
            }
        };

        // An expanded descriptor is only trusted while the expansion is current
        let use_expanded = descriptor_path.exists()
            && self.config.unpack_archives
            && (!tracker.exists() || last_modified(&tracker) == last_modified(archive));

        let prepared = if deploy_this && use_expanded && !self.config.copy_descriptor {
            self.parse_descriptor_file(&descriptor_path)
                .and_then(|d| self.configure(identity, d, Some(descriptor_path.clone())))
        } else if deploy_this && embedded {
            self.read_embedded_descriptor(archive).and_then(|d| {
                self.configure(identity, d, Some(archive.join(EMBEDDED_DESCRIPTOR)))
            })
        } else if !deploy_this && embedded {
            error!("Archive carries a descriptor but host policy forbids deploying it");
            Ok(self.placeholder(identity, "embedded descriptor blocked by host policy"))
        } else {
            self.configure(identity, AppDescriptor::default(), None)
        };
        let instance = self.recover(identity, prepared)?;

        let mut copy_this = false;
        if deploy_this {
            copy_this = instance
                .descriptor()
                .map(|d| d.copy_descriptor_or(self.config.copy_descriptor))
                .unwrap_or(self.config.copy_descriptor);
            if embedded && copy_this {
                descriptor_path = copied_descriptor.clone();
                self.copy_embedded_descriptor(archive, &descriptor_path)?;
                instance.set_config_file(Some(descriptor_path.clone()));
            }
        }

        let governed = deploy_this && copy_this && descriptor_path.exists();
        let mut tracked = TrackedApplication::new(identity.clone(), governed);
        tracked
            .redeploy_resources
            .insert(archive.to_path_buf(), last_modified(archive));
        if governed {
            tracked
                .redeploy_resources
                .insert(descriptor_path.clone(), last_modified(&descriptor_path));
        } else {
            // Catches a descriptor added to the configuration base later
            tracked
                .redeploy_resources
                .insert(copied_descriptor, SENTINEL_MTIME);
        }

        let unpack = !instance.is_placeholder() && self.unpack_for(&instance);
        let instance = if unpack {
            match self.archives.expand(archive, &expanded) {
                Ok(dir) => {
                    instance.set_content_location(Some(dir));
                    instance
                }
                Err(e) if e.yields_placeholder() => {
                    error!(error = %e, "Archive rejected, deploying placeholder");
                    self.placeholder(identity, &e)
                }
                Err(e) => return Err(e),
            }
        } else {
            if !instance.is_placeholder() {
                instance.set_content_location(Some(archive.to_path_buf()));
            }
            instance
        };
        let started = self.add_to_host(&instance);

        if unpack && !instance.is_placeholder() {
            tracked
                .redeploy_resources
                .insert(expanded.clone(), last_modified(&expanded));
            self.add_watched_resources(&mut tracked, Some(&expanded), &instance);
            if deploy_this && !copy_this && (embedded || descriptor_path.exists()) {
                tracked
                    .redeploy_resources
                    .insert(descriptor_path.clone(), last_modified(&descriptor_path));
            }
        } else {
            self.add_watched_resources(&mut tracked, None, &instance);
        }
        self.add_global_defaults(&mut tracked);

        Ok(self.finish(UnitKind::Archive, &instance, tracked, started))
    }

    /// Deploy an exploded directory from the application base
    #[instrument(skip(self, identity, dir), fields(app = %identity.name()))]
    pub fn deploy_directory(&self, identity: &UnitIdentity, dir: &Path) -> Result<DeployOutcome> {
        info!(dir = %dir.display(), "Deploying directory");

        let descriptor_path = dir.join(EMBEDDED_DESCRIPTOR);
        let copied_descriptor = self.config_base.join(identity.descriptor_file_name());
        let deploy_this = self.config.deploy_descriptor;
        let mut copy_this = self.config.copy_descriptor;
        let embedded = descriptor_path.exists();

        let prepared = if deploy_this && embedded {
            match self.parse_descriptor_file(&descriptor_path) {
                Ok(descriptor) => {
                    copy_this = descriptor.copy_descriptor_or(copy_this);
                    let config_file = if copy_this {
                        fs::copy(&descriptor_path, &copied_descriptor)
                            .map_err(DeployError::io(&copied_descriptor))?;
                        copied_descriptor.clone()
                    } else {
                        descriptor_path.clone()
                    };
                    self.configure(identity, descriptor, Some(config_file))
                }
                Err(e) => Err(e),
            }
        } else if !deploy_this && embedded {
            error!("Directory carries a descriptor but host policy forbids deploying it");
            Ok(self.placeholder(identity, "embedded descriptor blocked by host policy"))
        } else {
            self.configure(identity, AppDescriptor::default(), None)
        };
        let instance = self.recover(identity, prepared)?;
        if !instance.is_placeholder() {
            instance.set_content_location(Some(dir.to_path_buf()));
        }
        let started = self.add_to_host(&instance);

        let governed = embedded && deploy_this && copy_this;
        let mut tracked = TrackedApplication::new(identity.clone(), governed);
        // Catches an archive with the same name added later
        tracked
            .redeploy_resources
            .insert(with_suffix(dir, ARCHIVE_EXTENSION), SENTINEL_MTIME);
        tracked
            .redeploy_resources
            .insert(dir.to_path_buf(), last_modified(dir));
        if deploy_this && embedded {
            if copy_this {
                tracked
                    .redeploy_resources
                    .insert(copied_descriptor.clone(), last_modified(&copied_descriptor));
            } else {
                tracked
                    .redeploy_resources
                    .insert(descriptor_path.clone(), last_modified(&descriptor_path));
                tracked
                    .redeploy_resources
                    .insert(copied_descriptor, SENTINEL_MTIME);
            }
        } else {
            tracked
                .redeploy_resources
                .insert(copied_descriptor, SENTINEL_MTIME);
            if !deploy_this && embedded {
                tracked
                    .redeploy_resources
                    .insert(descriptor_path.clone(), last_modified(&descriptor_path));
            }
        }
        self.add_watched_resources(&mut tracked, Some(dir), &instance);
        self.add_global_defaults(&mut tracked);

        Ok(self.finish(UnitKind::Directory, &instance, tracked, started))
    }

    /// Record the instance's watched resources as reload resources.
    ///
    /// Relative entries resolve against `content_root` and are skipped
    /// without one.
    pub(crate) fn add_watched_resources(
        &self,
        tracked: &mut TrackedApplication,
        content_root: Option<&Path>,
        instance: &AppInstance,
    ) {
        for resource in instance.watched_resources() {
            let path = Path::new(&resource);
            let path = if path.is_absolute() {
                path.to_path_buf()
            } else if let Some(root) = content_root {
                root.join(path)
            } else {
                debug!(resource = %resource, "Ignoring relative watched resource without content root");
                continue;
            };
            let modified = last_modified(&path);
            tracked.reload_resources.insert(path, modified);
        }
    }

    /// Shared defaults files go last so they never precede a deletable
    /// resource
    pub(crate) fn add_global_defaults(&self, tracked: &mut TrackedApplication) {
        let host_defaults = self.config_base.join(HOST_DEFAULTS_FILE);
        if host_defaults.is_file() {
            let modified = last_modified(&host_defaults);
            tracked.redeploy_resources.insert(host_defaults, modified);
        }
        for defaults in &self.global_defaults {
            if defaults.is_file() {
                tracked
                    .redeploy_resources
                    .insert(defaults.clone(), last_modified(defaults));
            }
        }
    }

    fn parse_descriptor_file(&self, path: &Path) -> Result<AppDescriptor> {
        self.parser.lock().parse_file(path)
    }

    fn read_embedded_descriptor(&self, archive: &Path) -> Result<AppDescriptor> {
        let origin = archive.join(EMBEDDED_DESCRIPTOR);
        let content = self
            .archives
            .read_entry(archive, EMBEDDED_DESCRIPTOR)
            .map_err(|e| DeployError::Parse {
                path: origin.clone(),
                reason: e.to_string(),
            })?
            .ok_or_else(|| DeployError::Parse {
                path: origin.clone(),
                reason: "entry disappeared from archive".to_string(),
            })?;
        self.parser.lock().parse(&content, &origin)
    }

    fn copy_embedded_descriptor(&self, archive: &Path, target: &Path) -> Result<()> {
        let content = self
            .archives
            .read_entry(archive, EMBEDDED_DESCRIPTOR)?
            .unwrap_or_default();
        fs::write(target, content).map_err(DeployError::io(target))?;
        debug!(target = %target.display(), "Copied embedded descriptor");
        Ok(())
    }

    fn configure(
        &self,
        identity: &UnitIdentity,
        descriptor: AppDescriptor,
        config_file: Option<PathBuf>,
    ) -> Result<Arc<AppInstance>> {
        let listener_type = descriptor
            .listener
            .clone()
            .unwrap_or_else(|| self.config.listener.clone());
        let listener = self.listeners.create(&listener_type, &self.config)?;

        let instance = AppInstance::new(identity.clone(), AppKind::Configured(descriptor));
        instance.add_listener(listener);
        instance.set_config_file(config_file);
        Ok(Arc::new(instance))
    }

    fn bind_descriptor_content(&self, identity: &UnitIdentity, instance: &AppInstance) -> Result<()> {
        let unpack = self.unpack_for(instance);
        let expanded = self.app_base.join(identity.base_name());
        let doc_base = instance.descriptor().and_then(|d| d.doc_base.clone());

        let location = match doc_base {
            Some(doc_base) => {
                let location = self.resolve_app_path(&doc_base);
                if has_archive_extension(&doc_base) && unpack && location.is_file() {
                    self.archives.expand(&location, &expanded)?
                } else {
                    location
                }
            }
            None => {
                let archive = self.app_base.join(identity.archive_file_name());
                if archive.is_file() {
                    if unpack {
                        self.archives.expand(&archive, &expanded)?
                    } else {
                        archive
                    }
                } else if expanded.is_dir() {
                    expanded
                } else {
                    return Ok(());
                }
            }
        };
        instance.set_content_location(Some(location));
        Ok(())
    }

    fn warn_hidden_content(&self, identity: &UnitIdentity) {
        let archive = self.app_base.join(identity.archive_file_name());
        if archive.exists() {
            warn!(archive = %archive.display(), "Archive is hidden by an external doc_base");
        }
        let dir = self.app_base.join(identity.base_name());
        if dir.exists() {
            warn!(dir = %dir.display(), "Directory is hidden by an external doc_base");
        }
    }

    fn placeholder(&self, identity: &UnitIdentity, reason: impl Display) -> Arc<AppInstance> {
        Arc::new(AppInstance::failed(identity.clone(), reason.to_string()))
    }

    fn recover(
        &self,
        identity: &UnitIdentity,
        prepared: Result<Arc<AppInstance>>,
    ) -> Result<Arc<AppInstance>> {
        match prepared {
            Ok(instance) => Ok(instance),
            Err(e) if e.yields_placeholder() => {
                error!(error = %e, "Deployment failed, deploying placeholder");
                Ok(self.placeholder(identity, &e))
            }
            Err(e) => Err(e),
        }
    }

    fn add_to_host(&self, instance: &Arc<AppInstance>) -> bool {
        match self.host.add_child(instance.clone()) {
            Ok(()) => true,
            Err(e) => {
                if !instance.is_placeholder() {
                    error!(error = %e, "Application failed to start");
                }
                false
            }
        }
    }

    fn finish(
        &self,
        kind: UnitKind,
        instance: &Arc<AppInstance>,
        tracked: TrackedApplication,
        started: bool,
    ) -> DeployOutcome {
        let name = tracked.name().to_string();
        let registered = self
            .host
            .find_child(&name)
            .map(|child| Arc::ptr_eq(&child, instance))
            .unwrap_or(false);
        let success = started && !instance.is_placeholder();

        if registered {
            self.registry.insert(tracked.clone());
            info!(kind = %kind, success, "Application deployed");
            self.emit(DeployEvent::Deployed {
                name,
                kind,
                failed: !success,
            });
        } else {
            warn!(kind = %kind, "Application not in the container, not tracking it");
        }

        DeployOutcome {
            success,
            registered,
            tracked,
        }
    }
}
