//! Container tree
//!
//! A [`Host`] owns the running application instances. Adding a child makes
//! the instance live and starts it; removing a child stops it. Instances are
//! either configured from a descriptor or failed placeholders that occupy a
//! deployed slot so later fixes are picked up as redeploys.

use crate::error::{RegistryError, Result};
use berth_types::{AppDescriptor, UnitIdentity};
use parking_lot::RwLock;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Container holding named application instances
pub trait Host: Send + Sync {
    /// Host name
    fn name(&self) -> &str;

    /// Add and start an instance.
    ///
    /// Fails with [`RegistryError::AlreadyExists`] without adding anything
    /// when the name is taken. A start failure is returned as well, but the
    /// instance stays in the container.
    fn add_child(&self, app: Arc<AppInstance>) -> Result<()>;

    /// Stop and remove an instance
    fn remove_child(&self, name: &str) -> Option<Arc<AppInstance>>;

    /// Look up an instance by unit name
    fn find_child(&self, name: &str) -> Option<Arc<AppInstance>>;

    /// All instances
    fn children(&self) -> Vec<Arc<AppInstance>>;
}

/// Hook invoked while an instance starts
pub trait LifecycleListener: Send + Sync {
    /// Registered type name of this listener
    fn kind(&self) -> &str;

    /// Finish configuring the instance before it becomes available
    fn before_start(&self, app: &AppInstance) -> Result<()>;
}

/// Variant of an application instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppKind {
    /// Instance configured from a descriptor (possibly the empty default)
    Configured(AppDescriptor),
    /// Non-functional placeholder for a deployment that could not be built
    Failed { reason: String },
}

/// Lifecycle state of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    New,
    Started,
    Stopped,
    Failed,
}

struct InstanceState {
    identity: UnitIdentity,
    lifecycle: LifecycleState,
    content_location: Option<PathBuf>,
    config_file: Option<PathBuf>,
    watched_resources: Vec<String>,
    listeners: Vec<Arc<dyn LifecycleListener>>,
    active_sessions: usize,
    reloads: u64,
}

/// A running (or failed) application instance
pub struct AppInstance {
    kind: AppKind,
    state: RwLock<InstanceState>,
}

impl AppInstance {
    pub fn new(identity: UnitIdentity, kind: AppKind) -> Self {
        Self {
            kind,
            state: RwLock::new(InstanceState {
                identity,
                lifecycle: LifecycleState::New,
                content_location: None,
                config_file: None,
                watched_resources: Vec::new(),
                listeners: Vec::new(),
                active_sessions: 0,
                reloads: 0,
            }),
        }
    }

    /// Placeholder for a deployment that failed to build
    pub fn failed(identity: UnitIdentity, reason: impl Into<String>) -> Self {
        Self::new(
            identity,
            AppKind::Failed {
                reason: reason.into(),
            },
        )
    }

    pub fn kind(&self) -> &AppKind {
        &self.kind
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self.kind, AppKind::Failed { .. })
    }

    /// Descriptor this instance was configured from
    pub fn descriptor(&self) -> Option<&AppDescriptor> {
        match &self.kind {
            AppKind::Configured(descriptor) => Some(descriptor),
            AppKind::Failed { .. } => None,
        }
    }

    pub fn identity(&self) -> UnitIdentity {
        self.state.read().identity.clone()
    }

    /// Set name, path and version in one step
    pub fn set_identity(&self, identity: UnitIdentity) {
        self.state.write().identity = identity;
    }

    pub fn name(&self) -> String {
        self.state.read().identity.name().to_string()
    }

    pub fn content_location(&self) -> Option<PathBuf> {
        self.state.read().content_location.clone()
    }

    pub fn set_content_location(&self, location: Option<PathBuf>) {
        self.state.write().content_location = location;
    }

    pub fn config_file(&self) -> Option<PathBuf> {
        self.state.read().config_file.clone()
    }

    pub fn set_config_file(&self, path: Option<PathBuf>) {
        self.state.write().config_file = path;
    }

    pub fn add_listener(&self, listener: Arc<dyn LifecycleListener>) {
        self.state.write().listeners.push(listener);
    }

    /// Type names of the attached listeners
    pub fn listener_kinds(&self) -> Vec<String> {
        self.state
            .read()
            .listeners
            .iter()
            .map(|l| l.kind().to_string())
            .collect()
    }

    /// Declare a reload resource; duplicates are ignored
    pub fn add_watched_resource(&self, resource: impl Into<String>) {
        let resource = resource.into();
        let mut state = self.state.write();
        if !state.watched_resources.contains(&resource) {
            state.watched_resources.push(resource);
        }
    }

    pub fn watched_resources(&self) -> Vec<String> {
        self.state.read().watched_resources.clone()
    }

    pub fn state(&self) -> LifecycleState {
        self.state.read().lifecycle
    }

    pub fn is_available(&self) -> bool {
        self.state() == LifecycleState::Started
    }

    pub fn active_sessions(&self) -> usize {
        self.state.read().active_sessions
    }

    pub fn set_active_sessions(&self, count: usize) {
        self.state.write().active_sessions = count;
    }

    /// Number of completed reloads
    pub fn reloads(&self) -> u64 {
        self.state.read().reloads
    }

    /// Run the attached listeners and mark the instance available
    pub fn start(&self) -> Result<()> {
        let name = self.name();

        if let AppKind::Failed { reason } = &self.kind {
            self.state.write().lifecycle = LifecycleState::Failed;
            return Err(RegistryError::StartFailed {
                name,
                reason: reason.clone(),
            });
        }

        let listeners = self.state.read().listeners.clone();
        for listener in listeners {
            if let Err(e) = listener.before_start(self) {
                self.state.write().lifecycle = LifecycleState::Failed;
                return Err(e);
            }
        }

        self.state.write().lifecycle = LifecycleState::Started;
        debug!(app = %name, "Application started");
        Ok(())
    }

    /// Stop the instance; active sessions are expired
    pub fn stop(&self) {
        let mut state = self.state.write();
        if state.lifecycle == LifecycleState::Started {
            state.lifecycle = LifecycleState::Stopped;
        }
        state.active_sessions = 0;
        debug!(app = %state.identity.name(), "Application stopped");
    }

    /// Stop and start again, keeping the same instance
    pub fn reload(&self) -> Result<()> {
        self.reload_with(|_| {})
    }

    /// Reload, running `swap` while the instance is stopped
    pub fn reload_with<F>(&self, swap: F) -> Result<()>
    where
        F: FnOnce(&AppInstance),
    {
        self.stop();
        swap(self);
        let result = self.start();
        self.state.write().reloads += 1;
        match &result {
            Ok(()) => info!(app = %self.name(), "Application reloaded"),
            Err(e) => warn!(app = %self.name(), error = %e, "Application reload failed"),
        }
        result
    }

    /// Resolve a content-relative resource against the content location
    pub fn resolve_resource(&self, resource: &str) -> Option<PathBuf> {
        let path = Path::new(resource);
        if path.is_absolute() {
            return Some(path.to_path_buf());
        }
        self.content_location().map(|root| root.join(path))
    }
}

impl fmt::Debug for AppInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("AppInstance")
            .field("name", &state.identity.name())
            .field("kind", &self.kind)
            .field("lifecycle", &state.lifecycle)
            .field("content_location", &state.content_location)
            .field("active_sessions", &state.active_sessions)
            .finish()
    }
}
