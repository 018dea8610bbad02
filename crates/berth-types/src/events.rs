//! Event types for deployment observability
//!
//! Events provide a unified stream of deployment lifecycle activities.

use crate::UnitKind;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping all deployment events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployEventEnvelope {
    /// Unique event ID
    pub id: Uuid,

    /// Event timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Host that emitted the event
    pub host: String,

    /// Event severity
    pub severity: EventSeverity,

    /// The actual event
    pub event: DeployEvent,
}

impl DeployEventEnvelope {
    pub fn new(event: DeployEvent, host: impl Into<String>) -> Self {
        let severity = event.default_severity();
        Self {
            id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            host: host.into(),
            severity,
            event,
        }
    }
}

/// Event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSeverity {
    /// Informational event
    Info,
    /// Warning event
    Warning,
    /// Error event
    Error,
}

/// Why an application left the container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UndeployReason {
    /// A redeploy resource changed; discovery will deploy it again
    Redeploy,
    /// A redeploy resource disappeared
    Removed,
    /// Superseded by a newer parallel version with no active sessions
    OldVersion,
    /// Administrative request
    Administrative,
}

/// Deployment events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DeployEvent {
    /// Unit deployed; `failed` marks a placeholder deployment
    Deployed {
        name: String,
        kind: UnitKind,
        failed: bool,
    },

    /// Unit removed from the container
    Undeployed { name: String, reason: UndeployReason },

    /// Reload resource changed and the application was reloaded
    Reloaded { name: String },

    /// Archive behind a descriptor changed; content was swapped in place
    RedeployedInPlace { name: String },

    /// Externally configured application registered without discovery
    Managed { name: String },
}

impl DeployEvent {
    fn default_severity(&self) -> EventSeverity {
        match self {
            DeployEvent::Deployed { failed: true, .. } => EventSeverity::Error,
            DeployEvent::Undeployed {
                reason: UndeployReason::Removed,
                ..
            } => EventSeverity::Warning,
            _ => EventSeverity::Info,
        }
    }

    /// Name of the unit the event refers to
    pub fn name(&self) -> &str {
        match self {
            DeployEvent::Deployed { name, .. }
            | DeployEvent::Undeployed { name, .. }
            | DeployEvent::Reloaded { name }
            | DeployEvent::RedeployedInPlace { name }
            | DeployEvent::Managed { name } => name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_deploy_is_error() {
        let envelope = DeployEventEnvelope::new(
            DeployEvent::Deployed {
                name: "/shop".into(),
                kind: UnitKind::Archive,
                failed: true,
            },
            "localhost",
        );
        assert_eq!(envelope.severity, EventSeverity::Error);
        assert_eq!(envelope.event.name(), "/shop");
    }
}
