//! Audit Log Types

use crate::security::SecurityMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Audit Event
// ============================================================================

/// Security-relevant event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    // Policy
    SecurityViolation,
    CommandBlocked,

    // Lifecycle
    ResourceCreated,
    ResourceCloned,
    ResourceRemoved,
    ResourceCleanup,
    StateChanged,

    // Execution
    CommandExecuted,
    ScriptExecuted,
    RuntimeDeployed,
    FileCopied,

    // Health monitor
    DriftDetected,
    AutoRecovery,

    // Checkpoint broker
    CheckpointCompletedExternally,

    // Controller
    ControllerStarted,
}

impl AuditEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SecurityViolation => "security_violation",
            Self::CommandBlocked => "command_blocked",
            Self::ResourceCreated => "resource_created",
            Self::ResourceCloned => "resource_cloned",
            Self::ResourceRemoved => "resource_removed",
            Self::ResourceCleanup => "resource_cleanup",
            Self::StateChanged => "state_changed",
            Self::CommandExecuted => "command_executed",
            Self::ScriptExecuted => "script_executed",
            Self::RuntimeDeployed => "runtime_deployed",
            Self::FileCopied => "file_copied",
            Self::DriftDetected => "drift_detected",
            Self::AutoRecovery => "auto_recovery",
            Self::CheckpointCompletedExternally => "checkpoint_completed_externally",
            Self::ControllerStarted => "controller_started",
        }
    }

    /// Risk level (0-10)
    pub fn risk_level(&self) -> u8 {
        match self {
            Self::CommandBlocked => 8,
            Self::SecurityViolation => 7,
            Self::CommandExecuted | Self::ScriptExecuted => 5,
            Self::RuntimeDeployed | Self::FileCopied => 5,
            Self::DriftDetected => 4,
            Self::ResourceRemoved | Self::ResourceCleanup => 3,
            Self::AutoRecovery | Self::CheckpointCompletedExternally => 3,
            Self::ResourceCreated | Self::ResourceCloned => 2,
            Self::StateChanged => 1,
            Self::ControllerStarted => 0,
        }
    }

    pub fn is_security(&self) -> bool {
        matches!(self, Self::SecurityViolation | Self::CommandBlocked)
    }
}

impl std::fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Audit Entry
// ============================================================================

/// Append-only audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// Monotonic sequence number within one controller
    pub sequence: u64,

    pub timestamp: DateTime<Utc>,

    pub event: AuditEvent,

    /// Resource the event concerns, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,

    /// Free-form structured details
    pub details: Value,

    /// Security mode active when the event was recorded
    pub security_mode: SecurityMode,
}

impl AuditEntry {
    pub fn risk_level(&self) -> u8 {
        self.event.risk_level()
    }
}

// ============================================================================
// Audit Query
// ============================================================================

/// Filter for reading audit entries back
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub events: Option<Vec<AuditEvent>>,
    pub resource: Option<String>,
    pub min_risk: Option<u8>,
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(mut self, events: Vec<AuditEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_min_risk(mut self, risk: u8) -> Self {
        self.min_risk = Some(risk);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(ref events) = self.events {
            if !events.contains(&entry.event) {
                return false;
            }
        }
        if let Some(ref resource) = self.resource {
            if entry.resource.as_deref() != Some(resource.as_str()) {
                return false;
            }
        }
        if let Some(min) = self.min_risk {
            if entry.risk_level() < min {
                return false;
            }
        }
        true
    }
}
