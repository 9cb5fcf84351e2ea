//! Requests and outcomes of controller operations

use crate::backend::ObservedState;
use crate::record::ResourceRecord;
use crate::state::ResourceState;
use harbor_foundation::{AuditEntry, ResourceKind, ResourceLimits, SecurityMode, SecurityPolicy};
use harbor_task::{CheckpointRecord, CommandOutput, TaskId};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

// ============================================================================
// Requests
// ============================================================================

/// Parameters of a `create` operation
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub name: String,
    pub kind: ResourceKind,
    pub limits: ResourceLimits,
    /// Image or OS type; the configured default for `kind` when absent
    pub template: Option<String>,
    pub privileged: bool,
    pub auto_recover: bool,
}

impl CreateRequest {
    pub fn new(name: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            limits: ResourceLimits::default(),
            template: None,
            privileged: false,
            auto_recover: false,
        }
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }

    pub fn auto_recover(mut self, auto_recover: bool) -> Self {
        self.auto_recover = auto_recover;
        self
    }
}

/// Parameters of `execute_script`
#[derive(Debug, Clone)]
pub struct ScriptRequest {
    pub name: String,
    pub script: String,
    pub with_progress: bool,
    pub timeout: Option<Duration>,
}

impl ScriptRequest {
    pub fn new(name: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: script.into(),
            with_progress: false,
            timeout: None,
        }
    }

    pub fn with_progress(mut self, with_progress: bool) -> Self {
        self.with_progress = with_progress;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// Result of an idempotent transition
#[derive(Debug, Clone, Serialize)]
pub struct Idempotent {
    pub record: ResourceRecord,
    pub skipped: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveOutcome {
    pub record: ResourceRecord,
    /// A running resource was stopped before removal
    pub stopped_first: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptOutcome {
    #[serde(flatten)]
    pub output: CommandOutput,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    pub checkpoints: Vec<CheckpointRecord>,
    pub script_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupFailure {
    pub name: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub removed: Vec<String>,
    pub failed: Vec<CleanupFailure>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Controller summary for the `status` operation
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerStatus {
    pub resources: usize,
    pub capacity: usize,
    pub by_state: BTreeMap<String, usize>,
    pub security_mode: SecurityMode,
    pub checkpoint_tasks: usize,
    pub audit_entries: usize,
    pub security_events: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub entries: Vec<AuditEntry>,
    pub policy: SecurityPolicy,
    pub security_events: usize,
}

/// A checkpoint seen in the output of a script running in `resource`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptCheckpoint {
    pub resource: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    pub record: CheckpointRecord,
}

// ============================================================================
// Drift
// ============================================================================

/// Divergence between a record and what its runtime reports
///
/// `generation` and `recorded` pin the record version the finding was made
/// against; a finding for a record that has since changed is discarded.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftFinding {
    pub name: String,
    pub generation: u64,
    pub recorded: ResourceState,
    pub observed: ObservedState,
    pub target: ResourceState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DriftOutcome {
    /// The record changed after the finding was made
    Stale,
    Corrected {
        from: ResourceState,
        to: ResourceState,
    },
    Recovered {
        from: ResourceState,
    },
    RecoveryFailed {
        from: ResourceState,
        error: String,
    },
}

/// State the registry should move to given what the runtime reports
///
/// `None` means no correction: either the two agree or the observation is
/// not trusted for the recorded state. Only active records (running or
/// paused) are corrected.
pub fn reconcile(recorded: ResourceState, observed: &ObservedState) -> Option<ResourceState> {
    use ObservedState as O;
    use ResourceState as R;

    match (recorded, observed) {
        (_, O::Unknown(_)) => None,
        (R::Running | R::Paused, O::Stopped | O::Missing | O::Created) => Some(R::Stopped),
        (R::Running, O::Paused) => Some(R::Paused),
        (R::Paused, O::Running) => Some(R::Running),
        (R::Running | R::Paused, O::Saved) => Some(R::Saved),
        _ => None,
    }
}
