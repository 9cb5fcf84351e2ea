//! Resource record - one per managed external resource

use crate::state::ResourceState;
use chrono::{DateTime, Utc};
use harbor_foundation::{ResourceKind, ResourceLimits};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceFlags {
    pub script_runtime_deployed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployed_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRecord {
    pub name: String,
    pub kind: ResourceKind,
    pub state: ResourceState,
    pub template: String,
    pub resource_limits: ResourceLimits,
    /// Identifier returned by the underlying runtime
    pub runtime_handle: String,
    pub flags: ResourceFlags,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloned_from: Option<String>,
    /// Whether the clone shares an immutable base with its source
    #[serde(skip_serializing_if = "Option::is_none")]
    pub copy_on_write: Option<bool>,
    pub privileged: bool,
    /// Restart on drift to stopped
    pub auto_recover: bool,
    /// Bumped each time a record is inserted under a name
    pub generation: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResourceRecord {
    pub fn new(
        name: impl Into<String>,
        kind: ResourceKind,
        template: impl Into<String>,
        limits: ResourceLimits,
        runtime_handle: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            kind,
            state: ResourceState::Created,
            template: template.into(),
            resource_limits: limits,
            runtime_handle: runtime_handle.into(),
            flags: ResourceFlags::default(),
            cloned_from: None,
            copy_on_write: None,
            privileged: false,
            auto_recover: false,
            generation: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_auto_recover(mut self, auto_recover: bool) -> Self {
        self.auto_recover = auto_recover;
        self
    }

    pub fn with_privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }

    pub fn cloned(mut self, source: &ResourceRecord, copy_on_write: bool) -> Self {
        self.cloned_from = Some(source.name.clone());
        self.copy_on_write = Some(copy_on_write);
        self.flags = source.flags.clone();
        self
    }

    pub fn set_state(&mut self, state: ResourceState) {
        self.state = state;
        self.updated_at = Utc::now();
    }
}
