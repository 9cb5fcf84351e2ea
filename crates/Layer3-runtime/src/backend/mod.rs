//! Runtime backends
//!
//! A backend translates lifecycle operations into invocations of the
//! underlying runtime's CLI:
//! - `ContainerBackend` - docker / podman
//! - `VmBackend` - hypervisor CLI (VirtualBox dialect)
//! - `testing::FakeBackend` - scripted in-memory runtime for tests
//!
//! Argument vectors are built by pure functions so each dialect can be
//! checked without the runtime installed.

pub mod container;
pub mod testing;
pub mod vm;

use async_trait::async_trait;
use harbor_foundation::{Error, ResourceKind, ResourceLimits, Result};
use harbor_task::{CommandOutput, OutputLine};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

pub use container::ContainerBackend;
pub use vm::VmBackend;

/// What the backend needs to bring a new resource into existence
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionSpec {
    pub name: String,
    pub template: String,
    pub limits: ResourceLimits,
    pub privileged: bool,
}

impl ProvisionSpec {
    pub fn new(name: impl Into<String>, template: impl Into<String>, limits: ResourceLimits) -> Self {
        Self {
            name: name.into(),
            template: template.into(),
            limits,
            privileged: false,
        }
    }

    pub fn privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }
}

/// State as reported by the runtime itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservedState {
    Created,
    Running,
    Paused,
    Stopped,
    Saved,
    /// The runtime no longer knows the resource
    Missing,
    Unknown(String),
}

impl ObservedState {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Saved => "saved",
            Self::Missing => "missing",
            Self::Unknown(raw) => raw,
        }
    }
}

impl std::fmt::Display for ObservedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime backend trait - implement to support a new resource kind
#[async_trait]
pub trait RuntimeBackend: Send + Sync {
    fn kind(&self) -> ResourceKind;

    /// Whether clones can share an immutable base with their source
    fn supports_cow_clone(&self) -> bool;

    /// Create the resource; returns the runtime handle
    async fn provision(&self, spec: &ProvisionSpec) -> Result<String>;

    async fn start(&self, handle: &str) -> Result<()>;
    async fn stop(&self, handle: &str) -> Result<()>;
    async fn pause(&self, handle: &str) -> Result<()>;
    async fn resume(&self, handle: &str) -> Result<()>;
    async fn save_state(&self, handle: &str) -> Result<()>;
    async fn restore_state(&self, handle: &str) -> Result<()>;
    async fn remove(&self, handle: &str) -> Result<()>;

    /// Clone a non-running source into a new resource; returns its handle
    async fn clone_resource(
        &self,
        source_handle: &str,
        spec: &ProvisionSpec,
        copy_on_write: bool,
    ) -> Result<String>;

    /// Drop runtime artifacts a clone left behind once its resource is removed
    async fn release_clone(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    /// Run a shell command inside the resource
    async fn exec(&self, handle: &str, command: &str, timeout: Duration) -> Result<CommandOutput>;

    /// Like `exec`, forwarding each output line to `sink` as it appears
    async fn exec_streaming(
        &self,
        handle: &str,
        command: &str,
        timeout: Duration,
        sink: mpsc::UnboundedSender<OutputLine>,
    ) -> Result<CommandOutput>;

    async fn copy_to(&self, handle: &str, host_path: &str, guest_path: &str) -> Result<()>;
    async fn copy_from(&self, handle: &str, guest_path: &str, host_path: &str) -> Result<()>;

    /// Ask the runtime for the actual state
    async fn inspect(&self, handle: &str) -> Result<ObservedState>;

    /// Write `contents` to `path` inside the resource
    async fn write_file(&self, handle: &str, path: &str, contents: &str) -> Result<()> {
        let command = format!("printf '%s' {} > {}", quote(contents)?, quote(path)?);
        self.exec(handle, &command, Duration::from_secs(30))
            .await?
            .check("write_file")
            .map(|_| ())
    }
}

/// Single-quote a value for `sh -c`
pub fn quote(value: &str) -> Result<String> {
    shlex::try_quote(value)
        .map(|q| q.into_owned())
        .map_err(|e| Error::Validation(format!("cannot quote value for the shell: {}", e)))
}
