//! # harbor-runtime
//!
//! Resource lifecycle control for Harbor.
//!
//! ## Modules
//!
//! - `state` / `record` - the resource state machine and tracked record
//! - `registry` - in-memory resource table with per-name locks
//! - `backend` - container and VM runtimes behind [`RuntimeBackend`]
//! - `controller` - the [`LifecycleController`], single mutation path
//! - `health` - background drift reconciliation
//! - `dispatch` - string command surface producing [`OperationResult`]s
//!
//! ## Example
//!
//! ```ignore
//! let controller = LifecycleController::new(HarborConfig::load()?)?;
//! let dispatcher = Dispatcher::new(controller.clone());
//!
//! let result = dispatcher.dispatch_line("create name=web memory=512 cpu=1").await;
//! assert!(result.success);
//! ```

pub mod backend;
pub mod controller;
pub mod dispatch;
pub mod health;
pub mod record;
pub mod registry;
pub mod script;
pub mod state;

// Model
pub use record::{ResourceFlags, ResourceRecord};
pub use state::{ResourceState, Transition};

// Backends
pub use backend::{ContainerBackend, ObservedState, ProvisionSpec, RuntimeBackend, VmBackend};

// Controller
pub use controller::{
    AuditReport, CleanupFailure, CleanupReport, ControllerBuilder, ControllerStatus,
    CreateRequest, DriftFinding, DriftOutcome, Idempotent, LifecycleController, RemoveOutcome,
    ScriptCheckpoint, ScriptOutcome, ScriptRequest,
};

// Health
pub use health::{HealthHandle, HealthMonitor};

// Dispatch
pub use dispatch::{parse_command, Dispatcher, OperationResult, ParsedCommand, OPERATIONS};
