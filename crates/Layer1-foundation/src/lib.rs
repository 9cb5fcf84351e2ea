//! # harbor-foundation
//!
//! Foundation layer for Harbor:
//! - Error: the typed error taxonomy shared by every layer
//! - Security: policy engine (resource requests, paths, commands)
//! - Audit: append-only record of security-relevant events
//! - Config: unified settings (global + project JSON, env overrides)
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  Command Dispatcher (Layer3)                            │
//! │           │                                             │
//! │           ▼                                             │
//! │  Lifecycle Controller ──► PolicyEngine (validate)       │
//! │           │                    │ violations             │
//! │           │                    ▼                        │
//! │           │               AuditLog (record)             │
//! │           ▼                                             │
//! │  Executor / Checkpoint Broker (Layer2)                  │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod audit;
pub mod config;
pub mod core;
pub mod error;
pub mod security;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Core
// ============================================================================
pub use self::core::{parse_memory_mb, ResourceKind, ResourceLimits};

// ============================================================================
// Security
// ============================================================================
pub use security::{PolicyEngine, ResourceRequest, SecurityMode, SecurityPolicy, Violation};

// ============================================================================
// Audit
// ============================================================================
pub use audit::{AuditEntry, AuditEvent, AuditLog, AuditLogConfig, AuditQuery};

// ============================================================================
// Config
// ============================================================================
pub use config::{
    AuditSettings, ExecutorSettings, HarborConfig, HealthSettings, RegistrySettings,
    RemoteTaskSettings, RuntimeSettings, HARBOR_CONFIG_FILE,
};

// ============================================================================
// Storage
// ============================================================================
pub use storage::JsonStore;
