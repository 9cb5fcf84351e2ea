//! Audit System
//!
//! Append-only record of security-relevant events. Every component writes to
//! it; policy validators never do, their callers record the violation before
//! surfacing the error.
//!
//! ```text
//! LifecycleController ──┐
//! HealthMonitor ────────┼──► AuditLog ──► recent(n) / query()
//! CheckpointBroker ─────┘        │
//!                                └──► tracing (target = harbor::audit)
//! ```

pub mod logger;
pub mod types;

pub use logger::{AuditLog, AuditLogConfig};
pub use types::{AuditEntry, AuditEvent, AuditQuery};
