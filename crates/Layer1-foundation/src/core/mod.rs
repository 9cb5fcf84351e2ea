//! Core Module - shared resource vocabulary
//!
//! Types every layer speaks: what kind of resource is managed and which
//! limits it was created with.

pub mod types;

pub use types::{parse_memory_mb, ResourceKind, ResourceLimits};
