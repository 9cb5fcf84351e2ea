//! Security Policy Engine
//!
//! Validates resource requests, host paths and commands against a
//! configurable [`SecurityPolicy`].
//!
//! | Mode | Templates | Paths | Commands |
//! |------|-----------|-------|----------|
//! | permissive | any | any | banned patterns |
//! | moderate | any | safe prefixes, sensitive paths denied | banned patterns |
//! | strict | allowlist | allowlist only | banned patterns |
//!
//! Memory/CPU ceilings and the resource-kind allowlist apply in every mode.

pub mod engine;
pub mod patterns;
pub mod policy;

pub use engine::{into_result, PolicyEngine, ResourceRequest, Violation};
pub use policy::{SecurityMode, SecurityPolicy};
