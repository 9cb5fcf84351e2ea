//! Core Types - shared across all layers

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ============================================================================
// Resource Kind
// ============================================================================

/// Kind of externally managed compute resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// Container managed by a container engine (docker, podman)
    Container,
    /// Virtual machine managed by a hypervisor
    Vm,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Container => "container",
            Self::Vm => "vm",
        }
    }

    pub fn all() -> [ResourceKind; 2] {
        [Self::Container, Self::Vm]
    }
}

impl Default for ResourceKind {
    fn default() -> Self {
        Self::Container
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "container" | "docker" | "podman" => Ok(Self::Container),
            "vm" | "virtualbox" | "machine" => Ok(Self::Vm),
            other => Err(Error::Validation(format!("Unknown resource kind: {}", other))),
        }
    }
}

// ============================================================================
// Resource Limits
// ============================================================================

/// Resource ceilings requested for a resource
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLimits {
    /// Memory in megabytes
    pub memory_mb: u64,
    /// CPU count (fractional for containers)
    pub cpus: f64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_mb: 512,
            cpus: 1.0,
        }
    }
}

impl ResourceLimits {
    pub fn new(memory_mb: u64, cpus: f64) -> Self {
        Self { memory_mb, cpus }
    }

    /// Memory formatted for container engines (`512m`)
    pub fn memory_arg(&self) -> String {
        format!("{}m", self.memory_mb)
    }

    /// Whole CPU count for hypervisors, never below one
    pub fn whole_cpus(&self) -> u32 {
        self.cpus.ceil().max(1.0) as u32
    }
}

/// Parse a memory amount into megabytes.
///
/// Bare numbers are megabytes; `k`, `m`, `g` suffixes (optionally followed by
/// `b`) are accepted case-insensitively.
pub fn parse_memory_mb(value: &str) -> Result<u64> {
    let raw = value.trim().to_ascii_lowercase();
    let trimmed = raw.strip_suffix('b').unwrap_or(&raw);

    let (digits, multiplier_kb): (&str, u64) = match trimmed.chars().last() {
        Some('k') => (&trimmed[..trimmed.len() - 1], 1),
        Some('m') => (&trimmed[..trimmed.len() - 1], 1024),
        Some('g') => (&trimmed[..trimmed.len() - 1], 1024 * 1024),
        _ => (trimmed, 1024),
    };

    let amount: u64 = digits
        .trim()
        .parse()
        .map_err(|_| Error::Validation(format!("Invalid memory value: {}", value)))?;

    Ok(amount * multiplier_kb / 1024)
}
