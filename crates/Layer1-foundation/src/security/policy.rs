//! Security Policy - process-wide, set once at controller initialization

use super::patterns;
use crate::core::ResourceKind;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

/// How aggressively requests are rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityMode {
    /// Only hard ceilings and banned commands are enforced
    Permissive,
    /// Curated safe locations, sensitive system paths denied
    Moderate,
    /// Explicit allowlists only
    Strict,
}

impl SecurityMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Permissive => "permissive",
            Self::Moderate => "moderate",
            Self::Strict => "strict",
        }
    }
}

impl Default for SecurityMode {
    fn default() -> Self {
        Self::Moderate
    }
}

impl std::fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecurityMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "permissive" => Ok(Self::Permissive),
            "moderate" => Ok(Self::Moderate),
            "strict" => Ok(Self::Strict),
            other => Err(Error::Config(format!("Unknown security mode: {}", other))),
        }
    }
}

/// Security policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecurityPolicy {
    pub mode: SecurityMode,

    /// Memory ceiling per resource (MB)
    pub max_memory_mb: u64,

    /// CPU ceiling per resource
    pub max_cpus: f64,

    /// Resource kinds that may be created
    pub allowed_kinds: BTreeSet<ResourceKind>,

    /// Images / OS templates allowed in strict mode
    pub allowed_templates: BTreeSet<String>,

    /// Whether privileged resources may be requested
    pub allow_privileged: bool,

    /// Host paths explicitly allowed for volumes and copies
    pub allowed_paths: BTreeSet<String>,

    /// Binaries trusted for deployment into resources
    pub trusted_binaries: BTreeSet<String>,

    /// Regex patterns a command must not match
    pub banned_command_patterns: Vec<String>,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            mode: SecurityMode::default(),
            max_memory_mb: 8192,
            max_cpus: 4.0,
            allowed_kinds: ResourceKind::all().into_iter().collect(),
            allowed_templates: patterns::default_templates()
                .iter()
                .map(|s| s.to_string())
                .collect(),
            allow_privileged: false,
            allowed_paths: BTreeSet::new(),
            trusted_binaries: BTreeSet::new(),
            banned_command_patterns: patterns::default_banned_commands()
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl SecurityPolicy {
    pub fn new(mode: SecurityMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    pub fn permissive() -> Self {
        Self::new(SecurityMode::Permissive)
    }

    pub fn moderate() -> Self {
        Self::new(SecurityMode::Moderate)
    }

    pub fn strict() -> Self {
        Self::new(SecurityMode::Strict)
    }

    // ========================================================================
    // Builder
    // ========================================================================

    pub fn with_mode(mut self, mode: SecurityMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_limits(mut self, max_memory_mb: u64, max_cpus: f64) -> Self {
        self.max_memory_mb = max_memory_mb;
        self.max_cpus = max_cpus;
        self
    }

    pub fn allow_template(mut self, template: impl Into<String>) -> Self {
        self.allowed_templates.insert(template.into());
        self
    }

    pub fn allow_path(mut self, path: impl Into<String>) -> Self {
        self.allowed_paths.insert(path.into());
        self
    }

    pub fn trust_binary(mut self, path: impl Into<String>) -> Self {
        self.trusted_binaries.insert(path.into());
        self
    }

    pub fn ban_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.banned_command_patterns.push(pattern.into());
        self
    }

    pub fn with_allowed_kinds(mut self, kinds: impl IntoIterator<Item = ResourceKind>) -> Self {
        self.allowed_kinds = kinds.into_iter().collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parse() {
        assert_eq!("STRICT".parse::<SecurityMode>().unwrap(), SecurityMode::Strict);
        assert!("lax".parse::<SecurityMode>().is_err());
    }

    #[test]
    fn test_policy_serde_defaults() {
        let policy: SecurityPolicy = serde_json::from_str(r#"{"mode":"strict"}"#).unwrap();
        assert_eq!(policy.mode, SecurityMode::Strict);
        assert_eq!(policy.max_memory_mb, 8192);
        assert!(!policy.banned_command_patterns.is_empty());
    }

    #[test]
    fn test_builder() {
        let policy = SecurityPolicy::strict()
            .allow_template("custom:1")
            .trust_binary("/opt/runtime")
            .with_limits(1024, 2.0);
        assert!(policy.allowed_templates.contains("custom:1"));
        assert!(policy.trusted_binaries.contains("/opt/runtime"));
        assert_eq!(policy.max_memory_mb, 1024);
    }
}
