//! Policy Engine - side-effect free validators
//!
//! Every validator returns the list of violations (empty = pass). Callers
//! that find violations write an audit entry before turning them into
//! [`Error::SecurityViolation`](crate::Error::SecurityViolation).

use super::patterns;
use super::policy::{SecurityMode, SecurityPolicy};
use crate::core::{ResourceKind, ResourceLimits};
use crate::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path};

/// A single policy violation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Rule that was violated (`max_memory`, `banned_command`, ...)
    pub rule: String,
    /// Human readable explanation
    pub message: String,
}

impl Violation {
    pub fn new(rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.rule, self.message)
    }
}

/// Convert violations into an error (empty list is `Ok`)
pub fn into_result(violations: Vec<Violation>) -> Result<()> {
    if violations.is_empty() {
        Ok(())
    } else {
        Err(Error::SecurityViolation(
            violations.iter().map(|v| v.to_string()).collect(),
        ))
    }
}

/// Resource creation request as seen by the policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequest {
    pub kind: ResourceKind,
    pub template: String,
    pub limits: ResourceLimits,
    #[serde(default)]
    pub privileged: bool,
}

impl ResourceRequest {
    pub fn new(kind: ResourceKind, template: impl Into<String>, limits: ResourceLimits) -> Self {
        Self {
            kind,
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

struct BannedPattern {
    source: String,
    regex: Regex,
}

/// Compiled security policy
pub struct PolicyEngine {
    policy: SecurityPolicy,
    banned: Vec<BannedPattern>,
}

impl std::fmt::Debug for PolicyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyEngine")
            .field("mode", &self.policy.mode)
            .field("banned_patterns", &self.banned.len())
            .finish()
    }
}

impl PolicyEngine {
    /// Compile a policy; invalid banned patterns are a configuration error
    pub fn new(policy: SecurityPolicy) -> Result<Self> {
        let banned = policy
            .banned_command_patterns
            .iter()
            .map(|source| {
                Regex::new(source)
                    .map(|regex| BannedPattern {
                        source: source.clone(),
                        regex,
                    })
                    .map_err(|e| {
                        Error::Config(format!("Invalid banned pattern '{}': {}", source, e))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { policy, banned })
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    pub fn mode(&self) -> SecurityMode {
        self.policy.mode
    }

    // ========================================================================
    // Resource requests
    // ========================================================================

    pub fn validate_resource_request(&self, request: &ResourceRequest) -> Vec<Violation> {
        let mut violations = Vec::new();
        let policy = &self.policy;

        if !policy.allowed_kinds.contains(&request.kind) {
            violations.push(Violation::new(
                "resource_kind",
                format!("resource kind '{}' is not allowed", request.kind),
            ));
        }

        if request.limits.memory_mb > policy.max_memory_mb {
            violations.push(Violation::new(
                "max_memory",
                format!(
                    "requested {}MB exceeds limit of {}MB",
                    request.limits.memory_mb, policy.max_memory_mb
                ),
            ));
        }

        if request.limits.cpus > policy.max_cpus {
            violations.push(Violation::new(
                "max_cpus",
                format!(
                    "requested {} CPUs exceeds limit of {}",
                    request.limits.cpus, policy.max_cpus
                ),
            ));
        }

        if request.limits.cpus <= 0.0 || request.limits.memory_mb == 0 {
            violations.push(Violation::new(
                "limits",
                "memory and cpus must be greater than zero",
            ));
        }

        if policy.mode == SecurityMode::Strict
            && !policy.allowed_templates.contains(&request.template)
        {
            violations.push(Violation::new(
                "template",
                format!("template '{}' is not in the allowlist", request.template),
            ));
        }

        if request.privileged
            && !policy.allow_privileged
            && policy.mode != SecurityMode::Permissive
        {
            violations.push(Violation::new(
                "privileged",
                "privileged resources are disabled",
            ));
        }

        violations
    }

    // ========================================================================
    // Paths
    // ========================================================================

    /// Validate a host path used for volumes and copies
    pub fn validate_volume_path(&self, path: &str) -> Vec<Violation> {
        self.validate_path(path, patterns::safe_path_prefixes(), &self.policy.allowed_paths, "volume_path")
    }

    /// Validate a host binary deployed into a resource
    pub fn validate_binary_path(&self, path: &str) -> Vec<Violation> {
        self.validate_path(
            path,
            patterns::safe_binary_prefixes(),
            &self.policy.trusted_binaries,
            "binary_path",
        )
    }

    fn validate_path(
        &self,
        path: &str,
        safe_prefixes: &[&str],
        allowlist: &std::collections::BTreeSet<String>,
        rule: &str,
    ) -> Vec<Violation> {
        if self.policy.mode == SecurityMode::Permissive {
            return Vec::new();
        }

        let candidate = Path::new(path);
        if path.trim().is_empty() {
            return vec![Violation::new(rule, "path is empty")];
        }
        if !candidate.is_absolute() {
            return vec![Violation::new(rule, format!("'{}' is not an absolute path", path))];
        }
        if candidate
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return vec![Violation::new(rule, format!("'{}' contains '..'", path))];
        }

        let allowlisted = allowlist
            .iter()
            .any(|allowed| candidate.starts_with(Path::new(allowed)));

        match self.policy.mode {
            SecurityMode::Strict => {
                if allowlisted {
                    Vec::new()
                } else {
                    vec![Violation::new(
                        rule,
                        format!("'{}' is not explicitly allowed", path),
                    )]
                }
            }
            SecurityMode::Moderate => {
                if let Some(reason) = sensitive_reason(candidate) {
                    return vec![Violation::new(rule, reason)];
                }
                let safe = safe_prefixes
                    .iter()
                    .any(|prefix| candidate.starts_with(Path::new(prefix)));
                if allowlisted || safe {
                    Vec::new()
                } else {
                    vec![Violation::new(
                        rule,
                        format!("'{}' is outside the safe locations", path),
                    )]
                }
            }
            SecurityMode::Permissive => Vec::new(),
        }
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Scan a command against the banned patterns; the command is not modified
    pub fn validate_command(&self, command: &str) -> Vec<Violation> {
        let mut violations = Vec::new();

        if command.trim().is_empty() {
            violations.push(Violation::new("command", "command is empty"));
            return violations;
        }

        for pattern in &self.banned {
            if pattern.regex.is_match(command) {
                violations.push(Violation::new(
                    "banned_command",
                    format!("command matches banned pattern '{}'", pattern.source),
                ));
            }
        }

        violations
    }
}

/// Why a path is sensitive, if it is
fn sensitive_reason(path: &Path) -> Option<String> {
    for sensitive in patterns::sensitive_paths() {
        let sensitive = Path::new(sensitive);
        // "/" only matches exactly, every other entry covers its subtree
        let hit = if sensitive == Path::new("/") {
            path == sensitive
        } else {
            path.starts_with(sensitive)
        };
        if hit {
            return Some(format!(
                "'{}' is a sensitive system path",
                path.display()
            ));
        }
    }

    let sensitive_name = path.components().find_map(|c| match c {
        Component::Normal(name) => {
            let name = name.to_string_lossy();
            patterns::sensitive_file_names()
                .iter()
                .find(|s| name == **s)
                .map(|s| s.to_string())
        }
        _ => None,
    });

    sensitive_name.map(|name| format!("'{}' touches sensitive file '{}'", path.display(), name))
}
