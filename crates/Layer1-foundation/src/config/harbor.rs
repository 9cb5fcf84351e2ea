//! Harbor Config - unified settings
//!
//! Loaded once at startup: defaults, then the global file, then the project
//! file, then environment overrides. Read-only afterwards.

use crate::security::{SecurityMode, SecurityPolicy};
use crate::storage::{merge_json, JsonStore};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Config file name in both the global and project store
pub const HARBOR_CONFIG_FILE: &str = "harbor.json";

pub const ENV_SECURITY_MODE: &str = "HARBOR_SECURITY_MODE";
pub const ENV_CONTAINER_RUNTIME: &str = "HARBOR_CONTAINER_RUNTIME";
pub const ENV_MAX_RESOURCES: &str = "HARBOR_MAX_RESOURCES";

// ============================================================================
// Harbor Config
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HarborConfig {
    pub security: SecurityPolicy,
    pub registry: RegistrySettings,
    pub executor: ExecutorSettings,
    pub runtime: RuntimeSettings,
    pub health: HealthSettings,
    pub audit: AuditSettings,
    pub remote_task: RemoteTaskSettings,
}

impl HarborConfig {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Load
    // ========================================================================

    /// Global + project merge, then environment overrides
    pub fn load() -> Result<Self> {
        let mut layers = Vec::new();

        if let Ok(global) = JsonStore::global() {
            if let Some(value) = global.load_value_optional(HARBOR_CONFIG_FILE)? {
                debug!(path = %global.file_path(HARBOR_CONFIG_FILE).display(), "Loaded global config");
                layers.push(value);
            }
        }

        let project = JsonStore::current_project()?;
        if let Some(value) = project.load_value_optional(HARBOR_CONFIG_FILE)? {
            debug!(path = %project.file_path(HARBOR_CONFIG_FILE).display(), "Loaded project config");
            layers.push(value);
        }

        let mut config = Self::from_layers(layers)?;
        config.apply_env()?;
        Ok(config)
    }

    /// A single explicit file, then environment overrides
    pub fn load_from(path: &Path) -> Result<Self> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let file = path
            .file_name()
            .and_then(|f| f.to_str())
            .ok_or_else(|| Error::Config(format!("Invalid config path: {}", path.display())))?;

        let value = JsonStore::new(dir).load_value(file)?;
        let mut config = Self::from_layers(vec![value])?;
        config.apply_env()?;
        Ok(config)
    }

    /// Merge JSON layers over the defaults, later layers win
    pub fn from_layers(layers: Vec<Value>) -> Result<Self> {
        let mut merged = serde_json::to_value(Self::default())?;
        for layer in layers {
            merge_json(&mut merged, layer);
        }
        let config: Self = serde_json::from_value(merged)
            .map_err(|e| Error::Config(format!("Invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.health.interval_ms == 0 {
            return Err(Error::Config(
                "health.intervalMs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(mode) = lookup(ENV_SECURITY_MODE) {
            self.security.mode = mode.parse::<SecurityMode>()?;
        }
        if let Some(runtime) = lookup(ENV_CONTAINER_RUNTIME) {
            self.runtime.container_runtime = runtime;
        }
        if let Some(max) = lookup(ENV_MAX_RESOURCES) {
            self.registry.max_resources = max.parse().map_err(|_| {
                Error::Config(format!("{} must be a number, got '{}'", ENV_MAX_RESOURCES, max))
            })?;
        }
        Ok(())
    }

    // ========================================================================
    // Save
    // ========================================================================

    pub fn save_global(&self) -> Result<()> {
        JsonStore::global()?.save(HARBOR_CONFIG_FILE, self)
    }

    pub fn save_project(&self) -> Result<()> {
        JsonStore::current_project()?.save(HARBOR_CONFIG_FILE, self)
    }

    // ========================================================================
    // Builder
    // ========================================================================

    pub fn with_security(mut self, policy: SecurityPolicy) -> Self {
        self.security = policy;
        self
    }

    pub fn with_mode(mut self, mode: SecurityMode) -> Self {
        self.security.mode = mode;
        self
    }
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistrySettings {
    /// Maximum number of tracked resources
    pub max_resources: usize,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self { max_resources: 32 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutorSettings {
    /// Deadline for every external invocation without an explicit timeout
    pub default_timeout_ms: u64,
    /// Deadline for in-resource `execute` without an explicit timeout
    pub exec_timeout_ms: u64,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            exec_timeout_ms: 60_000,
        }
    }
}

impl ExecutorSettings {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_millis(self.exec_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeSettings {
    /// Container engine binary (`docker` or `podman`)
    pub container_runtime: String,
    /// Hypervisor control binary
    pub hypervisor: String,
    /// Guest account used for in-VM execution
    pub guest_user: Option<String>,
    /// Where the script runtime is placed inside resources
    pub script_runtime_path: String,
    /// Directory for uploaded scripts inside resources
    pub script_dir: String,
    /// Default image / OS template when `create` names none
    pub default_container_template: String,
    pub default_vm_template: String,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            container_runtime: "docker".to_string(),
            hypervisor: "VBoxManage".to_string(),
            guest_user: None,
            script_runtime_path: "/opt/harbor/bin/runtime".to_string(),
            script_dir: "/tmp".to_string(),
            default_container_template: "alpine:latest".to_string(),
            default_vm_template: "Ubuntu_64".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthSettings {
    pub enabled: bool,
    pub interval_ms: u64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 30_000,
        }
    }
}

impl HealthSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuditSettings {
    /// Entries retained in memory
    pub capacity: usize,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self { capacity: 1000 }
    }
}

/// External client used by the remote task worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemoteTaskSettings {
    /// Client program; remote tasks are disabled when unset
    pub program: Option<String>,
    pub args: Vec<String>,
    pub timeout_ms: u64,
}

impl Default for RemoteTaskSettings {
    fn default() -> Self {
        Self {
            program: None,
            args: Vec::new(),
            timeout_ms: 300_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = HarborConfig::default();
        assert_eq!(config.security.mode, SecurityMode::Moderate);
        assert_eq!(config.registry.max_resources, 32);
        assert_eq!(config.executor.default_timeout(), Duration::from_secs(30));
        assert_eq!(config.runtime.container_runtime, "docker");
    }

    #[test]
    fn test_layers_merge() {
        let global = json!({"security": {"mode": "strict"}, "registry": {"maxResources": 4}});
        let project = json!({"registry": {"maxResources": 8}, "health": {"enabled": false}});

        let config = HarborConfig::from_layers(vec![global, project]).unwrap();
        assert_eq!(config.security.mode, SecurityMode::Strict);
        assert_eq!(config.registry.max_resources, 8);
        assert!(!config.health.enabled);
        assert_eq!(config.security.max_memory_mb, 8192);
    }

    #[test]
    fn test_invalid_layer() {
        let err = HarborConfig::from_layers(vec![json!({"registry": {"maxResources": "lots"}})])
            .unwrap_err();
        assert_eq!(err.kind(), "config_error");
    }

    #[test]
    fn test_zero_health_interval_is_rejected() {
        let err = HarborConfig::from_layers(vec![json!({"health": {"intervalMs": 0}})])
            .unwrap_err();
        assert_eq!(err.kind(), "config_error");
        assert!(err.to_string().contains("intervalMs"));

        // Disabling the monitor is the way to turn it off
        let config =
            HarborConfig::from_layers(vec![json!({"health": {"enabled": false}})]).unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_SECURITY_MODE, "permissive"),
            (ENV_CONTAINER_RUNTIME, "podman"),
            (ENV_MAX_RESOURCES, "3"),
        ]
        .into_iter()
        .collect();

        let mut config = HarborConfig::default();
        config
            .apply_env_with(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.security.mode, SecurityMode::Permissive);
        assert_eq!(config.runtime.container_runtime, "podman");
        assert_eq!(config.registry.max_resources, 3);

        let mut config = HarborConfig::default();
        assert!(config
            .apply_env_with(|k| (k == ENV_MAX_RESOURCES).then(|| "x".to_string()))
            .is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.json");
        std::fs::write(&path, r#"{"security": {"mode": "strict", "maxCpus": 2}}"#).unwrap();

        let config = HarborConfig::load_from(&path).unwrap();
        assert_eq!(config.security.max_cpus, 2.0);
    }
}
