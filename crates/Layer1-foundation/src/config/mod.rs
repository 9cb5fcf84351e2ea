//! Config - Harbor configuration
//!
//! - `harbor.rs` - HarborConfig (security, registry, executor, runtime, health, audit)

mod harbor;

pub use harbor::{
    AuditSettings, ExecutorSettings, HarborConfig, HealthSettings, RegistrySettings,
    RemoteTaskSettings, RuntimeSettings, ENV_CONTAINER_RUNTIME, ENV_MAX_RESOURCES,
    ENV_SECURITY_MODE, HARBOR_CONFIG_FILE,
};
