//! Controller construction

use super::{ControllerInner, LifecycleController};
use crate::backend::{ContainerBackend, RuntimeBackend, VmBackend};
use crate::registry::Registry;
use harbor_foundation::{
    AuditEvent, AuditLog, AuditLogConfig, HarborConfig, PolicyEngine, ResourceKind, Result,
};
use harbor_task::{CheckpointBroker, CommandRunner, LocalExecutor, RemoteTaskWorker};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

const CHECKPOINT_CHANNEL_CAPACITY: usize = 256;

/// Assembles a [`LifecycleController`]
///
/// Anything not supplied is derived from the configuration: a local
/// executor, the container and VM backends over that executor, a fresh
/// broker and audit log.
pub struct ControllerBuilder {
    config: HarborConfig,
    backends: HashMap<ResourceKind, Arc<dyn RuntimeBackend>>,
    runner: Option<Arc<dyn CommandRunner>>,
    broker: Option<CheckpointBroker>,
    audit: Option<Arc<AuditLog>>,
}

impl ControllerBuilder {
    pub fn new(config: HarborConfig) -> Self {
        Self {
            config,
            backends: HashMap::new(),
            runner: None,
            broker: None,
            audit: None,
        }
    }

    /// Use `backend` for the resource kind it reports
    pub fn backend(mut self, backend: Arc<dyn RuntimeBackend>) -> Self {
        self.backends.insert(backend.kind(), backend);
        self
    }

    pub fn runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn broker(mut self, broker: CheckpointBroker) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn build(self) -> Result<LifecycleController> {
        let Self {
            config,
            mut backends,
            runner,
            broker,
            audit,
        } = self;

        let policy = PolicyEngine::new(config.security.clone())?;
        let runner: Arc<dyn CommandRunner> = match runner {
            Some(runner) => runner,
            None => Arc::new(LocalExecutor::with_timeout(config.executor.default_timeout())),
        };

        if !backends.contains_key(&ResourceKind::Container) {
            let container = ContainerBackend::new(runner.clone(), config.runtime.container_runtime.clone())
                .with_timeout(config.executor.default_timeout());
            backends.insert(ResourceKind::Container, Arc::new(container));
        }
        if !backends.contains_key(&ResourceKind::Vm) {
            let vm = VmBackend::new(runner.clone(), config.runtime.hypervisor.clone())
                .with_guest_user(config.runtime.guest_user.clone())
                .with_timeout(config.executor.default_timeout());
            backends.insert(ResourceKind::Vm, Arc::new(vm));
        }

        let audit = audit.unwrap_or_else(|| {
            Arc::new(AuditLog::with_config(
                policy.mode(),
                AuditLogConfig {
                    capacity: config.audit.capacity,
                },
            ))
        });
        let remote = RemoteTaskWorker::from_settings(runner.clone(), &config.remote_task).map(Arc::new);
        let (checkpoints, _) = broadcast::channel(CHECKPOINT_CHANNEL_CAPACITY);

        audit.record(
            AuditEvent::ControllerStarted,
            None,
            json!({
                "mode": policy.mode().as_str(),
                "capacity": config.registry.max_resources,
                "remoteWorker": remote.is_some(),
            }),
        );
        info!(
            mode = policy.mode().as_str(),
            capacity = config.registry.max_resources,
            "Lifecycle controller ready"
        );

        Ok(LifecycleController {
            inner: Arc::new(ControllerInner {
                registry: Registry::new(config.registry.max_resources),
                policy,
                backends,
                broker: broker.unwrap_or_default(),
                audit,
                remote,
                checkpoints,
                config,
            }),
        })
    }
}
