//! Lifecycle Controller - owns the resource registry and drives every
//! operation against the runtime backends
//!
//! ## Mutation path
//!
//! ```text
//! caller ──► lock(name) ──► guard state ──► policy ──► backend call ──► registry update ──► audit
//!                                                        │ error
//!                                                        └──► state unchanged, error surfaced
//! health monitor ──► DriftFinding ──► apply_drift ──► lock(name) ──► ...
//! ```
//!
//! Every mutation of a record happens while its per-name lock is held, so
//! concurrent operations on one resource are serialized. The lock is held
//! across the backend call; the registry itself is only ever locked for the
//! duration of a read or write.

mod builder;
mod types;

pub use builder::ControllerBuilder;
pub use types::{
    reconcile, AuditReport, CleanupFailure, CleanupReport, ControllerStatus, CreateRequest,
    DriftFinding, DriftOutcome, Idempotent, RemoveOutcome, ScriptCheckpoint, ScriptOutcome,
    ScriptRequest,
};

use crate::backend::{quote, ObservedState, ProvisionSpec, RuntimeBackend};
use crate::record::ResourceRecord;
use crate::registry::Registry;
use crate::script;
use crate::state::{ResourceState, Transition};
use harbor_foundation::security::into_result;
use harbor_foundation::{
    AuditEvent, AuditLog, AuditQuery, Error, HarborConfig, PolicyEngine, ResourceKind,
    ResourceRequest, Result, Violation,
};
use harbor_task::{
    CheckpointBroker, CheckpointRecord, CheckpointTask, CommandOutput, PollResult,
    ProgressStream, RemoteTaskWorker, TaskId,
};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const MAX_NAME_LEN: usize = 63;
const SCRIPT_CLEANUP_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) struct ControllerInner {
    config: HarborConfig,
    policy: PolicyEngine,
    registry: Registry,
    backends: HashMap<ResourceKind, Arc<dyn RuntimeBackend>>,
    broker: CheckpointBroker,
    audit: Arc<AuditLog>,
    remote: Option<Arc<RemoteTaskWorker>>,
    checkpoints: broadcast::Sender<ScriptCheckpoint>,
}

/// Handle to one controller instance; clones share the same state
#[derive(Clone)]
pub struct LifecycleController {
    inner: Arc<ControllerInner>,
}

/// A script written into a resource and ready to run
struct PreparedScript {
    record: ResourceRecord,
    backend: Arc<dyn RuntimeBackend>,
    command: String,
    path: String,
    timeout: Duration,
    with_progress: bool,
    task_id: Option<TaskId>,
}

impl LifecycleController {
    pub fn builder(config: HarborConfig) -> ControllerBuilder {
        ControllerBuilder::new(config)
    }

    /// Controller over the default local backends
    pub fn new(config: HarborConfig) -> Result<Self> {
        ControllerBuilder::new(config).build()
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn config(&self) -> &HarborConfig {
        &self.inner.config
    }

    pub fn policy(&self) -> &PolicyEngine {
        &self.inner.policy
    }

    pub fn broker(&self) -> &CheckpointBroker {
        &self.inner.broker
    }

    pub fn audit(&self) -> &AuditLog {
        &self.inner.audit
    }

    /// Live checkpoints from every script run with progress
    pub fn subscribe_checkpoints(&self) -> broadcast::Receiver<ScriptCheckpoint> {
        self.inner.checkpoints.subscribe()
    }

    fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    fn backend(&self, kind: ResourceKind) -> Result<Arc<dyn RuntimeBackend>> {
        self.inner
            .backends
            .get(&kind)
            .cloned()
            .ok_or_else(|| Error::Config(format!("no runtime backend for {} resources", kind)))
    }

    fn record_audit(&self, event: AuditEvent, resource: Option<&str>, details: Value) {
        self.inner.audit.record(event, resource, details);
    }

    /// Audit and reject when `violations` is non-empty
    fn enforce(
        &self,
        event: AuditEvent,
        operation: &str,
        resource: Option<&str>,
        violations: Vec<Violation>,
        subject: Value,
    ) -> Result<()> {
        if violations.is_empty() {
            return Ok(());
        }
        warn!(
            operation,
            resource = resource.unwrap_or("-"),
            violations = violations.len(),
            "Security policy rejected request"
        );
        self.record_audit(
            event,
            resource,
            json!({
                "operation": operation,
                "subject": subject,
                "violations": &violations,
            }),
        );
        into_result(violations)
    }

    fn enforce_command(&self, operation: &str, name: &str, command: &str) -> Result<()> {
        let violations = self.inner.policy.validate_command(command);
        self.enforce(
            AuditEvent::CommandBlocked,
            operation,
            Some(name),
            violations,
            json!({ "command": command }),
        )
    }

    // ========================================================================
    // Create / Clone
    // ========================================================================

    pub async fn create(&self, request: CreateRequest) -> Result<ResourceRecord> {
        validate_name(&request.name)?;
        let name = request.name.as_str();
        let _guard = self.registry().lock(name).await;

        let reservation = self.registry().reserve(name)?;

        let template = request
            .template
            .clone()
            .unwrap_or_else(|| self.default_template(request.kind));
        let policy_request = ResourceRequest::new(request.kind, template.clone(), request.limits)
            .privileged(request.privileged);
        self.enforce(
            AuditEvent::SecurityViolation,
            "create",
            Some(name),
            self.inner.policy.validate_resource_request(&policy_request),
            json!(policy_request),
        )?;

        let backend = self.backend(request.kind)?;
        let spec = ProvisionSpec::new(name, template.clone(), request.limits)
            .privileged(request.privileged);
        let handle = backend.provision(&spec).await.map_err(|e| {
            warn!(resource = %name, kind = %request.kind, "Provisioning failed: {}", e);
            e
        })?;

        let record = reservation.commit(
            ResourceRecord::new(name, request.kind, template, request.limits, handle)
                .with_privileged(request.privileged)
                .with_auto_recover(request.auto_recover),
        );

        info!(resource = %name, kind = %record.kind, template = %record.template, "Resource created");
        self.record_audit(
            AuditEvent::ResourceCreated,
            Some(name),
            json!({
                "kind": record.kind,
                "template": record.template,
                "memoryMb": record.resource_limits.memory_mb,
                "cpus": record.resource_limits.cpus,
                "handle": record.runtime_handle,
            }),
        );
        Ok(record)
    }

    /// Copy a non-running resource under a new name
    ///
    /// Copy-on-write unless `full_copy` is set or the runtime cannot share a
    /// base between clones.
    pub async fn clone_resource(
        &self,
        source: &str,
        name: &str,
        full_copy: bool,
    ) -> Result<ResourceRecord> {
        validate_name(name)?;
        if source == name {
            return Err(Error::Validation(
                "clone name must differ from the source".to_string(),
            ));
        }
        let _guards = self.registry().lock_pair(source, name).await;

        let origin = self.registry().require(source)?;
        if origin.state.is_running() {
            return Err(Error::state_conflict(source, origin.state, "clone"));
        }

        let reservation = self.registry().reserve(name)?;
        let policy_request =
            ResourceRequest::new(origin.kind, origin.template.clone(), origin.resource_limits)
                .privileged(origin.privileged);
        self.enforce(
            AuditEvent::SecurityViolation,
            "clone",
            Some(name),
            self.inner.policy.validate_resource_request(&policy_request),
            json!(policy_request),
        )?;

        let backend = self.backend(origin.kind)?;
        let copy_on_write = !full_copy && backend.supports_cow_clone();
        let spec = ProvisionSpec::new(name, origin.template.clone(), origin.resource_limits)
            .privileged(origin.privileged);
        let handle = backend
            .clone_resource(&origin.runtime_handle, &spec, copy_on_write)
            .await?;

        let record = reservation.commit(
            ResourceRecord::new(
                name,
                origin.kind,
                origin.template.clone(),
                origin.resource_limits,
                handle,
            )
            .with_privileged(origin.privileged)
            .with_auto_recover(origin.auto_recover)
            .cloned(&origin, copy_on_write),
        );

        info!(source = %source, resource = %name, copy_on_write, "Resource cloned");
        self.record_audit(
            AuditEvent::ResourceCloned,
            Some(name),
            json!({ "source": source, "copyOnWrite": copy_on_write }),
        );
        Ok(record)
    }

    fn default_template(&self, kind: ResourceKind) -> String {
        match kind {
            ResourceKind::Container => self.inner.config.runtime.default_container_template.clone(),
            ResourceKind::Vm => self.inner.config.runtime.default_vm_template.clone(),
        }
    }

    // ========================================================================
    // Lifecycle transitions
    // ========================================================================

    pub async fn start(&self, name: &str) -> Result<ResourceRecord> {
        self.transition(name, Transition::Start).await
    }

    pub async fn stop(&self, name: &str) -> Result<ResourceRecord> {
        self.transition(name, Transition::Stop).await
    }

    pub async fn pause(&self, name: &str) -> Result<ResourceRecord> {
        self.transition(name, Transition::Pause).await
    }

    pub async fn resume(&self, name: &str) -> Result<ResourceRecord> {
        self.transition(name, Transition::Resume).await
    }

    pub async fn save_state(&self, name: &str) -> Result<ResourceRecord> {
        self.transition(name, Transition::SaveState).await
    }

    pub async fn restore_state(&self, name: &str) -> Result<ResourceRecord> {
        self.transition(name, Transition::RestoreState).await
    }

    /// Remove a resource, stopping it first when it is running
    pub async fn remove(&self, name: &str) -> Result<RemoveOutcome> {
        let _guard = self.registry().lock(name).await;
        let record = self.registry().require(name)?;

        let stopped_first = record.state.is_running();
        if stopped_first {
            debug!(resource = %name, "Stopping running resource before removal");
            self.transition_locked(name, Transition::Stop).await?;
        }
        let record = self.transition_locked(name, Transition::Remove).await?;
        Ok(RemoveOutcome {
            record,
            stopped_first,
        })
    }

    /// Stop when running, then start
    ///
    /// Only `running`, `created` and `stopped` resources restart. A `paused`
    /// or `saved` resource is a state conflict from `start`; resume or
    /// restore it instead, so its memory state is not discarded silently.
    pub async fn restart(&self, name: &str) -> Result<ResourceRecord> {
        let _guard = self.registry().lock(name).await;
        let record = self.registry().require(name)?;
        if record.state.is_running() {
            self.transition_locked(name, Transition::Stop).await?;
        }
        self.transition_locked(name, Transition::Start).await
    }

    pub async fn start_if_stopped(&self, name: &str) -> Result<Idempotent> {
        let _guard = self.registry().lock(name).await;
        let record = self.registry().require(name)?;
        if record.state.is_running() {
            debug!(resource = %name, "Already running, start skipped");
            return Ok(Idempotent {
                record,
                skipped: true,
            });
        }
        let record = self.transition_locked(name, Transition::Start).await?;
        Ok(Idempotent {
            record,
            skipped: false,
        })
    }

    pub async fn stop_if_running(&self, name: &str) -> Result<Idempotent> {
        let _guard = self.registry().lock(name).await;
        let record = self.registry().require(name)?;
        if !record.state.is_running() {
            debug!(resource = %name, state = %record.state, "Not running, stop skipped");
            return Ok(Idempotent {
                record,
                skipped: true,
            });
        }
        let record = self.transition_locked(name, Transition::Stop).await?;
        Ok(Idempotent {
            record,
            skipped: false,
        })
    }

    async fn transition(&self, name: &str, transition: Transition) -> Result<ResourceRecord> {
        let _guard = self.registry().lock(name).await;
        self.transition_locked(name, transition).await
    }

    /// Guard, invoke the backend, then commit; the caller holds the name lock
    async fn transition_locked(&self, name: &str, transition: Transition) -> Result<ResourceRecord> {
        let record = self.registry().require(name)?;
        let next = record.state.next(name, transition)?;
        let backend = self.backend(record.kind)?;
        let handle = record.runtime_handle.as_str();

        let outcome = match transition {
            Transition::Start => backend.start(handle).await,
            Transition::Stop => backend.stop(handle).await,
            Transition::Pause => backend.pause(handle).await,
            Transition::Resume => backend.resume(handle).await,
            Transition::SaveState => backend.save_state(handle).await,
            Transition::RestoreState => backend.restore_state(handle).await,
            Transition::Remove => backend.remove(handle).await,
        };
        if let Err(e) = outcome {
            warn!(resource = %name, operation = transition.as_str(), "Runtime rejected transition: {}", e);
            return Err(e);
        }

        if transition == Transition::Remove {
            let mut removed = self.registry().remove(name).unwrap_or(record);
            removed.set_state(ResourceState::Removed);
            if removed.cloned_from.is_some() {
                if let Err(e) = backend.release_clone(name).await {
                    warn!(resource = %name, "Clone artifacts left behind: {}", e);
                }
            }
            info!(resource = %name, "Resource removed");
            self.record_audit(
                AuditEvent::ResourceRemoved,
                Some(name),
                json!({ "kind": removed.kind, "handle": removed.runtime_handle }),
            );
            return Ok(removed);
        }

        let from = record.state;
        let updated = self.registry().update(name, |r| r.set_state(next))?;
        info!(resource = %name, from = %from, to = %next, "Resource state changed");
        self.record_audit(
            AuditEvent::StateChanged,
            Some(name),
            json!({
                "operation": transition.as_str(),
                "from": from,
                "to": next,
            }),
        );
        Ok(updated)
    }

    /// Snapshot of a running resource, read under its lock
    async fn running_record(&self, name: &str, operation: &str) -> Result<ResourceRecord> {
        let _guard = self.registry().lock(name).await;
        let record = self.registry().require(name)?;
        if !record.state.is_running() {
            return Err(Error::state_conflict(name, record.state, operation));
        }
        Ok(record)
    }

    // ========================================================================
    // Exec / copy
    // ========================================================================

    /// Run `command` inside a running resource
    ///
    /// A nonzero exit is reported in the output, not as an error.
    pub async fn execute(
        &self,
        name: &str,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput> {
        self.enforce_command("execute", name, command)?;
        let record = self.running_record(name, "execute").await?;
        let backend = self.backend(record.kind)?;
        let timeout = timeout.unwrap_or_else(|| self.inner.config.executor.exec_timeout());

        let output = backend
            .exec(&record.runtime_handle, command, timeout)
            .await?;

        debug!(resource = %name, exit_code = output.exit_code, duration_ms = output.duration_ms, "Command finished");
        self.record_audit(
            AuditEvent::CommandExecuted,
            Some(name),
            json!({
                "command": command,
                "exitCode": output.exit_code,
                "durationMs": output.duration_ms,
            }),
        );
        Ok(output)
    }

    /// Copy a host file into a running resource
    pub async fn copy_to(&self, name: &str, host_path: &str, guest_path: &str) -> Result<()> {
        self.enforce(
            AuditEvent::SecurityViolation,
            "copy_to",
            Some(name),
            self.inner.policy.validate_volume_path(host_path),
            json!({ "hostPath": host_path }),
        )?;
        let record = self.running_record(name, "copy_to").await?;
        self.backend(record.kind)?
            .copy_to(&record.runtime_handle, host_path, guest_path)
            .await?;

        self.record_audit(
            AuditEvent::FileCopied,
            Some(name),
            json!({ "direction": "to", "hostPath": host_path, "guestPath": guest_path }),
        );
        Ok(())
    }

    /// Read a script body from a host file, under the `copy_to` path rules
    pub async fn read_script_file(&self, name: &str, host_path: &str) -> Result<String> {
        self.enforce(
            AuditEvent::SecurityViolation,
            "execute_script",
            Some(name),
            self.inner.policy.validate_volume_path(host_path),
            json!({ "hostPath": host_path }),
        )?;
        Ok(tokio::fs::read_to_string(host_path).await?)
    }

    /// Copy a file out of a running resource onto the host
    pub async fn copy_from(&self, name: &str, guest_path: &str, host_path: &str) -> Result<()> {
        self.enforce(
            AuditEvent::SecurityViolation,
            "copy_from",
            Some(name),
            self.inner.policy.validate_volume_path(host_path),
            json!({ "hostPath": host_path }),
        )?;
        let record = self.running_record(name, "copy_from").await?;
        self.backend(record.kind)?
            .copy_from(&record.runtime_handle, guest_path, host_path)
            .await?;

        self.record_audit(
            AuditEvent::FileCopied,
            Some(name),
            json!({ "direction": "from", "hostPath": host_path, "guestPath": guest_path }),
        );
        Ok(())
    }

    // ========================================================================
    // Script runtime
    // ========================================================================

    /// Install the script runtime binary from `binary` into a running resource
    pub async fn deploy_runtime(&self, name: &str, binary: &str) -> Result<ResourceRecord> {
        self.enforce(
            AuditEvent::SecurityViolation,
            "deploy_runtime",
            Some(name),
            self.inner.policy.validate_binary_path(binary),
            json!({ "binary": binary }),
        )?;
        if !tokio::fs::try_exists(binary).await.unwrap_or(false) {
            return Err(Error::Validation(format!(
                "runtime binary '{}' does not exist on the host",
                binary
            )));
        }

        let _guard = self.registry().lock(name).await;
        let record = self.registry().require(name)?;
        if !record.state.is_running() {
            return Err(Error::state_conflict(name, record.state, "deploy_runtime"));
        }

        let backend = self.backend(record.kind)?;
        let target = self.inner.config.runtime.script_runtime_path.clone();
        let handle = record.runtime_handle.as_str();

        backend.copy_to(handle, binary, &target).await?;
        backend
            .exec(
                handle,
                &format!("chmod +x {}", quote(&target)?),
                self.inner.config.executor.exec_timeout(),
            )
            .await?
            .check("chmod")?;

        let updated = self.registry().update(name, |r| {
            r.flags.script_runtime_deployed = true;
            r.flags.deployed_path = Some(target.clone());
        })?;

        info!(resource = %name, path = %target, "Script runtime deployed");
        self.record_audit(
            AuditEvent::RuntimeDeployed,
            Some(name),
            json!({ "binary": binary, "path": target }),
        );
        Ok(updated)
    }

    /// Run a script through the deployed runtime and wait for it
    ///
    /// With progress, checkpoints are parsed from the output while the
    /// script runs and drive a broker task that callers may poll.
    pub async fn execute_script(&self, request: ScriptRequest) -> Result<ScriptOutcome> {
        let prepared = self.prepare_script(&request, request.with_progress).await?;
        self.run_script(prepared).await
    }

    /// Start a script in the background and return its task id at once
    pub async fn submit_script(&self, request: ScriptRequest) -> Result<TaskId> {
        let prepared = self.prepare_script(&request, true).await?;
        let task_id = prepared
            .task_id
            .clone()
            .ok_or_else(|| Error::Internal("script task was not opened".to_string()))?;

        let controller = self.clone();
        tokio::spawn(async move {
            if let Err(e) = controller.run_script(prepared).await {
                debug!("Background script ended with error: {}", e);
            }
        });
        Ok(task_id)
    }

    async fn prepare_script(&self, request: &ScriptRequest, open_task: bool) -> Result<PreparedScript> {
        if request.script.trim().is_empty() {
            return Err(Error::Validation("script is empty".to_string()));
        }
        self.enforce_command("execute_script", &request.name, &request.script)?;

        let record = self.running_record(&request.name, "execute_script").await?;
        if !record.flags.script_runtime_deployed {
            return Err(Error::Validation(format!(
                "script runtime is not deployed in '{}'; run deploy_runtime first",
                request.name
            )));
        }

        let backend = self.backend(record.kind)?;
        let runtime = record
            .flags
            .deployed_path
            .clone()
            .unwrap_or_else(|| self.inner.config.runtime.script_runtime_path.clone());
        let path = script::script_path(&self.inner.config.runtime.script_dir);
        let body = if request.with_progress {
            script::wrap_with_checkpoints(&request.script)
        } else {
            request.script.clone()
        };
        backend
            .write_file(&record.runtime_handle, &path, &body)
            .await?;

        let task_id = if open_task {
            let context = json!({ "resource": request.name, "script": path });
            Some(self.inner.broker.open("execute_script", context, None).await)
        } else {
            None
        };

        Ok(PreparedScript {
            command: script::run_command(&runtime, &path),
            timeout: request
                .timeout
                .unwrap_or_else(|| self.inner.config.executor.exec_timeout()),
            with_progress: request.with_progress,
            record,
            backend,
            path,
            task_id,
        })
    }

    async fn run_script(&self, prepared: PreparedScript) -> Result<ScriptOutcome> {
        let name = prepared.record.name.as_str();
        let handle = prepared.record.runtime_handle.as_str();

        let outcome = if prepared.with_progress {
            self.run_streaming(&prepared).await
        } else {
            prepared
                .backend
                .exec(handle, &prepared.command, prepared.timeout)
                .await
                .map(|output| (output, Vec::new()))
        };

        let cleanup = format!("rm -f {}", quote(&prepared.path)?);
        if let Err(e) = prepared
            .backend
            .exec(handle, &cleanup, SCRIPT_CLEANUP_TIMEOUT)
            .await
        {
            warn!(resource = %name, path = %prepared.path, "Script cleanup failed: {}", e);
        }

        match outcome {
            Ok((output, checkpoints)) => {
                if let Some(id) = &prepared.task_id {
                    let settled = if output.success() {
                        self.inner
                            .broker
                            .finish(
                                id.as_str(),
                                Ok(json!({
                                    "exitCode": output.exit_code,
                                    "stdout": output.stdout,
                                    "stderr": output.stderr,
                                })),
                            )
                            .await
                    } else {
                        self.inner
                            .broker
                            .fail(
                                id.as_str(),
                                format!("script exited with code {}", output.exit_code),
                            )
                            .await
                    };
                    if let Err(e) = settled {
                        debug!(task = %id, "Script task already settled: {}", e);
                    }
                }

                self.record_audit(
                    AuditEvent::ScriptExecuted,
                    Some(name),
                    json!({
                        "path": prepared.path,
                        "exitCode": output.exit_code,
                        "checkpoints": checkpoints.len(),
                        "taskId": prepared.task_id,
                    }),
                );
                Ok(ScriptOutcome {
                    output,
                    task_id: prepared.task_id,
                    checkpoints,
                    script_path: prepared.path,
                })
            }
            Err(e) => {
                if let Some(id) = &prepared.task_id {
                    if let Err(settle) = self.inner.broker.fail(id.as_str(), e.to_string()).await {
                        debug!(task = %id, "Script task already settled: {}", settle);
                    }
                }
                Err(e)
            }
        }
    }

    /// Execute while parsing checkpoints from the live output
    async fn run_streaming(
        &self,
        prepared: &PreparedScript,
    ) -> Result<(CommandOutput, Vec<CheckpointRecord>)> {
        let stream = ProgressStream::new();
        let relay = prepared
            .task_id
            .as_ref()
            .map(|id| self.inner.broker.relay(id, stream.subscribe()));
        let forward = self.forward_checkpoints(
            &prepared.record.name,
            prepared.task_id.clone(),
            stream.subscribe(),
        );

        let (sink, lines) = mpsc::unbounded_channel();
        let pump = {
            let stream = stream.clone();
            tokio::spawn(async move { stream.pump(lines).await })
        };
        drop(stream);

        let result = prepared
            .backend
            .exec_streaming(
                &prepared.record.runtime_handle,
                &prepared.command,
                prepared.timeout,
                sink,
            )
            .await;

        // The pump ends once the backend drops the sink
        let checkpoints = pump.await.unwrap_or_default();
        if let Some(relay) = relay {
            let _ = relay.await;
        }
        let _ = forward.await;

        result.map(|output| (output, checkpoints))
    }

    fn forward_checkpoints(
        &self,
        resource: &str,
        task_id: Option<TaskId>,
        mut records: broadcast::Receiver<CheckpointRecord>,
    ) -> JoinHandle<()> {
        let sender = self.inner.checkpoints.clone();
        let resource = resource.to_string();
        tokio::spawn(async move {
            loop {
                match records.recv().await {
                    Ok(record) => {
                        // No subscribers is fine
                        let _ = sender.send(ScriptCheckpoint {
                            resource: resource.clone(),
                            task_id: task_id.clone(),
                            record,
                        });
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn info(&self, name: &str) -> Result<ResourceRecord> {
        self.registry().require(name)
    }

    pub fn list(&self) -> Vec<ResourceRecord> {
        self.registry().list()
    }

    pub async fn status(&self) -> ControllerStatus {
        let by_state: BTreeMap<String, usize> = self
            .registry()
            .count_by_state()
            .into_iter()
            .map(|(state, count)| (state.as_str().to_string(), count))
            .collect();

        ControllerStatus {
            resources: self.registry().len(),
            capacity: self.registry().capacity(),
            by_state,
            security_mode: self.inner.policy.mode(),
            checkpoint_tasks: self.inner.broker.len().await,
            audit_entries: self.inner.audit.len(),
            security_events: self.inner.audit.security_event_count(),
        }
    }

    /// Remove every tracked resource, continuing past failures
    pub async fn cleanup(&self) -> CleanupReport {
        let mut report = CleanupReport::default();
        for name in self.registry().names() {
            match self.remove(&name).await {
                Ok(_) => report.removed.push(name),
                Err(e) => {
                    warn!(resource = %name, "Cleanup failed: {}", e);
                    report.failed.push(CleanupFailure {
                        name,
                        error: e.to_string(),
                    });
                }
            }
        }

        self.record_audit(
            AuditEvent::ResourceCleanup,
            None,
            json!({ "removed": report.removed, "failed": report.failed }),
        );
        report
    }

    /// Last `limit` audit entries with the active policy
    pub fn security_audit(&self, limit: usize) -> AuditReport {
        AuditReport {
            entries: self.inner.audit.recent(limit),
            policy: self.inner.policy.policy().clone(),
            security_events: self.inner.audit.security_event_count(),
        }
    }

    /// Audit entries for one resource, newest last
    pub fn resource_history(&self, name: &str, limit: usize) -> Vec<harbor_foundation::AuditEntry> {
        self.inner
            .audit
            .query(&AuditQuery::new().with_resource(name).with_limit(limit))
    }

    // ========================================================================
    // Checkpoint tasks
    // ========================================================================

    /// Open a checkpoint task
    ///
    /// With a remote worker configured the work is dispatched to it;
    /// otherwise the task waits for [`Self::checkpoint_complete`].
    pub async fn checkpoint_submit(
        &self,
        operation: &str,
        context: Value,
        deadline_ms: Option<u64>,
    ) -> Result<TaskId> {
        if operation.trim().is_empty() {
            return Err(Error::Validation("operation is required".to_string()));
        }
        let broker = &self.inner.broker;
        let id = match &self.inner.remote {
            Some(worker) => {
                broker
                    .submit_with_deadline(operation, context, deadline_ms, worker.clone())
                    .await
            }
            None => broker.open(operation, context, deadline_ms).await,
        };
        Ok(id)
    }

    pub async fn checkpoint_poll(&self, id: &str) -> PollResult {
        self.inner.broker.poll(id).await
    }

    pub async fn checkpoint_complete(&self, id: &str, result: Value) -> Result<()> {
        self.inner.broker.complete_externally(id, result).await?;
        self.record_audit(
            AuditEvent::CheckpointCompletedExternally,
            None,
            json!({ "taskId": id }),
        );
        Ok(())
    }

    pub async fn checkpoint_list(&self) -> Vec<CheckpointTask> {
        self.inner.broker.list().await
    }

    // ========================================================================
    // Drift
    // ========================================================================

    /// Compare a record with its runtime without taking any lock
    pub async fn observe(&self, record: &ResourceRecord) -> Result<Option<DriftFinding>> {
        let backend = self.backend(record.kind)?;
        let observed = backend.inspect(&record.runtime_handle).await?;
        Ok(reconcile(record.state, &observed).map(|target| DriftFinding {
            name: record.name.clone(),
            generation: record.generation,
            recorded: record.state,
            observed,
            target,
        }))
    }

    /// Apply a drift finding through the normal mutation path
    pub async fn apply_drift(&self, finding: DriftFinding) -> Result<DriftOutcome> {
        let name = finding.name.as_str();
        let _guard = self.registry().lock(name).await;

        let current = match self.registry().get(name) {
            Some(record) => record,
            None => return Ok(DriftOutcome::Stale),
        };
        if current.generation != finding.generation || current.state != finding.recorded {
            debug!(resource = %name, "Drift finding is stale");
            return Ok(DriftOutcome::Stale);
        }

        let record = self
            .registry()
            .update(name, |r| r.set_state(finding.target))?;
        warn!(resource = %name,
            recorded = %finding.recorded,
            observed = %finding.observed,
            corrected = %finding.target,
            "Drift detected"
        );
        self.record_audit(
            AuditEvent::DriftDetected,
            Some(name),
            json!({
                "recorded": finding.recorded,
                "observed": finding.observed.as_str(),
                "corrected": finding.target,
            }),
        );

        let recoverable = record.auto_recover
            && finding.target == ResourceState::Stopped
            && finding.observed != ObservedState::Missing;
        if !recoverable {
            return Ok(DriftOutcome::Corrected {
                from: finding.recorded,
                to: finding.target,
            });
        }

        match self.transition_locked(name, Transition::Start).await {
            Ok(_) => {
                info!(resource = %name, "Auto-recovered");
                self.record_audit(
                    AuditEvent::AutoRecovery,
                    Some(name),
                    json!({ "result": "started" }),
                );
                Ok(DriftOutcome::Recovered {
                    from: finding.recorded,
                })
            }
            Err(e) => {
                warn!(resource = %name, "Auto-recovery failed: {}", e);
                self.record_audit(
                    AuditEvent::AutoRecovery,
                    Some(name),
                    json!({ "result": "failed", "error": e.to_string() }),
                );
                Ok(DriftOutcome::RecoveryFailed {
                    from: finding.recorded,
                    error: e.to_string(),
                })
            }
        }
    }
}

/// Resource names: 1-63 of `[A-Za-z0-9_.-]`, starting alphanumeric
fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name.starts_with(|c: char| c.is_ascii_alphanumeric())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if valid {
        Ok(())
    } else {
        Err(Error::Validation(format!("invalid resource name '{}'", name)))
    }
}
