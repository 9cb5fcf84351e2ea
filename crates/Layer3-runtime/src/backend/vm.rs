//! VM backend - hypervisor CLI in the VirtualBox dialect
//!
//! Provisioning is two steps (`createvm`, then `modifyvm` for limits); a
//! failure in the second step unregisters the half-created machine before
//! the error is returned. Copy-on-write clones are linked clones based on a
//! snapshot of the source.

use super::{ObservedState, ProvisionSpec, RuntimeBackend};
use async_trait::async_trait;
use harbor_foundation::{Error, ResourceKind, Result};
use harbor_task::{CommandOutput, CommandRunner, OutputLine, RunOptions};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

fn s(v: &str) -> String {
    v.to_string()
}

// ============================================================================
// Argument builders
// ============================================================================

pub fn createvm_args(spec: &ProvisionSpec) -> Vec<String> {
    vec![
        s("createvm"),
        s("--name"),
        spec.name.clone(),
        s("--ostype"),
        spec.template.clone(),
        s("--register"),
    ]
}

pub fn modifyvm_args(name: &str, spec: &ProvisionSpec) -> Vec<String> {
    vec![
        s("modifyvm"),
        s(name),
        s("--memory"),
        spec.limits.memory_mb.to_string(),
        s("--cpus"),
        spec.limits.whole_cpus().to_string(),
    ]
}

pub fn startvm_args(handle: &str) -> Vec<String> {
    vec![s("startvm"), s(handle), s("--type"), s("headless")]
}

pub fn controlvm_args(handle: &str, action: &str) -> Vec<String> {
    vec![s("controlvm"), s(handle), s(action)]
}

pub fn unregister_args(handle: &str) -> Vec<String> {
    vec![s("unregistervm"), s(handle), s("--delete")]
}

pub fn snapshot_name(clone_name: &str) -> String {
    format!("harbor-base-{}", clone_name)
}

pub fn snapshot_args(source: &str, snapshot: &str) -> Vec<String> {
    vec![s("snapshot"), s(source), s("take"), s(snapshot)]
}

pub fn clonevm_args(source: &str, name: &str, linked_snapshot: Option<&str>) -> Vec<String> {
    let mut args = vec![s("clonevm"), s(source)];
    if let Some(snapshot) = linked_snapshot {
        args.extend([s("--snapshot"), s(snapshot), s("--options"), s("link")]);
    }
    args.extend([s("--name"), s(name), s("--register")]);
    args
}

fn guest_args(handle: &str, verb: &str, user: Option<&str>) -> Vec<String> {
    let mut args = vec![s("guestcontrol"), s(handle), s(verb)];
    if let Some(user) = user {
        args.extend([s("--username"), s(user)]);
    }
    args
}

pub fn guest_run_args(handle: &str, user: Option<&str>, command: &str) -> Vec<String> {
    let mut args = guest_args(handle, "run", user);
    args.extend([
        s("--exe"),
        s("/bin/sh"),
        s("--wait-stdout"),
        s("--wait-stderr"),
        s("--"),
        s("/bin/sh"),
        s("-c"),
        s(command),
    ]);
    args
}

pub fn copyto_args(handle: &str, user: Option<&str>, host: &str, guest: &str) -> Vec<String> {
    let mut args = guest_args(handle, "copyto", user);
    args.extend([s(host), s(guest)]);
    args
}

pub fn copyfrom_args(handle: &str, user: Option<&str>, guest: &str, host: &str) -> Vec<String> {
    let mut args = guest_args(handle, "copyfrom", user);
    args.extend([s(guest), s(host)]);
    args
}

pub fn showvminfo_args(handle: &str) -> Vec<String> {
    vec![s("showvminfo"), s(handle), s("--machinereadable")]
}

/// Extract `VMState="..."` from `showvminfo --machinereadable`
pub fn parse_vm_state(info: &str) -> ObservedState {
    let raw = info
        .lines()
        .find_map(|line| line.strip_prefix("VMState="))
        .map(|v| v.trim().trim_matches('"'))
        .unwrap_or("");
    match raw {
        "running" | "starting" | "restoring" => ObservedState::Running,
        "paused" => ObservedState::Paused,
        "poweroff" | "aborted" | "stopping" => ObservedState::Stopped,
        "saved" => ObservedState::Saved,
        "" => ObservedState::Unknown("no VMState".to_string()),
        other => ObservedState::Unknown(other.to_string()),
    }
}

fn is_missing(stderr: &str) -> bool {
    stderr.contains("Could not find a registered machine") || stderr.contains("VBOX_E_OBJECT_NOT_FOUND")
}

// ============================================================================
// Backend
// ============================================================================

pub struct VmBackend {
    runner: Arc<dyn CommandRunner>,
    program: String,
    guest_user: Option<String>,
    timeout: Duration,
}

impl VmBackend {
    pub fn new(runner: Arc<dyn CommandRunner>, program: impl Into<String>) -> Self {
        Self {
            runner,
            program: program.into(),
            guest_user: None,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_guest_user(mut self, user: Option<String>) -> Self {
        self.guest_user = user;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn user(&self) -> Option<&str> {
        self.guest_user.as_deref()
    }

    async fn invoke(&self, args: Vec<String>) -> Result<CommandOutput> {
        debug!(program = %self.program, verb = %args.first().map(String::as_str).unwrap_or(""), "Hypervisor call");
        self.runner
            .run(&self.program, &args, &RunOptions::with_timeout(self.timeout))
            .await?
            .check(&self.program)
    }

    /// Best-effort removal of a machine left behind by a failed multi-step call
    async fn discard(&self, name: &str) {
        if let Err(e) = self.invoke(unregister_args(name)).await {
            warn!(vm = %name, "Cleanup of partially created VM failed: {}", e);
        }
    }
}

#[async_trait]
impl RuntimeBackend for VmBackend {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Vm
    }

    fn supports_cow_clone(&self) -> bool {
        true
    }

    async fn provision(&self, spec: &ProvisionSpec) -> Result<String> {
        info!(name = %spec.name, ostype = %spec.template, "Creating VM");
        self.invoke(createvm_args(spec)).await?;

        if let Err(e) = self.invoke(modifyvm_args(&spec.name, spec)).await {
            self.discard(&spec.name).await;
            return Err(e);
        }
        Ok(spec.name.clone())
    }

    async fn start(&self, handle: &str) -> Result<()> {
        self.invoke(startvm_args(handle)).await.map(|_| ())
    }

    async fn stop(&self, handle: &str) -> Result<()> {
        self.invoke(controlvm_args(handle, "poweroff")).await.map(|_| ())
    }

    async fn pause(&self, handle: &str) -> Result<()> {
        self.invoke(controlvm_args(handle, "pause")).await.map(|_| ())
    }

    async fn resume(&self, handle: &str) -> Result<()> {
        self.invoke(controlvm_args(handle, "resume")).await.map(|_| ())
    }

    async fn save_state(&self, handle: &str) -> Result<()> {
        self.invoke(controlvm_args(handle, "savestate")).await.map(|_| ())
    }

    async fn restore_state(&self, handle: &str) -> Result<()> {
        // Starting a saved machine resumes from its saved state
        self.invoke(startvm_args(handle)).await.map(|_| ())
    }

    async fn remove(&self, handle: &str) -> Result<()> {
        self.invoke(unregister_args(handle)).await.map(|_| ())
    }

    async fn clone_resource(
        &self,
        source_handle: &str,
        spec: &ProvisionSpec,
        copy_on_write: bool,
    ) -> Result<String> {
        info!(source = %source_handle, name = %spec.name, linked = copy_on_write, "Cloning VM");

        let snapshot = copy_on_write.then(|| snapshot_name(&spec.name));
        if let Some(snapshot) = &snapshot {
            self.invoke(snapshot_args(source_handle, snapshot)).await?;
        }

        self.invoke(clonevm_args(source_handle, &spec.name, snapshot.as_deref()))
            .await?;

        if let Err(e) = self.invoke(modifyvm_args(&spec.name, spec)).await {
            self.discard(&spec.name).await;
            return Err(e);
        }
        Ok(spec.name.clone())
    }

    async fn exec(&self, handle: &str, command: &str, timeout: Duration) -> Result<CommandOutput> {
        self.runner
            .run(
                &self.program,
                &guest_run_args(handle, self.user(), command),
                &RunOptions::with_timeout(timeout),
            )
            .await
    }

    async fn exec_streaming(
        &self,
        handle: &str,
        command: &str,
        timeout: Duration,
        sink: mpsc::UnboundedSender<OutputLine>,
    ) -> Result<CommandOutput> {
        self.runner
            .run_streaming(
                &self.program,
                &guest_run_args(handle, self.user(), command),
                &RunOptions::with_timeout(timeout),
                sink,
            )
            .await
    }

    async fn copy_to(&self, handle: &str, host_path: &str, guest_path: &str) -> Result<()> {
        self.invoke(copyto_args(handle, self.user(), host_path, guest_path))
            .await
            .map(|_| ())
    }

    async fn copy_from(&self, handle: &str, guest_path: &str, host_path: &str) -> Result<()> {
        self.invoke(copyfrom_args(handle, self.user(), guest_path, host_path))
            .await
            .map(|_| ())
    }

    async fn inspect(&self, handle: &str) -> Result<ObservedState> {
        let output = self
            .runner
            .run(&self.program, &showvminfo_args(handle), &RunOptions::with_timeout(self.timeout))
            .await?;
        if output.success() {
            return Ok(parse_vm_state(&output.stdout));
        }
        if is_missing(&output.stderr) {
            return Ok(ObservedState::Missing);
        }
        Err(Error::external(&self.program, output.exit_code, output.stderr.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harbor_foundation::ResourceLimits;

    fn spec() -> ProvisionSpec {
        ProvisionSpec::new("db", "Ubuntu_64", ResourceLimits::new(2048, 1.5))
    }

    #[test]
    fn test_provision_args() {
        assert_eq!(
            createvm_args(&spec()),
            vec!["createvm", "--name", "db", "--ostype", "Ubuntu_64", "--register"]
        );
        assert_eq!(
            modifyvm_args("db", &spec()),
            vec!["modifyvm", "db", "--memory", "2048", "--cpus", "2"]
        );
    }

    #[test]
    fn test_clone_args() {
        assert_eq!(
            clonevm_args("db", "db2", Some("harbor-base-db2")),
            vec![
                "clonevm", "db", "--snapshot", "harbor-base-db2", "--options", "link", "--name",
                "db2", "--register"
            ]
        );
        assert_eq!(
            clonevm_args("db", "db3", None),
            vec!["clonevm", "db", "--name", "db3", "--register"]
        );
    }

    #[test]
    fn test_guest_args() {
        let args = guest_run_args("db", Some("harbor"), "uname -a");
        assert_eq!(&args[..5], &["guestcontrol", "db", "run", "--username", "harbor"]);
        assert_eq!(args.last().unwrap(), "uname -a");

        let args = copyto_args("db", None, "/tmp/rt", "/opt/harbor/bin/runtime");
        assert_eq!(args, vec!["guestcontrol", "db", "copyto", "/tmp/rt", "/opt/harbor/bin/runtime"]);
    }

    #[test]
    fn test_parse_vm_state() {
        let info = "name=\"db\"\nVMState=\"running\"\nVMStateChangeTime=\"2024\"\n";
        assert_eq!(parse_vm_state(info), ObservedState::Running);
        assert_eq!(parse_vm_state("VMState=\"poweroff\""), ObservedState::Stopped);
        assert_eq!(parse_vm_state("VMState=\"saved\""), ObservedState::Saved);
        assert!(matches!(parse_vm_state("name=\"db\""), ObservedState::Unknown(_)));
        assert!(is_missing("VBoxManage: error: Could not find a registered machine named 'x'"));
    }
}
