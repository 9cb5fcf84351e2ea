//! Container backend - docker / podman CLI
//!
//! Clones are made with `commit` + `create`, so the new container always
//! shares the image layers of its source.

use super::{ObservedState, ProvisionSpec, RuntimeBackend};
use async_trait::async_trait;
use harbor_foundation::{Error, ResourceKind, Result};
use harbor_task::{CommandOutput, CommandRunner, OutputLine, RunOptions};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Label put on everything this backend creates
pub const MANAGED_LABEL: &str = "harbor.managed=true";

/// Checkpoint name used by save/restore
pub const SAVED_CHECKPOINT: &str = "harbor-saved";

// ============================================================================
// Argument builders
// ============================================================================

fn s(v: &str) -> String {
    v.to_string()
}

pub fn create_args(spec: &ProvisionSpec, image: &str) -> Vec<String> {
    let mut args = vec![
        s("create"),
        s("--name"),
        spec.name.clone(),
        s("--label"),
        s(MANAGED_LABEL),
        s("--memory"),
        spec.limits.memory_arg(),
        s("--cpus"),
        spec.limits.cpus.to_string(),
    ];
    if spec.privileged {
        args.push(s("--privileged"));
    }
    args.push(image.to_string());
    // Keep the container alive so commands can be executed in it
    args.extend([s("sleep"), s("infinity")]);
    args
}

pub fn lifecycle_args(verb: &str, handle: &str) -> Vec<String> {
    vec![s(verb), s(handle)]
}

pub fn save_args(handle: &str) -> Vec<String> {
    vec![s("checkpoint"), s("create"), s(handle), s(SAVED_CHECKPOINT)]
}

pub fn restore_args(handle: &str) -> Vec<String> {
    vec![s("start"), s("--checkpoint"), s(SAVED_CHECKPOINT), s(handle)]
}

pub fn remove_args(handle: &str) -> Vec<String> {
    vec![s("rm"), s("-f"), s(handle)]
}

pub fn commit_args(handle: &str, image: &str) -> Vec<String> {
    vec![s("commit"), s(handle), s(image)]
}

pub fn clone_image_name(name: &str) -> String {
    format!("harbor-clone/{}:latest", name.to_lowercase())
}

pub fn remove_image_args(image: &str) -> Vec<String> {
    vec![s("rmi"), s(image)]
}

pub fn exec_args(handle: &str, command: &str) -> Vec<String> {
    vec![s("exec"), s(handle), s("sh"), s("-c"), s(command)]
}

pub fn write_args(handle: &str, path: &str) -> Vec<String> {
    vec![
        s("exec"),
        s("-i"),
        s(handle),
        s("sh"),
        s("-c"),
        format!("cat > {}", shlex::try_quote(path).map(|q| q.into_owned()).unwrap_or_else(|_| s(path))),
    ]
}

pub fn copy_to_args(handle: &str, host_path: &str, guest_path: &str) -> Vec<String> {
    vec![s("cp"), s(host_path), format!("{}:{}", handle, guest_path)]
}

pub fn copy_from_args(handle: &str, guest_path: &str, host_path: &str) -> Vec<String> {
    vec![s("cp"), format!("{}:{}", handle, guest_path), s(host_path)]
}

pub fn inspect_args(handle: &str) -> Vec<String> {
    vec![s("inspect"), s("-f"), s("{{.State.Status}}"), s(handle)]
}

/// Map `docker inspect -f {{.State.Status}}` output
pub fn parse_status(raw: &str) -> ObservedState {
    match raw.trim() {
        "running" | "restarting" => ObservedState::Running,
        "paused" => ObservedState::Paused,
        "created" => ObservedState::Created,
        "exited" | "dead" | "stopped" => ObservedState::Stopped,
        other => ObservedState::Unknown(other.to_string()),
    }
}

fn is_missing(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("no such container") || lower.contains("no such object")
}

// ============================================================================
// Backend
// ============================================================================

pub struct ContainerBackend {
    runner: Arc<dyn CommandRunner>,
    program: String,
    timeout: Duration,
}

impl ContainerBackend {
    pub fn new(runner: Arc<dyn CommandRunner>, program: impl Into<String>) -> Self {
        Self {
            runner,
            program: program.into(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// First of docker / podman found on `PATH`
    pub fn detect_program() -> Option<&'static str> {
        ["docker", "podman"]
            .into_iter()
            .find(|p| which::which(p).is_ok())
    }

    async fn invoke(&self, args: Vec<String>) -> Result<CommandOutput> {
        self.invoke_with(args, self.timeout).await
    }

    async fn invoke_with(&self, args: Vec<String>, timeout: Duration) -> Result<CommandOutput> {
        debug!(program = %self.program, verb = %args.first().map(String::as_str).unwrap_or(""), "Container runtime call");
        self.runner
            .run(&self.program, &args, &RunOptions::with_timeout(timeout))
            .await?
            .check(&self.program)
    }
}

#[async_trait]
impl RuntimeBackend for ContainerBackend {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Container
    }

    fn supports_cow_clone(&self) -> bool {
        true
    }

    async fn provision(&self, spec: &ProvisionSpec) -> Result<String> {
        info!(name = %spec.name, image = %spec.template, "Creating container");
        let output = self.invoke(create_args(spec, &spec.template)).await?;
        let handle = output.stdout.trim().to_string();
        if handle.is_empty() {
            return Ok(spec.name.clone());
        }
        Ok(handle)
    }

    async fn start(&self, handle: &str) -> Result<()> {
        self.invoke(lifecycle_args("start", handle)).await.map(|_| ())
    }

    async fn stop(&self, handle: &str) -> Result<()> {
        self.invoke(lifecycle_args("stop", handle)).await.map(|_| ())
    }

    async fn pause(&self, handle: &str) -> Result<()> {
        self.invoke(lifecycle_args("pause", handle)).await.map(|_| ())
    }

    async fn resume(&self, handle: &str) -> Result<()> {
        self.invoke(lifecycle_args("unpause", handle)).await.map(|_| ())
    }

    async fn save_state(&self, handle: &str) -> Result<()> {
        self.invoke(save_args(handle)).await.map(|_| ())
    }

    async fn restore_state(&self, handle: &str) -> Result<()> {
        self.invoke(restore_args(handle)).await.map(|_| ())
    }

    async fn remove(&self, handle: &str) -> Result<()> {
        self.invoke(remove_args(handle)).await.map(|_| ())
    }

    async fn clone_resource(
        &self,
        source_handle: &str,
        spec: &ProvisionSpec,
        _copy_on_write: bool,
    ) -> Result<String> {
        let image = clone_image_name(&spec.name);
        info!(source = %source_handle, name = %spec.name, image = %image, "Cloning container");
        self.invoke(commit_args(source_handle, &image)).await?;

        match self.invoke(create_args(spec, &image)).await {
            Ok(output) => {
                let handle = output.stdout.trim().to_string();
                Ok(if handle.is_empty() { spec.name.clone() } else { handle })
            }
            Err(e) => {
                if let Err(cleanup) = self.invoke(remove_image_args(&image)).await {
                    warn!(image = %image, "Clone cleanup failed: {}", cleanup);
                }
                Err(e)
            }
        }
    }

    async fn release_clone(&self, name: &str) -> Result<()> {
        let image = clone_image_name(name);
        debug!(image = %image, "Removing clone image");
        self.invoke(remove_image_args(&image)).await.map(|_| ())
    }

    async fn exec(&self, handle: &str, command: &str, timeout: Duration) -> Result<CommandOutput> {
        self.runner
            .run(&self.program, &exec_args(handle, command), &RunOptions::with_timeout(timeout))
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
                &exec_args(handle, command),
                &RunOptions::with_timeout(timeout),
                sink,
            )
            .await
    }

    async fn copy_to(&self, handle: &str, host_path: &str, guest_path: &str) -> Result<()> {
        self.invoke(copy_to_args(handle, host_path, guest_path))
            .await
            .map(|_| ())
    }

    async fn copy_from(&self, handle: &str, guest_path: &str, host_path: &str) -> Result<()> {
        self.invoke(copy_from_args(handle, guest_path, host_path))
            .await
            .map(|_| ())
    }

    async fn inspect(&self, handle: &str) -> Result<ObservedState> {
        let output = self
            .runner
            .run(&self.program, &inspect_args(handle), &RunOptions::with_timeout(self.timeout))
            .await?;
        if output.success() {
            return Ok(parse_status(&output.stdout));
        }
        if is_missing(&output.stderr) {
            return Ok(ObservedState::Missing);
        }
        Err(Error::external(&self.program, output.exit_code, output.stderr.trim()))
    }

    async fn write_file(&self, handle: &str, path: &str, contents: &str) -> Result<()> {
        self.runner
            .run_with_input(
                &self.program,
                &write_args(handle, path),
                contents,
                &RunOptions::with_timeout(self.timeout),
            )
            .await?
            .check(&self.program)
            .map(|_| ())
    }
}
