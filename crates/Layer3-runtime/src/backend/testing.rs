//! Scripted in-memory backend for tests
//!
//! Records every call as `"<op>:<handle>"`, tracks the state a real runtime
//! would report, and can be told to fail or stall on a given operation.

use super::{ObservedState, ProvisionSpec, RuntimeBackend};
use async_trait::async_trait;
use harbor_foundation::{Error, ResourceKind, Result};
use harbor_task::{CommandOutput, OutputLine, OutputStream};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Default)]
struct FakeState {
    calls: Vec<String>,
    observed: HashMap<String, ObservedState>,
    files: HashMap<(String, String), String>,
    failures: HashMap<String, String>,
    delays: HashMap<String, Duration>,
    exec_replies: Vec<(String, CommandOutput)>,
}

pub struct FakeBackend {
    kind: ResourceKind,
    cow: bool,
    state: Mutex<FakeState>,
}

impl FakeBackend {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            cow: true,
            state: Mutex::new(FakeState::default()),
        }
    }

    pub fn container() -> Self {
        Self::new(ResourceKind::Container)
    }

    pub fn vm() -> Self {
        Self::new(ResourceKind::Vm)
    }

    /// Clones are always full copies
    pub fn without_cow(mut self) -> Self {
        self.cow = false;
        self
    }

    /// Make `op` fail with an external runtime error until cleared
    pub fn fail_on(&self, op: &str, message: &str) {
        self.state
            .lock()
            .failures
            .insert(op.to_string(), message.to_string());
    }

    pub fn clear_failure(&self, op: &str) {
        self.state.lock().failures.remove(op);
    }

    /// Sleep before answering `op`
    pub fn delay_on(&self, op: &str, delay: Duration) {
        self.state.lock().delays.insert(op.to_string(), delay);
    }

    /// Reply with `output` to any exec whose command contains `needle`
    pub fn reply_to_exec(&self, needle: &str, output: CommandOutput) {
        self.state
            .lock()
            .exec_replies
            .push((needle.to_string(), output));
    }

    /// Change what `inspect` reports, as if the runtime changed on its own
    pub fn set_observed(&self, handle: &str, state: ObservedState) {
        self.state.lock().observed.insert(handle.to_string(), state);
    }

    pub fn observed(&self, handle: &str) -> Option<ObservedState> {
        self.state.lock().observed.get(handle).cloned()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Number of calls to `op`, any handle
    pub fn count(&self, op: &str) -> usize {
        let prefix = format!("{}:", op);
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .count()
    }

    pub fn file(&self, handle: &str, path: &str) -> Option<String> {
        self.state
            .lock()
            .files
            .get(&(handle.to_string(), path.to_string()))
            .cloned()
    }

    async fn enter(&self, op: &str, handle: &str) -> Result<()> {
        let (delay, failure) = {
            let mut state = self.state.lock();
            state.calls.push(format!("{}:{}", op, handle));
            (
                state.delays.get(op).copied(),
                state.failures.get(op).cloned(),
            )
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some(message) => Err(Error::external("fake", 1, message)),
            None => Ok(()),
        }
    }

    fn set(&self, handle: &str, state: ObservedState) {
        self.set_observed(handle, state);
    }

    fn reply(&self, command: &str) -> CommandOutput {
        let scripted = self
            .state
            .lock()
            .exec_replies
            .iter()
            .find(|(needle, _)| command.contains(needle.as_str()))
            .map(|(_, out)| out.clone());
        if let Some(out) = scripted {
            return out;
        }

        let stdout = command
            .strip_prefix("echo ")
            .map(|rest| format!("{}\n", rest.trim_matches(|c| c == '\'' || c == '"')))
            .unwrap_or_default();
        CommandOutput {
            exit_code: 0,
            stdout,
            stderr: String::new(),
            duration_ms: 1,
        }
    }
}

#[async_trait]
impl RuntimeBackend for FakeBackend {
    fn kind(&self) -> ResourceKind {
        self.kind
    }

    fn supports_cow_clone(&self) -> bool {
        self.cow
    }

    async fn provision(&self, spec: &ProvisionSpec) -> Result<String> {
        let handle = format!("fake-{}", spec.name);
        self.enter("provision", &handle).await?;
        self.set(&handle, ObservedState::Created);
        Ok(handle)
    }

    async fn start(&self, handle: &str) -> Result<()> {
        self.enter("start", handle).await?;
        self.set(handle, ObservedState::Running);
        Ok(())
    }

    async fn stop(&self, handle: &str) -> Result<()> {
        self.enter("stop", handle).await?;
        self.set(handle, ObservedState::Stopped);
        Ok(())
    }

    async fn pause(&self, handle: &str) -> Result<()> {
        self.enter("pause", handle).await?;
        self.set(handle, ObservedState::Paused);
        Ok(())
    }

    async fn resume(&self, handle: &str) -> Result<()> {
        self.enter("resume", handle).await?;
        self.set(handle, ObservedState::Running);
        Ok(())
    }

    async fn save_state(&self, handle: &str) -> Result<()> {
        self.enter("save_state", handle).await?;
        self.set(handle, ObservedState::Saved);
        Ok(())
    }

    async fn restore_state(&self, handle: &str) -> Result<()> {
        self.enter("restore_state", handle).await?;
        self.set(handle, ObservedState::Running);
        Ok(())
    }

    async fn remove(&self, handle: &str) -> Result<()> {
        self.enter("remove", handle).await?;
        self.state.lock().observed.remove(handle);
        Ok(())
    }

    async fn clone_resource(
        &self,
        source_handle: &str,
        spec: &ProvisionSpec,
        copy_on_write: bool,
    ) -> Result<String> {
        let op = if copy_on_write { "clone_cow" } else { "clone_full" };
        self.enter(op, source_handle).await?;
        let handle = format!("fake-{}", spec.name);
        self.set(&handle, ObservedState::Created);
        Ok(handle)
    }

    async fn release_clone(&self, name: &str) -> Result<()> {
        self.enter("release_clone", name).await
    }

    async fn exec(&self, handle: &str, command: &str, _timeout: Duration) -> Result<CommandOutput> {
        self.enter("exec", handle).await?;
        Ok(self.reply(command))
    }

    async fn exec_streaming(
        &self,
        handle: &str,
        command: &str,
        _timeout: Duration,
        sink: mpsc::UnboundedSender<OutputLine>,
    ) -> Result<CommandOutput> {
        self.enter("exec_streaming", handle).await?;
        let output = self.reply(command);
        for line in output.stdout.lines() {
            let _ = sink.send(OutputLine {
                stream: OutputStream::Stdout,
                line: line.to_string(),
            });
        }
        Ok(output)
    }

    async fn copy_to(&self, handle: &str, host_path: &str, guest_path: &str) -> Result<()> {
        self.enter("copy_to", handle).await?;
        self.state.lock().files.insert(
            (handle.to_string(), guest_path.to_string()),
            format!("copied from {}", host_path),
        );
        Ok(())
    }

    async fn copy_from(&self, handle: &str, _guest_path: &str, _host_path: &str) -> Result<()> {
        self.enter("copy_from", handle).await
    }

    async fn inspect(&self, handle: &str) -> Result<ObservedState> {
        self.enter("inspect", handle).await?;
        Ok(self.observed(handle).unwrap_or(ObservedState::Missing))
    }

    async fn write_file(&self, handle: &str, path: &str, contents: &str) -> Result<()> {
        self.enter("write_file", handle).await?;
        self.state
            .lock()
            .files
            .insert((handle.to_string(), path.to_string()), contents.to_string());
        Ok(())
    }
}
