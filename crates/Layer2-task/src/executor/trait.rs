//! Executor trait

use async_trait::async_trait;
use harbor_foundation::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

/// Which output channel a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One line of live output, without its line terminator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub line: String,
}

/// Per-invocation options
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Deadline; the executor default applies when unset
    pub timeout: Option<Duration>,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Default::default()
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// A single external invocation
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub program: String,
    pub args: Vec<String>,
    /// Written to the program's stdin, which is then closed
    pub input: Option<String>,
    pub options: RunOptions,
    /// Receives every output line as it is produced
    pub sink: Option<mpsc::UnboundedSender<OutputLine>>,
}

impl ExecRequest {
    pub fn new(program: impl Into<String>, args: &[String], options: &RunOptions) -> Self {
        Self {
            program: program.into(),
            args: args.to_vec(),
            input: None,
            options: options.clone(),
            sink: None,
        }
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn with_sink(mut self, sink: mpsc::UnboundedSender<OutputLine>) -> Self {
        self.sink = Some(sink);
        self
    }
}

/// Result of a completed invocation; a nonzero exit is still `Ok` here
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a nonzero exit into [`Error::ExternalRuntime`]
    pub fn check(self, program: &str) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }
        let detail = if self.stderr.trim().is_empty() {
            self.stdout.trim().to_string()
        } else {
            self.stderr.trim().to_string()
        };
        Err(Error::external(program, self.exit_code, detail))
    }
}

/// A program started without waiting for it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetachedProcess {
    pub pid: u32,
}

/// Executor trait - implement to add new transports
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion or deadline
    async fn execute(&self, request: ExecRequest) -> Result<CommandOutput>;

    /// Start a program and return once it is running
    async fn run_detached(&self, program: &str, args: &[String]) -> Result<DetachedProcess>;

    /// Executor name
    fn name(&self) -> &'static str;

    async fn run(&self, program: &str, args: &[String], options: &RunOptions) -> Result<CommandOutput> {
        self.execute(ExecRequest::new(program, args, options)).await
    }

    async fn run_with_input(
        &self,
        program: &str,
        args: &[String],
        input: &str,
        options: &RunOptions,
    ) -> Result<CommandOutput> {
        self.execute(ExecRequest::new(program, args, options).with_input(input))
            .await
    }

    /// Run while forwarding each output line to `sink` as it appears
    async fn run_streaming(
        &self,
        program: &str,
        args: &[String],
        options: &RunOptions,
        sink: mpsc::UnboundedSender<OutputLine>,
    ) -> Result<CommandOutput> {
        self.execute(ExecRequest::new(program, args, options).with_sink(sink))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(exit_code: i32, stdout: &str, stderr: &str) -> CommandOutput {
        CommandOutput {
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            duration_ms: 1,
        }
    }

    #[test]
    fn test_check_success() {
        assert!(output(0, "ok", "").check("docker").is_ok());
    }

    #[test]
    fn test_check_failure_prefers_stderr() {
        let err = output(125, "noise", "No such container: web\n")
            .check("docker")
            .unwrap_err();
        match err {
            Error::ExternalRuntime {
                program,
                exit_code,
                stderr,
            } => {
                assert_eq!(program, "docker");
                assert_eq!(exit_code, 125);
                assert_eq!(stderr, "No such container: web");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = output(1, "only stdout", " ").check("VBoxManage").unwrap_err();
        assert!(err.to_string().contains("only stdout"));
    }
}
