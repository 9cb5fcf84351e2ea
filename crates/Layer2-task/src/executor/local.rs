//! Local executor - runs external programs on the host
//!
//! Features:
//! - stdout/stderr captured concurrently, optionally streamed line by line
//! - stdin fed from a string and closed
//! - hard deadline on every invocation, the process is killed on expiry
//! - spawn failures reported apart from nonzero exits

use crate::executor::r#trait::{
    CommandOutput, CommandRunner, DetachedProcess, ExecRequest, OutputLine, OutputStream,
};
use async_trait::async_trait;
use harbor_foundation::{Error, Result};
use parking_lot::Mutex;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// How long readers may keep draining after the process has exited
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Local executor configuration
#[derive(Debug, Clone)]
pub struct LocalExecutorConfig {
    /// Deadline applied when a request carries none
    pub default_timeout: Duration,
}

impl Default for LocalExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
        }
    }
}

/// Executor that spawns processes directly on the host
#[derive(Debug, Clone, Default)]
pub struct LocalExecutor {
    config: LocalExecutorConfig,
}

impl LocalExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: LocalExecutorConfig) -> Self {
        Self { config }
    }

    pub fn with_timeout(default_timeout: Duration) -> Self {
        Self::with_config(LocalExecutorConfig { default_timeout })
    }

    pub fn default_timeout(&self) -> Duration {
        self.config.default_timeout
    }

    /// Check whether a program can be found on `PATH`
    pub async fn is_available(&self, program: &str) -> bool {
        Command::new(program)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

fn spawn_error(program: &str, err: std::io::Error) -> Error {
    if err.kind() == std::io::ErrorKind::NotFound {
        Error::Transport(format!("failed to start '{}': program not found", program))
    } else {
        Error::Transport(format!("failed to start '{}': {}", program, err))
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

/// Read a stream to the end, appending into `buffer` and forwarding lines
async fn pump<R>(
    reader: Option<R>,
    stream: OutputStream,
    buffer: Arc<Mutex<String>>,
    sink: Option<mpsc::UnboundedSender<OutputLine>>,
) where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return;
    };
    let mut reader = BufReader::new(reader);
    let mut raw = Vec::with_capacity(256);

    loop {
        raw.clear();
        match reader.read_until(b'\n', &mut raw).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&raw);
                buffer.lock().push_str(&text);
                if let Some(tx) = &sink {
                    let line = text.trim_end_matches(['\n', '\r']).to_string();
                    // A closed receiver only means nobody is listening anymore
                    let _ = tx.send(OutputLine { stream, line });
                }
            }
            Err(e) => {
                warn!("Failed reading {:?}: {}", stream, e);
                break;
            }
        }
    }
}

#[async_trait]
impl CommandRunner for LocalExecutor {
    async fn execute(&self, request: ExecRequest) -> Result<CommandOutput> {
        let ExecRequest {
            program,
            args,
            input,
            options,
            sink,
        } = request;
        let timeout = options.timeout.unwrap_or(self.config.default_timeout);
        let started = Instant::now();

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &options.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &options.env {
            cmd.env(key, value);
        }

        debug!(
            program = %program,
            args = ?args,
            timeout_ms = timeout.as_millis() as u64,
            "Spawning process"
        );

        let mut child = cmd.spawn().map_err(|e| spawn_error(&program, e))?;

        if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    debug!("stdin closed early: {}", e);
                }
                // Dropping stdin closes the pipe
                let _ = stdin.shutdown().await;
            });
        }

        let stdout_buf = Arc::new(Mutex::new(String::new()));
        let stderr_buf = Arc::new(Mutex::new(String::new()));
        let mut stdout_task = tokio::spawn(pump(
            child.stdout.take(),
            OutputStream::Stdout,
            Arc::clone(&stdout_buf),
            sink.clone(),
        ));
        let mut stderr_task = tokio::spawn(pump(
            child.stderr.take(),
            OutputStream::Stderr,
            Arc::clone(&stderr_buf),
            sink,
        ));

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                stdout_task.abort();
                stderr_task.abort();
                return Err(Error::Transport(format!(
                    "failed waiting for '{}': {}",
                    program, e
                )));
            }
            Err(_) => {
                warn!(
                    program = %program,
                    timeout_ms = timeout.as_millis() as u64,
                    "Deadline expired, killing process"
                );
                if let Err(e) = child.start_kill() {
                    warn!("Failed to kill '{}': {}", program, e);
                }
                let _ = child.wait().await;
                stdout_task.abort();
                stderr_task.abort();
                return Err(Error::Timeout {
                    program,
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        };

        // A grandchild may hold the pipes open after the child exits
        let drained = tokio::time::timeout(DRAIN_GRACE, async {
            let _ = (&mut stdout_task).await;
            let _ = (&mut stderr_task).await;
        })
        .await;
        if drained.is_err() {
            debug!(program = %program, "Output still open after exit, truncating");
            stdout_task.abort();
            stderr_task.abort();
        }

        let output = CommandOutput {
            exit_code: exit_code(status),
            stdout: std::mem::take(&mut *stdout_buf.lock()),
            stderr: std::mem::take(&mut *stderr_buf.lock()),
            duration_ms: started.elapsed().as_millis() as u64,
        };

        debug!(
            program = %program,
            exit_code = output.exit_code,
            duration_ms = output.duration_ms,
            "Process finished"
        );

        Ok(output)
    }

    async fn run_detached(&self, program: &str, args: &[String]) -> Result<DetachedProcess> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| spawn_error(program, e))?;

        let pid = child.id().unwrap_or_default();
        debug!(program = %program, pid, "Started detached process");

        let program = program.to_string();
        // Reap the child so it does not linger as a zombie
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!(program = %program, code = exit_code(status), "Detached process exited"),
                Err(e) => warn!(program = %program, "Detached process wait failed: {}", e),
            }
        });

        Ok(DetachedProcess { pid })
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
