//! Remote task worker
//!
//! Runs a configured client program for each task and reports fixed phases:
//! 25% `dispatched`, 75% `processing response`, 100% `complete`. The client
//! receives `{"operation", "context"}` as JSON on stdin; its stdout becomes
//! the task result (parsed as JSON when possible).

use crate::checkpoint::{ProgressReporter, TaskJob, TaskWorker};
use crate::executor::{CommandRunner, RunOptions};
use async_trait::async_trait;
use harbor_foundation::{Error, RemoteTaskSettings, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct RemoteTaskWorker {
    runner: Arc<dyn CommandRunner>,
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl RemoteTaskWorker {
    pub fn new(runner: Arc<dyn CommandRunner>, program: impl Into<String>) -> Self {
        Self {
            runner,
            program: program.into(),
            args: Vec::new(),
            timeout: Duration::from_secs(300),
        }
    }

    /// Build from settings; `None` when no client program is configured
    pub fn from_settings(runner: Arc<dyn CommandRunner>, settings: &RemoteTaskSettings) -> Option<Self> {
        let program = settings.program.as_ref()?;
        Some(
            Self::new(runner, program.clone())
                .with_args(settings.args.clone())
                .with_timeout(Duration::from_millis(settings.timeout_ms)),
        )
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The tighter of the configured timeout and the task deadline
    fn effective_timeout(&self, job: &TaskJob) -> Duration {
        match job.deadline_ms {
            Some(ms) => self.timeout.min(Duration::from_millis(ms)),
            None => self.timeout,
        }
    }
}

#[async_trait]
impl TaskWorker for RemoteTaskWorker {
    async fn run(&self, job: &TaskJob, progress: &ProgressReporter) -> Result<Value> {
        let request = serde_json::to_string(&json!({
            "operation": job.operation,
            "context": job.context,
        }))?;
        let timeout = self.effective_timeout(job);

        progress.report(25.0, "dispatched").await;
        debug!(task = %job.id, program = %self.program, "Dispatching remote task");

        let output = self
            .runner
            .run_with_input(
                &self.program,
                &self.args,
                &request,
                &RunOptions::with_timeout(timeout),
            )
            .await?
            .check(&self.program)?;

        progress.report(75.0, "processing response").await;

        let body = output.stdout.trim();
        if body.is_empty() {
            return Err(Error::Transport(format!(
                "{} returned an empty response",
                self.program
            )));
        }
        let result = serde_json::from_str::<Value>(body)
            .unwrap_or_else(|_| Value::String(body.to_string()));

        progress.report(100.0, "complete").await;
        Ok(result)
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointBroker;
    use crate::executor::LocalExecutor;

    async fn wait_done(broker: &CheckpointBroker, id: &str) -> crate::checkpoint::PollResult {
        for _ in 0..400 {
            let r = broker.poll(id).await;
            if r.done {
                return r;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("remote task did not finish");
    }

    #[tokio::test]
    async fn test_remote_worker_echoes_json() {
        let broker = CheckpointBroker::new();
        let worker = RemoteTaskWorker::new(Arc::new(LocalExecutor::new()), "cat");
        let id = broker
            .submit("ANALYZE", json!({"file": "a.rs"}), Arc::new(worker))
            .await;

        let done = wait_done(&broker, id.as_str()).await;
        assert_eq!(done.status, "completed");
        let result = done.result.unwrap();
        assert_eq!(result["operation"], "ANALYZE");
        assert_eq!(result["context"]["file"], "a.rs");
        assert_eq!(done.progress.unwrap().percentage, 100.0);
    }

    #[tokio::test]
    async fn test_remote_worker_plain_text_and_failure() {
        let broker = CheckpointBroker::new();
        let worker = RemoteTaskWorker::new(Arc::new(LocalExecutor::new()), "sh")
            .with_args(vec!["-c".into(), "cat >/dev/null; echo summary ready".into()]);
        let id = broker.submit("SUMMARIZE", Value::Null, Arc::new(worker)).await;
        let done = wait_done(&broker, id.as_str()).await;
        assert_eq!(done.result.unwrap(), json!("summary ready"));

        let worker = RemoteTaskWorker::new(Arc::new(LocalExecutor::new()), "sh")
            .with_args(vec!["-c".into(), "cat >/dev/null; echo denied >&2; exit 2".into()]);
        let id = broker.submit("SUMMARIZE", Value::Null, Arc::new(worker)).await;
        let done = wait_done(&broker, id.as_str()).await;
        assert_eq!(done.status, "error");
        assert!(done.error.unwrap().contains("denied"));
    }

    #[test]
    fn test_deadline_tightens_timeout() {
        let worker = RemoteTaskWorker::new(Arc::new(LocalExecutor::new()), "client")
            .with_timeout(Duration::from_secs(60));
        let mut job = TaskJob {
            id: "task_1_abcdef01".into(),
            operation: "op".into(),
            context: Value::Null,
            deadline_ms: Some(1_500),
        };
        assert_eq!(worker.effective_timeout(&job), Duration::from_millis(1_500));
        job.deadline_ms = None;
        assert_eq!(worker.effective_timeout(&job), Duration::from_secs(60));
    }

    #[test]
    fn test_from_settings() {
        let runner: Arc<dyn CommandRunner> = Arc::new(LocalExecutor::new());
        assert!(RemoteTaskWorker::from_settings(runner.clone(), &RemoteTaskSettings::default()).is_none());

        let settings = RemoteTaskSettings {
            program: Some("ai-client".into()),
            args: vec!["--json".into()],
            timeout_ms: 1000,
        };
        let worker = RemoteTaskWorker::from_settings(runner, &settings).unwrap();
        assert_eq!(worker.args, vec!["--json".to_string()]);
        assert_eq!(worker.timeout, Duration::from_secs(1));
    }
}
