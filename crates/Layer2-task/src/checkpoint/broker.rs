//! Checkpoint Broker - long-polling task protocol
//!
//! Tasks live in an in-memory set owned by the broker. A worker (or an
//! external collaborator) moves each task from `processing` to `completed`
//! or `error`; the first poll that observes a terminal status retires the
//! task, so a second poll reports `not_found`.

use crate::checkpoint::task::{CheckpointTask, TaskId, TaskProgress, TaskStatus};
use crate::checkpoint::worker::{ProgressReporter, TaskJob, TaskWorker};
use crate::progress::CheckpointRecord;
use harbor_foundation::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Answer to a poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResult {
    pub success: bool,
    pub task_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<TaskProgress>,
    pub done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PollResult {
    pub fn not_found(id: &str) -> Self {
        Self {
            success: false,
            task_id: id.to_string(),
            status: "not_found".to_string(),
            operation: None,
            progress: None,
            done: false,
            result: None,
            error: None,
        }
    }

    fn from_task(task: &CheckpointTask) -> Self {
        Self {
            success: true,
            task_id: task.id.to_string(),
            status: task.status.as_str().to_string(),
            operation: Some(task.operation.clone()),
            progress: Some(task.progress.clone()),
            done: task.is_terminal(),
            result: task.result.clone(),
            error: task.error.clone(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status == "not_found"
    }
}

/// Owner of the live checkpoint task set
#[derive(Clone, Default)]
pub struct CheckpointBroker {
    tasks: Arc<RwLock<HashMap<TaskId, CheckpointTask>>>,
}

impl CheckpointBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task and run `worker` for it in the background
    ///
    /// Returns as soon as the task is stored.
    pub async fn submit(
        &self,
        operation: impl Into<String>,
        context: Value,
        worker: Arc<dyn TaskWorker>,
    ) -> TaskId {
        self.submit_with_deadline(operation, context, None, worker)
            .await
    }

    pub async fn submit_with_deadline(
        &self,
        operation: impl Into<String>,
        context: Value,
        deadline_ms: Option<u64>,
        worker: Arc<dyn TaskWorker>,
    ) -> TaskId {
        let id = self.open(operation, context, deadline_ms).await;

        let job = {
            let tasks = self.tasks.read().await;
            match tasks.get(&id) {
                Some(task) => TaskJob {
                    id: id.clone(),
                    operation: task.operation.clone(),
                    context: task.context.clone(),
                    deadline_ms: task.deadline_ms,
                },
                None => return id,
            }
        };

        let broker = self.clone();
        let reporter = self.reporter(&id);
        tokio::spawn(async move {
            debug!(task = %job.id, worker = worker.name(), "Worker started");
            let outcome = worker.run(&job, &reporter).await;
            if let Err(e) = broker.finish(job.id.as_str(), outcome).await {
                // Completed externally or already retired
                debug!(task = %job.id, "Worker result discarded: {}", e);
            }
        });

        id
    }

    /// Register a task whose work is driven from outside the broker
    pub async fn open(
        &self,
        operation: impl Into<String>,
        context: Value,
        deadline_ms: Option<u64>,
    ) -> TaskId {
        let task = CheckpointTask::new(operation, context).with_deadline(deadline_ms);
        let id = task.id.clone();
        info!(task = %id, operation = %task.operation, "Checkpoint task submitted");
        self.tasks.write().await.insert(id.clone(), task);
        id
    }

    pub fn reporter(&self, id: &TaskId) -> ProgressReporter {
        ProgressReporter::new(self.clone(), id.clone())
    }

    /// Consuming read at terminal state, snapshot otherwise
    pub async fn poll(&self, id: &str) -> PollResult {
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.get(id) else {
            return PollResult::not_found(id);
        };

        let result = PollResult::from_task(task);
        if result.done {
            tasks.remove(id);
            debug!(task = %id, "Checkpoint task retired");
        }
        result
    }

    /// Force a task to `completed` with a result supplied from outside
    pub async fn complete_externally(&self, id: &str, result: Value) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| Error::CheckpointNotFound(id.to_string()))?;
        task.complete(result)?;
        info!(task = %id, "Checkpoint task completed externally");
        Ok(())
    }

    /// Record progress; `Ok(false)` when the task is already terminal
    pub async fn update_progress(
        &self,
        id: &str,
        percentage: f64,
        message: impl Into<String>,
    ) -> Result<bool> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| Error::CheckpointNotFound(id.to_string()))?;
        Ok(task.advance(percentage, message))
    }

    pub(crate) async fn advance(&self, id: &str, percentage: f64, message: String) -> bool {
        self.update_progress(id, percentage, message)
            .await
            .unwrap_or(false)
    }

    /// Settle a task with the outcome of its work
    pub async fn finish(&self, id: &str, outcome: Result<Value>) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| Error::CheckpointNotFound(id.to_string()))?;
        match outcome {
            Ok(value) => {
                task.complete(value)?;
                info!(task = %id, "Checkpoint task completed");
            }
            Err(e) => {
                task.fail(e.to_string())?;
                warn!(task = %id, "Checkpoint task failed: {}", e);
            }
        }
        Ok(())
    }

    /// Settle a task as `error` with a plain message
    pub async fn fail(&self, id: &str, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| Error::CheckpointNotFound(id.to_string()))?;
        task.fail(message.clone())?;
        warn!(task = %id, "Checkpoint task failed: {}", message);
        Ok(())
    }

    /// Turn checkpoints published on `records` into progress of task `id`
    ///
    /// Ends when the publisher closes or the task is no longer live.
    pub fn relay(
        &self,
        id: &TaskId,
        mut records: broadcast::Receiver<CheckpointRecord>,
    ) -> JoinHandle<()> {
        let broker = self.clone();
        let id = id.clone();
        tokio::spawn(async move {
            loop {
                let record = match records.recv().await {
                    Ok(record) => record,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(task = %id, skipped, "Progress relay lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                let current = match broker.get(id.as_str()).await {
                    Some(task) if !task.is_terminal() => task.progress.percentage,
                    _ => break,
                };
                let percentage = record.percent().unwrap_or(current);
                broker
                    .advance(id.as_str(), percentage, record.message())
                    .await;
            }
        })
    }

    /// Non-consuming lookup
    pub async fn get(&self, id: &str) -> Option<CheckpointTask> {
        self.tasks.read().await.get(id).cloned()
    }

    /// Live tasks, oldest first
    pub async fn list(&self) -> Vec<CheckpointTask> {
        let mut tasks: Vec<_> = self.tasks.read().await.values().cloned().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        tasks
    }

    pub async fn count_by_status(&self, status: TaskStatus) -> usize {
        self.tasks
            .read()
            .await
            .values()
            .filter(|t| t.status == status)
            .count()
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressStream;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Reports a few phases and blocks until released
    struct GatedWorker {
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl TaskWorker for GatedWorker {
        async fn run(&self, job: &TaskJob, progress: &ProgressReporter) -> Result<Value> {
            progress.report(25.0, "dispatched").await;
            self.gate.notified().await;
            progress.report(75.0, "processing response").await;
            Ok(json!({"operation": job.operation, "answer": 42}))
        }
    }

    struct FailingWorker;

    #[async_trait]
    impl TaskWorker for FailingWorker {
        async fn run(&self, _job: &TaskJob, _progress: &ProgressReporter) -> Result<Value> {
            Err(Error::Transport("upstream unreachable".into()))
        }
    }

    async fn poll_until_done(broker: &CheckpointBroker, id: &str) -> PollResult {
        for _ in 0..200 {
            let result = broker.poll(id).await;
            if result.done || result.is_not_found() {
                return result;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("task {id} never finished");
    }

    #[tokio::test]
    async fn test_submit_poll_lifecycle() {
        let broker = CheckpointBroker::new();
        let gate = Arc::new(Notify::new());
        let id = broker
            .submit(
                "ANALYZE",
                json!({"input": "x"}),
                Arc::new(GatedWorker { gate: gate.clone() }),
            )
            .await;

        let first = broker.poll(id.as_str()).await;
        assert!(first.success);
        assert_eq!(first.status, "processing");
        assert!(!first.done);
        assert!(first.result.is_none());

        gate.notify_one();
        let done = poll_until_done(&broker, id.as_str()).await;
        assert!(done.done);
        assert_eq!(done.status, "completed");
        assert_eq!(done.result.unwrap()["answer"], 42);

        let again = broker.poll(id.as_str()).await;
        assert!(!again.success);
        assert_eq!(again.status, "not_found");
        assert!(broker.is_empty().await);
    }

    #[tokio::test]
    async fn test_progress_never_decreases_across_polls() {
        let broker = CheckpointBroker::new();
        let id = broker.open("manual", Value::Null, None).await;

        let mut last = 0.0;
        for pct in [10.0, 30.0, 20.0, 60.0, 5.0] {
            broker.update_progress(id.as_str(), pct, "step").await.unwrap();
            let polled = broker.poll(id.as_str()).await;
            assert!(!polled.done);
            let now = polled.progress.unwrap().percentage;
            assert!(now >= last);
            last = now;
        }
        assert_eq!(last, 60.0);
    }

    #[tokio::test]
    async fn test_worker_error_is_reported() {
        let broker = CheckpointBroker::new();
        let id = broker.submit("fetch", Value::Null, Arc::new(FailingWorker)).await;
        let done = poll_until_done(&broker, id.as_str()).await;
        assert_eq!(done.status, "error");
        assert!(done.error.unwrap().contains("upstream unreachable"));
    }

    #[tokio::test]
    async fn test_complete_externally() {
        let broker = CheckpointBroker::new();
        let gate = Arc::new(Notify::new());
        let id = broker
            .submit("REVIEW", Value::Null, Arc::new(GatedWorker { gate: gate.clone() }))
            .await;

        broker
            .complete_externally(id.as_str(), json!({"reviewer": "human"}))
            .await
            .unwrap();

        // The worker finishing later does not overwrite the external result
        gate.notify_one();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let done = broker.poll(id.as_str()).await;
        assert!(done.done);
        assert_eq!(done.result.unwrap()["reviewer"], "human");

        let err = broker
            .complete_externally(id.as_str(), json!(null))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "checkpoint_not_found");
    }

    #[tokio::test]
    async fn test_complete_externally_twice_is_rejected() {
        let broker = CheckpointBroker::new();
        let id = broker.open("manual", Value::Null, Some(5_000)).await;
        assert_eq!(broker.get(id.as_str()).await.unwrap().deadline_ms, Some(5_000));

        broker.complete_externally(id.as_str(), json!(1)).await.unwrap();
        let err = broker
            .complete_externally(id.as_str(), json!(2))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation_error");
    }

    #[tokio::test]
    async fn test_relay_moves_progress_from_stream() {
        let broker = CheckpointBroker::new();
        let id = broker.open("script", Value::Null, None).await;
        let stream = ProgressStream::new();
        let relay = broker.relay(&id, stream.subscribe());

        stream.feed_line("CHECKPOINT compile percent=40 message=compiling");
        stream.feed_line("CHECKPOINT link message=linking");
        drop(stream);
        relay.await.unwrap();

        let task = broker.get(id.as_str()).await.unwrap();
        assert_eq!(task.progress.percentage, 40.0);
        assert_eq!(task.progress.message, "linking");
    }

    #[tokio::test]
    async fn test_list_and_counts() {
        let broker = CheckpointBroker::new();
        let a = broker.open("a", Value::Null, None).await;
        let _b = broker.open("b", Value::Null, None).await;
        broker.complete_externally(a.as_str(), json!(true)).await.unwrap();

        assert_eq!(broker.len().await, 2);
        assert_eq!(broker.count_by_status(TaskStatus::Completed).await, 1);
        assert_eq!(broker.count_by_status(TaskStatus::Processing).await, 1);
        assert_eq!(broker.list().await.len(), 2);
    }
}
