//! Worker trait - the unit of background work behind a checkpoint task

use crate::checkpoint::broker::CheckpointBroker;
use crate::checkpoint::task::TaskId;
use async_trait::async_trait;
use harbor_foundation::Result;
use serde_json::Value;

/// Everything a worker is told about the task it runs
#[derive(Debug, Clone)]
pub struct TaskJob {
    pub id: TaskId,
    pub operation: String,
    pub context: Value,
    /// Advisory deadline; a worker may enforce it
    pub deadline_ms: Option<u64>,
}

/// Handle a worker uses to publish progress on its own task
#[derive(Clone)]
pub struct ProgressReporter {
    broker: CheckpointBroker,
    id: TaskId,
}

impl ProgressReporter {
    pub(crate) fn new(broker: CheckpointBroker, id: TaskId) -> Self {
        Self { broker, id }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.id
    }

    /// Report progress; a task that is gone or finished ignores it
    pub async fn report(&self, percentage: f64, message: impl Into<String>) {
        self.broker
            .advance(self.id.as_str(), percentage, message.into())
            .await;
    }
}

/// Background work performed for a submitted task
///
/// The returned value becomes the task result; an error marks the task
/// `error` with the error message.
#[async_trait]
pub trait TaskWorker: Send + Sync {
    async fn run(&self, job: &TaskJob, progress: &ProgressReporter) -> Result<Value>;

    /// Worker name for logs
    fn name(&self) -> &'static str {
        "worker"
    }
}
