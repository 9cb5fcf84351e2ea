//! Checkpoint task definition and status transitions

use chrono::{DateTime, Utc};
use harbor_foundation::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Borrow;
use uuid::Uuid;

/// Unique, time-derived task identifier: `task_<unix-millis>_<8 hex>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new() -> Self {
        let millis = Utc::now().timestamp_millis();
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("task_{}_{}", millis, &suffix[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for TaskId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Task status; only moves forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Processing,
    Completed,
    Error,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub percentage: f64,
    pub message: String,
}

impl TaskProgress {
    pub fn new(percentage: f64, message: impl Into<String>) -> Self {
        Self {
            percentage,
            message: message.into(),
        }
    }
}

/// One asynchronous unit of work tracked by the broker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointTask {
    pub id: TaskId,
    pub operation: String,
    pub status: TaskStatus,
    pub progress: TaskProgress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub context: Value,
    /// Advisory; the broker never enforces it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl CheckpointTask {
    pub fn new(operation: impl Into<String>, context: Value) -> Self {
        Self {
            id: TaskId::new(),
            operation: operation.into(),
            status: TaskStatus::Processing,
            progress: TaskProgress::new(0.0, "initiated"),
            result: None,
            error: None,
            context,
            deadline_ms: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn with_deadline(mut self, deadline_ms: Option<u64>) -> Self {
        self.deadline_ms = deadline_ms;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Record progress; the percentage never decreases
    ///
    /// Returns false when the task is already terminal.
    pub fn advance(&mut self, percentage: f64, message: impl Into<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        let percentage = percentage.clamp(0.0, 100.0);
        if percentage > self.progress.percentage {
            self.progress.percentage = percentage;
        }
        self.progress.message = message.into();
        true
    }

    pub fn complete(&mut self, result: Value) -> Result<()> {
        self.ensure_processing("complete")?;
        self.status = TaskStatus::Completed;
        self.progress = TaskProgress::new(100.0, "complete");
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.ensure_processing("fail")?;
        self.status = TaskStatus::Error;
        self.error = Some(error.into());
        self.progress.message = "failed".to_string();
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    fn ensure_processing(&self, action: &str) -> Result<()> {
        if self.is_terminal() {
            return Err(Error::Validation(format!(
                "Cannot {} task {}: already {}",
                action, self.id, self.status
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_id_format() {
        let id = TaskId::new();
        let parts: Vec<&str> = id.as_str().split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "task");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 8);
        assert_ne!(id, TaskId::new());
    }

    #[test]
    fn test_new_task_is_processing() {
        let task = CheckpointTask::new("ANALYZE", json!({}));
        assert_eq!(task.status, TaskStatus::Processing);
        assert_eq!(task.progress.percentage, 0.0);
        assert_eq!(task.progress.message, "initiated");
        assert!(task.completed_at.is_none());
    }

    #[test]
    fn test_progress_is_monotonic() {
        let mut task = CheckpointTask::new("op", Value::Null);
        assert!(task.advance(40.0, "dispatched"));
        assert!(task.advance(10.0, "late report"));
        assert_eq!(task.progress.percentage, 40.0);
        assert_eq!(task.progress.message, "late report");
    }

    #[test]
    fn test_transitions_only_forward() {
        let mut task = CheckpointTask::new("op", Value::Null);
        task.complete(json!({"ok": true})).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.completed_at.is_some());

        assert!(task.fail("boom").is_err());
        assert!(task.complete(json!(1)).is_err());
        assert!(!task.advance(10.0, "ignored"));
        assert_eq!(task.progress.percentage, 100.0);
    }
}
