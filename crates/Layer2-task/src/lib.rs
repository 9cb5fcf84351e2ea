//! # harbor-task
//!
//! Execution and asynchronous work tracking for Harbor.
//!
//! ## Features
//!
//! - Deadline-bound external process invocation with live line streaming
//! - Checkpoint parsing from free-form output (call / json / bare encodings)
//! - Long-polling checkpoint broker with external completion
//! - Remote task worker driving an external client program

pub mod checkpoint;
pub mod executor;
pub mod progress;
pub mod remote;

// Executor
pub use executor::{
    CommandOutput, CommandRunner, DetachedProcess, ExecRequest, LocalExecutor,
    LocalExecutorConfig, OutputLine, OutputStream, RunOptions,
};

// Progress
pub use progress::{CheckpointRecord, Encoding, ProgressParser, ProgressStream};

// Checkpoint broker
pub use checkpoint::{
    CheckpointBroker, CheckpointTask, PollResult, ProgressReporter, TaskId, TaskJob,
    TaskProgress, TaskStatus, TaskWorker,
};

// Remote worker
pub use remote::RemoteTaskWorker;
