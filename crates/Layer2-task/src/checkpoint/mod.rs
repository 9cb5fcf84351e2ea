//! Checkpoint broker (asynchronous task protocol)
//!
//! ```text
//! submit ──► [processing] ──worker/complete_externally──► [completed | error]
//!                 │                                              │
//!               poll (snapshot, done=false)               poll (retires task)
//! ```

pub mod broker;
pub mod task;
pub mod worker;

pub use broker::{CheckpointBroker, PollResult};
pub use task::{CheckpointTask, TaskId, TaskProgress, TaskStatus};
pub use worker::{ProgressReporter, TaskJob, TaskWorker};
