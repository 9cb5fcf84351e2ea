//! Command/transport executor
//!
//! - `CommandRunner` - the seam every runtime backend invokes programs through
//! - `LocalExecutor` - host process execution with deadlines and line streaming

pub mod local;
pub mod r#trait;

pub use local::{LocalExecutor, LocalExecutorConfig};
pub use r#trait::{
    CommandOutput, CommandRunner, DetachedProcess, ExecRequest, OutputLine, OutputStream,
    RunOptions,
};
