//! Progress stream parser
//!
//! Extracts checkpoint markers from free-form output and publishes them on a
//! broadcast channel while the producing process is still running.

pub mod parser;
pub mod stream;

pub use parser::{CheckpointRecord, Encoding, ProgressParser};
pub use stream::ProgressStream;
