//! Progress stream - publishes parsed checkpoints to any number of observers

use crate::executor::OutputLine;
use crate::progress::parser::{CheckpointRecord, ProgressParser};
use tokio::sync::{broadcast, mpsc};
use tracing::trace;

const DEFAULT_CAPACITY: usize = 256;

/// Parses output lines as they arrive and broadcasts every checkpoint found
#[derive(Debug, Clone)]
pub struct ProgressStream {
    parser: ProgressParser,
    sender: broadcast::Sender<CheckpointRecord>,
}

impl Default for ProgressStream {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressStream {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            parser: ProgressParser::new(),
            sender,
        }
    }

    /// New observer; only records published after this call are delivered
    pub fn subscribe(&self) -> broadcast::Receiver<CheckpointRecord> {
        self.sender.subscribe()
    }

    pub fn observer_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Parse one line and publish the record, if any
    pub fn feed_line(&self, line: &str) -> Option<CheckpointRecord> {
        let record = self.parser.parse_line(line)?;
        trace!(checkpoint = %record.name, "Checkpoint parsed");
        // No observers is not an error
        let _ = self.sender.send(record.clone());
        Some(record)
    }

    /// Forward executor output until the producing side closes
    ///
    /// Returns every record seen, in order.
    pub async fn pump(&self, mut lines: mpsc::UnboundedReceiver<OutputLine>) -> Vec<CheckpointRecord> {
        let mut seen = Vec::new();
        while let Some(line) = lines.recv().await {
            if let Some(record) = self.feed_line(&line.line) {
                seen.push(record);
            }
        }
        seen
    }
}
