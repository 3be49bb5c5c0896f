//! Completed blocks as handed to the output sinks.

use chrono::{DateTime, Utc};

/// An immutable snapshot of one flushed block.
///
/// Shared between the console and file queues behind an `Arc`, so the
/// accumulator that produced it can reset immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Commands in arrival order.
    pub commands: Vec<String>,
    /// When the first command of the block was added.
    pub created_at: DateTime<Utc>,
    /// Position in the pipeline's submission order, starting at 1. Zero
    /// until the batch is submitted.
    pub seq: u64,
}

impl Batch {
    pub fn new(commands: Vec<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            commands,
            created_at,
            seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Render a batch as a single output line (without trailing newline):
/// `bulk: a, b, c`.
pub fn format_batch(batch: &Batch) -> String {
    format!("bulk: {}", batch.commands.join(", "))
}
