//! bulk-core: batching of line-delimited commands into blocks.
//!
//! Sessions accumulate commands into blocks (size-bounded or bracketed with
//! `{` / `}`), and completed blocks are handed to a shared output pipeline
//! that writes them to the console and to per-batch log files from a small
//! pool of worker threads.

pub mod batch;
pub mod block;
pub mod config;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod queue;
pub mod registry;
pub mod session;
pub mod sink;

// Re-export commonly used items at crate root.
pub use batch::{format_batch, Batch};
pub use block::{BlockAccumulator, Command};
pub use config::{BulkConfig, PipelineConfig, SessionConfig};
pub use context::{BulkContext, ScopedSession};
pub use error::{BulkError, BulkResult};
pub use pipeline::{OutputPipeline, PipelineStats, SessionLease};
pub use queue::ConcurrentQueue;
pub use registry::SessionRegistry;
pub use session::{Session, SessionHandle};
pub use sink::{BatchSink, ConsoleSink, FileSink, MemorySink};
