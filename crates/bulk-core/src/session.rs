//! One open session: a block accumulator wired to the output pipeline.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

use crate::batch::Batch;
use crate::block::BlockAccumulator;
use crate::config::SessionConfig;
use crate::error::{BulkError, BulkResult};
use crate::pipeline::{OutputPipeline, SessionLease};

/// Identifies a session. Issued from a monotonically increasing counter and
/// never reused, so a stale handle can only miss, never alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionHandle(u64);

impl SessionHandle {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

struct State {
    accumulator: BlockAccumulator,
    /// `None` once the session is closed.
    lease: Option<SessionLease>,
}

/// An open session.
///
/// All accumulator mutation and batch submission happen under one lock, so
/// batches from a session reach the pipeline in the order they were flushed
/// even if several threads feed it.
pub struct Session {
    handle: SessionHandle,
    pipeline: Arc<OutputPipeline>,
    state: Mutex<State>,
    opened_at: DateTime<Utc>,
}

impl Session {
    /// Open a session, registering it with the pipeline.
    pub fn open(
        handle: SessionHandle,
        block_size: usize,
        config: &SessionConfig,
        pipeline: &Arc<OutputPipeline>,
    ) -> BulkResult<Self> {
        let accumulator =
            BlockAccumulator::new(block_size)?.with_line_reassembly(config.reassemble_lines);
        let lease = pipeline.acquire()?;
        Ok(Self {
            handle,
            pipeline: Arc::clone(pipeline),
            state: Mutex::new(State {
                accumulator,
                lease: Some(lease),
            }),
            opened_at: Utc::now(),
        })
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn block_size(&self) -> usize {
        self.state.lock().accumulator.block_size()
    }

    /// Current explicit-block nesting depth.
    pub fn depth(&self) -> usize {
        self.state.lock().accumulator.depth()
    }

    /// Commands waiting for the current block to flush.
    pub fn pending_commands(&self) -> Vec<String> {
        self.state.lock().accumulator.pending().to_vec()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().lease.is_none()
    }

    /// Process a chunk of newline-separated commands.
    pub fn feed(&self, input: &str) -> BulkResult<()> {
        let mut state = self.state.lock();
        if state.lease.is_none() {
            return Err(BulkError::SessionNotFound(self.handle));
        }
        let mut flushed = Vec::new();
        state.accumulator.feed(input, &mut flushed);
        self.submit_all(flushed);
        Ok(())
    }

    /// Finalize the current block and release the pipeline lease. If this
    /// was the last open session, waits for queued output to drain.
    ///
    /// Returns false if the session was already closed.
    pub fn close(&self) -> bool {
        let lease = {
            let mut state = self.state.lock();
            let Some(lease) = state.lease.take() else {
                return false;
            };
            let mut flushed = Vec::new();
            state.accumulator.finalize(&mut flushed);
            self.submit_all(flushed);
            lease
        };

        lease.release();
        true
    }

    /// Hand flushed batches to the pipeline. Failures are logged and
    /// swallowed; output loss never reaches the producer.
    fn submit_all(&self, batches: Vec<Batch>) {
        for batch in batches {
            let size = batch.len();
            if let Err(e) = self.pipeline.submit(batch) {
                warn!(session = %self.handle, size, error = %e, "failed to submit batch");
            }
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("handle", &self.handle)
            .field("opened_at", &self.opened_at)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::sink::{BatchSink, MemorySink};
    use std::time::Duration;

    fn pipeline() -> (Arc<OutputPipeline>, MemorySink) {
        let console = MemorySink::new();
        let cfg = PipelineConfig {
            idle_poll: Duration::from_millis(10),
            ..PipelineConfig::default()
        };
        let p = OutputPipeline::with_sinks(
            &cfg,
            Box::new(console.clone()),
            vec![Box::new(MemorySink::new()) as Box<dyn BatchSink>],
        )
        .unwrap();
        (p, console)
    }

    #[test]
    fn feed_and_close() {
        let (p, console) = pipeline();
        let s = Session::open(SessionHandle(1), 3, &SessionConfig::default(), &p).unwrap();
        assert_eq!(p.active_sessions(), 1);

        s.feed("stat1\nstat2\nstat3\nstat4\n").unwrap();
        assert_eq!(s.pending_commands(), vec!["stat4".to_string()]);

        assert!(s.close());
        assert!(s.is_closed());
        assert_eq!(p.active_sessions(), 0);
        assert_eq!(console.lines(), vec!["bulk: stat1, stat2, stat3", "bulk: stat4"]);
    }

    #[test]
    fn close_is_idempotent_and_feed_after_close_fails() {
        let (p, _console) = pipeline();
        let s = Session::open(SessionHandle(7), 2, &SessionConfig::default(), &p).unwrap();
        assert!(s.close());
        assert!(!s.close());
        assert!(matches!(
            s.feed("x\n"),
            Err(BulkError::SessionNotFound(h)) if h == SessionHandle(7)
        ));
    }

    #[test]
    fn zero_block_size_does_not_acquire() {
        let (p, _console) = pipeline();
        let result = Session::open(SessionHandle(1), 0, &SessionConfig::default(), &p);
        assert!(matches!(result, Err(BulkError::InvalidBlockSize(0))));
        assert_eq!(p.active_sessions(), 0);
    }

    #[test]
    fn submit_failure_is_swallowed() {
        let (p, console) = pipeline();
        let s = Session::open(SessionHandle(1), 1, &SessionConfig::default(), &p).unwrap();
        p.shutdown();
        s.feed("a\nb\n").unwrap();
        assert!(s.pending_commands().is_empty());
        assert!(console.is_empty());
        assert!(s.close());
    }

    #[test]
    fn handle_display() {
        assert_eq!(SessionHandle::from_raw(42).to_string(), "session-42");
        assert_eq!(SessionHandle::from_raw(42).as_u64(), 42);
    }
}
