//! Session lifecycle management.
//!
//! [`BulkContext`] owns the output pipeline and the table of open sessions,
//! and exposes the three boundary operations: `open`, `feed` and `close`.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{BulkConfig, SessionConfig};
use crate::error::{BulkError, BulkResult};
use crate::pipeline::OutputPipeline;
use crate::session::{Session, SessionHandle};

/// Owns the pipeline and every open session.
pub struct BulkContext {
    pipeline: Arc<OutputPipeline>,
    session_config: SessionConfig,
    sessions: Mutex<HashMap<SessionHandle, Arc<Session>>>,
    next_handle: AtomicU64,
}

impl BulkContext {
    /// Start a pipeline with console and file sinks and wrap it.
    pub fn new(config: &BulkConfig) -> BulkResult<Self> {
        let pipeline = OutputPipeline::start(&config.pipeline)?;
        Ok(Self::with_pipeline(pipeline, config.session.clone()))
    }

    /// Use an existing pipeline (e.g. one built with in-memory sinks).
    pub fn with_pipeline(pipeline: Arc<OutputPipeline>, session_config: SessionConfig) -> Self {
        Self {
            pipeline,
            session_config,
            sessions: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    pub fn pipeline(&self) -> &Arc<OutputPipeline> {
        &self.pipeline
    }

    /// Open a session that flushes every `block_size` commands.
    pub fn open(&self, block_size: usize) -> BulkResult<SessionHandle> {
        let handle = SessionHandle::from_raw(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let session = Session::open(handle, block_size, &self.session_config, &self.pipeline)
            .map_err(|e| {
                warn!(block_size, error = %e, "failed to open session");
                e
            })?;
        self.sessions.lock().insert(handle, Arc::new(session));
        info!(session = %handle, block_size, "session opened");
        Ok(handle)
    }

    /// Feed raw bytes (newline-separated commands, UTF-8, invalid sequences
    /// replaced) to a session.
    pub fn feed(&self, handle: SessionHandle, bytes: &[u8]) -> BulkResult<()> {
        if bytes.is_empty() {
            warn!(session = %handle, "ignoring empty input");
            return Err(BulkError::EmptyInput);
        }
        let session = self.session(handle).map_err(|e| {
            warn!(session = %handle, "feed for unknown session");
            e
        })?;
        session.feed(&String::from_utf8_lossy(bytes))
    }

    /// Close a session: flush or discard its last block and release it from
    /// the pipeline. Closing the last session waits for output to drain.
    ///
    /// Returns false (and does nothing) if the handle is not open.
    pub fn close(&self, handle: SessionHandle) -> bool {
        let Some(session) = self.sessions.lock().remove(&handle) else {
            debug!(session = %handle, "close for unknown session");
            return false;
        };
        let closed = session.close();
        info!(session = %handle, "session closed");
        closed
    }

    /// Open a session that is closed when the returned guard drops.
    pub fn scoped(&self, block_size: usize) -> BulkResult<ScopedSession<'_>> {
        let handle = self.open(block_size)?;
        Ok(ScopedSession { ctx: self, handle })
    }

    pub fn session(&self, handle: SessionHandle) -> BulkResult<Arc<Session>> {
        self.sessions
            .lock()
            .get(&handle)
            .cloned()
            .ok_or(BulkError::SessionNotFound(handle))
    }

    /// Open handles, oldest first.
    pub fn handles(&self) -> Vec<SessionHandle> {
        let mut handles: Vec<_> = self.sessions.lock().keys().copied().collect();
        handles.sort_unstable();
        handles
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Close every open session, then stop the pipeline. Idempotent.
    /// Returns whether all output was written.
    pub fn shutdown(&self) -> bool {
        let mut remaining: Vec<_> = self.sessions.lock().drain().collect();
        remaining.sort_unstable_by_key(|(handle, _)| *handle);
        if !remaining.is_empty() {
            info!(count = remaining.len(), "closing remaining sessions");
        }
        for (_, session) in remaining {
            session.close();
        }
        self.pipeline.shutdown()
    }
}

impl Drop for BulkContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A session closed automatically on drop, on every exit path.
pub struct ScopedSession<'a> {
    ctx: &'a BulkContext,
    handle: SessionHandle,
}

impl ScopedSession<'_> {
    pub fn handle(&self) -> SessionHandle {
        self.handle
    }

    pub fn feed(&self, bytes: &[u8]) -> BulkResult<()> {
        self.ctx.feed(self.handle, bytes)
    }
}

impl Drop for ScopedSession<'_> {
    fn drop(&mut self) {
        self.ctx.close(self.handle);
    }
}
