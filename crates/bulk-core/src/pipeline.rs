//! Shared output pipeline: two queues and a small pool of writer threads.
//!
//! Every submitted batch goes onto both the console queue and the file
//! queue. One console worker drains the former; `file_workers` threads drain
//! the latter. A file worker with nothing to do helps with a console backlog
//! larger than `help_threshold`; console pops and writes happen under the
//! console sink lock, so console output stays in submission order whichever
//! thread does the writing.
//!
//! Sessions hold a [`SessionLease`] while open. Releasing the last lease
//! waits (bounded by `drain_timeout`) until everything queued so far has
//! been written. [`OutputPipeline::shutdown`] stops the workers after a final
//! drain of both queues.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::batch::Batch;
use crate::config::PipelineConfig;
use crate::error::{BulkError, BulkResult};
use crate::queue::ConcurrentQueue;
use crate::sink::{BatchSink, ConsoleSink, FileSink};

/// Counters describing what the pipeline has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub submitted: u64,
    pub console_written: u64,
    pub file_written: u64,
    pub write_failures: u64,
    /// Console batches written by a file worker.
    pub helped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    console_written: AtomicU64,
    file_written: AtomicU64,
    write_failures: AtomicU64,
    helped: AtomicU64,
}

#[derive(Debug, Default)]
struct Tracker {
    active_sessions: usize,
    /// Queued or in-flight writes, one per sink per batch.
    pending: usize,
    /// Last sequence number handed out by `submit`.
    last_seq: u64,
}

struct Shared {
    to_console: ConcurrentQueue<Arc<Batch>>,
    to_file: ConcurrentQueue<Arc<Batch>>,
    console: Mutex<Box<dyn BatchSink>>,
    running: AtomicBool,
    tracker: Mutex<Tracker>,
    idle: Condvar,
    idle_poll: Duration,
    help_threshold: usize,
    counters: Counters,
}

/// The process's output pipeline. Construct once, share via `Arc`.
pub struct OutputPipeline {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    drain_timeout: Duration,
}

impl OutputPipeline {
    /// Start a pipeline writing to stdout and to per-batch files in
    /// `config.log_dir`.
    pub fn start(config: &PipelineConfig) -> BulkResult<Arc<Self>> {
        let file_sinks = (1..=config.effective_file_workers())
            .map(|id| Box::new(FileSink::new(&config.log_dir, id)) as Box<dyn BatchSink>)
            .collect();
        Self::with_sinks(config, Box::new(ConsoleSink::stdout()), file_sinks)
    }

    /// Start a pipeline with explicit sinks: one console sink and one sink
    /// per file worker. `config.file_workers` is ignored in favour of
    /// `file_sinks.len()`.
    pub fn with_sinks(
        config: &PipelineConfig,
        console: Box<dyn BatchSink>,
        file_sinks: Vec<Box<dyn BatchSink>>,
    ) -> BulkResult<Arc<Self>> {
        if file_sinks.is_empty() {
            return Err(BulkError::Config("at least one file sink is required".into()));
        }

        let shared = Arc::new(Shared {
            to_console: ConcurrentQueue::new(),
            to_file: ConcurrentQueue::new(),
            console: Mutex::new(console),
            running: AtomicBool::new(true),
            tracker: Mutex::new(Tracker::default()),
            idle: Condvar::new(),
            idle_poll: config.idle_poll,
            help_threshold: config.help_threshold,
            counters: Counters::default(),
        });
        let pipeline = Arc::new(Self {
            shared,
            workers: Mutex::new(Vec::new()),
            drain_timeout: config.drain_timeout,
        });

        let file_workers = file_sinks.len();
        if let Err(e) = pipeline.spawn_workers(file_sinks) {
            error!(error = %e, "failed to spawn output workers");
            pipeline.shutdown();
            return Err(e);
        }

        info!(
            file_workers,
            log_dir = %config.log_dir.display(),
            "output pipeline started"
        );
        Ok(pipeline)
    }

    fn spawn_workers(&self, file_sinks: Vec<Box<dyn BatchSink>>) -> BulkResult<()> {
        let mut workers = self.workers.lock();

        let shared = Arc::clone(&self.shared);
        workers.push(
            thread::Builder::new()
                .name("bulk-console".into())
                .spawn(move || shared.run_console_worker())?,
        );

        for (index, sink) in file_sinks.into_iter().enumerate() {
            let id = index + 1;
            let shared = Arc::clone(&self.shared);
            workers.push(
                thread::Builder::new()
                    .name(format!("bulk-file-{id}"))
                    .spawn(move || shared.run_file_worker(id, sink))?,
            );
        }
        Ok(())
    }

    /// Queue a batch for both sinks and return its sequence number.
    /// Never blocks on I/O.
    ///
    /// Sequence numbers follow queue order, so file sinks can name their
    /// output in submission order even with several file workers.
    pub fn submit(&self, mut batch: Batch) -> BulkResult<u64> {
        let mut tracker = self.shared.tracker.lock();
        if !self.shared.is_running() {
            return Err(BulkError::PipelineClosed);
        }
        tracker.last_seq += 1;
        tracker.pending += 2;
        batch.seq = tracker.last_seq;
        let seq = batch.seq;
        let batch = Arc::new(batch);
        self.shared.to_console.push(Arc::clone(&batch));
        self.shared.to_file.push(batch);
        drop(tracker);

        self.shared.counters.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(seq)
    }

    /// Register an open session.
    pub fn acquire(self: &Arc<Self>) -> BulkResult<SessionLease> {
        let mut tracker = self.shared.tracker.lock();
        if !self.shared.is_running() {
            return Err(BulkError::PipelineClosed);
        }
        tracker.active_sessions += 1;
        debug!(active = tracker.active_sessions, "session lease acquired");
        Ok(SessionLease {
            pipeline: Arc::clone(self),
            released: false,
        })
    }

    /// Block until no session is open and nothing is pending, or until
    /// `timeout` elapses. Returns whether that state was reached.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let mut tracker = self.shared.tracker.lock();
        self.shared.idle.wait_while_for(
            &mut tracker,
            |t| t.active_sessions > 0 || t.pending > 0,
            timeout,
        );
        tracker.active_sessions == 0 && tracker.pending == 0
    }

    /// Stop all workers after they drain their queues one last time.
    /// Idempotent; returns whether nothing was left pending.
    pub fn shutdown(&self) -> bool {
        let handles = std::mem::take(&mut *self.workers.lock());
        {
            let _tracker = self.shared.tracker.lock();
            self.shared.running.store(false, Ordering::Release);
        }
        self.shared.to_console.close();
        self.shared.to_file.close();

        if handles.is_empty() {
            return self.pending() == 0;
        }
        for handle in handles {
            if handle.join().is_err() {
                error!("output worker panicked");
            }
        }

        let stats = self.stats();
        let pending = self.pending();
        info!(
            submitted = stats.submitted,
            console_written = stats.console_written,
            file_written = stats.file_written,
            write_failures = stats.write_failures,
            pending,
            "output pipeline stopped"
        );
        pending == 0
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    pub fn active_sessions(&self) -> usize {
        self.shared.tracker.lock().active_sessions
    }

    /// Writes not yet completed (two per submitted batch).
    pub fn pending(&self) -> usize {
        self.shared.tracker.lock().pending
    }

    pub fn console_backlog(&self) -> usize {
        self.shared.to_console.len()
    }

    pub fn file_backlog(&self) -> usize {
        self.shared.to_file.len()
    }

    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    pub fn stats(&self) -> PipelineStats {
        let c = &self.shared.counters;
        PipelineStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            console_written: c.console_written.load(Ordering::Relaxed),
            file_written: c.file_written.load(Ordering::Relaxed),
            write_failures: c.write_failures.load(Ordering::Relaxed),
            helped: c.helped.load(Ordering::Relaxed),
        }
    }
}

impl Drop for OutputPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Shared {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn run_console_worker(&self) {
        debug!("console worker started");
        while self.is_running() {
            if self.to_console.wait_ready(self.idle_poll) {
                self.write_console_front();
            }
        }
        while self.write_console_front() {}
        debug!("console worker stopped");
    }

    fn run_file_worker(&self, id: usize, mut sink: Box<dyn BatchSink>) {
        debug!(worker = id, "file worker started");
        while self.is_running() {
            if let Some(batch) = self.to_file.try_pop() {
                self.write_file(id, sink.as_mut(), &batch);
                continue;
            }
            if self.to_console.len() > self.help_threshold && self.write_console_front() {
                self.counters.helped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            if let Some(batch) = self.to_file.wait_pop_timeout(self.idle_poll) {
                self.write_file(id, sink.as_mut(), &batch);
            }
        }
        while let Some(batch) = self.to_file.try_pop() {
            self.write_file(id, sink.as_mut(), &batch);
        }
        debug!(worker = id, "file worker stopped");
    }

    /// Pop the oldest console batch and write it, holding the sink lock
    /// across both. Returns false if the queue was empty.
    fn write_console_front(&self) -> bool {
        let mut sink = self.console.lock();
        let Some(batch) = self.to_console.try_pop() else {
            return false;
        };
        match sink.write_batch(&batch) {
            Ok(()) => {
                self.counters.console_written.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.counters.write_failures.fetch_add(1, Ordering::Relaxed);
                error!(error = %e, "console write failed");
            }
        }
        drop(sink);
        self.complete_one();
        true
    }

    fn write_file(&self, id: usize, sink: &mut dyn BatchSink, batch: &Batch) {
        match sink.write_batch(batch) {
            Ok(()) => {
                self.counters.file_written.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.counters.write_failures.fetch_add(1, Ordering::Relaxed);
                error!(worker = id, error = %e, "file write failed");
            }
        }
        self.complete_one();
    }

    fn complete_one(&self) {
        let mut tracker = self.tracker.lock();
        tracker.pending = tracker.pending.saturating_sub(1);
        if tracker.pending == 0 {
            self.idle.notify_all();
        }
    }
}

/// Marks one open session. Release it explicitly with
/// [`release`](Self::release); dropping it has the same effect.
pub struct SessionLease {
    pipeline: Arc<OutputPipeline>,
    released: bool,
}

impl SessionLease {
    pub fn pipeline(&self) -> &Arc<OutputPipeline> {
        &self.pipeline
    }

    /// Unregister the session. If it was the last one, wait (bounded by the
    /// pipeline's drain timeout) for all queued batches to be written.
    /// Returns false if that wait timed out.
    pub fn release(mut self) -> bool {
        self.release_inner()
    }

    fn release_inner(&mut self) -> bool {
        if self.released {
            return true;
        }
        self.released = true;

        let shared = &self.pipeline.shared;
        let last = {
            let mut tracker = shared.tracker.lock();
            tracker.active_sessions = tracker.active_sessions.saturating_sub(1);
            if tracker.active_sessions == 0 {
                shared.idle.notify_all();
            }
            tracker.active_sessions == 0
        };
        if !last {
            return true;
        }

        let drained = self.pipeline.wait_idle(self.pipeline.drain_timeout);
        if !drained {
            warn!(
                pending = self.pipeline.pending(),
                timeout_ms = self.pipeline.drain_timeout.as_millis() as u64,
                "timed out waiting for output to drain"
            );
        }
        drained
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use chrono::Utc;
    use std::io;

    fn config() -> PipelineConfig {
        PipelineConfig {
            idle_poll: Duration::from_millis(10),
            drain_timeout: Duration::from_secs(5),
            ..PipelineConfig::default()
        }
    }

    fn batch(cmds: &[&str]) -> Batch {
        Batch::new(cmds.iter().map(|s| s.to_string()).collect(), Utc::now())
    }

    fn memory_pipeline(
        cfg: &PipelineConfig,
        file_workers: usize,
    ) -> (Arc<OutputPipeline>, MemorySink, MemorySink) {
        let console = MemorySink::new();
        let files = MemorySink::new();
        let file_sinks = (0..file_workers)
            .map(|_| Box::new(files.clone()) as Box<dyn BatchSink>)
            .collect();
        let pipeline =
            OutputPipeline::with_sinks(cfg, Box::new(console.clone()), file_sinks).unwrap();
        (pipeline, console, files)
    }

    /// Fails the first `failures` writes, then succeeds into `inner`.
    struct FlakySink {
        failures: usize,
        inner: MemorySink,
    }

    impl BatchSink for FlakySink {
        fn write_batch(&mut self, batch: &Batch) -> io::Result<()> {
            if self.failures > 0 {
                self.failures -= 1;
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            self.inner.write_batch(batch)
        }
    }

    struct SlowSink {
        delay: Duration,
        inner: MemorySink,
    }

    impl BatchSink for SlowSink {
        fn write_batch(&mut self, batch: &Batch) -> io::Result<()> {
            thread::sleep(self.delay);
            self.inner.write_batch(batch)
        }
    }

    fn file_pipeline(
        cfg: &PipelineConfig,
        dir: &std::path::Path,
        file_workers: usize,
    ) -> (Arc<OutputPipeline>, MemorySink) {
        let console = MemorySink::new();
        let file_sinks = (1..=file_workers)
            .map(|id| Box::new(FileSink::new(dir, id)) as Box<dyn BatchSink>)
            .collect();
        let pipeline =
            OutputPipeline::with_sinks(cfg, Box::new(console.clone()), file_sinks).unwrap();
        (pipeline, console)
    }

    #[test]
    fn batches_reach_both_sinks() {
        let tmp = tempfile::tempdir().unwrap();
        let (pipeline, console) = file_pipeline(&config(), tmp.path(), 2);
        let lease = pipeline.acquire().unwrap();

        assert_eq!(pipeline.submit(batch(&["a", "b"])).unwrap(), 1);
        assert_eq!(pipeline.submit(batch(&["c"])).unwrap(), 2);
        assert_eq!(pipeline.submit(batch(&["d", "e", "f"])).unwrap(), 3);

        assert!(lease.release());
        assert_eq!(pipeline.pending(), 0);
        let expected = vec!["bulk: a, b", "bulk: c", "bulk: d, e, f"];
        assert_eq!(console.lines(), expected);
        assert_eq!(FileSink::read_log(tmp.path()).unwrap(), expected);

        let stats = pipeline.stats();
        assert_eq!(stats.submitted, 3);
        assert_eq!(stats.console_written, 3);
        assert_eq!(stats.file_written, 3);
        assert_eq!(stats.write_failures, 0);
        assert!(pipeline.shutdown());
    }

    #[test]
    fn file_log_keeps_submission_order_with_two_workers() {
        let tmp = tempfile::tempdir().unwrap();
        let (pipeline, _console) = file_pipeline(&config(), tmp.path(), 2);
        let lease = pipeline.acquire().unwrap();

        // All within the same second, most within the same microsecond.
        let created_at = Utc::now();
        for i in 0..30 {
            pipeline
                .submit(Batch::new(vec![format!("c{i:02}")], created_at))
                .unwrap();
        }
        assert!(lease.release());

        let expected: Vec<String> = (0..30).map(|i| format!("bulk: c{i:02}")).collect();
        assert_eq!(FileSink::read_log(tmp.path()).unwrap(), expected);
    }

    #[test]
    fn failed_write_does_not_stop_worker() {
        let console = MemorySink::new();
        let files = MemorySink::new();
        let flaky = FlakySink {
            failures: 1,
            inner: files.clone(),
        };
        let pipeline = OutputPipeline::with_sinks(
            &config(),
            Box::new(console.clone()),
            vec![Box::new(flaky)],
        )
        .unwrap();

        let lease = pipeline.acquire().unwrap();
        pipeline.submit(batch(&["lost"])).unwrap();
        pipeline.submit(batch(&["kept"])).unwrap();
        assert!(lease.release());

        assert_eq!(console.lines(), vec!["bulk: lost", "bulk: kept"]);
        assert_eq!(files.lines(), vec!["bulk: kept"]);
        assert_eq!(pipeline.stats().write_failures, 1);
        assert_eq!(pipeline.pending(), 0);
    }

    #[test]
    fn only_last_release_waits() {
        let (pipeline, _console, _files) = memory_pipeline(&config(), 1);
        let first = pipeline.acquire().unwrap();
        let second = pipeline.acquire().unwrap();
        assert_eq!(pipeline.active_sessions(), 2);

        assert!(first.release());
        assert_eq!(pipeline.active_sessions(), 1);
        drop(second);
        assert_eq!(pipeline.active_sessions(), 0);
    }

    #[test]
    fn drain_wait_is_bounded() {
        let cfg = PipelineConfig {
            drain_timeout: Duration::from_millis(50),
            ..config()
        };
        let console = MemorySink::new();
        let slow = SlowSink {
            delay: Duration::from_millis(100),
            inner: MemorySink::new(),
        };
        let pipeline =
            OutputPipeline::with_sinks(&cfg, Box::new(console.clone()), vec![Box::new(slow)])
                .unwrap();

        let lease = pipeline.acquire().unwrap();
        for i in 0..3 {
            pipeline.submit(batch(&[format!("c{i}").as_str()])).unwrap();
        }
        assert!(!lease.release());

        // Shutdown still drains what was queued.
        assert!(pipeline.shutdown());
        assert_eq!(pipeline.pending(), 0);
        assert_eq!(pipeline.stats().file_written, 3);
    }

    #[test]
    fn shutdown_is_idempotent_and_rejects_new_work() {
        let (pipeline, console, _files) = memory_pipeline(&config(), 2);
        pipeline.submit(batch(&["x"])).unwrap();

        assert!(pipeline.shutdown());
        assert!(pipeline.shutdown());
        assert!(!pipeline.is_running());
        assert_eq!(console.lines(), vec!["bulk: x"]);

        assert!(matches!(
            pipeline.submit(batch(&["y"])),
            Err(BulkError::PipelineClosed)
        ));
        assert!(matches!(pipeline.acquire(), Err(BulkError::PipelineClosed)));
    }

    #[test]
    fn console_order_kept_with_helping_file_worker() {
        let cfg = PipelineConfig {
            help_threshold: 1,
            ..config()
        };
        let console = MemorySink::new();
        let slow_console = SlowSink {
            delay: Duration::from_millis(10),
            inner: console.clone(),
        };
        let files = MemorySink::new();
        let pipeline = OutputPipeline::with_sinks(
            &cfg,
            Box::new(slow_console),
            vec![Box::new(files.clone()), Box::new(files.clone())],
        )
        .unwrap();

        let lease = pipeline.acquire().unwrap();
        let expected: Vec<String> = (0..50).map(|i| format!("bulk: c{i}")).collect();
        for i in 0..50 {
            pipeline.submit(batch(&[format!("c{i}").as_str()])).unwrap();
        }
        assert!(lease.release());

        assert_eq!(console.lines(), expected);
        assert_eq!(files.len(), 50);
        let stats = pipeline.stats();
        assert_eq!(stats.console_written, 50);
        assert!(stats.helped > 0, "file workers never helped: {stats:?}");
    }

    #[test]
    fn requires_a_file_sink() {
        let result = OutputPipeline::with_sinks(&config(), Box::new(MemorySink::new()), Vec::new());
        assert!(matches!(result, Err(BulkError::Config(_))));
    }

    #[test]
    fn start_writes_files_into_log_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = PipelineConfig {
            log_dir: tmp.path().join("LOG"),
            ..config()
        };
        let pipeline = OutputPipeline::start(&cfg).unwrap();
        let lease = pipeline.acquire().unwrap();
        pipeline.submit(batch(&["one", "two"])).unwrap();
        assert!(lease.release());
        pipeline.shutdown();

        let files: Vec<_> = std::fs::read_dir(tmp.path().join("LOG"))
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(files.len(), 1);
        assert_eq!(
            std::fs::read_to_string(&files[0]).unwrap(),
            "bulk: one, two\n"
        );
    }
}
