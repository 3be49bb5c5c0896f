//! Output sinks for flushed batches.
//!
//! A sink writes one formatted line per batch. The pipeline gives each
//! worker its own sink, so implementations need `Send` but not `Sync`.

use parking_lot::Mutex;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::batch::{format_batch, Batch};

/// Destination for formatted batches.
pub trait BatchSink: Send {
    fn write_batch(&mut self, batch: &Batch) -> io::Result<()>;
}

/// Writes `bulk: ...` lines to any writer (stdout by default).
pub struct ConsoleSink<W: Write + Send> {
    out: W,
}

impl ConsoleSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self { out: io::stdout() }
    }
}

impl<W: Write + Send> ConsoleSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> BatchSink for ConsoleSink<W> {
    fn write_batch(&mut self, batch: &Batch) -> io::Result<()> {
        writeln!(self.out, "{}", format_batch(batch))?;
        self.out.flush()
    }
}

/// Writes every batch into a fresh file under `dir`.
///
/// File names are `bulk{micros}_{seq}_w{worker}_{random}.log` with the
/// timestamp and sequence number zero-padded, so sorting names by byte
/// order gives submission order within a session. The worker id and random
/// suffix keep two workers from ever appending to the same file.
pub struct FileSink {
    dir: PathBuf,
    worker: usize,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>, worker: usize) -> Self {
        Self {
            dir: dir.into(),
            worker,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Fresh path for `batch`.
    pub fn path_for(&self, batch: &Batch) -> PathBuf {
        self.dir.join(format!(
            "bulk{:016}_{:010}_w{}_{}.log",
            batch.created_at.timestamp_micros(),
            batch.seq,
            self.worker,
            random_suffix()
        ))
    }

    /// Every line logged under `dir`, reading files in name order.
    pub fn read_log(dir: &Path) -> io::Result<Vec<String>> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let is_log = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("bulk") && n.ends_with(".log"));
            if is_log {
                paths.push(path);
            }
        }
        paths.sort();

        let mut lines = Vec::new();
        for path in paths {
            lines.extend(fs::read_to_string(&path)?.lines().map(str::to_string));
        }
        Ok(lines)
    }
}

impl BatchSink for FileSink {
    fn write_batch(&mut self, batch: &Batch) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(batch);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "{}", format_batch(batch))?;
        file.flush()?;
        debug!(path = %path.display(), worker = self.worker, "batch written");
        Ok(())
    }
}

/// Collects formatted lines in memory. Clones share the same buffer, so
/// several workers can write into one `MemorySink`.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything written so far, in write order.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }
}

impl BatchSink for MemorySink {
    fn write_batch(&mut self, batch: &Batch) -> io::Result<()> {
        self.lines.lock().push(format_batch(batch));
        Ok(())
    }
}

/// Random hex suffix for file names (4 bytes = 8 hex chars).
fn random_suffix() -> String {
    let bytes: [u8; 4] = rand::random();
    hex::encode(bytes)
}
