//! Per-session block accumulation.
//!
//! Commands arrive as newline-separated text. Regular commands collect into
//! the current block, which is flushed when it reaches the configured size.
//! `{` opens an explicit (dynamic) block that ignores the size limit and is
//! flushed only when its outermost `}` arrives; blocks may nest. An unmatched
//! `}` is ignored. A dynamic block still open when the session ends is
//! dropped without output.
//!
//! The accumulator owns no threads and does no I/O: every operation pushes
//! the batches it flushed onto a caller-supplied `Vec`.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::batch::Batch;
use crate::error::{BulkError, BulkResult};

/// One interpreted input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `{`
    OpenBlock,
    /// `}`
    CloseBlock,
    /// Anything else.
    Regular(String),
}

impl Command {
    /// Interpret a single line (without its `\n`).
    ///
    /// Returns `None` for lines that are empty or whitespace-only. A trailing
    /// `\r` is stripped so CRLF input behaves like LF input. Only a bare `{`
    /// or `}` is a bracket; anything around it makes the line a regular
    /// command.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        match line {
            "{" => Some(Command::OpenBlock),
            "}" => Some(Command::CloseBlock),
            _ if line.trim().is_empty() => None,
            _ => Some(Command::Regular(line.to_string())),
        }
    }
}

#[derive(Debug, Default)]
struct Block {
    commands: Vec<String>,
    /// Nesting level of explicit blocks; 0 when none is open.
    depth: usize,
    /// Set by the first `{` of the block being accumulated.
    dynamic: bool,
    /// Set together with the first command; cleared on flush.
    created_at: Option<DateTime<Utc>>,
}

impl Block {
    fn reset(&mut self) {
        self.commands = Vec::new();
        self.depth = 0;
        self.dynamic = false;
        self.created_at = None;
    }
}

/// The block/flush state machine for a single session.
#[derive(Debug)]
pub struct BlockAccumulator {
    block_size: usize,
    block: Block,
    /// Carry a trailing partial line over to the next `feed` call.
    reassemble_lines: bool,
    partial: String,
}

impl BlockAccumulator {
    /// Create an accumulator that flushes implicit blocks every
    /// `block_size` commands.
    pub fn new(block_size: usize) -> BulkResult<Self> {
        if block_size == 0 {
            return Err(BulkError::InvalidBlockSize(block_size));
        }
        Ok(Self {
            block_size,
            block: Block::default(),
            reassemble_lines: false,
            partial: String::new(),
        })
    }

    /// Buffer a trailing line without `\n` until the next `feed` completes
    /// it (or until [`finalize`](Self::finalize)), instead of treating it as
    /// a command on its own.
    pub fn with_line_reassembly(mut self, enabled: bool) -> Self {
        self.reassemble_lines = enabled;
        self
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn depth(&self) -> usize {
        self.block.depth
    }

    pub fn is_dynamic(&self) -> bool {
        self.block.dynamic
    }

    /// Commands accumulated since the last flush.
    pub fn pending(&self) -> &[String] {
        &self.block.commands
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.block.created_at
    }

    /// Split `input` on `\n` and apply each non-blank line as a command.
    pub fn feed(&mut self, input: &str, out: &mut Vec<Batch>) {
        if !self.reassemble_lines {
            self.apply_lines(input, out);
            return;
        }

        let mut buffered = std::mem::take(&mut self.partial);
        buffered.push_str(input);
        match buffered.rfind('\n') {
            Some(pos) => {
                self.partial = buffered.split_off(pos + 1);
                self.apply_lines(&buffered, out);
            }
            None => self.partial = buffered,
        }
    }

    fn apply_lines(&mut self, text: &str, out: &mut Vec<Batch>) {
        for line in text.split('\n') {
            if let Some(command) = Command::parse(line) {
                self.apply(command, out);
            }
        }
    }

    pub fn apply(&mut self, command: Command, out: &mut Vec<Batch>) {
        match command {
            Command::OpenBlock => self.open_block(out),
            Command::CloseBlock => self.close_block(out),
            Command::Regular(text) => self.add_command(text, out),
        }
    }

    /// Enter an explicit block. At the outermost level, whatever implicit
    /// block is pending is flushed first.
    pub fn open_block(&mut self, out: &mut Vec<Batch>) {
        if self.block.depth == 0 {
            self.flush(out);
        }
        self.block.depth += 1;
        self.block.dynamic = true;
    }

    /// Leave an explicit block; closing the outermost one flushes it.
    /// No-op when no block is open.
    pub fn close_block(&mut self, out: &mut Vec<Batch>) {
        if self.block.depth == 0 {
            return;
        }
        self.block.depth -= 1;
        if self.block.depth == 0 {
            self.flush(out);
            // An empty `{ }` flushes nothing but must not leave the
            // size limit disabled.
            self.block.dynamic = false;
        }
    }

    pub fn add_command(&mut self, text: String, out: &mut Vec<Batch>) {
        if self.block.commands.is_empty() {
            self.block.created_at = Some(Utc::now());
        }
        self.block.commands.push(text);
        if !self.block.dynamic && self.block.commands.len() >= self.block_size {
            self.flush(out);
        }
    }

    /// End of session. Flushes the pending implicit block; an explicit block
    /// that never closed is discarded. Returns the number of discarded
    /// commands.
    pub fn finalize(&mut self, out: &mut Vec<Batch>) -> usize {
        if !self.partial.is_empty() {
            let line = std::mem::take(&mut self.partial);
            if let Some(command) = Command::parse(&line) {
                self.apply(command, out);
            }
        }

        if self.block.depth == 0 {
            self.flush(out);
            return 0;
        }

        let discarded = self.block.commands.len();
        debug!(
            depth = self.block.depth,
            discarded, "discarding unterminated block"
        );
        self.block.reset();
        discarded
    }

    fn flush(&mut self, out: &mut Vec<Batch>) {
        if self.block.commands.is_empty() {
            return;
        }
        let commands = std::mem::take(&mut self.block.commands);
        let created_at = self.block.created_at.unwrap_or_else(Utc::now);
        out.push(Batch::new(commands, created_at));
        self.block.reset();
    }
}
