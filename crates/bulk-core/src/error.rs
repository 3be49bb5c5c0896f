use thiserror::Error;

use crate::session::SessionHandle;

/// Errors reported by the bulk core to its callers.
///
/// Nothing that happens inside an output worker is ever turned into one of
/// these; workers log and keep going.
#[derive(Debug, Error)]
pub enum BulkError {
    #[error("invalid block size: {0} (must be at least 1)")]
    InvalidBlockSize(usize),

    #[error("session not found: {0}")]
    SessionNotFound(SessionHandle),

    #[error("empty input")]
    EmptyInput,

    #[error("output pipeline is shut down")]
    PipelineClosed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type BulkResult<T> = Result<T, BulkError>;
