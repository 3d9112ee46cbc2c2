use thiserror::Error;

/// Errors produced by the block manager.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum Error {
    /// Raised from [`crate::BlockManager::may_append`] when the decode path needs a new
    /// block and the pool has none free. `match_and_allocate` never raises this: it
    /// returns `false` instead so the caller can park the sequence and retry.
    #[error("out of free blocks")]
    OutOfBlocks,

    /// A defensive assertion failed. These indicate a bug in the caller or in this
    /// crate, not a recoverable runtime condition.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl Error {
    pub fn invariant(message: impl Into<String>) -> Self {
        Error::InvariantViolation(message.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
