//! Error taxonomy shared by every layer of the engine.

use std::io;
use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Error taxonomy of the storage engine.
///
/// Every variant except [`StoreError::Corruption`] is recoverable at the
/// transaction boundary: the caller aborts the failing transaction and
/// shared state stays consistent.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The referenced transaction id is not currently active.
    #[error("no such transaction: {0}")]
    NoSuchTransaction(u64),
    /// A write-write conflict was detected; abort and retry the transaction.
    #[error("serialization conflict: {0}")]
    Serialization(&'static str),
    /// The visible version of the entity is a tombstone.
    #[error("record deleted: {0}")]
    RecordDeleted(&'static str),
    /// An entity-level lock could not be acquired within the bounded wait.
    #[error("lock timeout: {0}")]
    LockTimeout(&'static str),
    /// I/O failure during snapshot write or import.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// On-disk or in-memory state failed an integrity check.
    #[error("corruption detected: {0}")]
    Corruption(String),
    /// Caller passed an argument the operation cannot accept.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl StoreError {
    /// Whether aborting and retrying the whole transaction may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Serialization(_) | StoreError::LockTimeout(_)
        )
    }
}
