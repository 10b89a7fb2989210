//! Error type surfaced by every collection operation.

use remcoll_core::{CodecError, StoreError};

/// Result alias used across the collections.
pub type Result<T, E = CollectionError> = std::result::Result<T, E>;

/// Failures of a collection operation.
///
/// Every error reaches the caller of the operation that triggered it,
/// including failures of a flush that was carrying that caller's writes.
#[derive(Debug, thiserror::Error)]
pub enum CollectionError {
    /// A key or value could not be encoded or decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// The store round trip failed. Connection faults keep their variant so
    /// callers can tell them apart from application-level failures.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A positional read on a key that holds no value.
    #[error("no value stored at key {key}")]
    AbsentValue { key: String },
    /// A positional read past the end of the stored value.
    #[error("index {index} out of range for length {len}")]
    OutOfRange { index: usize, len: usize },
}

impl CollectionError {
    /// Whether the underlying connection failed (as opposed to the command).
    #[must_use]
    pub fn is_connection_fault(&self) -> bool {
        matches!(self, Self::Store(err) if err.is_connection_fault())
    }
}
