//! Store-level error type.

/// Result alias for store round trips.
pub type StoreResult<T> = Result<T, StoreError>;

/// Failures reported by a store round trip.
///
/// Only [`ConnectionFault`](StoreError::ConnectionFault) means the connection
/// itself is unusable; every other variant leaves the connection healthy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("connection fault: {0}")]
    ConnectionFault(String),
    #[error("key {key} holds a value of another kind")]
    WrongType { key: String },
    #[error("command failed: {0}")]
    Command(String),
}

impl StoreError {
    /// Whether the connection that produced this error must be discarded.
    #[must_use]
    pub fn is_connection_fault(&self) -> bool {
        matches!(self, Self::ConnectionFault(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connection_faults_are_classified_as_such() {
        assert!(StoreError::ConnectionFault("reset".to_string()).is_connection_fault());
        assert!(!StoreError::WrongType { key: "k".to_string() }.is_connection_fault());
        assert!(!StoreError::Command("bad".to_string()).is_connection_fault());
    }

    #[test]
    fn display_includes_context() {
        let err = StoreError::WrongType { key: "users".to_string() };
        assert_eq!(err.to_string(), "key users holds a value of another kind");
    }
}
