//! Error types for driftwatch-state

use thiserror::Error;

/// Errors returned by history store implementations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// No stored run matches the requested key and run id
    #[error("run {run_id} not found for {target}")]
    NotFound { target: String, run_id: String },

    /// Appending would break the strictly-increasing run id order of a key
    #[error("out-of-order append for {target}: run {run_id} is not newer than {latest}")]
    OutOfOrder {
        target: String,
        run_id: String,
        latest: String,
    },

    /// Report and change document do not describe the same run
    #[error("report/document mismatch: {0}")]
    Mismatch(String),

    /// A persisted entry could not be decoded
    #[error("corrupt history entry at {location}: {reason}")]
    Corrupt { location: String, reason: String },

    /// Serialization error
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Filesystem error
    #[error("io error: {0}")]
    Io(String),

    /// Backend (database/connection) error
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Whether retrying the same call may succeed.
    ///
    /// Backend and IO failures are transient; ordering, mismatch, corruption
    /// and serialization failures are deterministic.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Io(_) | StorageError::Backend(_))
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<driftwatch_model::ModelError> for StorageError {
    fn from(err: driftwatch_model::ModelError) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(StorageError::Backend("connection reset".into()).is_transient());
        assert!(StorageError::Io("disk full".into()).is_transient());
        assert!(!StorageError::Mismatch("target".into()).is_transient());
        assert!(!StorageError::OutOfOrder {
            target: "aws/prod".into(),
            run_id: "a".into(),
            latest: "b".into(),
        }
        .is_transient());
    }
}
