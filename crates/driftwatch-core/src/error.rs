//! Error taxonomy for the drift pipeline.

use driftwatch_model::ModelError;
use driftwatch_state::StorageError;

/// Errors produced by ingestion, classification and persistence steps.
#[derive(Debug, thiserror::Error)]
pub enum DriftError {
    /// The planner output could not be read as a structured document.
    #[error("malformed change document: {reason}")]
    MalformedDocument { reason: String },

    /// The planner reported the same address twice.
    #[error("duplicate resource address in change document: {address}")]
    DuplicateResource { address: String },

    /// A model or classifier invariant does not hold. Treated as a defect.
    #[error("invariant violation at {context}: {reason}")]
    InvariantViolation { context: String, reason: String },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl DriftError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        DriftError::MalformedDocument {
            reason: reason.into(),
        }
    }

    pub(crate) fn invariant(context: impl Into<String>, reason: impl Into<String>) -> Self {
        DriftError::InvariantViolation {
            context: context.into(),
            reason: reason.into(),
        }
    }
}

impl From<ModelError> for DriftError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::DuplicateResource { address } => DriftError::DuplicateResource { address },
            ModelError::InvariantViolation { address, reason } => {
                DriftError::InvariantViolation {
                    context: address,
                    reason,
                }
            }
            other => DriftError::MalformedDocument {
                reason: other.to_string(),
            },
        }
    }
}

/// Result type for drift pipeline operations.
pub type Result<T> = std::result::Result<T, DriftError>;
