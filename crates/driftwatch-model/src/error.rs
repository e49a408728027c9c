//! Error types for driftwatch-model

use thiserror::Error;

/// Errors raised while constructing or hashing model values.
#[derive(Error, Debug)]
pub enum ModelError {
    /// The same resource address appeared twice in one change document
    #[error("duplicate resource address in change document: {address}")]
    DuplicateResource { address: String },

    /// A resource change broke one of its structural invariants
    #[error("invariant violation for {address}: {reason}")]
    InvariantViolation { address: String, reason: String },

    /// An identifier or enum value could not be parsed
    #[error("invalid {kind}: {value}")]
    Invalid { kind: &'static str, value: String },

    /// A value cannot be represented as canonical JSON
    #[error("non-canonical value: {0}")]
    NonCanonical(String),

    /// Serialization error
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for model operations
pub type Result<T> = std::result::Result<T, ModelError>;
