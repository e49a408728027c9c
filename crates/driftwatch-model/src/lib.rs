//! driftwatch-model: normalized change documents and drift reports
//!
//! ## Layer 0 - Model
//!
//! Provider-independent types shared by the history store and the detection
//! engine:
//!
//! - `ChangeDocument` / `ResourceChange`: one planning pass, unique by address
//! - `DriftReport` / `ResourceVerdict`: the classifier's output for one run
//! - `TargetKey`: the (cloud, environment) pair runs are keyed by
//! - canonical JSON digests used for change fingerprints and document hashes

pub mod change;
pub mod digest;
mod error;
pub mod report;
pub mod target;

pub use change::{Action, AttributeDiff, ChangeDocument, ResourceChange};
pub use digest::{canonical_json, compute_digest, digest_of, sha256_hex};
pub use error::{ModelError, Result};
pub use report::{DriftReport, ResourceVerdict, RunId, Severity, VerdictCounts, VerdictStatus};
pub use target::{Cloud, Environment, TargetKey};
