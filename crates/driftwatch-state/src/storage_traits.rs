//! Storage trait definitions for driftwatch
//!
//! `HistoryStore` is the append-only record of past drift reports, keyed by
//! `(cloud, environment, run_id)`. It supplies the classifier's baseline and
//! the alert policy's "previous" report.
//!
//! The trait is async and backend-agnostic. An in-memory fake is provided
//! for testing via the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use driftwatch_model::{ChangeDocument, DriftReport, RunId, TargetKey};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// A stored drift report plus the change document it was built from.
///
/// When document retention is disabled only `document_digest` is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub report: DriftReport,
    pub document: Option<ChangeDocument>,
    pub document_digest: String,
    pub stored_at: DateTime<Utc>,
}

impl HistoryEntry {
    /// Build an entry, checking that `report` and `doc` describe the same run.
    pub fn new(
        report: &DriftReport,
        doc: &ChangeDocument,
        retain_document: bool,
    ) -> StorageResult<Self> {
        if doc.target() != report.target() {
            return Err(StorageError::Mismatch(format!(
                "report is for {} but document is for {}",
                report.target(),
                doc.target()
            )));
        }
        let document_digest = doc.digest()?;
        if !report.document_digest.is_empty() && report.document_digest != document_digest {
            return Err(StorageError::Mismatch(format!(
                "report {} references document {} but {} was supplied",
                report.run_id, report.document_digest, document_digest
            )));
        }
        Ok(Self {
            report: report.clone(),
            document: retain_document.then(|| doc.clone()),
            document_digest,
            stored_at: Utc::now(),
        })
    }
}

/// Reject an append whose run id is not strictly newer than the stored latest.
pub fn ensure_newer(latest: Option<&RunId>, report: &DriftReport) -> StorageResult<()> {
    match latest {
        Some(latest) if report.run_id <= *latest => Err(StorageError::OutOfOrder {
            target: report.target().to_string(),
            run_id: report.run_id.to_string(),
            latest: latest.to_string(),
        }),
        _ => Ok(()),
    }
}

/// Append-only drift history.
///
/// Guarantees:
/// - `append` is atomic: after a failure `latest` still returns the previous report.
/// - Appends for one key are serialized; different keys never block each other.
/// - Run ids for a key are strictly increasing in append order.
/// - Entries are never mutated or deleted by the store.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Most recent report for the key, or `None` on the first run.
    async fn latest(&self, target: &TargetKey) -> StorageResult<Option<DriftReport>>;

    /// Persist a report and its source document.
    async fn append(&self, report: &DriftReport, doc: &ChangeDocument) -> StorageResult<()>;

    /// Up to `limit` reports for the key, most recent first.
    async fn history(&self, target: &TargetKey, limit: usize) -> StorageResult<Vec<DriftReport>>;

    /// Point lookup of one stored run. Returns `StorageError::NotFound` if absent.
    async fn get(&self, target: &TargetKey, run_id: &RunId) -> StorageResult<HistoryEntry>;
}
