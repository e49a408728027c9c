//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryHistoryStore`, which satisfies the `HistoryStore` contract
//! without any external dependencies, and `FlakyHistoryStore`, which wraps
//! any store and injects transient failures for retry tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use driftwatch_model::{ChangeDocument, DriftReport, RunId, TargetKey};

use crate::error::StorageError;
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryHistoryStore
// ---------------------------------------------------------------------------

/// In-memory history backed by a `HashMap<TargetKey, Vec<HistoryEntry>>`.
#[derive(Debug)]
pub struct MemoryHistoryStore {
    entries: Mutex<HashMap<TargetKey, Vec<HistoryEntry>>>,
    retain_documents: bool,
}

impl Default for MemoryHistoryStore {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            retain_documents: true,
        }
    }
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep only document digests, not the documents themselves.
    pub fn without_documents() -> Self {
        Self {
            retain_documents: false,
            ..Self::default()
        }
    }

    /// Total entries across all keys.
    pub fn len(&self) -> usize {
        self.lock()
            .map(|entries| entries.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, HashMap<TargetKey, Vec<HistoryEntry>>>> {
        self.entries
            .lock()
            .map_err(|_| StorageError::Backend("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn latest(&self, target: &TargetKey) -> StorageResult<Option<DriftReport>> {
        let entries = self.lock()?;
        Ok(entries
            .get(target)
            .and_then(|runs| runs.last())
            .map(|e| e.report.clone()))
    }

    async fn append(&self, report: &DriftReport, doc: &ChangeDocument) -> StorageResult<()> {
        let entry = HistoryEntry::new(report, doc, self.retain_documents)?;
        let mut entries = self.lock()?;
        let runs = entries.entry(report.target()).or_default();
        ensure_newer(runs.last().map(|e| &e.report.run_id), report)?;
        runs.push(entry);
        Ok(())
    }

    async fn history(&self, target: &TargetKey, limit: usize) -> StorageResult<Vec<DriftReport>> {
        let entries = self.lock()?;
        Ok(entries
            .get(target)
            .map(|runs| {
                runs.iter()
                    .rev()
                    .take(limit)
                    .map(|e| e.report.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get(&self, target: &TargetKey, run_id: &RunId) -> StorageResult<HistoryEntry> {
        let entries = self.lock()?;
        entries
            .get(target)
            .and_then(|runs| runs.iter().find(|e| &e.report.run_id == run_id))
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                target: target.to_string(),
                run_id: run_id.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// FlakyHistoryStore
// ---------------------------------------------------------------------------

/// Wraps a store and fails a configured number of calls with a transient
/// `Backend` error before delegating.
pub struct FlakyHistoryStore<S> {
    inner: Arc<S>,
    failing_appends: AtomicU32,
    failing_reads: AtomicU32,
    append_calls: AtomicU32,
}

impl<S: HistoryStore> FlakyHistoryStore<S> {
    pub fn new(inner: Arc<S>) -> Self {
        Self {
            inner,
            failing_appends: AtomicU32::new(0),
            failing_reads: AtomicU32::new(0),
            append_calls: AtomicU32::new(0),
        }
    }

    /// Fail the next `n` appends.
    pub fn fail_appends(self, n: u32) -> Self {
        self.failing_appends.store(n, Ordering::SeqCst);
        self
    }

    /// Fail the next `n` `latest`/`get` reads.
    pub fn fail_reads(self, n: u32) -> Self {
        self.failing_reads.store(n, Ordering::SeqCst);
        self
    }

    /// Number of `append` calls seen, including failed ones.
    pub fn append_calls(&self) -> u32 {
        self.append_calls.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &Arc<S> {
        &self.inner
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl<S: HistoryStore> HistoryStore for FlakyHistoryStore<S> {
    async fn latest(&self, target: &TargetKey) -> StorageResult<Option<DriftReport>> {
        if Self::take_failure(&self.failing_reads) {
            return Err(StorageError::Backend("injected read failure".to_string()));
        }
        self.inner.latest(target).await
    }

    async fn append(&self, report: &DriftReport, doc: &ChangeDocument) -> StorageResult<()> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.failing_appends) {
            return Err(StorageError::Backend("injected append failure".to_string()));
        }
        self.inner.append(report, doc).await
    }

    async fn history(&self, target: &TargetKey, limit: usize) -> StorageResult<Vec<DriftReport>> {
        self.inner.history(target, limit).await
    }

    async fn get(&self, target: &TargetKey, run_id: &RunId) -> StorageResult<HistoryEntry> {
        if Self::take_failure(&self.failing_reads) {
            return Err(StorageError::Backend("injected read failure".to_string()));
        }
        self.inner.get(target, run_id).await
    }
}
