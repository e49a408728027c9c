use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use driftwatch_model::{ChangeDocument, DriftReport, RunId, TargetKey};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StorageError;
use crate::storage_traits::{ensure_newer, HistoryEntry, HistoryStore, StorageResult};

/// Filesystem-backed history store, one JSON file per run.
///
/// Layout: `<root>/<cloud>/<environment>/<run_id>.json`
///
/// Each entry is written to a temp file in the key directory and renamed into
/// place, so a crash mid-append leaves at most an ignored temp file behind.
pub struct FsHistoryStore {
    root: PathBuf,
    retain_documents: bool,
    key_locks: Mutex<HashMap<TargetKey, Arc<Mutex<()>>>>,
}

impl FsHistoryStore {
    /// Create a store rooted at `root`. Creates the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            retain_documents: true,
            key_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Keep only document digests instead of full documents.
    pub fn with_retain_documents(mut self, retain: bool) -> Self {
        self.retain_documents = retain;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_dir(&self, target: &TargetKey) -> PathBuf {
        self.root
            .join(target.cloud.as_str())
            .join(target.environment.as_str())
    }

    async fn key_lock(&self, target: &TargetKey) -> Arc<Mutex<()>> {
        let mut locks = self.key_locks.lock().await;
        Arc::clone(locks.entry(target.clone()).or_default())
    }

    async fn blocking<T, F>(f: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> StorageResult<T> + Send + 'static,
    {
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| StorageError::Backend(format!("blocking task failed: {e}")))?
    }
}

/// Run files in a key directory, oldest first. Temp files and foreign files are skipped.
fn list_runs(dir: &Path) -> StorageResult<Vec<(String, PathBuf)>> {
    let read_dir = match fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut runs = Vec::new();
    for entry in read_dir {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        if let Some(run_id) = name.strip_suffix(".json") {
            runs.push((run_id.to_string(), path.clone()));
        }
    }
    runs.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(runs)
}

fn read_entry(path: &Path) -> StorageResult<HistoryEntry> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|e| StorageError::Corrupt {
        location: path.display().to_string(),
        reason: e.to_string(),
    })
}

fn write_atomic(dir: &Path, path: &Path, data: &[u8]) -> StorageResult<()> {
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StorageError::Io(e.error.to_string()))?;
    Ok(())
}

#[async_trait]
impl HistoryStore for FsHistoryStore {
    async fn latest(&self, target: &TargetKey) -> StorageResult<Option<DriftReport>> {
        let dir = self.key_dir(target);
        Self::blocking(move || {
            let runs = list_runs(&dir)?;
            match runs.last() {
                Some((_, path)) => Ok(Some(read_entry(path)?.report)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn append(&self, report: &DriftReport, doc: &ChangeDocument) -> StorageResult<()> {
        let entry = HistoryEntry::new(report, doc, self.retain_documents)?;
        let data = serde_json::to_vec_pretty(&entry)?;
        let target = report.target();
        let dir = self.key_dir(&target);
        let path = dir.join(format!("{}.json", report.run_id));

        let lock = self.key_lock(&target).await;
        let _guard = lock.lock().await;

        let newest = report.clone();
        // The blocking task runs to completion even if this future is dropped,
        // so a started append is never torn by cancellation.
        Self::blocking(move || {
            let latest = list_runs(&dir)?
                .pop()
                .map(|(id, _)| id.parse::<RunId>())
                .transpose()?;
            ensure_newer(latest.as_ref(), &newest)?;
            write_atomic(&dir, &path, &data)
        })
        .await?;

        debug!(target = %target, run_id = %report.run_id, "history entry persisted");
        Ok(())
    }

    async fn history(&self, target: &TargetKey, limit: usize) -> StorageResult<Vec<DriftReport>> {
        let dir = self.key_dir(target);
        Self::blocking(move || {
            list_runs(&dir)?
                .iter()
                .rev()
                .take(limit)
                .map(|(_, path)| read_entry(path).map(|e| e.report))
                .collect()
        })
        .await
    }

    async fn get(&self, target: &TargetKey, run_id: &RunId) -> StorageResult<HistoryEntry> {
        let path = self.key_dir(target).join(format!("{run_id}.json"));
        let target_label = target.to_string();
        let run_label = run_id.to_string();
        Self::blocking(move || {
            if !path.exists() {
                return Err(StorageError::NotFound {
                    target: target_label,
                    run_id: run_label,
                });
            }
            read_entry(&path)
        })
        .await
    }
}
