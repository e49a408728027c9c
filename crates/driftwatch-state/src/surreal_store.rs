//! SurrealDB-backed HistoryStore implementation
//!
//! Reports and documents are stored as JSON strings so the canonical form of
//! each entry survives the round trip through the database unchanged.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use driftwatch_model::{ChangeDocument, DriftReport, RunId, TargetKey};
use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::StorageError;
use crate::migrations;
use crate::storage_traits::{ensure_newer, HistoryEntry, HistoryStore, StorageResult};

const NAMESPACE: &str = "driftwatch";
const DATABASE: &str = "main";

/// One `drift_history` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct HistoryRow {
    /// SurrealDB record ID
    id: Option<surrealdb::sql::Thing>,
    cloud: String,
    environment: String,
    run_id: String,
    report_json: String,
    document_json: Option<String>,
    document_digest: String,
    /// RFC 3339
    stored_at: String,
}

impl HistoryRow {
    fn from_entry(entry: &HistoryEntry) -> StorageResult<Self> {
        let document_json = entry
            .document
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        Ok(Self {
            id: None,
            cloud: entry.report.cloud.to_string(),
            environment: entry.report.environment.to_string(),
            run_id: entry.report.run_id.to_string(),
            report_json: serde_json::to_string(&entry.report)?,
            document_json,
            document_digest: entry.document_digest.clone(),
            stored_at: entry.stored_at.to_rfc3339(),
        })
    }

    fn location(&self) -> String {
        format!("drift_history {}/{}/{}", self.cloud, self.environment, self.run_id)
    }

    fn corrupt(&self, reason: impl ToString) -> StorageError {
        StorageError::Corrupt {
            location: self.location(),
            reason: reason.to_string(),
        }
    }

    fn report(&self) -> StorageResult<DriftReport> {
        serde_json::from_str(&self.report_json).map_err(|e| self.corrupt(e))
    }

    fn into_entry(self) -> StorageResult<HistoryEntry> {
        let report = self.report()?;
        let document = self
            .document_json
            .as_deref()
            .map(serde_json::from_str::<ChangeDocument>)
            .transpose()
            .map_err(|e| self.corrupt(e))?;
        let stored_at = DateTime::parse_from_rfc3339(&self.stored_at)
            .map_err(|e| self.corrupt(e))?
            .with_timezone(&Utc);
        Ok(HistoryEntry {
            report,
            document,
            document_digest: self.document_digest,
            stored_at,
        })
    }
}

/// SurrealDB-backed implementation of [`HistoryStore`].
pub struct SurrealHistoryStore {
    db: Surreal<Any>,
    retain_documents: bool,
    key_locks: Mutex<HashMap<TargetKey, Arc<Mutex<()>>>>,
}

impl SurrealHistoryStore {
    /// Create an in-memory instance for testing.
    ///
    /// Connects to `mem://`, selects `driftwatch/main`, and runs `init_schema`.
    pub async fn in_memory() -> StorageResult<Self> {
        let store = Self::connect("mem://").await?;
        info!("SurrealHistoryStore connected (in-memory)");
        Ok(store)
    }

    /// Connect to any SurrealDB endpoint (`mem://`, `surrealkv://path`, `ws://host`).
    pub async fn connect(url: &str) -> StorageResult<Self> {
        let db = surrealdb::engine::any::connect(url).await?;
        db.use_ns(NAMESPACE).use_db(DATABASE).await?;
        migrations::init_schema(&db).await?;
        debug!(url, "SurrealHistoryStore connected");
        Ok(Self {
            db,
            retain_documents: true,
            key_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Keep only document digests instead of full documents.
    pub fn with_retain_documents(mut self, retain: bool) -> Self {
        self.retain_documents = retain;
        self
    }

    async fn key_lock(&self, target: &TargetKey) -> Arc<Mutex<()>> {
        let mut locks = self.key_locks.lock().await;
        Arc::clone(locks.entry(target.clone()).or_default())
    }

    // -- private helpers -----------------------------------------------------

    async fn fetch_rows(&self, target: &TargetKey, limit: usize) -> StorageResult<Vec<HistoryRow>> {
        let cloud = target.cloud.to_string();
        let env = target.environment.to_string();
        let mut res = self
            .db
            .query(
                "SELECT * FROM drift_history \
                 WHERE cloud = $cloud AND environment = $env \
                 ORDER BY run_id DESC LIMIT $limit",
            )
            .bind(("cloud", cloud))
            .bind(("env", env))
            .bind(("limit", limit as i64))
            .await?;
        let rows: Vec<HistoryRow> = res.take(0)?;
        Ok(rows)
    }
}

#[async_trait]
impl HistoryStore for SurrealHistoryStore {
    async fn latest(&self, target: &TargetKey) -> StorageResult<Option<DriftReport>> {
        self.fetch_rows(target, 1)
            .await?
            .first()
            .map(HistoryRow::report)
            .transpose()
    }

    async fn append(&self, report: &DriftReport, doc: &ChangeDocument) -> StorageResult<()> {
        let entry = HistoryEntry::new(report, doc, self.retain_documents)?;
        let row = HistoryRow::from_entry(&entry)?;
        let target = report.target();

        let lock = self.key_lock(&target).await;
        let _guard = lock.lock().await;

        let latest = self
            .fetch_rows(&target, 1)
            .await?
            .into_iter()
            .next()
            .map(|r| r.run_id.parse::<RunId>())
            .transpose()?;
        ensure_newer(latest.as_ref(), report)?;

        let _created: Option<HistoryRow> = self.db.create("drift_history").content(row).await?;

        debug!(target = %target, run_id = %report.run_id, "history row created");
        Ok(())
    }

    async fn history(&self, target: &TargetKey, limit: usize) -> StorageResult<Vec<DriftReport>> {
        self.fetch_rows(target, limit)
            .await?
            .iter()
            .map(HistoryRow::report)
            .collect()
    }

    async fn get(&self, target: &TargetKey, run_id: &RunId) -> StorageResult<HistoryEntry> {
        let cloud = target.cloud.to_string();
        let env = target.environment.to_string();
        let rid = run_id.to_string();
        let mut res = self
            .db
            .query(
                "SELECT * FROM drift_history \
                 WHERE cloud = $cloud AND environment = $env AND run_id = $rid",
            )
            .bind(("cloud", cloud))
            .bind(("env", env))
            .bind(("rid", rid))
            .await?;
        let rows: Vec<HistoryRow> = res.take(0)?;

        rows.into_iter()
            .next()
            .ok_or_else(|| StorageError::NotFound {
                target: target.to_string(),
                run_id: run_id.to_string(),
            })?
            .into_entry()
    }
}
