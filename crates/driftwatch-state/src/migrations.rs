//! SurrealDB schema migrations and initialization
//!
//! Sets up the `drift_history` table with its uniqueness constraint and the
//! indexes used by the latest/history queries.

use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::storage_traits::StorageResult;

/// Initialize all driftwatch tables in SurrealDB.
///
/// Safe to call on every connection (idempotent).
pub async fn init_schema(db: &Surreal<Any>) -> StorageResult<()> {
    info!("Initializing driftwatch SurrealDB schema");
    init_history_table(db).await?;
    info!("driftwatch schema initialization complete");
    Ok(())
}

/// Initialize `drift_history` table
///
/// Schema:
/// ```text
/// TABLE drift_history {
///   cloud:            STRING (indexed)
///   environment:      STRING (indexed)
///   run_id:           STRING (UUIDv7, unique per cloud/environment)
///   report_json:      STRING
///   document_json:    STRING?
///   document_digest:  STRING
///   stored_at:        STRING (RFC 3339)
/// }
/// ```
///
/// Rows are append-only: updates and deletes are not permitted.
async fn init_history_table(db: &Surreal<Any>) -> StorageResult<()> {
    debug!("Initializing drift_history table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS drift_history AS
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update NONE
                FOR delete NONE;

        -- One row per (cloud, environment, run_id)
        DEFINE INDEX IF NOT EXISTS idx_history_key_run ON TABLE drift_history
            COLUMNS cloud, environment, run_id UNIQUE;

        -- Key lookups for latest/history scans
        DEFINE INDEX IF NOT EXISTS idx_history_key ON TABLE drift_history
            COLUMNS cloud, environment;
    "#;

    db.query(sql).await?.check()?;
    debug!("drift_history table initialized");
    Ok(())
}
