//! History store selection from configuration.

use std::sync::Arc;

use anyhow::{Context, Result};
use driftwatch_core::config::{StoreBackend, StoreConfig};
use driftwatch_state::{FsHistoryStore, HistoryStore, MemoryHistoryStore, SurrealHistoryStore};
use tracing::info;

pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn HistoryStore>> {
    let store: Arc<dyn HistoryStore> = match config.backend {
        StoreBackend::Fs => {
            let store = FsHistoryStore::new(&config.path)
                .with_context(|| format!("open history at {}", config.path.display()))?
                .with_retain_documents(config.retain_documents);
            info!(backend = "fs", root = %config.path.display(), "history store ready");
            Arc::new(store)
        }
        StoreBackend::Surreal => {
            let url = config.surreal_url();
            let store = SurrealHistoryStore::connect(&url)
                .await
                .with_context(|| format!("connect to SurrealDB at {url}"))?
                .with_retain_documents(config.retain_documents);
            info!(backend = "surreal", url = %url, "history store ready");
            Arc::new(store)
        }
        StoreBackend::Memory => {
            info!(backend = "memory", "history store ready (not persisted)");
            if config.retain_documents {
                Arc::new(MemoryHistoryStore::new())
            } else {
                Arc::new(MemoryHistoryStore::without_documents())
            }
        }
    };
    Ok(store)
}
