//! driftwatch-state: drift history persistence
//!
//! Append-only record of drift reports per `(cloud, environment)` target.
//! The classifier reads its baseline from here and the alert policy reads
//! the previous report.
//!
//! ## Backends
//!
//! - `MemoryHistoryStore`: process-local, used in tests and dry runs
//! - `FsHistoryStore`: one JSON file per run under a root directory
//! - `SurrealHistoryStore`: SurrealDB (`mem://`, `surrealkv://`, remote)

mod error;
pub mod fakes;
pub mod fs_store;
pub mod migrations;
pub mod storage_traits;
pub mod surreal_store;

pub use error::StorageError;
pub use fakes::{FlakyHistoryStore, MemoryHistoryStore};
pub use fs_store::FsHistoryStore;
pub use storage_traits::{ensure_newer, HistoryEntry, HistoryStore, StorageResult};
pub use surreal_store::SurrealHistoryStore;
