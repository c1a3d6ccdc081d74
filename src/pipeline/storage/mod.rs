pub mod in_memory;
pub mod sqlite;

pub use in_memory::InMemoryStore;
pub use sqlite::SqliteStore;

use crate::common::error::Result;
use crate::common::types::{NormalizedRecord, TimeRange};
use crate::config::{StoreBackend, StoreConfig};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

/// Outcome counts for one `persist` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PersistSummary {
    /// Keys that were not stored before
    pub inserted: usize,
    /// Existing keys whose value was replaced (overwrite policy only)
    pub replaced: usize,
    /// Existing keys left as they were
    pub unchanged: usize,
}

impl PersistSummary {
    pub fn written(&self) -> usize {
        self.inserted + self.replaced
    }
}

/// Durable home for normalized records.
///
/// A record is identified by (location, timestamp, kind). Persisting the same
/// key again never creates a second row; the configured duplicate policy
/// decides whether the stored value is kept or replaced. Each `persist` call
/// is atomic: either every record in the slice is applied or none is.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn persist(&self, records: &[NormalizedRecord]) -> Result<PersistSummary>;

    /// Records for `location` with timestamps in `[range.start, range.end)`,
    /// ordered by timestamp then kind.
    async fn query(&self, location: &str, range: &TimeRange) -> Result<Vec<NormalizedRecord>>;
}

/// Build the store selected by configuration.
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn RecordStore>> {
    let store: Arc<dyn RecordStore> = match config.backend {
        StoreBackend::Memory => Arc::new(InMemoryStore::new(config.on_duplicate)),
        StoreBackend::Sqlite => Arc::new(SqliteStore::open(&config.path, config.on_duplicate)?),
    };
    Ok(store)
}
