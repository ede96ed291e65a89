use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("write timed out after {0:?}")]
    Timeout(Duration),
    #[error("delta {0} does not fit the stored counter type")]
    DeltaOutOfRange(u64),
    #[error("stored counter for {key} holds invalid value {value}")]
    InvalidStoredValue { key: String, value: i64 },
}

/// Persistence seam used by the flusher.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Adds `delta` to the counter for `key`, creating it with `delta` when
    /// absent. Must be a single atomic operation at the store.
    async fn upsert_increment(&self, key: &str, delta: u64) -> Result<(), StoreError>;

    /// Upper bound on writes worth running at once. Writes beyond it would
    /// only queue inside the store.
    fn write_concurrency(&self) -> usize {
        1
    }
}

pub type SharedStore = Arc<dyn CounterStore>;

/// Opens the backend named by `database_url`. `memory` selects the in-process
/// store, anything else is handed to SQLite.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<SharedStore, StoreError> {
    if database_url == "memory" {
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = SqliteStore::connect(database_url, max_connections).await?;
    Ok(Arc::new(store))
}
