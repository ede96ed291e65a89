use super::{CounterStore, StoreError};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool, query};
use tracing::info;

const CREATE_COUNTERS: &str = r#"
CREATE TABLE IF NOT EXISTS counters (
    name  TEXT PRIMARY KEY NOT NULL,
    count INTEGER NOT NULL
)
"#;

/// One row per counter key. Increments are a single upsert statement so
/// concurrent replicas sharing a database never race on read-modify-write.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let options = database_url
            .parse::<SqliteConnectOptions>()?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Self::from_pool(pool).await?;
        info!("Counter store ready at {}", database_url);
        Ok(store)
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        query(CREATE_COUNTERS).execute(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn count(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let row = query("SELECT count FROM counters WHERE name = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let value: i64 = row.try_get("count")?;
                let count = u64::try_from(value).map_err(|_| StoreError::InvalidStoredValue {
                    key: key.to_owned(),
                    value,
                })?;
                Ok(Some(count))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl CounterStore for SqliteStore {
    async fn upsert_increment(&self, key: &str, delta: u64) -> Result<(), StoreError> {
        let delta = i64::try_from(delta).map_err(|_| StoreError::DeltaOutOfRange(delta))?;

        query(
            r#"
            INSERT INTO counters (name, count) VALUES (?1, ?2)
            ON CONFLICT(name) DO UPDATE SET count = count + excluded.count
            "#,
        )
        .bind(key)
        .bind(delta)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn write_concurrency(&self) -> usize {
        self.pool.options().get_max_connections() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> SqliteStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        SqliteStore::from_pool(pool).await.unwrap()
    }

    #[tokio::test]
    async fn upsert_creates_then_adds() {
        let store = memory_store().await;
        assert_eq!(store.count("x").await.unwrap(), None);

        store.upsert_increment("x", 3).await.unwrap();
        store.upsert_increment("x", 2).await.unwrap();

        assert_eq!(store.count("x").await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let store = memory_store().await;
        store.upsert_increment("a", 1).await.unwrap();
        store.upsert_increment("b", 7).await.unwrap();

        assert_eq!(store.count("a").await.unwrap(), Some(1));
        assert_eq!(store.count("b").await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn oversized_delta_is_rejected() {
        let store = memory_store().await;
        let err = store.upsert_increment("x", u64::MAX).await.unwrap_err();
        assert!(matches!(err, StoreError::DeltaOutOfRange(_)));
        assert_eq!(store.count("x").await.unwrap(), None);
    }

    #[tokio::test]
    async fn negative_stored_value_is_an_error() {
        let store = memory_store().await;
        query("INSERT INTO counters (name, count) VALUES ('broken', -3)")
            .execute(&store.pool)
            .await
            .unwrap();

        let err = store.count("broken").await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidStoredValue { ref key, value: -3 } if key == "broken"
        ));
    }

    #[tokio::test]
    async fn write_concurrency_follows_pool_size() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("pool.db").display());
        let store = SqliteStore::connect(&url, 3).await.unwrap();
        assert_eq!(store.write_concurrency(), 3);
    }

    #[tokio::test]
    async fn counts_persist_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("counters.db").display());

        {
            let store = SqliteStore::connect(&url, 2).await.unwrap();
            store.upsert_increment("persisted", 4).await.unwrap();
        }

        let store = SqliteStore::connect(&url, 2).await.unwrap();
        store.upsert_increment("persisted", 1).await.unwrap();
        assert_eq!(store.count("persisted").await.unwrap(), Some(5));
    }
}
