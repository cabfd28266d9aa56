use super::Pool;
use crate::store::{KeyValueStore, StorageError, UpdateFn};
use async_trait::async_trait;
use tracing::instrument;

/// One row per key in `kv_entries`; writes replace the value in place.
#[derive(Debug, Clone)]
pub struct SqliteKvStore {
    pool: Pool,
}

impl SqliteKvStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

#[async_trait]
impl KeyValueStore for SqliteKvStore {
    #[instrument(skip_all, fields(key = %key))]
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM kv_entries WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    #[instrument(skip_all, fields(key = %key))]
    async fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO kv_entries (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip_all, fields(key = %key))]
    async fn update(&self, key: &str, apply: &mut UpdateFn<'_>) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        // Take the write lock before reading; a deferred read would let
        // another connection commit between our SELECT and our write.
        sqlx::query("UPDATE kv_entries SET updated_at = updated_at WHERE key = ?")
            .bind(key)
            .execute(&mut *tx)
            .await?;
        let current =
            sqlx::query_scalar::<_, String>("SELECT value FROM kv_entries WHERE key = ?")
                .bind(key)
                .fetch_optional(&mut *tx)
                .await?;
        if let Some(next) = apply(current)? {
            sqlx::query(
                "INSERT INTO kv_entries (key, value) VALUES (?, ?) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
            )
            .bind(key)
            .bind(next)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
