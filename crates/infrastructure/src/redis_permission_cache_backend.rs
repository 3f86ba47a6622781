//! Redis-backed permission cache backend.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;

use aegis_application::PermissionCacheBackend;
use aegis_core::{AppError, AppResult};

const SCAN_BATCH_SIZE: usize = 500;

/// Redis implementation of the permission cache backend port.
///
/// Keys arrive fully rendered by the cache layer; this adapter adds nothing
/// to them.
#[derive(Clone)]
pub struct RedisPermissionCacheBackend {
    client: redis::Client,
}

impl RedisPermissionCacheBackend {
    /// Creates a backend over a configured Redis client.
    #[must_use]
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    /// Creates a backend from a `redis://` connection URL.
    pub fn from_url(redis_url: &str) -> AppResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|error| AppError::Validation(format!("invalid redis url: {error}")))?;
        Ok(Self::new(client))
    }

    async fn connection(&self) -> AppResult<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|error| AppError::Internal(format!("failed to connect to redis: {error}")))
    }

    async fn scan_with(
        connection: &mut MultiplexedConnection,
        pattern: &str,
    ) -> AppResult<Vec<String>> {
        let mut cursor = 0u64;
        let mut keys = Vec::new();
        loop {
            let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH_SIZE)
                .query_async(connection)
                .await
                .map_err(|error| {
                    AppError::Internal(format!(
                        "failed to scan permission cache keys matching '{pattern}': {error}"
                    ))
                })?;

            keys.extend(batch);
            if next_cursor == 0 {
                break;
            }
            cursor = next_cursor;
        }

        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

#[async_trait]
impl PermissionCacheBackend for RedisPermissionCacheBackend {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut connection = self.connection().await?;
        connection.get(key).await.map_err(|error| {
            AppError::Internal(format!("failed to read permission cache entry: {error}"))
        })
    }

    async fn set_with_ttl(&self, key: &str, value: String, ttl_seconds: u64) -> AppResult<()> {
        if ttl_seconds == 0 {
            return Ok(());
        }

        let mut connection = self.connection().await?;
        connection
            .set_ex(key, value, ttl_seconds)
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to write permission cache entry: {error}"))
            })
    }

    async fn delete(&self, key: &str) -> AppResult<bool> {
        let mut connection = self.connection().await?;
        let removed: u64 = connection.del(key).await.map_err(|error| {
            AppError::Internal(format!("failed to delete permission cache entry: {error}"))
        })?;
        Ok(removed > 0)
    }

    async fn delete_by_pattern(&self, pattern: &str) -> AppResult<u64> {
        let mut connection = self.connection().await?;
        let keys = Self::scan_with(&mut connection, pattern).await?;

        let mut removed = 0u64;
        for chunk in keys.chunks(SCAN_BATCH_SIZE) {
            let deleted: u64 = connection.del(chunk).await.map_err(|error| {
                AppError::Internal(format!(
                    "failed to delete permission cache entries matching '{pattern}': {error}"
                ))
            })?;
            removed += deleted;
        }

        tracing::debug!(pattern, removed, "permission cache keys deleted by pattern");
        Ok(removed)
    }

    async fn scan_keys(&self, pattern: &str) -> AppResult<Vec<String>> {
        let mut connection = self.connection().await?;
        Self::scan_with(&mut connection, pattern).await
    }
}
