mod keys;
mod noop;

#[cfg(test)]
mod tests;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use aegis_core::{AppError, AppResult, WorkspaceId};
use aegis_domain::{ActorId, RoleId};
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::PermissionCacheConfig;
use crate::rbac_ports::PermissionCacheBackend;

pub use keys::CacheKey;
pub use noop::NoopPermissionCacheBackend;

/// Stored form of every cache value.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEnvelope<T> {
    schema_version: u32,
    expires_at: DateTime<Utc>,
    payload: T,
}

/// Counter snapshot of the permission cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheMetrics {
    /// Reads that returned a live entry.
    pub hits: u64,
    /// Reads that found nothing usable.
    pub misses: u64,
    /// Backend failures and timeouts.
    pub errors: u64,
    /// Successful writes.
    pub writes: u64,
    /// Keys removed by invalidation.
    pub invalidations: u64,
}

impl CacheMetrics {
    /// Returns hits over total reads, or zero before any read.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let reads = self.hits + self.misses;
        if reads == 0 {
            return 0.0;
        }

        self.hits as f64 / reads as f64
    }
}

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    writes: AtomicU64,
    invalidations: AtomicU64,
}

/// Condition of one raw cache entry, as seen by the consistency sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CacheEntryState {
    /// The key disappeared between scan and read.
    Missing,
    /// The value is not a valid envelope.
    Malformed,
    /// The envelope carries another schema version.
    SchemaMismatch(u32),
    /// The envelope expired.
    Expired,
    /// The envelope is usable.
    Live,
}

/// TTL cache of permission decisions in front of a pluggable backend.
///
/// Every backend call is bounded by the configured timeout. Failures and
/// timeouts are logged and treated as a miss or a no-op, so callers never
/// depend on the backend being reachable.
#[derive(Clone)]
pub struct PermissionCache {
    backend: Arc<dyn PermissionCacheBackend>,
    config: PermissionCacheConfig,
    counters: Arc<CacheCounters>,
}

impl PermissionCache {
    /// Creates a cache over a backend.
    #[must_use]
    pub fn new(backend: Arc<dyn PermissionCacheBackend>, config: PermissionCacheConfig) -> Self {
        Self {
            backend,
            config,
            counters: Arc::new(CacheCounters::default()),
        }
    }

    /// Creates a pass-through cache that always misses.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(
            Arc::new(NoopPermissionCacheBackend),
            PermissionCacheConfig::default(),
        )
    }

    /// Returns the cache configuration.
    #[must_use]
    pub fn config(&self) -> &PermissionCacheConfig {
        &self.config
    }

    /// Renders a logical key with the configured prefix and schema version.
    #[must_use]
    pub fn render_key(&self, key: &CacheKey) -> String {
        key.render(self.config.key_prefix.as_str(), self.config.schema_version)
    }

    /// Reads a live entry, treating any failure as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let rendered = self.render_key(key);
        let raw = match self.bounded("get", self.backend.get(rendered.as_str())).await {
            Ok(Some(raw)) => raw,
            Ok(None) | Err(_) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        let envelope = match serde_json::from_str::<CacheEnvelope<T>>(raw.as_str()) {
            Ok(envelope) => envelope,
            Err(error) => {
                tracing::warn!(key = %rendered, error = %error, "discarding undecodable cache entry");
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if envelope.schema_version != self.config.schema_version || envelope.expires_at <= Utc::now()
        {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        Some(envelope.payload)
    }

    /// Writes an entry with a TTL in seconds. Failures are logged and ignored.
    pub async fn set<T: Serialize>(&self, key: &CacheKey, value: &T, ttl_seconds: u64) {
        let rendered = self.render_key(key);
        let expires_at = Duration::try_seconds(i64::try_from(ttl_seconds).unwrap_or(i64::MAX))
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let envelope = CacheEnvelope {
            schema_version: self.config.schema_version,
            expires_at,
            payload: value,
        };

        let raw = match serde_json::to_string(&envelope) {
            Ok(raw) => raw,
            Err(error) => {
                tracing::warn!(key = %rendered, error = %error, "failed to encode cache entry");
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        if self
            .bounded(
                "set",
                self.backend
                    .set_with_ttl(rendered.as_str(), raw, ttl_seconds),
            )
            .await
            .is_ok()
        {
            self.counters.writes.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Deletes one logical entry.
    pub async fn delete(&self, key: &CacheKey) -> bool {
        let rendered = self.render_key(key);
        self.delete_raw(rendered.as_str()).await
    }

    /// Deletes the aggregate and every per-action entry of an actor.
    ///
    /// `None` clears every workspace scope; `Some` clears only that scope.
    pub async fn invalidate_user_cache(
        &self,
        actor_id: &ActorId,
        workspace_id: Option<WorkspaceId>,
    ) -> u64 {
        let scope = workspace_id
            .map(|workspace_id| workspace_id.to_string())
            .unwrap_or_else(|| "*".to_owned());
        let pattern = format!(
            "{}:v{}:user:{actor_id}:{scope}:*",
            self.config.key_prefix, self.config.schema_version
        );

        let removed = self.delete_pattern(pattern.as_str()).await;
        tracing::debug!(actor_id = %actor_id, removed, "invalidated actor cache");
        removed
    }

    /// Deletes the resolved set of a role and of every related role.
    ///
    /// Callers pass the ancestors and descendants whose resolved sets embed
    /// the role's links.
    pub async fn invalidate_role_cache(&self, role_id: RoleId, related: &[RoleId]) -> u64 {
        let mut removed = 0;
        for candidate in std::iter::once(role_id).chain(related.iter().copied()) {
            if self
                .delete(&CacheKey::RolePermissions {
                    role_id: candidate,
                })
                .await
            {
                removed += 1;
            }
        }

        tracing::debug!(role_id = %role_id, removed, "invalidated role cache");
        removed
    }

    /// Deletes every entry under the prefix, across schema versions.
    pub async fn flush_all(&self) -> u64 {
        let pattern = format!("{}:*", self.config.key_prefix);
        self.delete_pattern(pattern.as_str()).await
    }

    /// Returns a counter snapshot.
    #[must_use]
    pub fn metrics(&self) -> CacheMetrics {
        CacheMetrics {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
        }
    }

    /// Lists every raw key under the prefix.
    pub(crate) async fn scan_all_keys(&self) -> AppResult<Vec<String>> {
        let pattern = format!("{}:*", self.config.key_prefix);
        self.bounded("scan", self.backend.scan_keys(pattern.as_str()))
            .await
    }

    /// Classifies one raw entry without decoding its payload.
    pub(crate) async fn inspect_raw(&self, key: &str) -> AppResult<CacheEntryState> {
        let Some(raw) = self.bounded("get", self.backend.get(key)).await? else {
            return Ok(CacheEntryState::Missing);
        };

        let Ok(envelope) = serde_json::from_str::<CacheEnvelope<serde_json::Value>>(raw.as_str())
        else {
            return Ok(CacheEntryState::Malformed);
        };

        if envelope.schema_version != self.config.schema_version {
            return Ok(CacheEntryState::SchemaMismatch(envelope.schema_version));
        }
        if envelope.expires_at <= Utc::now() {
            return Ok(CacheEntryState::Expired);
        }

        Ok(CacheEntryState::Live)
    }

    /// Deletes one raw key, returning whether it existed.
    pub(crate) async fn delete_raw(&self, key: &str) -> bool {
        match self.bounded("delete", self.backend.delete(key)).await {
            Ok(true) => {
                self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
                true
            }
            Ok(false) | Err(_) => false,
        }
    }

    async fn delete_pattern(&self, pattern: &str) -> u64 {
        match self
            .bounded("delete_by_pattern", self.backend.delete_by_pattern(pattern))
            .await
        {
            Ok(removed) => {
                self.counters
                    .invalidations
                    .fetch_add(removed, Ordering::Relaxed);
                removed
            }
            Err(_) => 0,
        }
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        future: impl Future<Output = AppResult<T>>,
    ) -> AppResult<T> {
        let result = match tokio::time::timeout(self.config.operation_timeout, future).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Internal(format!(
                "cache {operation} timed out after {} ms",
                self.config.operation_timeout.as_millis()
            ))),
        };

        if let Err(error) = &result {
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(operation, error = %error, "permission cache backend degraded");
        }

        result
    }
}
