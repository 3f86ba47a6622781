use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use aegis_application::{PermissionCacheBackend, key_matches_pattern};
use aegis_core::AppResult;

#[derive(Debug, Clone)]
struct PermissionCacheEntry {
    value: String,
    expires_at: Instant,
}

impl PermissionCacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// In-memory permission cache backend with per-entry expiry.
///
/// Expired entries are invisible to every operation and dropped lazily.
#[derive(Debug, Default)]
pub struct InMemoryPermissionCacheBackend {
    entries: RwLock<HashMap<String, PermissionCacheEntry>>,
}

impl InMemoryPermissionCacheBackend {
    /// Creates an empty in-memory cache backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of live entries.
    pub async fn live_entries(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|entry| entry.is_live(now))
            .count()
    }
}

#[async_trait]
impl PermissionCacheBackend for InMemoryPermissionCacheBackend {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.is_live(Instant::now()) => {
                    return Ok(Some(entry.value.clone()));
                }
                Some(_) => {}
                None => return Ok(None),
            }
        }

        let mut entries = self.entries.write().await;
        if entries
            .get(key)
            .is_some_and(|entry| !entry.is_live(Instant::now()))
        {
            entries.remove(key);
        }

        Ok(None)
    }

    async fn set_with_ttl(&self, key: &str, value: String, ttl_seconds: u64) -> AppResult<()> {
        if ttl_seconds == 0 {
            return Ok(());
        }

        let now = Instant::now();
        let expires_at = now
            .checked_add(Duration::from_secs(ttl_seconds))
            .unwrap_or(now);

        self.entries
            .write()
            .await
            .insert(key.to_owned(), PermissionCacheEntry { value, expires_at });

        Ok(())
    }

    async fn delete(&self, key: &str) -> AppResult<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .write()
            .await
            .remove(key)
            .is_some_and(|entry| entry.is_live(now)))
    }

    async fn delete_by_pattern(&self, pattern: &str) -> AppResult<u64> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let mut removed = 0u64;
        entries.retain(|key, entry| {
            if !key_matches_pattern(pattern, key) {
                return entry.is_live(now);
            }
            if entry.is_live(now) {
                removed += 1;
            }
            false
        });

        Ok(removed)
    }

    async fn scan_keys(&self, pattern: &str) -> AppResult<Vec<String>> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .read()
            .await
            .iter()
            .filter(|(key, entry)| entry.is_live(now) && key_matches_pattern(pattern, key))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();

        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use aegis_application::PermissionCacheBackend;

    use super::InMemoryPermissionCacheBackend;

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_their_ttl() {
        let backend = InMemoryPermissionCacheBackend::new();
        assert!(
            backend
                .set_with_ttl("aegis:v1:user:u1:global:effective", "{}".to_owned(), 60)
                .await
                .is_ok()
        );
        assert!(matches!(
            backend.get("aegis:v1:user:u1:global:effective").await,
            Ok(Some(_))
        ));

        tokio::time::advance(Duration::from_secs(61)).await;

        assert!(matches!(
            backend.get("aegis:v1:user:u1:global:effective").await,
            Ok(None)
        ));
        assert_eq!(backend.live_entries().await, 0);
    }

    #[tokio::test]
    async fn zero_ttl_is_not_stored() {
        let backend = InMemoryPermissionCacheBackend::new();
        assert!(backend.set_with_ttl("key", "value".to_owned(), 0).await.is_ok());
        assert!(matches!(backend.get("key").await, Ok(None)));
    }

    #[tokio::test]
    async fn pattern_delete_only_touches_matching_keys() {
        let backend = InMemoryPermissionCacheBackend::new();
        for key in [
            "aegis:v1:user:u1:global:effective",
            "aegis:v1:user:u1:global:check:patient:read",
            "aegis:v1:user:u10:global:effective",
            "aegis:v1:role:r1:permissions",
        ] {
            assert!(backend.set_with_ttl(key, "{}".to_owned(), 300).await.is_ok());
        }

        let removed = backend.delete_by_pattern("aegis:v1:user:u1:*").await;
        assert!(matches!(removed, Ok(2)));

        let remaining = backend.scan_keys("aegis:*").await.unwrap_or_default();
        assert_eq!(
            remaining,
            vec![
                "aegis:v1:role:r1:permissions".to_owned(),
                "aegis:v1:user:u10:global:effective".to_owned(),
            ]
        );
        assert!(matches!(
            backend.delete("aegis:v1:role:r1:permissions").await,
            Ok(true)
        ));
        assert!(matches!(
            backend.delete("aegis:v1:role:r1:permissions").await,
            Ok(false)
        ));
    }
}
