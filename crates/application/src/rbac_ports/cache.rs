use async_trait::async_trait;

use aegis_core::AppResult;

/// Key-value backend behind the permission cache.
///
/// Values are opaque strings; the cache layer owns their envelope format.
/// Implementations must tolerate concurrent readers and writers.
#[async_trait]
pub trait PermissionCacheBackend: Send + Sync {
    /// Returns the raw value stored under a key.
    async fn get(&self, key: &str) -> AppResult<Option<String>>;

    /// Stores a raw value with a time-to-live in seconds.
    async fn set_with_ttl(&self, key: &str, value: String, ttl_seconds: u64) -> AppResult<()>;

    /// Deletes one key. Returns whether it existed.
    async fn delete(&self, key: &str) -> AppResult<bool>;

    /// Deletes every key matching a `*` glob pattern. Returns the number removed.
    async fn delete_by_pattern(&self, pattern: &str) -> AppResult<u64>;

    /// Lists every key matching a `*` glob pattern.
    async fn scan_keys(&self, pattern: &str) -> AppResult<Vec<String>>;
}

/// Matches a cache key against a glob where `*` spans any run of characters.
#[must_use]
pub fn key_matches_pattern(pattern: &str, key: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    let pattern_bytes = pattern.as_bytes();
    let key_bytes = key.as_bytes();
    let (mut pattern_index, mut key_index) = (0usize, 0usize);
    let (mut star_index, mut resume_index) = (None, 0usize);

    while key_index < key_bytes.len() {
        match pattern_bytes.get(pattern_index) {
            Some(b'*') => {
                star_index = Some(pattern_index);
                resume_index = key_index;
                pattern_index += 1;
            }
            Some(expected) if key_bytes.get(key_index) == Some(expected) => {
                pattern_index += 1;
                key_index += 1;
            }
            _ => match star_index {
                Some(star) => {
                    pattern_index = star + 1;
                    resume_index += 1;
                    key_index = resume_index;
                }
                None => return false,
            },
        }
    }

    while pattern_bytes.get(pattern_index) == Some(&b'*') {
        pattern_index += 1;
    }

    pattern_index == pattern_bytes.len()
}
