use async_trait::async_trait;

use aegis_core::AppResult;

use crate::rbac_ports::PermissionCacheBackend;

/// Pass-through backend: reads always miss and writes are discarded.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPermissionCacheBackend;

#[async_trait]
impl PermissionCacheBackend for NoopPermissionCacheBackend {
    async fn get(&self, _key: &str) -> AppResult<Option<String>> {
        Ok(None)
    }

    async fn set_with_ttl(&self, _key: &str, _value: String, _ttl_seconds: u64) -> AppResult<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> AppResult<bool> {
        Ok(false)
    }

    async fn delete_by_pattern(&self, _pattern: &str) -> AppResult<u64> {
        Ok(0)
    }

    async fn scan_keys(&self, _pattern: &str) -> AppResult<Vec<String>> {
        Ok(Vec::new())
    }
}
