//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod in_memory_permission_cache_backend;
mod in_memory_rbac_store;
mod redis_permission_cache_backend;
mod static_legacy_permission_matrix;

pub use in_memory_permission_cache_backend::InMemoryPermissionCacheBackend;
pub use in_memory_rbac_store::{InMemoryRbacStore, parse_actor_fixture};
pub use redis_permission_cache_backend::RedisPermissionCacheBackend;
pub use static_legacy_permission_matrix::StaticLegacyPermissionMatrix;
