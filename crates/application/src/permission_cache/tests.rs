use std::sync::Arc;
use std::time::Duration;

use aegis_core::WorkspaceId;
use aegis_domain::RoleId;

use crate::config::PermissionCacheConfig;
use crate::test_support::{FakeCacheBackend, StalledCacheBackend, action, actor_id};

use super::{CacheEntryState, CacheKey, PermissionCache};

fn check_key(actor: &str, scope: &str, value: &str) -> CacheKey {
    CacheKey::UserCheck {
        actor_id: actor_id(actor),
        scope: scope.to_owned(),
        action: action(value),
    }
}

fn cache_over(backend: Arc<FakeCacheBackend>) -> PermissionCache {
    PermissionCache::new(backend, PermissionCacheConfig::default())
}

#[tokio::test]
async fn stored_entry_is_a_hit_until_deleted() {
    let cache = cache_over(FakeCacheBackend::shared());
    let key = check_key("u1", "global", "patient:read");

    cache.set(&key, &true, 60).await;
    assert_eq!(cache.get::<bool>(&key).await, Some(true));

    assert!(cache.delete(&key).await);
    assert_eq!(cache.get::<bool>(&key).await, None);

    let metrics = cache.metrics();
    assert_eq!(metrics.hits, 1);
    assert_eq!(metrics.misses, 1);
    assert_eq!(metrics.writes, 1);
}

#[tokio::test]
async fn expired_and_foreign_schema_entries_miss() {
    let backend = FakeCacheBackend::shared();
    let cache = cache_over(backend.clone());
    let key = check_key("u1", "global", "patient:read");
    let rendered = cache.render_key(&key);

    backend
        .insert_raw(
            rendered.as_str(),
            r#"{"schema_version":1,"expires_at":"2000-01-01T00:00:00Z","payload":true}"#,
        )
        .await;
    assert_eq!(cache.get::<bool>(&key).await, None);
    assert_eq!(
        cache.inspect_raw(rendered.as_str()).await.ok(),
        Some(CacheEntryState::Expired)
    );

    backend
        .insert_raw(
            rendered.as_str(),
            r#"{"schema_version":7,"expires_at":"2999-01-01T00:00:00Z","payload":true}"#,
        )
        .await;
    assert_eq!(cache.get::<bool>(&key).await, None);
    assert_eq!(
        cache.inspect_raw(rendered.as_str()).await.ok(),
        Some(CacheEntryState::SchemaMismatch(7))
    );

    backend.insert_raw(rendered.as_str(), "not json").await;
    assert_eq!(cache.get::<bool>(&key).await, None);
    assert_eq!(
        cache.inspect_raw(rendered.as_str()).await.ok(),
        Some(CacheEntryState::Malformed)
    );
}

#[tokio::test]
async fn user_invalidation_without_workspace_clears_every_scope() {
    let backend = FakeCacheBackend::shared();
    let cache = cache_over(backend.clone());
    let workspace_id = WorkspaceId::new();
    let scope = workspace_id.to_string();

    cache
        .set(&check_key("u1", "global", "patient:read"), &true, 60)
        .await;
    cache
        .set(&check_key("u1", scope.as_str(), "patient:read"), &true, 60)
        .await;
    cache
        .set(
            &CacheKey::UserEffective {
                actor_id: actor_id("u1"),
                scope: "global".to_owned(),
            },
            &true,
            60,
        )
        .await;
    cache
        .set(&check_key("u10", "global", "patient:read"), &true, 60)
        .await;

    assert_eq!(cache.invalidate_user_cache(&actor_id("u1"), None).await, 3);
    assert_eq!(backend.keys().await.len(), 1);
}

#[tokio::test]
async fn user_invalidation_pattern_is_literal_for_the_actor() {
    let backend = FakeCacheBackend::shared();
    let cache = cache_over(backend.clone());
    for actor in ["u.1", "u-1", "u_1", "u1"] {
        cache
            .set(&check_key(actor, "global", "patient:read"), &true, 60)
            .await;
    }

    assert_eq!(cache.invalidate_user_cache(&actor_id("u.1"), None).await, 1);
    assert_eq!(backend.keys().await.len(), 3);
    assert_eq!(
        cache
            .get::<bool>(&check_key("u1", "global", "patient:read"))
            .await,
        Some(true)
    );
}

#[tokio::test]
async fn user_invalidation_with_workspace_clears_only_that_scope() {
    let backend = FakeCacheBackend::shared();
    let cache = cache_over(backend.clone());
    let workspace_id = WorkspaceId::new();
    let scope = workspace_id.to_string();

    cache
        .set(&check_key("u1", "global", "patient:read"), &true, 60)
        .await;
    cache
        .set(&check_key("u1", scope.as_str(), "patient:read"), &true, 60)
        .await;

    assert_eq!(
        cache
            .invalidate_user_cache(&actor_id("u1"), Some(workspace_id))
            .await,
        1
    );
    assert_eq!(
        cache
            .get::<bool>(&check_key("u1", "global", "patient:read"))
            .await,
        Some(true)
    );
}

#[tokio::test]
async fn role_invalidation_covers_related_roles() {
    let backend = FakeCacheBackend::shared();
    let cache = cache_over(backend.clone());
    let parent = RoleId::new();
    let child = RoleId::new();
    let unrelated = RoleId::new();

    for role_id in [parent, child, unrelated] {
        cache
            .set(&CacheKey::RolePermissions { role_id }, &true, 60)
            .await;
    }

    assert_eq!(cache.invalidate_role_cache(parent, &[child]).await, 2);
    assert_eq!(
        cache
            .get::<bool>(&CacheKey::RolePermissions {
                role_id: unrelated
            })
            .await,
        Some(true)
    );
}

#[tokio::test]
async fn unreachable_backend_degrades_to_miss() {
    let backend = FakeCacheBackend::shared();
    let cache = cache_over(backend.clone());
    let key = check_key("u1", "global", "patient:read");
    backend.set_unavailable(true);

    cache.set(&key, &true, 60).await;
    assert_eq!(cache.get::<bool>(&key).await, None);
    assert_eq!(cache.invalidate_user_cache(&actor_id("u1"), None).await, 0);

    let metrics = cache.metrics();
    assert_eq!(metrics.errors, 3);
    assert_eq!(metrics.writes, 0);
}

#[tokio::test(start_paused = true)]
async fn stalled_backend_is_bounded_by_the_timeout() {
    let cache = PermissionCache::new(
        Arc::new(StalledCacheBackend),
        PermissionCacheConfig::default().with_operation_timeout(Duration::from_millis(20)),
    );

    let key = check_key("u1", "global", "patient:read");
    assert_eq!(cache.get::<bool>(&key).await, None);
    assert_eq!(cache.metrics().errors, 1);
}

#[tokio::test]
async fn disabled_cache_always_misses() {
    let cache = PermissionCache::disabled();
    let key = check_key("u1", "global", "patient:read");

    cache.set(&key, &true, 60).await;
    assert_eq!(cache.get::<bool>(&key).await, None);
    assert_eq!(cache.flush_all().await, 0);
}
