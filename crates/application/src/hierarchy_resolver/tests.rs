use std::sync::Arc;

use aegis_domain::{PermissionSource, RoleId, RolePermissionGrant};

use crate::config::{AuthorizationConfig, PermissionCacheConfig};
use crate::permission_cache::PermissionCache;
use crate::test_support::{FakeCacheBackend, FakeRbacStore, action, role};

use super::{HierarchyConflict, HierarchyIssue, HierarchyResolver, RoleHoldingKind};

fn resolver(store: Arc<FakeRbacStore>) -> HierarchyResolver {
    HierarchyResolver::new(
        store,
        PermissionCache::new(FakeCacheBackend::shared(), PermissionCacheConfig::default()),
        AuthorizationConfig::default(),
    )
}

async fn three_level_chain(store: &FakeRbacStore) -> (RoleId, RoleId, RoleId) {
    let mut root = role("staff");
    let mut middle = role("pharmacist").with_parent(root.id);
    let mut leaf = role("owner").with_parent(middle.id);
    root.hierarchy_level = 0;
    middle.hierarchy_level = 1;
    leaf.hierarchy_level = 2;
    let ids = (root.id, middle.id, leaf.id);
    store.put_role(root).await;
    store.put_role(middle).await;
    store.put_role(leaf).await;
    ids
}

#[tokio::test]
async fn inherited_links_are_tagged_with_their_origin() {
    let store = FakeRbacStore::shared();
    let (root, _, leaf) = three_level_chain(&store).await;
    store
        .put_role_permission(RolePermissionGrant::grant(root, action("patient:read")))
        .await;
    store
        .put_role_permission(RolePermissionGrant::grant(leaf, action("billing:export")))
        .await;

    let set = resolver(store)
        .get_all_role_permissions(leaf)
        .await
        .unwrap_or_else(|_| unreachable!());

    assert!(set.role_active);
    assert_eq!(set.entries.len(), 2);
    let inherited = set
        .entries
        .iter()
        .find(|entry| entry.action == action("patient:read"))
        .unwrap_or_else(|| unreachable!());
    assert_eq!(
        inherited.source,
        PermissionSource::Inherited {
            from_role_id: root,
            via_role_id: leaf,
        }
    );
    assert_eq!(inherited.depth, 2);
    assert!(set.conflicts.is_empty());
}

#[tokio::test]
async fn inactive_ancestor_is_skipped_but_the_walk_continues() {
    let store = FakeRbacStore::shared();
    let mut root = role("staff");
    let mut middle = role("pharmacist").with_parent(root.id);
    let leaf = role("owner").with_parent(middle.id);
    middle.is_active = false;
    root.hierarchy_level = 0;
    let ids = (root.id, middle.id, leaf.id);
    store.put_role(root).await;
    store.put_role(middle).await;
    store.put_role(leaf).await;
    store
        .put_role_permission(RolePermissionGrant::grant(ids.0, action("patient:read")))
        .await;
    store
        .put_role_permission(RolePermissionGrant::grant(ids.1, action("stock:write")))
        .await;

    let set = resolver(store)
        .get_all_role_permissions(ids.2)
        .await
        .unwrap_or_else(|_| unreachable!());

    let actions: Vec<_> = set.entries.iter().map(|entry| entry.action.clone()).collect();
    assert_eq!(actions, vec![action("patient:read")]);
}

#[tokio::test]
async fn duplicate_actions_across_levels_are_reported() {
    let store = FakeRbacStore::shared();
    let (root, _, leaf) = three_level_chain(&store).await;
    store
        .put_role_permission(RolePermissionGrant::grant(root, action("patient:read")))
        .await;
    store
        .put_role_permission(RolePermissionGrant::deny(leaf, action("patient:read")))
        .await;

    let set = resolver(store)
        .get_all_role_permissions(leaf)
        .await
        .unwrap_or_else(|_| unreachable!());

    assert_eq!(
        set.conflicts,
        vec![HierarchyConflict::DuplicateAction {
            action: action("patient:read"),
            role_ids: vec![leaf, root],
        }]
    );
}

#[tokio::test]
async fn resolved_set_is_cached_until_cleared() {
    let store = FakeRbacStore::shared();
    let (root, _, leaf) = three_level_chain(&store).await;
    let resolver = resolver(store.clone());

    let first = resolver.get_all_role_permissions(leaf).await;
    assert!(first.is_ok());
    store
        .put_role_permission(RolePermissionGrant::grant(root, action("patient:read")))
        .await;

    let cached = resolver
        .get_all_role_permissions(leaf)
        .await
        .unwrap_or_else(|_| unreachable!());
    assert!(cached.entries.is_empty());

    let cleared = resolver.clear_hierarchy_cache(root).await;
    assert!(cleared.is_ok());
    let fresh = resolver
        .get_all_role_permissions(leaf)
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(fresh.entries.len(), 1);
}

#[tokio::test]
async fn cycle_detection_walks_the_candidate_chain() {
    let store = FakeRbacStore::shared();
    let (root, middle, leaf) = three_level_chain(&store).await;
    let resolver = resolver(store);

    assert_eq!(
        resolver.detect_circular_dependency(root, leaf).await.ok(),
        Some(true)
    );
    assert_eq!(
        resolver.detect_circular_dependency(root, middle).await.ok(),
        Some(true)
    );
    assert_eq!(
        resolver.detect_circular_dependency(leaf, root).await.ok(),
        Some(false)
    );
}

#[tokio::test]
async fn levels_cascade_to_descendants() {
    let store = FakeRbacStore::shared();
    let root = role("staff");
    let middle = role("pharmacist").with_parent(root.id);
    let leaf = role("owner").with_parent(middle.id);
    let ids = (root.id, middle.id, leaf.id);
    store.put_role(root).await;
    store.put_role(middle).await;
    store.put_role(leaf).await;
    let resolver = resolver(store.clone());

    let changed = resolver
        .update_hierarchy_levels(ids.0)
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(changed, vec![ids.1, ids.2]);
    assert_eq!(resolver.calculate_hierarchy_level(ids.2).await.ok(), Some(2));

    let repeated = resolver
        .update_hierarchy_levels(ids.0)
        .await
        .unwrap_or_else(|_| unreachable!());
    assert!(repeated.is_empty());
    assert!(
        resolver
            .validate_hierarchy()
            .await
            .unwrap_or_else(|_| unreachable!())
            .is_empty()
    );
}

#[tokio::test]
async fn depth_limit_counts_the_moved_subtree() {
    let store = FakeRbacStore::shared();
    let (_, _, leaf) = three_level_chain(&store).await;
    let mover = role("mover");
    let below = role("below").with_parent(mover.id);
    let ids = (mover.id, below.id);
    store.put_role(mover).await;
    store.put_role(below).await;

    let strict = HierarchyResolver::new(
        store.clone(),
        PermissionCache::disabled(),
        AuthorizationConfig::default()
            .with_max_hierarchy_depth(3)
            .unwrap_or_else(|_| unreachable!()),
    );

    assert!(strict.ensure_depth_within_limit(ids.1, leaf).await.is_ok());
    assert!(strict.ensure_depth_within_limit(ids.0, leaf).await.is_err());
}

#[tokio::test]
async fn reverse_index_covers_direct_inherited_and_legacy() {
    let store = FakeRbacStore::shared();
    let (root, middle, leaf) = three_level_chain(&store).await;
    store
        .put_role_permission(RolePermissionGrant::grant(root, action("patient:read")))
        .await;
    store
        .put_role_permission(RolePermissionGrant::deny(leaf, action("patient:read")))
        .await;
    let legacy = role("auditor").with_legacy_permissions(&["patient:read"]);
    let legacy_id = store.put_role(legacy).await;

    let holdings = resolver(store)
        .get_roles_with_permission(&action("patient:read"))
        .await
        .unwrap_or_else(|_| unreachable!());

    let kinds: Vec<_> = holdings
        .iter()
        .map(|holding| (holding.role_id, holding.kind))
        .collect();
    assert_eq!(kinds.len(), 3);
    assert!(kinds.contains(&(root, RoleHoldingKind::Direct)));
    assert!(kinds.contains(&(
        middle,
        RoleHoldingKind::Inherited { from_role_id: root }
    )));
    assert!(kinds.contains(&(legacy_id, RoleHoldingKind::Legacy)));
    assert!(!kinds.iter().any(|(role_id, _)| *role_id == leaf));
}

#[tokio::test]
async fn validation_reports_stale_levels_and_missing_parents() {
    let store = FakeRbacStore::shared();
    let root = role("staff");
    let child = role("pharmacist").with_parent(root.id);
    let orphan = role("orphan").with_parent(RoleId::new());
    let ids = (child.id, orphan.id);
    store.put_role(root).await;
    store.put_role(child).await;
    store.put_role(orphan).await;

    let issues = resolver(store)
        .validate_hierarchy()
        .await
        .unwrap_or_else(|_| unreachable!());

    assert!(issues.contains(&HierarchyIssue::LevelMismatch {
        role_id: ids.0,
        stored: 0,
        expected: 1,
    }));
    assert!(issues.iter().any(|issue| matches!(
        issue,
        HierarchyIssue::MissingParent { role_id, .. } if *role_id == ids.1
    )));
}
