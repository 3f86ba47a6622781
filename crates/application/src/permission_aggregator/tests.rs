use std::sync::Arc;

use aegis_core::WorkspaceId;
use aegis_domain::{
    EvaluationContext, PermissionConditions, PermissionSource, RoleId, RolePermissionGrant,
    SubscriptionTier, TimeWindow, UserRoleAssignment,
};
use chrono::{TimeZone, Utc};

use crate::config::AuthorizationConfig;
use crate::hierarchy_resolver::HierarchyResolver;
use crate::permission_cache::PermissionCache;
use crate::test_support::{FakeRbacStore, action, actor, actor_id, permission, role};

use super::PermissionAggregator;

fn aggregator(store: Arc<FakeRbacStore>) -> PermissionAggregator {
    let hierarchy = HierarchyResolver::new(
        store.clone(),
        PermissionCache::disabled(),
        AuthorizationConfig::default(),
    );
    PermissionAggregator::new(store.clone(), store, hierarchy)
}

async fn assign(store: &FakeRbacStore, actor: &str, role_id: RoleId) {
    store
        .put_assignment(UserRoleAssignment::new(actor_id(actor), role_id, None, "admin"))
        .await;
}

#[tokio::test]
async fn explicit_denial_removes_a_role_grant_and_is_recorded() {
    let store = FakeRbacStore::shared();
    let role_id = store.put_role(role("pharmacist")).await;
    store
        .put_role_permission(RolePermissionGrant::grant(role_id, action("patient:read")))
        .await;
    assign(&store, "u1", role_id).await;
    let mut subject = actor("u1", "pharmacist");
    subject.denied_permissions = vec![action("patient:read")];

    let aggregated = aggregator(store)
        .aggregate(&subject, &EvaluationContext::now())
        .await
        .unwrap_or_else(|_| unreachable!());

    assert!(!aggregated.granted.contains_key(&action("patient:read")));
    let denied = aggregated
        .denied
        .get(&action("patient:read"))
        .unwrap_or_else(|| unreachable!());
    assert_eq!(denied.source, PermissionSource::DirectDenial);
    assert_eq!(aggregated.conflicts.len(), 1);
    assert_eq!(
        aggregated.conflicts[0].overridden_sources,
        vec![PermissionSource::RoleGrant { role_id }]
    );
}

#[tokio::test]
async fn direct_grant_beats_inherited_denial() {
    let store = FakeRbacStore::shared();
    let parent = role("staff");
    let child = role("cashier").with_parent(parent.id);
    let ids = (parent.id, child.id);
    store.put_role(parent).await;
    store.put_role(child).await;
    store
        .put_role_permission(RolePermissionGrant::deny(ids.0, action("billing:export")))
        .await;
    assign(&store, "u1", ids.1).await;
    let mut subject = actor("u1", "cashier");
    subject.direct_permissions = vec![action("billing:export")];

    let aggregated = aggregator(store)
        .aggregate(&subject, &EvaluationContext::now())
        .await
        .unwrap_or_else(|_| unreachable!());

    let granted = aggregated
        .granted
        .get(&action("billing:export"))
        .unwrap_or_else(|| unreachable!());
    assert_eq!(granted.source, PermissionSource::Direct);
}

#[tokio::test]
async fn equal_rank_disagreement_resolves_to_deny() {
    let store = FakeRbacStore::shared();
    let first = store.put_role(role("front_desk")).await;
    let second = store.put_role(role("night_shift")).await;
    store
        .put_role_permission(RolePermissionGrant::grant(first, action("stock:write")))
        .await;
    store
        .put_role_permission(RolePermissionGrant::deny(second, action("stock:write")))
        .await;
    assign(&store, "u1", first).await;
    assign(&store, "u1", second).await;

    let aggregated = aggregator(store.clone())
        .aggregate(&actor("u1", "staff"), &EvaluationContext::now())
        .await
        .unwrap_or_else(|_| unreachable!());
    assert!(aggregated.denied.contains_key(&action("stock:write")));

    store
        .put_role_permission(
            RolePermissionGrant::grant(first, action("stock:write")).with_priority(5),
        )
        .await;
    let reprioritised = aggregator(store)
        .aggregate(&actor("u1", "staff"), &EvaluationContext::now())
        .await
        .unwrap_or_else(|_| unreachable!());
    assert!(reprioritised.granted.contains_key(&action("stock:write")));
}

#[tokio::test]
async fn unmet_conditions_drop_the_link() {
    let store = FakeRbacStore::shared();
    let role_id = store.put_role(role("night_shift")).await;
    let conditions = PermissionConditions {
        time_window: Some(TimeWindow {
            start_hour: 22,
            end_hour: 6,
            weekdays: Vec::new(),
        }),
        ..PermissionConditions::default()
    };
    store
        .put_role_permission(
            RolePermissionGrant::grant(role_id, action("stock:write")).with_conditions(conditions),
        )
        .await;
    assign(&store, "u1", role_id).await;
    let aggregator = aggregator(store);
    let subject = actor("u1", "staff");

    let midday = EvaluationContext::now().at(
        Utc.with_ymd_and_hms(2026, 3, 4, 12, 0, 0)
            .single()
            .unwrap_or_else(|| unreachable!()),
    );
    let night = EvaluationContext::now().at(
        Utc.with_ymd_and_hms(2026, 3, 4, 23, 0, 0)
            .single()
            .unwrap_or_else(|| unreachable!()),
    );

    let at_midday = aggregator
        .aggregate(&subject, &midday)
        .await
        .unwrap_or_else(|_| unreachable!());
    let at_night = aggregator
        .aggregate(&subject, &night)
        .await
        .unwrap_or_else(|_| unreachable!());
    assert!(at_midday.granted.is_empty());
    assert!(at_night.granted.contains_key(&action("stock:write")));
}

#[tokio::test]
async fn workspace_scoped_assignment_applies_only_in_its_workspace() {
    let store = FakeRbacStore::shared();
    let role_id = store.put_role(role("pharmacist")).await;
    store
        .put_role_permission(RolePermissionGrant::grant(role_id, action("patient:read")))
        .await;
    let workspace_id = WorkspaceId::new();
    store
        .put_assignment(UserRoleAssignment::new(
            actor_id("u1"),
            role_id,
            Some(workspace_id),
            "admin",
        ))
        .await;
    let aggregator = aggregator(store);
    let subject = actor("u1", "staff");

    let global = aggregator
        .aggregate(&subject, &EvaluationContext::now())
        .await
        .unwrap_or_else(|_| unreachable!());
    let scoped = aggregator
        .aggregate(&subject, &EvaluationContext::now().in_workspace(workspace_id))
        .await
        .unwrap_or_else(|_| unreachable!());
    assert!(global.granted.is_empty());
    assert_eq!(scoped.role_ids, vec![role_id]);
}

#[tokio::test]
async fn tier_gated_grant_is_denied_by_subscription() {
    let store = FakeRbacStore::shared();
    store
        .put_permission(permission("report:advanced").with_required_tier(SubscriptionTier::Professional))
        .await;
    let mut subject = actor("u1", "staff");
    subject.direct_permissions = vec![action("report:advanced")];

    let aggregator = aggregator(store);
    let basic = aggregator
        .aggregate(&subject, &EvaluationContext::now())
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(
        basic
            .denied
            .get(&action("report:advanced"))
            .map(|resolved| resolved.source),
        Some(PermissionSource::Subscription)
    );

    subject.subscription_tier = SubscriptionTier::Enterprise;
    let enterprise = aggregator
        .aggregate(&subject, &EvaluationContext::now())
        .await
        .unwrap_or_else(|_| unreachable!());
    assert!(enterprise.granted.contains_key(&action("report:advanced")));
}

#[tokio::test]
async fn dependencies_and_conflicts_are_reported_not_granted() {
    let store = FakeRbacStore::shared();
    store
        .put_permission(
            permission("billing:export")
                .with_dependencies(&["billing:read"])
                .unwrap_or_else(|_| unreachable!()),
        )
        .await;
    store.put_permission(permission("billing:read")).await;
    store
        .put_permission(
            permission("audit:approve")
                .with_conflicts(&["audit:submit"])
                .unwrap_or_else(|_| unreachable!()),
        )
        .await;
    store.put_permission(permission("audit:submit")).await;
    let mut subject = actor("u1", "staff");
    subject.direct_permissions = vec![
        action("billing:export"),
        action("audit:approve"),
        action("audit:submit"),
    ];

    let aggregated = aggregator(store)
        .aggregate(&subject, &EvaluationContext::now())
        .await
        .unwrap_or_else(|_| unreachable!());

    assert!(!aggregated.granted.contains_key(&action("billing:read")));
    assert_eq!(aggregated.unsatisfied_dependencies.len(), 1);
    assert_eq!(
        aggregated.unsatisfied_dependencies[0].missing,
        vec![action("billing:read")]
    );
    assert_eq!(aggregated.conflicting_grants.len(), 1);
}

#[tokio::test]
async fn legacy_wildcard_grants_active_catalog_and_skips_validation() {
    let store = FakeRbacStore::shared();
    store
        .put_permission(
            permission("billing:export")
                .with_dependencies(&["billing:read"])
                .unwrap_or_else(|_| unreachable!()),
        )
        .await;
    let mut inactive = permission("billing:read");
    inactive.is_active = false;
    store.put_permission(inactive).await;
    let mut subject = actor("u1", "staff");
    subject.legacy_permissions = vec!["*".to_owned()];

    let aggregated = aggregator(store)
        .aggregate(&subject, &EvaluationContext::now())
        .await
        .unwrap_or_else(|_| unreachable!());

    assert!(aggregated.legacy_wildcard);
    assert_eq!(aggregated.granted.len(), 1);
    assert_eq!(
        aggregated
            .granted
            .get(&action("billing:export"))
            .map(|resolved| resolved.source),
        Some(PermissionSource::Legacy)
    );
    assert!(aggregated.unsatisfied_dependencies.is_empty());
}

#[tokio::test]
async fn single_action_aggregation_ignores_other_actions() {
    let store = FakeRbacStore::shared();
    let mut subject = actor("u1", "staff");
    subject.direct_permissions = vec![action("patient:read"), action("stock:write")];

    let aggregated = aggregator(store)
        .aggregate_action(&subject, &EvaluationContext::now(), &action("stock:write"))
        .await
        .unwrap_or_else(|_| unreachable!());

    assert_eq!(aggregated.granted.len(), 1);
    assert!(aggregated.granted.contains_key(&action("stock:write")));
}
