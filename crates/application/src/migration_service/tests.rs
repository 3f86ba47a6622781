use std::sync::Arc;

use aegis_domain::{MigrationPhase, MigrationStatus, RoleCategory, UserRoleAssignment};

use crate::authorization_service::{AuthorizationService, LegacyEvaluator};
use crate::compatibility_router::{CompatibilityRouter, RoutingStrategy};
use crate::config::{AuthorizationConfig, MigrationConfig, PermissionCacheConfig};
use crate::hierarchy_resolver::HierarchyResolver;
use crate::permission_aggregator::PermissionAggregator;
use crate::permission_cache::PermissionCache;
use crate::rbac_ports::{
    ActorRepository, MigrationState, MigrationStateRepository, PermissionRepository,
};
use crate::test_support::{
    FakeCacheBackend, FakeLegacyMatrix, FakeRbacStore, action, actor, actor_id, permission, role,
};

use super::{
    MigrationOutcome, MigrationService, MigrationStores, RollbackStepKind, RollbackStepStatus,
    SeedCatalog, SeedRole,
};

struct Fixture {
    store: Arc<FakeRbacStore>,
    router: CompatibilityRouter,
    service: MigrationService,
}

fn catalog() -> SeedCatalog {
    let staff = SeedRole::new("staff", "Staff", RoleCategory::Workplace)
        .and_then(|role| role.granting(&["inventory:read"]))
        .map(|role| role.mapped_from(&["staff"]))
        .unwrap_or_else(|_| unreachable!());
    let cashier = SeedRole::new("cashier", "Cashier", RoleCategory::Workplace)
        .and_then(|role| role.under("staff"))
        .and_then(|role| role.granting(&["sales:create"]))
        .map(|role| role.mapped_from(&["cashier"]))
        .unwrap_or_else(|_| unreachable!());

    SeedCatalog::new(
        vec![permission("inventory:read"), permission("sales:create")],
        vec![staff, cashier],
    )
    .unwrap_or_else(|_| unreachable!())
}

fn matching_matrix() -> FakeLegacyMatrix {
    FakeLegacyMatrix::default()
        .with("inventory:read", &["staff", "cashier"], &[])
        .with("sales:create", &["cashier"], &[])
}

fn fixture_with(matrix: FakeLegacyMatrix, config: MigrationConfig) -> Fixture {
    let store = FakeRbacStore::shared();
    let cache = PermissionCache::new(FakeCacheBackend::shared(), PermissionCacheConfig::default());
    let authorization_config = AuthorizationConfig::default();
    let hierarchy =
        HierarchyResolver::new(store.clone(), cache.clone(), authorization_config.clone());
    let aggregator = PermissionAggregator::new(store.clone(), store.clone(), hierarchy.clone());
    let authorization = AuthorizationService::new(
        store.clone(),
        store.clone(),
        aggregator,
        LegacyEvaluator::new(Arc::new(matrix), "super_admin"),
        cache.clone(),
        authorization_config,
    );
    let router = CompatibilityRouter::new(authorization, store.clone());
    let stores = MigrationStores {
        permissions: store.clone(),
        roles: store.clone(),
        assignments: store.clone(),
        actors: store.clone(),
        state: store.clone(),
    };
    let service = MigrationService::new(
        stores,
        hierarchy,
        router.clone(),
        cache,
        catalog(),
        config,
    );

    Fixture {
        store,
        router,
        service,
    }
}

async fn fixture() -> Fixture {
    let fixture = fixture_with(matching_matrix(), MigrationConfig::default());
    fixture.store.put_actor(actor("u1", "cashier")).await;
    fixture.store.put_actor(actor("u2", "staff")).await;
    fixture.store.put_actor(actor("u3", "visitor")).await;
    fixture
}

async fn state(fixture: &Fixture) -> MigrationState {
    fixture
        .store
        .load_state()
        .await
        .unwrap_or_else(|_| unreachable!())
}

#[tokio::test]
async fn full_run_migrates_actors_and_enables_routing() {
    let fixture = fixture().await;

    let report = fixture
        .service
        .run_migration()
        .await
        .unwrap_or_else(|_| unreachable!());

    assert_eq!(report.outcome, MigrationOutcome::Completed);
    assert_eq!(report.phases_run, MigrationPhase::all().to_vec());
    assert_eq!(report.actors_total, 3);
    let users = report.users.unwrap_or_else(|| unreachable!());
    assert_eq!(users.migrated, 2);
    assert_eq!(users.unmapped, vec![actor_id("u3")]);
    assert!(users.failures.is_empty());
    let validation = report.validation.unwrap_or_else(|| unreachable!());
    assert!(!validation.has_blocking());
    assert_eq!(validation.sampled_actors, 2);

    let state = state(&fixture).await;
    assert_eq!(state.status, MigrationStatus::Completed);
    assert!(state.dynamic_enabled);
    assert_eq!(state.rollout_percentage, 10);
    assert_eq!(fixture.router.strategy().await, RoutingStrategy::Percentage(10));

    let migrated = fixture
        .store
        .find_actor(&actor_id("u1"))
        .await
        .unwrap_or_else(|_| unreachable!())
        .and_then(|actor| actor.migration)
        .unwrap_or_else(|| unreachable!());
    assert_eq!(migrated.role_ids.len(), 1);
    assert_eq!(
        fixture.store.role_named("cashier").await.map(|role| role.hierarchy_level),
        Some(1)
    );

    let again = fixture
        .service
        .run_migration()
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(again.outcome, MigrationOutcome::AlreadyCompleted);
}

#[tokio::test]
async fn seeding_twice_is_idempotent() {
    let fixture = fixture().await;

    let mut seeded = MigrationState::initial();
    let first = fixture
        .service
        .seed(false, &mut seeded)
        .await
        .unwrap_or_else(|_| unreachable!());
    let counts = fixture.store.counts().await;
    let second = fixture
        .service
        .seed(false, &mut seeded)
        .await
        .unwrap_or_else(|_| unreachable!());

    assert_eq!(first.permissions_created, 2);
    assert_eq!(first.roles_created, 2);
    assert_eq!(first.links_created, 2);
    assert!(!second.changed());
    assert_eq!(second.links_existing, 2);
    assert_eq!(fixture.store.counts().await, counts);
    assert_eq!(seeded.seeded_role_ids.len(), 2);
    assert_eq!(seeded.seeded_actions.len(), 2);
}

#[tokio::test]
async fn dry_run_writes_nothing() {
    let fixture = fixture_with(matching_matrix(), MigrationConfig::default().dry_run());
    fixture.store.put_actor(actor("u1", "cashier")).await;
    fixture.store.put_actor(actor("u2", "staff")).await;

    let report = fixture
        .service
        .run_migration()
        .await
        .unwrap_or_else(|_| unreachable!());

    assert_eq!(report.outcome, MigrationOutcome::DryRun);
    assert_eq!(fixture.store.counts().await, (0, 0, 0, 0));
    assert_eq!(state(&fixture).await.status, MigrationStatus::NotStarted);
    assert_eq!(fixture.router.strategy().await, RoutingStrategy::ForceLegacy);

    let seed = report.seed.unwrap_or_else(|| unreachable!());
    assert_eq!(seed.permissions_created, 2);
    assert_eq!(seed.links_created, 2);
    assert_eq!(report.users.map(|users| users.migrated), Some(2));
    assert!(
        report
            .validation
            .is_some_and(|validation| !validation.has_blocking())
    );
    assert!(
        fixture
            .store
            .list_actors()
            .await
            .unwrap_or_else(|_| unreachable!())
            .iter()
            .all(|actor| actor.migration.is_none())
    );
}

#[tokio::test]
async fn per_actor_failures_do_not_abort_the_batch() {
    let fixture = fixture().await;
    fixture.store.fail_migration_for(actor_id("u1")).await;

    let report = fixture
        .service
        .run_migration()
        .await
        .unwrap_or_else(|_| unreachable!());

    let users = report.users.unwrap_or_else(|| unreachable!());
    assert_eq!(users.migrated, 1);
    assert_eq!(users.failures.len(), 1);
    assert_eq!(users.failures[0].actor_id, actor_id("u1"));
    assert_eq!(users.failures[0].category, "internal");
    assert_eq!(report.outcome, MigrationOutcome::Completed);
}

#[tokio::test]
async fn static_permissions_become_direct_grants() {
    let fixture = fixture().await;
    let mut visitor = actor("u4", "visitor");
    visitor.legacy_permissions = vec![
        "inventory:read".to_owned(),
        "not a permission".to_owned(),
        "billing:read".to_owned(),
    ];
    fixture.store.put_actor(visitor).await;

    let report = fixture
        .service
        .run_migration()
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(report.users.map(|users| users.migrated), Some(3));

    let migrated = fixture
        .store
        .find_actor(&actor_id("u4"))
        .await
        .unwrap_or_else(|_| unreachable!())
        .unwrap_or_else(|| unreachable!());
    assert_eq!(migrated.direct_permissions.len(), 1);
    assert_eq!(migrated.direct_permissions[0].as_str(), "inventory:read");
    assert!(migrated.migration.is_some_and(|marker| marker.role_ids.is_empty()));
}

#[tokio::test]
async fn roles_granted_by_an_administrator_are_not_reassigned() {
    let fixture = fixture().await;
    assert!(
        fixture
            .service
            .seed(false, &mut MigrationState::initial())
            .await
            .is_ok()
    );
    let cashier = fixture
        .store
        .role_named("cashier")
        .await
        .map(|role| role.id)
        .unwrap_or_else(|| unreachable!());
    fixture
        .store
        .put_assignment(UserRoleAssignment::new(actor_id("u1"), cashier, None, "admin"))
        .await;

    let first = fixture
        .service
        .migrate_users(false)
        .await
        .unwrap_or_else(|_| unreachable!());
    let second = fixture
        .service
        .migrate_users(false)
        .await
        .unwrap_or_else(|_| unreachable!());

    assert!(first.failures.is_empty());
    assert_eq!(first.migrated, 2);
    assert!(second.failures.is_empty());
    assert_eq!(second.already_migrated, 2);
    let marker = fixture
        .store
        .find_actor(&actor_id("u1"))
        .await
        .unwrap_or_else(|_| unreachable!())
        .and_then(|actor| actor.migration)
        .unwrap_or_else(|| unreachable!());
    assert!(marker.role_ids.is_empty());
    assert_eq!(fixture.store.counts().await.3, 2);

    let rollback = fixture
        .service
        .rollback()
        .await
        .unwrap_or_else(|_| unreachable!());
    assert!(rollback.completed);
    assert_eq!(fixture.store.counts().await.3, 1);
}

#[tokio::test]
async fn rollback_keeps_catalog_records_that_predate_seeding() {
    let fixture = fixture().await;
    fixture.store.put_permission(permission("inventory:read")).await;
    fixture.store.put_role(role("staff")).await;

    let mut state = MigrationState::initial();
    let seed = fixture
        .service
        .seed(false, &mut state)
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(seed.permissions_existing, 1);
    assert_eq!(seed.roles_existing, 1);
    assert_eq!(state.seeded_actions, vec![action("sales:create")]);
    assert_eq!(state.seeded_role_ids.len(), 1);
    assert!(fixture.store.save_state(state).await.is_ok());

    let rollback = fixture
        .service
        .rollback()
        .await
        .unwrap_or_else(|_| unreachable!());
    assert!(rollback.completed);

    let active = |permission: Option<aegis_domain::PermissionDefinition>| {
        permission.map(|permission| permission.is_active)
    };
    assert_eq!(
        active(
            fixture
                .store
                .find_permission(&action("inventory:read"))
                .await
                .unwrap_or_else(|_| unreachable!())
        ),
        Some(true)
    );
    assert_eq!(
        active(
            fixture
                .store
                .find_permission(&action("sales:create"))
                .await
                .unwrap_or_else(|_| unreachable!())
        ),
        Some(false)
    );
    assert_eq!(
        fixture.store.role_named("staff").await.map(|role| role.is_active),
        Some(true)
    );
    assert_eq!(
        fixture.store.role_named("cashier").await.map(|role| role.is_active),
        Some(false)
    );
}

#[tokio::test]
async fn interrupted_run_resumes_after_completed_phases() {
    let fixture = fixture().await;
    assert!(
        fixture
            .service
            .seed(false, &mut MigrationState::initial())
            .await
            .is_ok()
    );
    let mut interrupted = MigrationState::initial();
    interrupted.status = MigrationStatus::Failed;
    interrupted.completed_phases = vec![MigrationPhase::Preparation, MigrationPhase::Seeding];
    assert!(fixture.store.save_state(interrupted).await.is_ok());

    let report = fixture
        .service
        .run_migration()
        .await
        .unwrap_or_else(|_| unreachable!());

    assert_eq!(
        report.phases_skipped,
        vec![MigrationPhase::Preparation, MigrationPhase::Seeding]
    );
    assert_eq!(report.phases_run.first(), Some(&MigrationPhase::UserMigration));
    assert!(report.seed.is_none());
    assert_eq!(report.outcome, MigrationOutcome::Completed);
}

#[tokio::test]
async fn critical_divergence_rolls_back_automatically() {
    let matrix = FakeLegacyMatrix::default()
        .with("inventory:read", &["staff", "cashier"], &[])
        .with("sales:create", &["manager"], &[]);
    let fixture = fixture_with(matrix, MigrationConfig::default());
    fixture.store.put_actor(actor("u1", "cashier")).await;
    fixture.store.put_actor(actor("u2", "staff")).await;

    let report = fixture
        .service
        .run_migration()
        .await
        .unwrap_or_else(|_| unreachable!());

    assert_eq!(
        report.outcome,
        MigrationOutcome::Halted { rolled_back: true }
    );
    assert!(
        report
            .validation
            .as_ref()
            .is_some_and(|validation| validation.has_blocking())
    );
    assert!(!report.phases_run.contains(&MigrationPhase::Activation));

    let state = state(&fixture).await;
    assert_eq!(state.status, MigrationStatus::RolledBack);
    assert!(!state.dynamic_enabled);
    assert_eq!(fixture.router.strategy().await, RoutingStrategy::ForceLegacy);

    let (_, _, _, assignments) = fixture.store.counts().await;
    assert_eq!(assignments, 0);
    assert_eq!(
        fixture.store.role_named("cashier").await.map(|role| role.is_active),
        Some(false)
    );
}

#[tokio::test]
async fn halt_without_auto_rollback_leaves_failed_state() {
    let matrix = FakeLegacyMatrix::default().with("sales:create", &["manager"], &[]);
    let config = MigrationConfig {
        auto_rollback_on_critical: false,
        ..MigrationConfig::default()
    };
    let fixture = fixture_with(matrix, config);
    fixture.store.put_actor(actor("u1", "cashier")).await;

    let report = fixture
        .service
        .run_migration()
        .await
        .unwrap_or_else(|_| unreachable!());

    assert_eq!(
        report.outcome,
        MigrationOutcome::Halted { rolled_back: false }
    );
    assert!(report.rollback.is_none());
    let state = state(&fixture).await;
    assert_eq!(state.status, MigrationStatus::Failed);
    assert!(state.last_error.is_some());
    assert_eq!(
        state.completed_phases,
        vec![
            MigrationPhase::Preparation,
            MigrationPhase::Seeding,
            MigrationPhase::UserMigration
        ]
    );
}

#[tokio::test]
async fn irreversible_failure_aborts_rollback() {
    let fixture = fixture().await;
    assert!(fixture.service.run_migration().await.is_ok());
    fixture.store.fail_migration_for(actor_id("u1")).await;

    let report = fixture
        .service
        .rollback()
        .await
        .unwrap_or_else(|_| unreachable!());

    assert!(!report.completed);
    assert!(matches!(
        report.steps[1].status,
        RollbackStepStatus::Succeeded { .. }
    ));
    assert_eq!(report.steps[2].kind, RollbackStepKind::RevertActorMigrations);
    assert!(matches!(
        report.steps[2].status,
        RollbackStepStatus::Failed { .. }
    ));
    assert!(
        report.steps[3..]
            .iter()
            .all(|step| step.status == RollbackStepStatus::Skipped)
    );

    let state = state(&fixture).await;
    assert_eq!(state.status, MigrationStatus::Failed);
    assert!(!state.dynamic_enabled);
    assert_eq!(
        fixture.store.role_named("staff").await.map(|role| role.is_active),
        Some(true)
    );
}

#[tokio::test]
async fn rerun_after_rollback_reactivates_the_catalog() {
    let fixture = fixture().await;
    assert!(fixture.service.run_migration().await.is_ok());
    let rollback = fixture
        .service
        .rollback()
        .await
        .unwrap_or_else(|_| unreachable!());
    assert!(rollback.completed);
    assert_eq!(state(&fixture).await.status, MigrationStatus::RolledBack);

    let report = fixture
        .service
        .run_migration()
        .await
        .unwrap_or_else(|_| unreachable!());

    assert_eq!(report.outcome, MigrationOutcome::Completed);
    let seed = report.seed.unwrap_or_else(|| unreachable!());
    assert_eq!(seed.roles_reactivated, 2);
    assert_eq!(seed.permissions_reactivated, 2);
    assert_eq!(seed.roles_created, 0);
    assert_eq!(report.users.map(|users| users.migrated), Some(2));
}

#[tokio::test]
async fn rollback_plan_marks_only_actor_revert_irreversible() {
    let fixture = fixture().await;

    let plan = fixture
        .service
        .plan_rollback()
        .await
        .unwrap_or_else(|_| unreachable!());

    assert_eq!(plan.steps.len(), 6);
    assert_eq!(plan.steps[0].kind, RollbackStepKind::DisableDynamicRouting);
    assert_eq!(plan.steps[5].kind, RollbackStepKind::ResetMigrationState);
    let irreversible: Vec<_> = plan.steps.iter().filter(|step| !step.reversible).collect();
    assert_eq!(irreversible.len(), 1);
    assert_eq!(irreversible[0].kind, RollbackStepKind::RevertActorMigrations);
    assert_eq!(
        plan.estimated_seconds,
        plan.steps.iter().map(|step| step.estimated_seconds).sum::<u64>()
    );
}

#[tokio::test]
async fn rollout_percentage_applies_once_enabled() {
    let fixture = fixture().await;

    assert!(fixture.service.set_rollout_percentage(101).await.is_err());
    let stored = fixture
        .service
        .set_rollout_percentage(40)
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(stored.rollout_percentage, 40);
    assert_eq!(fixture.router.strategy().await, RoutingStrategy::ForceLegacy);

    assert!(fixture.service.run_migration().await.is_ok());
    assert!(fixture.service.set_rollout_percentage(75).await.is_ok());
    assert_eq!(fixture.router.strategy().await, RoutingStrategy::Percentage(75));

    let status = fixture
        .service
        .status()
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(status.actors_total, 3);
    assert_eq!(status.actors_migrated, 2);
    assert_eq!(status.state.rollout_percentage, 75);
}

#[tokio::test]
async fn restore_routing_follows_persisted_state() {
    let fixture = fixture().await;
    let mut enabled = MigrationState::initial();
    enabled.dynamic_enabled = true;
    enabled.rollout_percentage = 30;
    assert!(fixture.store.save_state(enabled).await.is_ok());

    let strategy = fixture
        .service
        .restore_routing()
        .await
        .unwrap_or_else(|_| unreachable!());

    assert_eq!(strategy, RoutingStrategy::Percentage(30));
    assert_eq!(fixture.router.strategy().await, RoutingStrategy::Percentage(30));
}
