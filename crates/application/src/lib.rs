//! Application services and ports of the dynamic access control engine.

#![forbid(unsafe_code)]

mod authorization_service;
mod compatibility_router;
mod config;
mod consistency_service;
mod hierarchy_resolver;
mod migration_service;
mod permission_aggregator;
mod permission_cache;
mod rbac_ports;
mod role_admin_service;

#[cfg(test)]
mod test_support;

/// Assigner recorded on user-role rows written by the user migration.
///
/// Rollback deletes exactly the rows carrying it.
pub const MIGRATION_ASSIGNER: &str = "system:migration";

pub use authorization_service::{
    AuthorizationService, EffectivePermissions, LegacyDecision, LegacyEvaluator, PermissionCheck,
    RoleSuggestion,
};
pub use compatibility_router::{
    CompatibilityRouter, ConsistencyMismatch, ConsistencyReport, EvaluationPath, RoutedDecision,
    RouterMetrics, RoutingStrategy,
};
pub use config::{AuthorizationConfig, MigrationConfig, PermissionCacheConfig};
pub use consistency_service::{
    ConsistencyIssue, ConsistencyIssueKind, ConsistencyService, ConsistencySweepReport,
};
pub use hierarchy_resolver::{
    HierarchyConflict, HierarchyIssue, HierarchyPermission, HierarchyResolver, RoleHolding,
    RoleHoldingKind, RolePermissionSet,
};
pub use migration_service::{
    ActorMigrationFailure, MigrationFinding, MigrationOutcome, MigrationReport, MigrationService,
    MigrationStatusReport, MigrationStores, RollbackPlan, RollbackReport, RollbackStep,
    RollbackStepKind, RollbackStepOutcome, RollbackStepStatus, SeedCatalog, SeedReport, SeedRole,
    UserMigrationReport, ValidationReport,
};
pub use permission_aggregator::{
    AggregatedPermissions, ConflictingGrant, PermissionAggregator, PermissionCandidate,
    PermissionConflict, ResolvedPermission, UnsatisfiedDependency,
};
pub use permission_cache::{CacheKey, CacheMetrics, NoopPermissionCacheBackend, PermissionCache};
pub use rbac_ports::{
    ActorMigrationPlan, ActorRepository, LegacyPermissionMatrix, LegacyRequirement,
    MigrationState, MigrationStateRepository, PermissionCacheBackend, PermissionRepository,
    RoleAssignmentRepository, RoleRepository, key_matches_pattern,
};
pub use role_admin_service::{
    AssignRoleInput, BulkAssignmentFailure, BulkAssignmentReport, CreateRoleInput,
    RoleAdminService, RolePermissionOptions, UpdateRoleInput,
};
