//! Domain records and invariants for the dynamic access control engine.

#![forbid(unsafe_code)]

mod actor;
mod assignment;
mod context;
mod migration;
mod permission;
mod role;
mod role_permission;
mod source;

pub use actor::{ActorId, ActorMigrationMarker, ActorRecord, ActorStatus, LicenseStatus};
pub use assignment::{AssignmentId, UserRoleAssignment};
pub use context::EvaluationContext;
pub use migration::{FindingCategory, FindingSeverity, MigrationPhase, MigrationStatus};
pub use permission::{
    LEGACY_WILDCARD, PermissionAction, PermissionDefinition, RiskLevel, SubscriptionTier,
};
pub use role::{RoleCategory, RoleDefinition, RoleId, RoleName};
pub use role_permission::{PermissionConditions, RolePermissionGrant, TimeWindow};
pub use source::PermissionSource;
