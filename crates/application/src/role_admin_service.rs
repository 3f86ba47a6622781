mod assignments;
mod permissions;
mod roles;


use std::collections::BTreeSet;
use std::sync::Arc;

use aegis_core::{AppError, AppResult, WorkspaceId};
use aegis_domain::{ActorId, PermissionConditions, RoleCategory, RoleDefinition, RoleId};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::hierarchy_resolver::HierarchyResolver;
use crate::permission_cache::PermissionCache;
use crate::rbac_ports::{
    ActorRepository, PermissionRepository, RoleAssignmentRepository, RoleRepository,
};

/// Input for creating a role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRoleInput {
    /// Unique snake-case name.
    pub name: String,
    /// Human-readable name.
    pub display_name: String,
    /// Role category.
    pub category: RoleCategory,
    /// Optional parent role.
    pub parent_role_id: Option<RoleId>,
    /// Static compatibility permissions; `*` or `resource:operation` entries.
    pub legacy_permissions: Vec<String>,
    /// Optional exclusivity group.
    pub exclusivity_group: Option<String>,
}

/// Partial update of a role. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateRoleInput {
    /// New display name.
    pub display_name: Option<String>,
    /// New parent; `Some(None)` detaches the role.
    pub parent_role_id: Option<Option<RoleId>>,
    /// Replacement static compatibility permissions.
    pub legacy_permissions: Option<Vec<String>>,
    /// New exclusivity group; `Some(None)` clears it.
    pub exclusivity_group: Option<Option<String>>,
}

/// Options attached to a role-permission link.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RolePermissionOptions {
    /// Conditions under which the link applies.
    pub conditions: PermissionConditions,
    /// Tie-breaking priority.
    pub priority: i32,
}

/// Input for assigning a role to an actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignRoleInput {
    /// Receiving actor.
    pub actor_id: ActorId,
    /// Assigned role.
    pub role_id: RoleId,
    /// Workspace scope; `None` is global.
    pub workspace_id: Option<WorkspaceId>,
    /// Expiry for temporary assignments.
    pub expires_at: Option<DateTime<Utc>>,
    /// Who performs the assignment.
    pub assigned_by: String,
}

/// Per-actor failure of a bulk assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkAssignmentFailure {
    /// Actor that was not assigned.
    pub actor_id: ActorId,
    /// Error category.
    pub category: String,
    /// Error text.
    pub error: String,
}

/// Outcome of a bulk assignment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkAssignmentReport {
    /// Actors that received the role.
    pub assigned: Vec<ActorId>,
    /// Actors that did not.
    pub failures: Vec<BulkAssignmentFailure>,
}

/// Administrative mutations of roles, links and assignments.
///
/// Every mutation finishes its cache invalidation before returning success.
#[derive(Clone)]
pub struct RoleAdminService {
    permission_repository: Arc<dyn PermissionRepository>,
    role_repository: Arc<dyn RoleRepository>,
    assignment_repository: Arc<dyn RoleAssignmentRepository>,
    actor_repository: Arc<dyn ActorRepository>,
    hierarchy: HierarchyResolver,
    cache: PermissionCache,
}

impl RoleAdminService {
    /// Creates the admin service.
    #[must_use]
    pub fn new(
        permission_repository: Arc<dyn PermissionRepository>,
        role_repository: Arc<dyn RoleRepository>,
        assignment_repository: Arc<dyn RoleAssignmentRepository>,
        actor_repository: Arc<dyn ActorRepository>,
        hierarchy: HierarchyResolver,
        cache: PermissionCache,
    ) -> Self {
        Self {
            permission_repository,
            role_repository,
            assignment_repository,
            actor_repository,
            hierarchy,
            cache,
        }
    }

    async fn require_role(&self, role_id: RoleId) -> AppResult<RoleDefinition> {
        self.role_repository
            .find_role(role_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("role '{role_id}' not found")))
    }

    async fn require_active_role(&self, role_id: RoleId) -> AppResult<RoleDefinition> {
        let role = self.require_role(role_id).await?;
        if !role.is_active {
            return Err(AppError::Validation(format!(
                "role '{}' is deactivated",
                role.name.as_str()
            )));
        }

        Ok(role)
    }

    /// Drops cached sets of the role's chain and every actor holding an affected role.
    async fn invalidate_role_impact(&self, role_id: RoleId) -> AppResult<()> {
        self.hierarchy.clear_hierarchy_cache(role_id).await?;

        let mut affected_roles = vec![role_id];
        affected_roles.extend(
            self.hierarchy
                .descendants(role_id)
                .await?
                .into_iter()
                .map(|role| role.id),
        );

        let actors: BTreeSet<ActorId> = self
            .assignment_repository
            .list_assignments_for_roles(&affected_roles)
            .await?
            .into_iter()
            .filter(|assignment| assignment.is_active)
            .map(|assignment| assignment.actor_id)
            .collect();
        for actor_id in &actors {
            self.cache.invalidate_user_cache(actor_id, None).await;
        }

        tracing::debug!(role_id = %role_id, actors = actors.len(), "invalidated role impact");
        Ok(())
    }
}
