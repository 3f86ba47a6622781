use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use aegis_application::{
    ActorMigrationPlan, ActorRepository, MIGRATION_ASSIGNER, MigrationState,
    MigrationStateRepository, PermissionRepository, RoleAssignmentRepository, RoleRepository,
};
use aegis_core::{AppError, AppResult, WorkspaceId};
use aegis_domain::{
    ActorId, ActorMigrationMarker, ActorRecord, AssignmentId, PermissionAction,
    PermissionDefinition, RoleDefinition, RoleId, RoleName, RolePermissionGrant,
    UserRoleAssignment,
};

#[derive(Debug, Default)]
struct StoreState {
    permissions: HashMap<PermissionAction, PermissionDefinition>,
    roles: HashMap<RoleId, RoleDefinition>,
    role_permissions: HashMap<(RoleId, PermissionAction), RolePermissionGrant>,
    assignments: Vec<UserRoleAssignment>,
    actors: HashMap<ActorId, ActorRecord>,
    migration_state: Option<MigrationState>,
}

impl StoreState {
    fn ensure_slot_free(
        &self,
        assignment: &UserRoleAssignment,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        if self.assignments.iter().any(|existing| {
            existing.occupies(
                &assignment.actor_id,
                assignment.role_id,
                assignment.workspace_id,
                now,
            )
        }) {
            return Err(AppError::Conflict(format!(
                "actor '{}' already holds role '{}' in that scope",
                assignment.actor_id, assignment.role_id
            )));
        }

        Ok(())
    }
}

/// In-memory store implementing every persistence port of the engine.
///
/// One lock guards the whole state, so multi-record writes such as an actor
/// migration are applied atomically.
#[derive(Debug, Default)]
pub struct InMemoryRbacStore {
    state: RwLock<StoreState>,
}

impl InMemoryRbacStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store whose user directory holds the given actors.
    ///
    /// Later duplicates of an actor id replace earlier ones.
    #[must_use]
    pub fn with_actors(actors: Vec<ActorRecord>) -> Self {
        let store = StoreState {
            actors: actors
                .into_iter()
                .map(|actor| (actor.id.clone(), actor))
                .collect(),
            ..StoreState::default()
        };

        Self {
            state: RwLock::new(store),
        }
    }

    /// Inserts or replaces one actor in the user directory.
    pub async fn upsert_actor(&self, actor: ActorRecord) {
        self.state
            .write()
            .await
            .actors
            .insert(actor.id.clone(), actor);
    }
}

/// Parses a JSON array of actor records.
pub fn parse_actor_fixture(json: &str) -> AppResult<Vec<ActorRecord>> {
    serde_json::from_str(json)
        .map_err(|error| AppError::Validation(format!("invalid actor fixture: {error}")))
}

#[async_trait]
impl PermissionRepository for InMemoryRbacStore {
    async fn list_permissions(&self) -> AppResult<Vec<PermissionDefinition>> {
        let state = self.state.read().await;
        let mut permissions: Vec<PermissionDefinition> =
            state.permissions.values().cloned().collect();
        permissions.sort_by(|left, right| left.action.cmp(&right.action));
        Ok(permissions)
    }

    async fn find_permission(
        &self,
        action: &PermissionAction,
    ) -> AppResult<Option<PermissionDefinition>> {
        Ok(self.state.read().await.permissions.get(action).cloned())
    }

    async fn insert_permission(&self, permission: PermissionDefinition) -> AppResult<()> {
        let mut state = self.state.write().await;
        if state.permissions.contains_key(&permission.action) {
            return Err(AppError::Conflict(format!(
                "permission '{}' already exists",
                permission.action
            )));
        }

        state
            .permissions
            .insert(permission.action.clone(), permission);
        Ok(())
    }

    async fn set_permission_active(
        &self,
        action: &PermissionAction,
        is_active: bool,
    ) -> AppResult<()> {
        let mut state = self.state.write().await;
        let permission = state
            .permissions
            .get_mut(action)
            .ok_or_else(|| AppError::NotFound(format!("permission '{action}' not found")))?;
        permission.is_active = is_active;
        Ok(())
    }
}

#[async_trait]
impl RoleRepository for InMemoryRbacStore {
    async fn list_roles(&self) -> AppResult<Vec<RoleDefinition>> {
        let state = self.state.read().await;
        let mut roles: Vec<RoleDefinition> = state.roles.values().cloned().collect();
        roles.sort_by(|left, right| {
            left.hierarchy_level
                .cmp(&right.hierarchy_level)
                .then_with(|| left.name.cmp(&right.name))
        });
        Ok(roles)
    }

    async fn find_role(&self, role_id: RoleId) -> AppResult<Option<RoleDefinition>> {
        Ok(self.state.read().await.roles.get(&role_id).cloned())
    }

    async fn find_role_by_name(&self, name: &RoleName) -> AppResult<Option<RoleDefinition>> {
        Ok(self
            .state
            .read()
            .await
            .roles
            .values()
            .find(|role| &role.name == name)
            .cloned())
    }

    async fn insert_role(&self, role: RoleDefinition) -> AppResult<()> {
        let mut state = self.state.write().await;
        if state.roles.contains_key(&role.id)
            || state.roles.values().any(|existing| existing.name == role.name)
        {
            return Err(AppError::Conflict(format!(
                "role '{}' already exists",
                role.name.as_str()
            )));
        }

        state.roles.insert(role.id, role);
        Ok(())
    }

    async fn update_role(&self, role: RoleDefinition) -> AppResult<()> {
        let mut state = self.state.write().await;
        if state
            .roles
            .values()
            .any(|existing| existing.id != role.id && existing.name == role.name)
        {
            return Err(AppError::Conflict(format!(
                "role '{}' already exists",
                role.name.as_str()
            )));
        }

        let existing = state
            .roles
            .get_mut(&role.id)
            .ok_or_else(|| AppError::NotFound(format!("role '{}' not found", role.id)))?;
        *existing = role;
        Ok(())
    }

    async fn set_hierarchy_level(&self, role_id: RoleId, hierarchy_level: u32) -> AppResult<()> {
        let mut state = self.state.write().await;
        let role = state
            .roles
            .get_mut(&role_id)
            .ok_or_else(|| AppError::NotFound(format!("role '{role_id}' not found")))?;
        role.hierarchy_level = hierarchy_level;
        Ok(())
    }

    async fn list_role_permissions(
        &self,
        role_id: RoleId,
    ) -> AppResult<Vec<RolePermissionGrant>> {
        let state = self.state.read().await;
        let mut grants: Vec<RolePermissionGrant> = state
            .role_permissions
            .values()
            .filter(|grant| grant.role_id == role_id)
            .cloned()
            .collect();
        grants.sort_by(|left, right| left.action.cmp(&right.action));
        Ok(grants)
    }

    async fn list_all_role_permissions(&self) -> AppResult<Vec<RolePermissionGrant>> {
        Ok(self
            .state
            .read()
            .await
            .role_permissions
            .values()
            .cloned()
            .collect())
    }

    async fn upsert_role_permission(&self, grant: RolePermissionGrant) -> AppResult<()> {
        let mut state = self.state.write().await;
        if !state.roles.contains_key(&grant.role_id) {
            return Err(AppError::NotFound(format!(
                "role '{}' not found",
                grant.role_id
            )));
        }

        state
            .role_permissions
            .insert((grant.role_id, grant.action.clone()), grant);
        Ok(())
    }

    async fn remove_role_permission(
        &self,
        role_id: RoleId,
        action: &PermissionAction,
    ) -> AppResult<bool> {
        Ok(self
            .state
            .write()
            .await
            .role_permissions
            .remove(&(role_id, action.clone()))
            .is_some())
    }
}

#[async_trait]
impl RoleAssignmentRepository for InMemoryRbacStore {
    async fn list_assignments_for_actor(
        &self,
        actor_id: &ActorId,
    ) -> AppResult<Vec<UserRoleAssignment>> {
        Ok(self
            .state
            .read()
            .await
            .assignments
            .iter()
            .filter(|assignment| &assignment.actor_id == actor_id)
            .cloned()
            .collect())
    }

    async fn list_assignments_for_roles(
        &self,
        role_ids: &[RoleId],
    ) -> AppResult<Vec<UserRoleAssignment>> {
        Ok(self
            .state
            .read()
            .await
            .assignments
            .iter()
            .filter(|assignment| role_ids.contains(&assignment.role_id))
            .cloned()
            .collect())
    }

    async fn list_all_assignments(&self) -> AppResult<Vec<UserRoleAssignment>> {
        Ok(self.state.read().await.assignments.clone())
    }

    async fn insert_assignment(&self, assignment: UserRoleAssignment) -> AppResult<()> {
        let mut state = self.state.write().await;
        state.ensure_slot_free(&assignment, Utc::now())?;
        state.assignments.push(assignment);
        Ok(())
    }

    async fn revoke_assignment(
        &self,
        actor_id: &ActorId,
        role_id: RoleId,
        workspace_id: Option<WorkspaceId>,
        revoked_by: &str,
        revoked_at: DateTime<Utc>,
    ) -> AppResult<UserRoleAssignment> {
        let mut state = self.state.write().await;
        let assignment = state
            .assignments
            .iter_mut()
            .find(|assignment| assignment.occupies(actor_id, role_id, workspace_id, revoked_at))
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "actor '{actor_id}' does not hold role '{role_id}' in that scope"
                ))
            })?;

        assignment.is_active = false;
        assignment.revoked_by = Some(revoked_by.to_owned());
        assignment.revoked_at = Some(revoked_at);
        Ok(assignment.clone())
    }

    async fn delete_assignment(&self, assignment_id: AssignmentId) -> AppResult<()> {
        self.state
            .write()
            .await
            .assignments
            .retain(|assignment| assignment.id != assignment_id);
        Ok(())
    }
}

#[async_trait]
impl ActorRepository for InMemoryRbacStore {
    async fn find_actor(&self, actor_id: &ActorId) -> AppResult<Option<ActorRecord>> {
        Ok(self.state.read().await.actors.get(actor_id).cloned())
    }

    async fn list_actors(&self) -> AppResult<Vec<ActorRecord>> {
        let state = self.state.read().await;
        let mut actors: Vec<ActorRecord> = state.actors.values().cloned().collect();
        actors.sort_by(|left, right| left.id.cmp(&right.id));
        Ok(actors)
    }

    async fn apply_actor_migration(&self, plan: ActorMigrationPlan) -> AppResult<()> {
        let mut state = self.state.write().await;
        let Some(actor) = state.actors.get(&plan.actor_id) else {
            return Err(AppError::NotFound(format!(
                "actor '{}' not found",
                plan.actor_id
            )));
        };
        if actor.migration.is_some() {
            return Err(AppError::Conflict(format!(
                "actor '{}' is already migrated",
                plan.actor_id
            )));
        }

        let added: Vec<PermissionAction> = plan
            .direct_permissions
            .iter()
            .filter(|action| !actor.direct_permissions.contains(action))
            .cloned()
            .collect();

        let now = Utc::now();
        for assignment in &plan.assignments {
            if assignment.actor_id != plan.actor_id {
                return Err(AppError::Validation(format!(
                    "migration plan for '{}' contains an assignment for '{}'",
                    plan.actor_id, assignment.actor_id
                )));
            }
            if !state.roles.contains_key(&assignment.role_id) {
                return Err(AppError::NotFound(format!(
                    "role '{}' not found",
                    assignment.role_id
                )));
            }
            state.ensure_slot_free(assignment, now)?;
        }

        let role_ids: Vec<RoleId> = plan
            .assignments
            .iter()
            .map(|assignment| assignment.role_id)
            .collect();
        state.assignments.extend(plan.assignments);

        let actor = state
            .actors
            .get_mut(&plan.actor_id)
            .ok_or_else(|| AppError::NotFound(format!("actor '{}' not found", plan.actor_id)))?;
        actor.direct_permissions.extend(added.iter().cloned());
        actor.migration = Some(ActorMigrationMarker {
            migrated_at: plan.migrated_at,
            role_ids,
            added_direct_permissions: added,
        });

        tracing::debug!(actor_id = %plan.actor_id, "actor migration applied");
        Ok(())
    }

    async fn revert_actor_migration(&self, actor_id: &ActorId) -> AppResult<bool> {
        let mut state = self.state.write().await;
        let Some(marker) = state
            .actors
            .get_mut(actor_id)
            .and_then(|actor| actor.migration.take())
        else {
            return Ok(false);
        };

        state.assignments.retain(|assignment| {
            !(&assignment.actor_id == actor_id
                && marker.role_ids.contains(&assignment.role_id)
                && assignment.assigned_by == MIGRATION_ASSIGNER)
        });
        if let Some(actor) = state.actors.get_mut(actor_id) {
            actor
                .direct_permissions
                .retain(|action| !marker.added_direct_permissions.contains(action));
        }

        tracing::debug!(actor_id = %actor_id, "actor migration reverted");
        Ok(true)
    }
}

#[async_trait]
impl MigrationStateRepository for InMemoryRbacStore {
    async fn load_state(&self) -> AppResult<MigrationState> {
        Ok(self
            .state
            .read()
            .await
            .migration_state
            .clone()
            .unwrap_or_default())
    }

    async fn save_state(&self, state: MigrationState) -> AppResult<()> {
        self.state.write().await.migration_state = Some(state);
        Ok(())
    }
}
