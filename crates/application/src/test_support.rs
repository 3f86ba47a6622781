use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use aegis_core::{AppError, AppResult, WorkspaceId};
use aegis_domain::{
    ActorId, ActorMigrationMarker, ActorRecord, AssignmentId, PermissionAction,
    PermissionDefinition, RoleDefinition, RoleId, RoleName, RolePermissionGrant,
    UserRoleAssignment,
};

use crate::rbac_ports::{
    ActorMigrationPlan, ActorRepository, LegacyPermissionMatrix, LegacyRequirement,
    MigrationState, MigrationStateRepository, PermissionCacheBackend, PermissionRepository,
    RoleAssignmentRepository, RoleRepository, key_matches_pattern,
};

pub(crate) fn action(value: &str) -> PermissionAction {
    PermissionAction::parse(value).unwrap_or_else(|_| unreachable!())
}

pub(crate) fn actor_id(value: &str) -> ActorId {
    ActorId::new(value).unwrap_or_else(|_| unreachable!())
}

pub(crate) fn permission(value: &str) -> PermissionDefinition {
    PermissionDefinition::new(value, "general", aegis_domain::RiskLevel::Low)
        .unwrap_or_else(|_| unreachable!())
}

pub(crate) fn role(name: &str) -> RoleDefinition {
    RoleDefinition::new(name, name, aegis_domain::RoleCategory::Custom)
        .unwrap_or_else(|_| unreachable!())
}

pub(crate) fn actor(id: &str, static_role: &str) -> ActorRecord {
    ActorRecord::new(id, static_role).unwrap_or_else(|_| unreachable!())
}

#[derive(Default)]
struct StoreState {
    permissions: Vec<PermissionDefinition>,
    roles: Vec<RoleDefinition>,
    role_permissions: Vec<RolePermissionGrant>,
    assignments: Vec<UserRoleAssignment>,
    actors: Vec<ActorRecord>,
    migration_state: Option<MigrationState>,
}

impl StoreState {
    fn ensure_slot_free(&self, assignment: &UserRoleAssignment) -> AppResult<()> {
        let now = Utc::now();
        if self.assignments.iter().any(|existing| {
            existing.occupies(
                &assignment.actor_id,
                assignment.role_id,
                assignment.workspace_id,
                now,
            )
        }) {
            return Err(AppError::Conflict(format!(
                "actor '{}' already holds role '{}'",
                assignment.actor_id, assignment.role_id
            )));
        }
        Ok(())
    }

    fn role_mut(&mut self, role_id: RoleId) -> AppResult<&mut RoleDefinition> {
        self.roles
            .iter_mut()
            .find(|role| role.id == role_id)
            .ok_or_else(|| AppError::NotFound(format!("role '{role_id}' not found")))
    }
}

/// In-memory store implementing every persistence port.
#[derive(Default)]
pub(crate) struct FakeRbacStore {
    state: Mutex<StoreState>,
    failing_actors: Mutex<Vec<ActorId>>,
    role_reads: AtomicUsize,
}

impl FakeRbacStore {
    pub(crate) fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) async fn put_permission(&self, permission: PermissionDefinition) {
        self.state.lock().await.permissions.push(permission);
    }

    pub(crate) async fn put_role(&self, role: RoleDefinition) -> RoleId {
        let role_id = role.id;
        self.state.lock().await.roles.push(role);
        role_id
    }

    pub(crate) async fn put_role_permission(&self, grant: RolePermissionGrant) {
        self.state.lock().await.role_permissions.push(grant);
    }

    pub(crate) async fn put_assignment(&self, assignment: UserRoleAssignment) {
        self.state.lock().await.assignments.push(assignment);
    }

    pub(crate) async fn put_actor(&self, actor: ActorRecord) {
        let mut state = self.state.lock().await;
        state.actors.retain(|existing| existing.id != actor.id);
        state.actors.push(actor);
    }

    pub(crate) async fn fail_migration_for(&self, actor_id: ActorId) {
        self.failing_actors.lock().await.push(actor_id);
    }

    pub(crate) async fn counts(&self) -> (usize, usize, usize, usize) {
        let state = self.state.lock().await;
        (
            state.permissions.len(),
            state.roles.len(),
            state.role_permissions.len(),
            state.assignments.len(),
        )
    }

    pub(crate) async fn role_named(&self, name: &str) -> Option<RoleDefinition> {
        self.state
            .lock()
            .await
            .roles
            .iter()
            .find(|role| role.name.as_str() == name)
            .cloned()
    }

    pub(crate) fn role_reads(&self) -> usize {
        self.role_reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PermissionRepository for FakeRbacStore {
    async fn list_permissions(&self) -> AppResult<Vec<PermissionDefinition>> {
        Ok(self.state.lock().await.permissions.clone())
    }

    async fn find_permission(
        &self,
        action: &PermissionAction,
    ) -> AppResult<Option<PermissionDefinition>> {
        Ok(self
            .state
            .lock()
            .await
            .permissions
            .iter()
            .find(|permission| &permission.action == action)
            .cloned())
    }

    async fn insert_permission(&self, permission: PermissionDefinition) -> AppResult<()> {
        let mut state = self.state.lock().await;
        if state
            .permissions
            .iter()
            .any(|existing| existing.action == permission.action)
        {
            return Err(AppError::Conflict(format!(
                "permission '{}' already exists",
                permission.action
            )));
        }
        state.permissions.push(permission);
        Ok(())
    }

    async fn set_permission_active(
        &self,
        action: &PermissionAction,
        is_active: bool,
    ) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let permission = state
            .permissions
            .iter_mut()
            .find(|permission| &permission.action == action)
            .ok_or_else(|| AppError::NotFound(format!("permission '{action}' not found")))?;
        permission.is_active = is_active;
        Ok(())
    }
}

#[async_trait]
impl RoleRepository for FakeRbacStore {
    async fn list_roles(&self) -> AppResult<Vec<RoleDefinition>> {
        self.role_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.lock().await.roles.clone())
    }

    async fn find_role(&self, role_id: RoleId) -> AppResult<Option<RoleDefinition>> {
        Ok(self
            .state
            .lock()
            .await
            .roles
            .iter()
            .find(|role| role.id == role_id)
            .cloned())
    }

    async fn find_role_by_name(&self, name: &RoleName) -> AppResult<Option<RoleDefinition>> {
        Ok(self
            .state
            .lock()
            .await
            .roles
            .iter()
            .find(|role| &role.name == name)
            .cloned())
    }

    async fn insert_role(&self, role: RoleDefinition) -> AppResult<()> {
        let mut state = self.state.lock().await;
        if state.roles.iter().any(|existing| existing.name == role.name) {
            return Err(AppError::Conflict(format!(
                "role '{}' already exists",
                role.name.as_str()
            )));
        }
        state.roles.push(role);
        Ok(())
    }

    async fn update_role(&self, role: RoleDefinition) -> AppResult<()> {
        let role_id = role.id;
        *self.state.lock().await.role_mut(role_id)? = role;
        Ok(())
    }

    async fn set_hierarchy_level(&self, role_id: RoleId, hierarchy_level: u32) -> AppResult<()> {
        self.state.lock().await.role_mut(role_id)?.hierarchy_level = hierarchy_level;
        Ok(())
    }

    async fn list_role_permissions(
        &self,
        role_id: RoleId,
    ) -> AppResult<Vec<RolePermissionGrant>> {
        Ok(self
            .state
            .lock()
            .await
            .role_permissions
            .iter()
            .filter(|grant| grant.role_id == role_id)
            .cloned()
            .collect())
    }

    async fn list_all_role_permissions(&self) -> AppResult<Vec<RolePermissionGrant>> {
        Ok(self.state.lock().await.role_permissions.clone())
    }

    async fn upsert_role_permission(&self, grant: RolePermissionGrant) -> AppResult<()> {
        let mut state = self.state.lock().await;
        state.role_mut(grant.role_id)?;
        state.role_permissions.retain(|existing| {
            !(existing.role_id == grant.role_id && existing.action == grant.action)
        });
        state.role_permissions.push(grant);
        Ok(())
    }

    async fn remove_role_permission(
        &self,
        role_id: RoleId,
        action: &PermissionAction,
    ) -> AppResult<bool> {
        let mut state = self.state.lock().await;
        let before = state.role_permissions.len();
        state
            .role_permissions
            .retain(|grant| !(grant.role_id == role_id && &grant.action == action));
        Ok(state.role_permissions.len() != before)
    }
}

#[async_trait]
impl RoleAssignmentRepository for FakeRbacStore {
    async fn list_assignments_for_actor(
        &self,
        actor_id: &ActorId,
    ) -> AppResult<Vec<UserRoleAssignment>> {
        Ok(self
            .state
            .lock()
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
            .lock()
            .await
            .assignments
            .iter()
            .filter(|assignment| role_ids.contains(&assignment.role_id))
            .cloned()
            .collect())
    }

    async fn list_all_assignments(&self) -> AppResult<Vec<UserRoleAssignment>> {
        Ok(self.state.lock().await.assignments.clone())
    }

    async fn insert_assignment(&self, assignment: UserRoleAssignment) -> AppResult<()> {
        let mut state = self.state.lock().await;
        state.ensure_slot_free(&assignment)?;
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
        let mut state = self.state.lock().await;
        let assignment = state
            .assignments
            .iter_mut()
            .find(|assignment| assignment.occupies(actor_id, role_id, workspace_id, revoked_at))
            .ok_or_else(|| {
                AppError::NotFound(format!("actor '{actor_id}' does not hold role '{role_id}'"))
            })?;
        assignment.is_active = false;
        assignment.revoked_by = Some(revoked_by.to_owned());
        assignment.revoked_at = Some(revoked_at);
        Ok(assignment.clone())
    }

    async fn delete_assignment(&self, assignment_id: AssignmentId) -> AppResult<()> {
        self.state
            .lock()
            .await
            .assignments
            .retain(|assignment| assignment.id != assignment_id);
        Ok(())
    }
}

#[async_trait]
impl ActorRepository for FakeRbacStore {
    async fn find_actor(&self, actor_id: &ActorId) -> AppResult<Option<ActorRecord>> {
        Ok(self
            .state
            .lock()
            .await
            .actors
            .iter()
            .find(|actor| &actor.id == actor_id)
            .cloned())
    }

    async fn list_actors(&self) -> AppResult<Vec<ActorRecord>> {
        Ok(self.state.lock().await.actors.clone())
    }

    async fn apply_actor_migration(&self, plan: ActorMigrationPlan) -> AppResult<()> {
        if self.failing_actors.lock().await.contains(&plan.actor_id) {
            return Err(AppError::Internal(format!(
                "failed to migrate actor '{}': injected failure",
                plan.actor_id
            )));
        }

        let mut state = self.state.lock().await;
        let actor_index = state
            .actors
            .iter()
            .position(|actor| actor.id == plan.actor_id)
            .ok_or_else(|| AppError::NotFound(format!("actor '{}' not found", plan.actor_id)))?;

        for assignment in &plan.assignments {
            state.ensure_slot_free(assignment)?;
        }

        let mut added = Vec::new();
        for action in &plan.direct_permissions {
            if !state.actors[actor_index].direct_permissions.contains(action) {
                added.push(action.clone());
            }
        }

        let role_ids = plan
            .assignments
            .iter()
            .map(|assignment| assignment.role_id)
            .collect();
        state.assignments.extend(plan.assignments);
        let actor = &mut state.actors[actor_index];
        actor.direct_permissions.extend(added.iter().cloned());
        actor.migration = Some(ActorMigrationMarker {
            migrated_at: plan.migrated_at,
            role_ids,
            added_direct_permissions: added,
        });
        Ok(())
    }

    async fn revert_actor_migration(&self, actor_id: &ActorId) -> AppResult<bool> {
        if self.failing_actors.lock().await.contains(actor_id) {
            return Err(AppError::Internal(format!(
                "failed to revert actor '{actor_id}': injected failure"
            )));
        }

        let mut state = self.state.lock().await;
        let Some(actor_index) = state.actors.iter().position(|actor| &actor.id == actor_id) else {
            return Ok(false);
        };
        let Some(marker) = state.actors[actor_index].migration.take() else {
            return Ok(false);
        };

        state.assignments.retain(|assignment| {
            !(&assignment.actor_id == actor_id
                && marker.role_ids.contains(&assignment.role_id)
                && assignment.assigned_by == crate::MIGRATION_ASSIGNER)
        });
        state.actors[actor_index]
            .direct_permissions
            .retain(|action| !marker.added_direct_permissions.contains(action));
        Ok(true)
    }
}

#[async_trait]
impl MigrationStateRepository for FakeRbacStore {
    async fn load_state(&self) -> AppResult<MigrationState> {
        Ok(self
            .state
            .lock()
            .await
            .migration_state
            .clone()
            .unwrap_or_default())
    }

    async fn save_state(&self, state: MigrationState) -> AppResult<()> {
        self.state.lock().await.migration_state = Some(state);
        Ok(())
    }
}

/// In-memory cache backend that honours TTLs and can be switched off.
#[derive(Default)]
pub(crate) struct FakeCacheBackend {
    entries: Mutex<HashMap<String, String>>,
    unavailable: std::sync::atomic::AtomicBool,
}

impl FakeCacheBackend {
    pub(crate) fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub(crate) async fn insert_raw(&self, key: &str, value: &str) {
        self.entries
            .lock()
            .await
            .insert(key.to_owned(), value.to_owned());
    }

    pub(crate) async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn ensure_available(&self) -> AppResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::Internal("cache backend unreachable".to_owned()));
        }
        Ok(())
    }
}

#[async_trait]
impl PermissionCacheBackend for FakeCacheBackend {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        self.ensure_available()?;
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set_with_ttl(&self, key: &str, value: String, _ttl_seconds: u64) -> AppResult<()> {
        self.ensure_available()?;
        self.entries.lock().await.insert(key.to_owned(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> AppResult<bool> {
        self.ensure_available()?;
        Ok(self.entries.lock().await.remove(key).is_some())
    }

    async fn delete_by_pattern(&self, pattern: &str) -> AppResult<u64> {
        self.ensure_available()?;
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|key, _| !key_matches_pattern(pattern, key));
        Ok((before - entries.len()) as u64)
    }

    async fn scan_keys(&self, pattern: &str) -> AppResult<Vec<String>> {
        self.ensure_available()?;
        Ok(self
            .entries
            .lock()
            .await
            .keys()
            .filter(|key| key_matches_pattern(pattern, key))
            .cloned()
            .collect())
    }
}

/// Backend whose every call outlives any reasonable timeout.
pub(crate) struct StalledCacheBackend;

#[async_trait]
impl PermissionCacheBackend for StalledCacheBackend {
    async fn get(&self, _key: &str) -> AppResult<Option<String>> {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        Ok(None)
    }

    async fn set_with_ttl(&self, _key: &str, _value: String, _ttl_seconds: u64) -> AppResult<()> {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        Ok(())
    }

    async fn delete(&self, _key: &str) -> AppResult<bool> {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        Ok(false)
    }

    async fn delete_by_pattern(&self, _pattern: &str) -> AppResult<u64> {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        Ok(0)
    }

    async fn scan_keys(&self, _pattern: &str) -> AppResult<Vec<String>> {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        Ok(Vec::new())
    }
}

/// Static matrix built from `(action, roles, permissions)` rows.
#[derive(Default)]
pub(crate) struct FakeLegacyMatrix {
    rows: HashMap<PermissionAction, LegacyRequirement>,
}

impl FakeLegacyMatrix {
    pub(crate) fn with(mut self, value: &str, roles: &[&str], permissions: &[&str]) -> Self {
        self.rows.insert(
            action(value),
            LegacyRequirement {
                roles: roles.iter().map(|role| (*role).to_owned()).collect(),
                permissions: permissions
                    .iter()
                    .map(|permission| (*permission).to_owned())
                    .collect(),
            },
        );
        self
    }
}

impl LegacyPermissionMatrix for FakeLegacyMatrix {
    fn requirement_for(&self, action: &PermissionAction) -> Option<LegacyRequirement> {
        self.rows.get(action).cloned()
    }

    fn actions(&self) -> Vec<PermissionAction> {
        let mut actions: Vec<PermissionAction> = self.rows.keys().cloned().collect();
        actions.sort();
        actions
    }
}
