use async_trait::async_trait;

use aegis_core::AppResult;
use aegis_domain::{PermissionAction, RoleDefinition, RoleId, RoleName, RolePermissionGrant};

/// Repository port for roles and their permission links.
#[async_trait]
pub trait RoleRepository: Send + Sync {
    /// Lists every role, active or not.
    async fn list_roles(&self) -> AppResult<Vec<RoleDefinition>>;

    /// Finds a role by id.
    async fn find_role(&self, role_id: RoleId) -> AppResult<Option<RoleDefinition>>;

    /// Finds a role by unique name.
    async fn find_role_by_name(&self, name: &RoleName) -> AppResult<Option<RoleDefinition>>;

    /// Inserts a role. Fails with a conflict on a duplicate name.
    async fn insert_role(&self, role: RoleDefinition) -> AppResult<()>;

    /// Replaces a stored role. Fails with not-found for unknown ids.
    async fn update_role(&self, role: RoleDefinition) -> AppResult<()>;

    /// Persists a recomputed hierarchy level.
    async fn set_hierarchy_level(&self, role_id: RoleId, hierarchy_level: u32) -> AppResult<()>;

    /// Lists links attached to one role.
    async fn list_role_permissions(&self, role_id: RoleId)
    -> AppResult<Vec<RolePermissionGrant>>;

    /// Lists every stored link, including ones whose role no longer exists.
    async fn list_all_role_permissions(&self) -> AppResult<Vec<RolePermissionGrant>>;

    /// Inserts or replaces the link for `(role_id, action)`.
    ///
    /// Fails with not-found when the role does not exist.
    async fn upsert_role_permission(&self, grant: RolePermissionGrant) -> AppResult<()>;

    /// Removes the link for `(role_id, action)`, returning whether one existed.
    async fn remove_role_permission(
        &self,
        role_id: RoleId,
        action: &PermissionAction,
    ) -> AppResult<bool>;
}
