use async_trait::async_trait;

use aegis_core::AppResult;
use aegis_domain::{PermissionAction, PermissionDefinition};

/// Repository port for the permission catalog.
#[async_trait]
pub trait PermissionRepository: Send + Sync {
    /// Lists every catalog entry, active or not.
    async fn list_permissions(&self) -> AppResult<Vec<PermissionDefinition>>;

    /// Finds one catalog entry by action.
    async fn find_permission(
        &self,
        action: &PermissionAction,
    ) -> AppResult<Option<PermissionDefinition>>;

    /// Inserts a new catalog entry. Fails with a conflict if the action exists.
    async fn insert_permission(&self, permission: PermissionDefinition) -> AppResult<()>;

    /// Flips the active flag of an entry. Catalog entries are never hard-deleted.
    async fn set_permission_active(
        &self,
        action: &PermissionAction,
        is_active: bool,
    ) -> AppResult<()>;
}
