use async_trait::async_trait;
use chrono::{DateTime, Utc};

use aegis_core::{AppResult, WorkspaceId};
use aegis_domain::{ActorId, AssignmentId, RoleId, UserRoleAssignment};

/// Repository port for user-role assignments.
#[async_trait]
pub trait RoleAssignmentRepository: Send + Sync {
    /// Lists every assignment row of one actor, including revoked ones.
    async fn list_assignments_for_actor(
        &self,
        actor_id: &ActorId,
    ) -> AppResult<Vec<UserRoleAssignment>>;

    /// Lists every assignment row referencing one of the roles.
    async fn list_assignments_for_roles(
        &self,
        role_ids: &[RoleId],
    ) -> AppResult<Vec<UserRoleAssignment>>;

    /// Lists every stored assignment row.
    async fn list_all_assignments(&self) -> AppResult<Vec<UserRoleAssignment>>;

    /// Inserts an assignment.
    ///
    /// Fails with a conflict when an effective row already occupies the
    /// `(actor, role, workspace)` slot.
    async fn insert_assignment(&self, assignment: UserRoleAssignment) -> AppResult<()>;

    /// Logically revokes the effective assignment in a slot.
    async fn revoke_assignment(
        &self,
        actor_id: &ActorId,
        role_id: RoleId,
        workspace_id: Option<WorkspaceId>,
        revoked_by: &str,
        revoked_at: DateTime<Utc>,
    ) -> AppResult<UserRoleAssignment>;

    /// Physically deletes one row. Only rollback and orphan repair use this.
    async fn delete_assignment(&self, assignment_id: AssignmentId) -> AppResult<()>;
}
