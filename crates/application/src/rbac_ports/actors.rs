use async_trait::async_trait;
use chrono::{DateTime, Utc};

use aegis_core::AppResult;
use aegis_domain::{ActorId, ActorRecord, PermissionAction, UserRoleAssignment};

/// Everything the migration writes for one actor, applied all-or-nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorMigrationPlan {
    /// Migrated actor.
    pub actor_id: ActorId,
    /// Assignments to insert; slots already occupied are rejected.
    pub assignments: Vec<UserRoleAssignment>,
    /// Direct permissions to add to the actor record.
    pub direct_permissions: Vec<PermissionAction>,
    /// Migration timestamp stored on the actor marker.
    pub migrated_at: DateTime<Utc>,
}

/// Read view of the user directory plus the migration's transactional writes.
#[async_trait]
pub trait ActorRepository: Send + Sync {
    /// Finds one actor.
    async fn find_actor(&self, actor_id: &ActorId) -> AppResult<Option<ActorRecord>>;

    /// Lists every actor.
    async fn list_actors(&self) -> AppResult<Vec<ActorRecord>>;

    /// Applies a migration plan in one transaction.
    ///
    /// Inserts the assignments, adds the direct permissions and writes the
    /// denormalized migration marker. Nothing is written if any step fails.
    async fn apply_actor_migration(&self, plan: ActorMigrationPlan) -> AppResult<()>;

    /// Reverts a previously applied plan in one transaction.
    ///
    /// Deletes the assignments listed on the marker, removes the direct
    /// permissions the migration added and clears the marker. Returns whether
    /// the actor had anything to revert.
    async fn revert_actor_migration(&self, actor_id: &ActorId) -> AppResult<bool>;
}
