use std::fmt::{Display, Formatter};

use aegis_core::WorkspaceId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ActorId, RoleId};

/// Identifier of a user-role assignment row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssignmentId(Uuid);

impl AssignmentId {
    /// Creates a new random assignment identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AssignmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for AssignmentId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Assignment of a role to an actor, optionally workspace-scoped and temporary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRoleAssignment {
    /// Row identifier.
    pub id: AssignmentId,
    /// Assigned actor.
    pub actor_id: ActorId,
    /// Assigned role.
    pub role_id: RoleId,
    /// Workspace scope; `None` is global.
    pub workspace_id: Option<WorkspaceId>,
    /// Temporary assignments stop applying at `expires_at`.
    pub is_temporary: bool,
    /// Expiry of a temporary assignment.
    pub expires_at: Option<DateTime<Utc>>,
    /// Revoked assignments are kept with `is_active = false`.
    pub is_active: bool,
    /// Who assigned the role.
    pub assigned_by: String,
    /// When the role was assigned.
    pub assigned_at: DateTime<Utc>,
    /// Who revoked the role.
    pub revoked_by: Option<String>,
    /// When the role was revoked.
    pub revoked_at: Option<DateTime<Utc>>,
}

impl UserRoleAssignment {
    /// Creates an active permanent assignment.
    #[must_use]
    pub fn new(
        actor_id: ActorId,
        role_id: RoleId,
        workspace_id: Option<WorkspaceId>,
        assigned_by: impl Into<String>,
    ) -> Self {
        Self {
            id: AssignmentId::new(),
            actor_id,
            role_id,
            workspace_id,
            is_temporary: false,
            expires_at: None,
            is_active: true,
            assigned_by: assigned_by.into(),
            assigned_at: Utc::now(),
            revoked_by: None,
            revoked_at: None,
        }
    }

    /// Makes the assignment temporary.
    #[must_use]
    pub fn expiring_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.is_temporary = true;
        self.expires_at = Some(expires_at);
        self
    }

    /// Returns whether the assignment applies at `now`.
    ///
    /// Expired temporary assignments are inactive without being rewritten.
    #[must_use]
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        if !self.is_active {
            return false;
        }
        if self.is_temporary {
            return self.expires_at.is_some_and(|expires_at| expires_at > now);
        }
        true
    }

    /// Returns whether this row occupies the `(actor, role, workspace)` slot.
    #[must_use]
    pub fn occupies(
        &self,
        actor_id: &ActorId,
        role_id: RoleId,
        workspace_id: Option<WorkspaceId>,
        now: DateTime<Utc>,
    ) -> bool {
        self.is_effective(now)
            && &self.actor_id == actor_id
            && self.role_id == role_id
            && self.workspace_id == workspace_id
    }

    /// Returns whether the assignment applies to a request scoped to `workspace_id`.
    ///
    /// Global assignments apply everywhere; scoped ones only in their workspace.
    #[must_use]
    pub fn applies_to_workspace(&self, workspace_id: Option<WorkspaceId>) -> bool {
        match self.workspace_id {
            None => true,
            Some(scoped) => workspace_id == Some(scoped),
        }
    }
}

#[cfg(test)]
mod tests {
    use aegis_core::WorkspaceId;
    use chrono::{Duration, Utc};

    use crate::{ActorId, RoleId};

    use super::UserRoleAssignment;

    fn assignment() -> UserRoleAssignment {
        UserRoleAssignment::new(
            ActorId::new("u1").unwrap_or_else(|_| unreachable!()),
            RoleId::new(),
            None,
            "admin",
        )
    }

    #[test]
    fn expired_temporary_assignment_is_not_effective() {
        let now = Utc::now();
        let expired = assignment().expiring_at(now - Duration::minutes(1));
        let live = assignment().expiring_at(now + Duration::minutes(1));

        assert!(!expired.is_effective(now));
        assert!(live.is_effective(now));
    }

    #[test]
    fn revoked_assignment_is_not_effective() {
        let mut revoked = assignment();
        revoked.is_active = false;
        assert!(!revoked.is_effective(Utc::now()));
    }

    #[test]
    fn workspace_scoping() {
        let workspace_id = WorkspaceId::new();
        let global = assignment();
        let mut scoped = assignment();
        scoped.workspace_id = Some(workspace_id);

        assert!(global.applies_to_workspace(None));
        assert!(global.applies_to_workspace(Some(workspace_id)));
        assert!(scoped.applies_to_workspace(Some(workspace_id)));
        assert!(!scoped.applies_to_workspace(None));
        assert!(!scoped.applies_to_workspace(Some(WorkspaceId::new())));
    }
}
