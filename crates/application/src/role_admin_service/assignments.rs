use super::*;

use aegis_domain::UserRoleAssignment;

impl RoleAdminService {
    /// Assigns a role to an actor.
    ///
    /// Rejects a second active role from the same exclusivity group in the
    /// same workspace, and a duplicate of an occupied slot.
    pub async fn assign_user_role(&self, input: AssignRoleInput) -> AppResult<UserRoleAssignment> {
        let role = self.require_active_role(input.role_id).await?;
        if self
            .actor_repository
            .find_actor(&input.actor_id)
            .await?
            .is_none()
        {
            return Err(AppError::NotFound(format!(
                "actor '{}' not found",
                input.actor_id
            )));
        }

        let now = Utc::now();
        if input.expires_at.is_some_and(|expires_at| expires_at <= now) {
            return Err(AppError::Validation(
                "temporary assignment must expire in the future".to_owned(),
            ));
        }

        if let Some(group) = &role.exclusivity_group {
            for existing in self
                .assignment_repository
                .list_assignments_for_actor(&input.actor_id)
                .await?
            {
                if !existing.is_effective(now)
                    || existing.workspace_id != input.workspace_id
                    || existing.role_id == role.id
                {
                    continue;
                }
                let Some(held) = self.role_repository.find_role(existing.role_id).await? else {
                    continue;
                };
                if held.is_active && held.exclusivity_group.as_ref() == Some(group) {
                    return Err(AppError::Conflict(format!(
                        "actor '{}' already holds '{}' from exclusivity group '{group}'",
                        input.actor_id,
                        held.name.as_str()
                    )));
                }
            }
        }

        let mut assignment = UserRoleAssignment::new(
            input.actor_id,
            input.role_id,
            input.workspace_id,
            input.assigned_by,
        );
        if let Some(expires_at) = input.expires_at {
            assignment = assignment.expiring_at(expires_at);
        }

        self.assignment_repository
            .insert_assignment(assignment.clone())
            .await?;
        self.cache
            .invalidate_user_cache(&assignment.actor_id, assignment.workspace_id)
            .await;

        tracing::info!(
            actor_id = %assignment.actor_id,
            role_id = %assignment.role_id,
            "assigned role"
        );
        Ok(assignment)
    }

    /// Logically revokes an actor's role in one scope.
    pub async fn revoke_user_role(
        &self,
        actor_id: &ActorId,
        role_id: RoleId,
        workspace_id: Option<WorkspaceId>,
        revoked_by: &str,
    ) -> AppResult<UserRoleAssignment> {
        let revoked = self
            .assignment_repository
            .revoke_assignment(actor_id, role_id, workspace_id, revoked_by, Utc::now())
            .await?;
        self.cache.invalidate_user_cache(actor_id, workspace_id).await;

        tracing::info!(actor_id = %actor_id, role_id = %role_id, "revoked role");
        Ok(revoked)
    }

    /// Assigns one role to many actors, one actor at a time.
    ///
    /// Each actor's cache is invalidated as soon as its assignment commits.
    /// Failures are collected and do not stop the batch.
    pub async fn bulk_assign_role(
        &self,
        actor_ids: &[ActorId],
        role_id: RoleId,
        workspace_id: Option<WorkspaceId>,
        assigned_by: &str,
    ) -> AppResult<BulkAssignmentReport> {
        self.require_active_role(role_id).await?;

        let mut report = BulkAssignmentReport::default();
        for actor_id in actor_ids {
            let result = self
                .assign_user_role(AssignRoleInput {
                    actor_id: actor_id.clone(),
                    role_id,
                    workspace_id,
                    expires_at: None,
                    assigned_by: assigned_by.to_owned(),
                })
                .await;

            match result {
                Ok(_) => report.assigned.push(actor_id.clone()),
                Err(error) => {
                    tracing::warn!(actor_id = %actor_id, error = %error, "bulk assignment failed for actor");
                    report.failures.push(BulkAssignmentFailure {
                        actor_id: actor_id.clone(),
                        category: error.category().to_owned(),
                        error: error.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }
}
