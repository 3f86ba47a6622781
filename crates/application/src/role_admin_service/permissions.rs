use super::*;

use aegis_domain::{PermissionAction, PermissionDefinition, RolePermissionGrant};

impl RoleAdminService {
    /// Adds a catalog entry. Declared dependencies and conflicts must already exist.
    pub async fn create_permission(
        &self,
        permission: PermissionDefinition,
    ) -> AppResult<PermissionDefinition> {
        for referenced in permission.dependencies.iter().chain(&permission.conflicts) {
            if referenced == &permission.action {
                return Err(AppError::Validation(format!(
                    "permission '{}' cannot reference itself",
                    permission.action
                )));
            }
            if self
                .permission_repository
                .find_permission(referenced)
                .await?
                .is_none()
            {
                return Err(AppError::Validation(format!(
                    "permission '{}' references unknown permission '{referenced}'",
                    permission.action
                )));
            }
        }

        self.permission_repository
            .insert_permission(permission.clone())
            .await?;
        tracing::info!(action = %permission.action, "created permission");
        Ok(permission)
    }

    /// Links an action to a role as a grant.
    pub async fn grant_role_permission(
        &self,
        role_id: RoleId,
        action: &str,
        options: RolePermissionOptions,
    ) -> AppResult<RolePermissionGrant> {
        self.link_role_permission(role_id, action, true, options)
            .await
    }

    /// Links an action to a role as a denial.
    pub async fn deny_role_permission(
        &self,
        role_id: RoleId,
        action: &str,
        options: RolePermissionOptions,
    ) -> AppResult<RolePermissionGrant> {
        self.link_role_permission(role_id, action, false, options)
            .await
    }

    /// Removes a role's link to an action. Returns whether one existed.
    pub async fn revoke_role_permission(&self, role_id: RoleId, action: &str) -> AppResult<bool> {
        let action = PermissionAction::parse(action)?;
        self.require_role(role_id).await?;

        let removed = self
            .role_repository
            .remove_role_permission(role_id, &action)
            .await?;
        if removed {
            self.invalidate_role_impact(role_id).await?;
            tracing::info!(role_id = %role_id, action = %action, "revoked role permission");
        }

        Ok(removed)
    }

    async fn link_role_permission(
        &self,
        role_id: RoleId,
        action: &str,
        granted: bool,
        options: RolePermissionOptions,
    ) -> AppResult<RolePermissionGrant> {
        let action = PermissionAction::parse(action)?;
        self.require_active_role(role_id).await?;
        let permission = self
            .permission_repository
            .find_permission(&action)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("permission '{action}' not found")))?;
        if !permission.is_active {
            return Err(AppError::Validation(format!(
                "permission '{action}' is deactivated"
            )));
        }

        let base = if granted {
            RolePermissionGrant::grant(role_id, action)
        } else {
            RolePermissionGrant::deny(role_id, action)
        };
        let link = base
            .with_conditions(options.conditions)
            .with_priority(options.priority);

        self.role_repository
            .upsert_role_permission(link.clone())
            .await?;
        self.invalidate_role_impact(role_id).await?;

        tracing::info!(role_id = %role_id, action = %link.action, granted, "linked role permission");
        Ok(link)
    }
}
