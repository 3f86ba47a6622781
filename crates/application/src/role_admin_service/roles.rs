use super::*;

use aegis_core::NonEmptyString;
use aegis_domain::{LEGACY_WILDCARD, PermissionAction};

impl RoleAdminService {
    /// Creates a role, computing its level from the parent.
    pub async fn create_role(&self, input: CreateRoleInput) -> AppResult<RoleDefinition> {
        let mut role = RoleDefinition::new(
            input.name.as_str(),
            input.display_name.as_str(),
            input.category,
        )?;
        role.legacy_permissions = validate_legacy_permissions(input.legacy_permissions)?;
        role.exclusivity_group = input.exclusivity_group;

        if let Some(parent_role_id) = input.parent_role_id {
            let parent = self.require_active_role(parent_role_id).await?;
            self.hierarchy
                .ensure_depth_within_limit(role.id, parent_role_id)
                .await?;
            role.parent_role_id = Some(parent_role_id);
            role.hierarchy_level = self
                .hierarchy
                .calculate_hierarchy_level(parent.id)
                .await?
                + 1;
        }

        self.role_repository.insert_role(role.clone()).await?;
        tracing::info!(role_id = %role.id, name = role.name.as_str(), "created role");
        Ok(role)
    }

    /// Updates a role. Parent changes are checked for cycles and depth first.
    pub async fn update_role(
        &self,
        role_id: RoleId,
        input: UpdateRoleInput,
    ) -> AppResult<RoleDefinition> {
        let mut role = self.require_role(role_id).await?;
        let mut parent_changed = false;

        if let Some(parent_role_id) = input.parent_role_id
            && parent_role_id != role.parent_role_id
        {
            if role.is_system_role {
                return Err(AppError::Validation(format!(
                    "system role '{}' cannot change parent",
                    role.name.as_str()
                )));
            }

            if let Some(parent_role_id) = parent_role_id {
                let parent = self.require_active_role(parent_role_id).await?;
                if self
                    .hierarchy
                    .detect_circular_dependency(role_id, parent_role_id)
                    .await?
                {
                    return Err(AppError::Conflict(format!(
                        "making '{}' the parent of '{}' would create a cycle",
                        parent.name.as_str(),
                        role.name.as_str()
                    )));
                }
                self.hierarchy
                    .ensure_depth_within_limit(role_id, parent_role_id)
                    .await?;
            }

            role.parent_role_id = parent_role_id;
            parent_changed = true;
        }

        if let Some(display_name) = input.display_name {
            role.display_name = NonEmptyString::new(display_name)?;
        }
        if let Some(legacy_permissions) = input.legacy_permissions {
            role.legacy_permissions = validate_legacy_permissions(legacy_permissions)?;
        }
        if let Some(exclusivity_group) = input.exclusivity_group {
            role.exclusivity_group = exclusivity_group;
        }

        self.role_repository.update_role(role.clone()).await?;
        if parent_changed {
            self.hierarchy.update_hierarchy_levels(role_id).await?;
        }
        self.invalidate_role_impact(role_id).await?;

        tracing::info!(role_id = %role_id, parent_changed, "updated role");
        self.require_role(role_id).await
    }

    /// Soft-deactivates a custom role without active children.
    pub async fn deactivate_role(&self, role_id: RoleId) -> AppResult<RoleDefinition> {
        let mut role = self.require_role(role_id).await?;
        if role.is_system_role {
            return Err(AppError::Validation(format!(
                "system role '{}' cannot be deactivated",
                role.name.as_str()
            )));
        }
        if !role.is_active {
            return Ok(role);
        }

        let active_children: Vec<String> = self
            .role_repository
            .list_roles()
            .await?
            .into_iter()
            .filter(|child| child.is_active && child.parent_role_id == Some(role_id))
            .map(|child| child.name.as_str().to_owned())
            .collect();
        if !active_children.is_empty() {
            return Err(AppError::Conflict(format!(
                "role '{}' still has active children: {}",
                role.name.as_str(),
                active_children.join(", ")
            )));
        }

        role.is_active = false;
        self.role_repository.update_role(role.clone()).await?;
        self.invalidate_role_impact(role_id).await?;

        tracing::info!(role_id = %role_id, "deactivated role");
        Ok(role)
    }
}

fn validate_legacy_permissions(values: Vec<String>) -> AppResult<Vec<String>> {
    for value in &values {
        if value != LEGACY_WILDCARD {
            PermissionAction::parse(value)?;
        }
    }

    Ok(values)
}
