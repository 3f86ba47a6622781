use super::*;

use std::collections::{BTreeSet, HashMap};

use aegis_domain::{
    PermissionAction, PermissionDefinition, RiskLevel, RoleCategory, RoleDefinition, RoleId,
    RoleName, RolePermissionGrant, SubscriptionTier,
};

/// Role entry of the seed catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedRole {
    /// Unique role name.
    pub name: RoleName,
    /// Human-readable name.
    pub display_name: String,
    /// Role category.
    pub category: RoleCategory,
    /// Parent role name; parents precede children in the catalog.
    pub parent: Option<RoleName>,
    /// Actions linked to the role as grants.
    pub grants: Vec<PermissionAction>,
    /// Static roles whose holders receive this role during user migration.
    pub legacy_roles: Vec<String>,
    /// Optional exclusivity group.
    pub exclusivity_group: Option<String>,
}

impl SeedRole {
    /// Creates a root role without grants.
    pub fn new(name: &str, display_name: &str, category: RoleCategory) -> AppResult<Self> {
        Ok(Self {
            name: RoleName::new(name)?,
            display_name: display_name.to_owned(),
            category,
            parent: None,
            grants: Vec::new(),
            legacy_roles: Vec::new(),
            exclusivity_group: None,
        })
    }

    /// Places the role under a parent.
    pub fn under(mut self, parent: &str) -> AppResult<Self> {
        self.parent = Some(RoleName::new(parent)?);
        Ok(self)
    }

    /// Links grants to the role.
    pub fn granting(mut self, actions: &[&str]) -> AppResult<Self> {
        for action in actions {
            self.grants.push(PermissionAction::parse(action)?);
        }
        Ok(self)
    }

    /// Maps static roles onto this role.
    #[must_use]
    pub fn mapped_from(mut self, legacy_roles: &[&str]) -> Self {
        self.legacy_roles = legacy_roles.iter().map(|role| (*role).to_owned()).collect();
        self
    }

    /// Puts the role into an exclusivity group.
    #[must_use]
    pub fn exclusive_in(mut self, group: &str) -> Self {
        self.exclusivity_group = Some(group.to_owned());
        self
    }

    fn definition(&self, parent: Option<(RoleId, u32)>) -> AppResult<RoleDefinition> {
        let mut role = RoleDefinition::new(
            self.name.as_str(),
            self.display_name.as_str(),
            self.category,
        )?;
        role.exclusivity_group = self.exclusivity_group.clone();
        if let Some((parent_role_id, parent_level)) = parent {
            role.parent_role_id = Some(parent_role_id);
            role.hierarchy_level = parent_level + 1;
        }

        Ok(role)
    }
}

/// Permissions, roles, links and static-role mapping inserted by seeding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedCatalog {
    permissions: Vec<PermissionDefinition>,
    roles: Vec<SeedRole>,
}

impl SeedCatalog {
    /// Builds a catalog, checking that every reference resolves inside it.
    pub fn new(permissions: Vec<PermissionDefinition>, roles: Vec<SeedRole>) -> AppResult<Self> {
        let mut actions = BTreeSet::new();
        for permission in &permissions {
            if !actions.insert(permission.action.clone()) {
                return Err(AppError::Validation(format!(
                    "seed permission '{}' is declared twice",
                    permission.action
                )));
            }
        }
        for permission in &permissions {
            if let Some(unknown) = permission
                .dependencies
                .iter()
                .chain(&permission.conflicts)
                .find(|referenced| !actions.contains(*referenced))
            {
                return Err(AppError::Validation(format!(
                    "seed permission '{}' references unknown '{unknown}'",
                    permission.action
                )));
            }
        }

        let mut declared: BTreeSet<&RoleName> = BTreeSet::new();
        for role in &roles {
            if let Some(parent) = &role.parent
                && !declared.contains(parent)
            {
                return Err(AppError::Validation(format!(
                    "seed role '{}' must follow its parent '{}'",
                    role.name.as_str(),
                    parent.as_str()
                )));
            }
            if let Some(unknown) = role.grants.iter().find(|action| !actions.contains(*action)) {
                return Err(AppError::Validation(format!(
                    "seed role '{}' grants unknown '{unknown}'",
                    role.name.as_str()
                )));
            }
            if !declared.insert(&role.name) {
                return Err(AppError::Validation(format!(
                    "seed role '{}' is declared twice",
                    role.name.as_str()
                )));
            }
        }

        Ok(Self { permissions, roles })
    }

    /// Returns the pharmacy and clinic catalog shipped with the engine.
    pub fn healthcare() -> AppResult<Self> {
        use RiskLevel::{Critical, High, Low, Medium};

        let permissions = vec![
            PermissionDefinition::new("patient:read", "clinical", Medium)?,
            PermissionDefinition::new("patient:write", "clinical", High)?
                .with_dependencies(&["patient:read"])?,
            PermissionDefinition::new("prescription:read", "clinical", Medium)?,
            PermissionDefinition::new("prescription:create", "clinical", High)?
                .with_dependencies(&["prescription:read", "patient:read"])?,
            PermissionDefinition::new("prescription:dispense", "clinical", High)?
                .with_dependencies(&["prescription:read"])?,
            PermissionDefinition::new("inventory:read", "operations", Low)?,
            PermissionDefinition::new("inventory:write", "operations", Medium)?
                .with_dependencies(&["inventory:read"])?,
            PermissionDefinition::new("inventory:adjust", "operations", High)?
                .with_dependencies(&["inventory:write"])?
                .with_conflicts(&["inventory:audit"])?,
            PermissionDefinition::new("inventory:audit", "compliance", Medium)?
                .with_dependencies(&["inventory:read"])?,
            PermissionDefinition::new("sales:create", "operations", Medium)?,
            PermissionDefinition::new("sales:refund", "operations", High)?
                .with_dependencies(&["sales:create"])?,
            PermissionDefinition::new("reports:read", "analytics", Low)?,
            PermissionDefinition::new("reports:export", "analytics", Medium)?
                .with_dependencies(&["reports:read"])?
                .with_required_tier(SubscriptionTier::Professional),
            PermissionDefinition::new("audit:read", "compliance", Medium)?,
            PermissionDefinition::new("user:manage", "administration", Critical)?.system(),
            PermissionDefinition::new("role:manage", "administration", Critical)?.system(),
            PermissionDefinition::new("system:configure", "administration", Critical)?.system(),
        ];

        let roles = vec![
            SeedRole::new("staff", "Staff", RoleCategory::Workplace)?
                .granting(&["inventory:read", "reports:read"])?
                .mapped_from(&["staff"]),
            SeedRole::new("cashier", "Cashier", RoleCategory::Workplace)?
                .under("staff")?
                .granting(&["sales:create"])?
                .mapped_from(&["cashier"]),
            SeedRole::new("intern_pharmacist", "Intern Pharmacist", RoleCategory::Workplace)?
                .under("staff")?
                .granting(&["patient:read", "prescription:read"])?
                .mapped_from(&["intern_pharmacist"]),
            SeedRole::new("pharmacist", "Pharmacist", RoleCategory::Workplace)?
                .under("intern_pharmacist")?
                .granting(&[
                    "patient:write",
                    "prescription:create",
                    "prescription:dispense",
                    "inventory:write",
                    "sales:create",
                ])?
                .mapped_from(&["pharmacist"]),
            SeedRole::new("auditor", "Auditor", RoleCategory::Workplace)?
                .under("staff")?
                .granting(&["inventory:audit", "audit:read", "reports:export"])?
                .mapped_from(&["auditor"]),
            SeedRole::new("outlet_manager", "Outlet Manager", RoleCategory::Workplace)?
                .under("staff")?
                .granting(&[
                    "inventory:write",
                    "inventory:adjust",
                    "sales:create",
                    "sales:refund",
                    "reports:export",
                ])?
                .mapped_from(&["manager"])
                .exclusive_in("outlet_admin"),
            SeedRole::new("outlet_owner", "Outlet Owner", RoleCategory::Workplace)?
                .under("outlet_manager")?
                .granting(&["user:manage", "audit:read"])?
                .mapped_from(&["owner"])
                .exclusive_in("outlet_admin"),
            SeedRole::new("platform_admin", "Platform Administrator", RoleCategory::System)?
                .granting(&[
                    "user:manage",
                    "role:manage",
                    "system:configure",
                    "audit:read",
                ])?
                .mapped_from(&["admin", "super_admin"]),
        ];

        Self::new(permissions, roles)
    }

    /// Returns the catalog permissions.
    #[must_use]
    pub fn permissions(&self) -> &[PermissionDefinition] {
        &self.permissions
    }

    /// Returns the catalog roles, parents first.
    #[must_use]
    pub fn roles(&self) -> &[SeedRole] {
        &self.roles
    }

    /// Returns the roles a static role maps onto.
    #[must_use]
    pub fn roles_for_legacy_role(&self, legacy_role: &str) -> Vec<&SeedRole> {
        self.roles
            .iter()
            .filter(|role| role.legacy_roles.iter().any(|mapped| mapped == legacy_role))
            .collect()
    }

    /// Returns whether the catalog declares an action.
    #[must_use]
    pub fn declares(&self, action: &PermissionAction) -> bool {
        self.permissions
            .iter()
            .any(|permission| &permission.action == action)
    }
}

/// Counts produced by the seeding phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    /// Permissions inserted.
    pub permissions_created: usize,
    /// Permissions switched back on after a rollback.
    pub permissions_reactivated: usize,
    /// Permissions already present.
    pub permissions_existing: usize,
    /// Roles inserted.
    pub roles_created: usize,
    /// Roles switched back on after a rollback.
    pub roles_reactivated: usize,
    /// Roles already present.
    pub roles_existing: usize,
    /// Role-permission links inserted.
    pub links_created: usize,
    /// Role-permission links already present.
    pub links_existing: usize,
}

impl SeedReport {
    /// Returns whether seeding wrote anything.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.permissions_created
            + self.permissions_reactivated
            + self.roles_created
            + self.roles_reactivated
            + self.links_created
            > 0
    }
}

impl MigrationService {
    /// Inserts missing catalog records; existing ones are left untouched.
    ///
    /// Every role and permission written is recorded in `state` so rollback
    /// can deactivate exactly those.
    pub(super) async fn seed(
        &self,
        dry_run: bool,
        state: &mut MigrationState,
    ) -> AppResult<SeedReport> {
        let mut report = SeedReport::default();

        for permission in self.catalog.permissions() {
            match self
                .stores
                .permissions
                .find_permission(&permission.action)
                .await?
            {
                Some(existing) if existing.is_active => report.permissions_existing += 1,
                Some(_) => {
                    if !dry_run {
                        self.stores
                            .permissions
                            .set_permission_active(&permission.action, true)
                            .await?;
                        state.record_seeded_action(&permission.action);
                    }
                    report.permissions_reactivated += 1;
                }
                None => {
                    if !dry_run {
                        self.stores
                            .permissions
                            .insert_permission(permission.clone())
                            .await?;
                        state.record_seeded_action(&permission.action);
                    }
                    report.permissions_created += 1;
                }
            }
        }

        let mut seeded: HashMap<RoleName, (RoleId, u32)> = HashMap::new();
        for seed_role in self.catalog.roles() {
            let parent = seed_role
                .parent
                .as_ref()
                .and_then(|name| seeded.get(name).copied());
            let stored = self.stores.roles.find_role_by_name(&seed_role.name).await?;

            let (role_id, level, existing_links) = match stored {
                Some(mut existing) => {
                    if existing.is_active {
                        report.roles_existing += 1;
                    } else {
                        existing.is_active = true;
                        if !dry_run {
                            self.stores.roles.update_role(existing.clone()).await?;
                            state.record_seeded_role(existing.id);
                        }
                        report.roles_reactivated += 1;
                    }
                    let links = self.stores.roles.list_role_permissions(existing.id).await?;
                    (existing.id, existing.hierarchy_level, links)
                }
                None => {
                    let role = seed_role.definition(parent)?;
                    if !dry_run {
                        self.stores.roles.insert_role(role.clone()).await?;
                        state.record_seeded_role(role.id);
                    }
                    report.roles_created += 1;
                    (role.id, role.hierarchy_level, Vec::new())
                }
            };
            seeded.insert(seed_role.name.clone(), (role_id, level));

            for action in &seed_role.grants {
                if existing_links.iter().any(|link| &link.action == action) {
                    report.links_existing += 1;
                    continue;
                }
                if !dry_run {
                    self.stores
                        .roles
                        .upsert_role_permission(RolePermissionGrant::grant(
                            role_id,
                            action.clone(),
                        ))
                        .await?;
                }
                report.links_created += 1;
            }
        }

        if !dry_run && report.changed() {
            let flushed = self.cache.flush_all().await;
            tracing::debug!(flushed, "permission cache flushed after seeding");
        }

        tracing::info!(
            dry_run,
            permissions_created = report.permissions_created,
            roles_created = report.roles_created,
            links_created = report.links_created,
            "seeding finished"
        );
        Ok(report)
    }
}
