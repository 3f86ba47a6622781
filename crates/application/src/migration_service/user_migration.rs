use super::*;

use std::collections::{BTreeSet, HashMap};

use aegis_domain::{
    ActorId, ActorRecord, LEGACY_WILDCARD, PermissionAction, RoleId, RoleName, UserRoleAssignment,
};

use crate::MIGRATION_ASSIGNER;
use crate::rbac_ports::ActorMigrationPlan;

/// Per-actor failure of the user migration phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActorMigrationFailure {
    /// Actor that was not migrated.
    pub actor_id: ActorId,
    /// Error category.
    pub category: String,
    /// Error text.
    pub error: String,
}

/// Counts and failures of the user migration phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserMigrationReport {
    /// Actors in the directory.
    pub total_actors: usize,
    /// Actors migrated by this run.
    pub migrated: usize,
    /// Actors skipped because an earlier run migrated them.
    pub already_migrated: usize,
    /// Actors whose static role maps to nothing and who carry no usable permission.
    pub unmapped: Vec<ActorId>,
    /// Actors whose transaction failed.
    pub failures: Vec<ActorMigrationFailure>,
}

impl MigrationService {
    /// Migrates actors one at a time, each in its own transaction.
    pub(super) async fn migrate_users(&self, dry_run: bool) -> AppResult<UserMigrationReport> {
        let role_ids = self.seeded_role_ids().await?;
        let mut catalog_actions: BTreeSet<PermissionAction> = self
            .stores
            .permissions
            .list_permissions()
            .await?
            .into_iter()
            .filter(|permission| permission.is_active)
            .map(|permission| permission.action)
            .collect();
        if dry_run {
            catalog_actions.extend(
                self.catalog
                    .permissions()
                    .iter()
                    .map(|permission| permission.action.clone()),
            );
        }

        let mut report = UserMigrationReport::default();
        for actor in self.stores.actors.list_actors().await? {
            report.total_actors += 1;
            if actor.migration.is_some() {
                report.already_migrated += 1;
                continue;
            }

            let mapped: Vec<&RoleName> = self
                .catalog
                .roles_for_legacy_role(actor.role.as_str())
                .into_iter()
                .map(|role| &role.name)
                .collect();
            let direct = direct_permissions_for(&actor, &catalog_actions);
            if mapped.is_empty() && direct.is_empty() {
                tracing::debug!(actor_id = %actor.id, role = %actor.role, "actor has nothing to migrate");
                report.unmapped.push(actor.id);
                continue;
            }

            if dry_run {
                report.migrated += 1;
                continue;
            }

            let result = match self.plan_assignments(&actor, &mapped, &role_ids).await {
                Ok(assignments) => {
                    self.stores
                        .actors
                        .apply_actor_migration(ActorMigrationPlan {
                            actor_id: actor.id.clone(),
                            assignments,
                            direct_permissions: direct,
                            migrated_at: Utc::now(),
                        })
                        .await
                }
                Err(error) => Err(error),
            };

            match result {
                Ok(()) => {
                    report.migrated += 1;
                    self.cache.invalidate_user_cache(&actor.id, None).await;
                }
                Err(error) => {
                    tracing::warn!(actor_id = %actor.id, error = %error, "actor migration failed");
                    report.failures.push(ActorMigrationFailure {
                        actor_id: actor.id,
                        category: error.category().to_owned(),
                        error: error.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            dry_run,
            total = report.total_actors,
            migrated = report.migrated,
            failed = report.failures.len(),
            unmapped = report.unmapped.len(),
            "user migration finished"
        );
        Ok(report)
    }

    /// Builds the global assignments an actor still lacks.
    ///
    /// Roles the actor already holds globally, for instance through an
    /// administrator, are left out so the marker only records migration rows.
    async fn plan_assignments(
        &self,
        actor: &ActorRecord,
        mapped: &[&RoleName],
        role_ids: &HashMap<RoleName, RoleId>,
    ) -> AppResult<Vec<UserRoleAssignment>> {
        let existing = self
            .stores
            .assignments
            .list_assignments_for_actor(&actor.id)
            .await?;
        let now = Utc::now();

        let mut assignments = Vec::with_capacity(mapped.len());
        for name in mapped {
            let role_id = role_ids.get(*name).ok_or_else(|| {
                AppError::NotFound(format!("seeded role '{}' is missing", name.as_str()))
            })?;
            if existing
                .iter()
                .any(|assignment| assignment.occupies(&actor.id, *role_id, None, now))
            {
                tracing::debug!(actor_id = %actor.id, role = %name.as_str(), "actor already holds mapped role");
                continue;
            }
            assignments.push(UserRoleAssignment::new(
                actor.id.clone(),
                *role_id,
                None,
                MIGRATION_ASSIGNER,
            ));
        }

        Ok(assignments)
    }

    /// Resolves stored ids of the active catalog roles.
    pub(super) async fn seeded_role_ids(&self) -> AppResult<HashMap<RoleName, RoleId>> {
        let mut role_ids = HashMap::new();
        for seed_role in self.catalog.roles() {
            if let Some(role) = self.stores.roles.find_role_by_name(&seed_role.name).await?
                && role.is_active
            {
                role_ids.insert(seed_role.name.clone(), role.id);
            }
        }

        Ok(role_ids)
    }
}

/// Static permission strings that become direct grants.
///
/// The wildcard stays on the static path; unknown and already direct
/// actions are dropped.
fn direct_permissions_for(
    actor: &ActorRecord,
    catalog_actions: &BTreeSet<PermissionAction>,
) -> Vec<PermissionAction> {
    let mut direct: Vec<PermissionAction> = Vec::new();
    for value in &actor.legacy_permissions {
        if value == LEGACY_WILDCARD {
            continue;
        }
        let Ok(action) = PermissionAction::parse(value) else {
            tracing::debug!(actor_id = %actor.id, value = %value, "skipping unparsable static permission");
            continue;
        };
        if catalog_actions.contains(&action)
            && !actor.grants_directly(&action)
            && !direct.contains(&action)
        {
            direct.push(action);
        }
    }

    direct
}
