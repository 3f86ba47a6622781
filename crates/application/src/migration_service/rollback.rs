use super::*;

/// Ordered step of the rollback workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackStepKind {
    /// Route every check to the static path.
    DisableDynamicRouting,
    /// Drop every cached decision.
    FlushPermissionCache,
    /// Undo each actor's migration transaction.
    RevertActorMigrations,
    /// Deactivate roles seeding inserted or reactivated.
    DeactivateSeededRoles,
    /// Deactivate permissions seeding inserted or reactivated.
    DeactivateSeededPermissions,
    /// Return the persisted state to legacy-only mode.
    ResetMigrationState,
}

impl RollbackStepKind {
    const ORDER: [Self; 6] = [
        Self::DisableDynamicRouting,
        Self::FlushPermissionCache,
        Self::RevertActorMigrations,
        Self::DeactivateSeededRoles,
        Self::DeactivateSeededPermissions,
        Self::ResetMigrationState,
    ];

    /// Returns a stable label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DisableDynamicRouting => "disable_dynamic_routing",
            Self::FlushPermissionCache => "flush_permission_cache",
            Self::RevertActorMigrations => "revert_actor_migrations",
            Self::DeactivateSeededRoles => "deactivate_seeded_roles",
            Self::DeactivateSeededPermissions => "deactivate_seeded_permissions",
            Self::ResetMigrationState => "reset_migration_state",
        }
    }

    /// Returns whether a later migration run can restore what the step removes.
    ///
    /// Reverted assignments are deleted, so that step is irreversible.
    #[must_use]
    pub fn is_reversible(&self) -> bool {
        !matches!(self, Self::RevertActorMigrations)
    }

    fn description(&self) -> &'static str {
        match self {
            Self::DisableDynamicRouting => "route every check to the static path",
            Self::FlushPermissionCache => "drop every cached decision",
            Self::RevertActorMigrations => "delete migrated assignments and added direct grants",
            Self::DeactivateSeededRoles => "deactivate roles seeding inserted or reactivated",
            Self::DeactivateSeededPermissions => "deactivate permissions seeding inserted or reactivated",
            Self::ResetMigrationState => "return migration state to preparation",
        }
    }
}

/// Planned rollback step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollbackStep {
    /// Step.
    pub kind: RollbackStepKind,
    /// What the step does.
    pub description: String,
    /// Whether a failure may be skipped.
    pub reversible: bool,
    /// Rough duration.
    pub estimated_seconds: u64,
}

/// Ordered rollback steps with time estimates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollbackPlan {
    /// Steps in execution order.
    pub steps: Vec<RollbackStep>,
    /// Sum of step estimates.
    pub estimated_seconds: u64,
}

/// Result of one executed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RollbackStepStatus {
    /// The step finished.
    Succeeded {
        /// What the step changed.
        detail: String,
    },
    /// The step failed.
    Failed {
        /// Failure text.
        error: String,
    },
    /// An earlier irreversible failure aborted the workflow.
    Skipped,
}

/// Executed rollback step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollbackStepOutcome {
    /// Step.
    pub kind: RollbackStepKind,
    /// Whether a failure may be skipped.
    pub reversible: bool,
    /// Outcome.
    #[serde(flatten)]
    pub status: RollbackStepStatus,
}

/// Result of a rollback run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollbackReport {
    /// Steps in execution order.
    pub steps: Vec<RollbackStepOutcome>,
    /// Whether the workflow reached the end without an irreversible failure.
    pub completed: bool,
}

impl MigrationService {
    /// Builds the ordered rollback step list for the current store.
    pub async fn plan_rollback(&self) -> AppResult<RollbackPlan> {
        let migrated = self
            .stores
            .actors
            .list_actors()
            .await?
            .iter()
            .filter(|actor| actor.migration.is_some())
            .count();

        let steps: Vec<RollbackStep> = RollbackStepKind::ORDER
            .iter()
            .map(|kind| RollbackStep {
                kind: *kind,
                description: kind.description().to_owned(),
                reversible: kind.is_reversible(),
                estimated_seconds: self.estimate(*kind, migrated),
            })
            .collect();
        let estimated_seconds = steps.iter().map(|step| step.estimated_seconds).sum();

        Ok(RollbackPlan {
            steps,
            estimated_seconds,
        })
    }

    /// Runs the rollback steps strictly in order.
    ///
    /// A failed reversible step is recorded and the workflow continues; a
    /// failed irreversible step aborts it and the remaining steps are skipped.
    pub async fn rollback(&self) -> AppResult<RollbackReport> {
        tracing::warn!("migration rollback started");

        let mut steps = Vec::with_capacity(RollbackStepKind::ORDER.len());
        let mut aborted: Option<String> = None;
        for kind in RollbackStepKind::ORDER {
            let reversible = kind.is_reversible();
            if aborted.is_some() {
                steps.push(RollbackStepOutcome {
                    kind,
                    reversible,
                    status: RollbackStepStatus::Skipped,
                });
                continue;
            }

            let status = match self.execute_rollback_step(kind).await {
                Ok(detail) => {
                    tracing::info!(step = kind.as_str(), detail = %detail, "rollback step succeeded");
                    RollbackStepStatus::Succeeded { detail }
                }
                Err(error) => {
                    tracing::error!(
                        step = kind.as_str(),
                        reversible,
                        error = %error,
                        "rollback step failed"
                    );
                    if !reversible {
                        aborted = Some(format!("{}: {error}", kind.as_str()));
                    }
                    RollbackStepStatus::Failed {
                        error: error.to_string(),
                    }
                }
            };
            steps.push(RollbackStepOutcome {
                kind,
                reversible,
                status,
            });
        }

        let completed = aborted.is_none();
        if let Some(error) = aborted {
            let mut state = self.stores.state.load_state().await?;
            state.status = MigrationStatus::Failed;
            state.last_error = Some(format!("rollback aborted at {error}"));
            self.persist(&mut state, false).await?;
            tracing::error!(error = %error, "migration rollback aborted");
        } else {
            tracing::warn!("migration rollback finished");
        }

        Ok(RollbackReport { steps, completed })
    }

    async fn execute_rollback_step(&self, kind: RollbackStepKind) -> AppResult<String> {
        match kind {
            RollbackStepKind::DisableDynamicRouting => {
                self.router.set_strategy(RoutingStrategy::ForceLegacy).await?;
                let mut state = self.stores.state.load_state().await?;
                state.dynamic_enabled = false;
                self.persist(&mut state, false).await?;
                Ok("static path only".to_owned())
            }
            RollbackStepKind::FlushPermissionCache => {
                let flushed = self.cache.flush_all().await;
                Ok(format!("{flushed} keys removed"))
            }
            RollbackStepKind::RevertActorMigrations => {
                let mut reverted = 0_usize;
                let mut failed = Vec::new();
                for actor in self.stores.actors.list_actors().await? {
                    if actor.migration.is_none() {
                        continue;
                    }
                    match self.stores.actors.revert_actor_migration(&actor.id).await {
                        Ok(true) => reverted += 1,
                        Ok(false) => {}
                        Err(error) => {
                            tracing::warn!(actor_id = %actor.id, error = %error, "actor revert failed");
                            failed.push(actor.id.to_string());
                        }
                    }
                }

                if failed.is_empty() {
                    Ok(format!("{reverted} actors reverted"))
                } else {
                    Err(AppError::Internal(format!(
                        "failed to revert actors: {}",
                        failed.join(", ")
                    )))
                }
            }
            RollbackStepKind::DeactivateSeededRoles => {
                let state = self.stores.state.load_state().await?;
                let mut deactivated = 0_usize;
                for role_id in state.seeded_role_ids.iter().rev() {
                    let Some(mut role) = self.stores.roles.find_role(*role_id).await? else {
                        continue;
                    };
                    if !role.is_active {
                        continue;
                    }
                    role.is_active = false;
                    self.stores.roles.update_role(role).await?;
                    self.hierarchy.clear_hierarchy_cache(*role_id).await?;
                    deactivated += 1;
                }
                Ok(format!("{deactivated} roles deactivated"))
            }
            RollbackStepKind::DeactivateSeededPermissions => {
                let state = self.stores.state.load_state().await?;
                let mut deactivated = 0_usize;
                for action in &state.seeded_actions {
                    let Some(stored) = self.stores.permissions.find_permission(action).await?
                    else {
                        continue;
                    };
                    if stored.is_active {
                        self.stores
                            .permissions
                            .set_permission_active(action, false)
                            .await?;
                        deactivated += 1;
                    }
                }
                Ok(format!("{deactivated} permissions deactivated"))
            }
            RollbackStepKind::ResetMigrationState => {
                let mut state = MigrationState::initial();
                state.status = MigrationStatus::RolledBack;
                self.persist(&mut state, false).await?;
                Ok("state returned to preparation".to_owned())
            }
        }
    }

    fn estimate(&self, kind: RollbackStepKind, migrated_actors: usize) -> u64 {
        let per_ten = |count: usize| u64::try_from(count.div_ceil(10)).unwrap_or(u64::MAX);
        match kind {
            RollbackStepKind::DisableDynamicRouting | RollbackStepKind::ResetMigrationState => 1,
            RollbackStepKind::FlushPermissionCache => 2,
            RollbackStepKind::RevertActorMigrations => 1 + per_ten(migrated_actors),
            RollbackStepKind::DeactivateSeededRoles => 1 + per_ten(self.catalog.roles().len()),
            RollbackStepKind::DeactivateSeededPermissions => {
                1 + per_ten(self.catalog.permissions().len())
            }
        }
    }
}
