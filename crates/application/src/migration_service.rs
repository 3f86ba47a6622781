mod rollback;
mod seed;
mod user_migration;
mod validation;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use aegis_core::{AppError, AppResult};
use aegis_domain::{MigrationPhase, MigrationStatus};
use chrono::Utc;
use serde::Serialize;

use crate::compatibility_router::{CompatibilityRouter, RouterMetrics, RoutingStrategy};
use crate::config::{MigrationConfig, validate_rollout_percentage};
use crate::hierarchy_resolver::HierarchyResolver;
use crate::permission_cache::{CacheMetrics, PermissionCache};
use crate::rbac_ports::{
    ActorRepository, MigrationState, MigrationStateRepository, PermissionRepository,
    RoleAssignmentRepository, RoleRepository,
};

pub use rollback::{
    RollbackPlan, RollbackReport, RollbackStep, RollbackStepKind, RollbackStepOutcome,
    RollbackStepStatus,
};
pub use seed::{SeedCatalog, SeedReport, SeedRole};
pub use user_migration::{ActorMigrationFailure, UserMigrationReport};
pub use validation::{MigrationFinding, ValidationReport};

/// Persistence ports the orchestrator writes through.
#[derive(Clone)]
pub struct MigrationStores {
    /// Permission catalog.
    pub permissions: Arc<dyn PermissionRepository>,
    /// Roles and role-permission links.
    pub roles: Arc<dyn RoleRepository>,
    /// User-role assignments.
    pub assignments: Arc<dyn RoleAssignmentRepository>,
    /// User directory.
    pub actors: Arc<dyn ActorRepository>,
    /// Migration progress.
    pub state: Arc<dyn MigrationStateRepository>,
}

/// How a migration run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MigrationOutcome {
    /// Every phase completed.
    Completed,
    /// Every phase was computed without writing.
    DryRun,
    /// A previous run already completed; nothing was done.
    AlreadyCompleted,
    /// Validation found critical issues and the pipeline stopped.
    Halted {
        /// Whether the automatic rollback ran to completion.
        rolled_back: bool,
    },
}

/// Summary of one migration run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationReport {
    /// Whether the run was a dry run.
    pub dry_run: bool,
    /// How the run ended.
    pub outcome: MigrationOutcome,
    /// Phases executed in this run.
    pub phases_run: Vec<MigrationPhase>,
    /// Phases skipped because an earlier run completed them.
    pub phases_skipped: Vec<MigrationPhase>,
    /// Actors known to the directory at preparation time.
    pub actors_total: usize,
    /// Seeding counts.
    pub seed: Option<SeedReport>,
    /// User migration counts and failures.
    pub users: Option<UserMigrationReport>,
    /// Validation findings.
    pub validation: Option<ValidationReport>,
    /// Automatic rollback outcome.
    pub rollback: Option<RollbackReport>,
}

impl MigrationReport {
    fn new(dry_run: bool, outcome: MigrationOutcome) -> Self {
        Self {
            dry_run,
            outcome,
            phases_run: Vec::new(),
            phases_skipped: Vec::new(),
            actors_total: 0,
            seed: None,
            users: None,
            validation: None,
            rollback: None,
        }
    }
}

/// Snapshot returned by the status command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationStatusReport {
    /// Persisted progress.
    pub state: MigrationState,
    /// Live routing strategy.
    pub strategy: RoutingStrategy,
    /// Router counters.
    pub router: RouterMetrics,
    /// Cache counters.
    pub cache: CacheMetrics,
    /// Actors in the directory.
    pub actors_total: usize,
    /// Actors carrying a migration marker.
    pub actors_migrated: usize,
}

enum PhaseFlow {
    Continue,
    Halt,
}

/// Orchestrates the phased static-to-dynamic migration and its rollback.
#[derive(Clone)]
pub struct MigrationService {
    stores: MigrationStores,
    hierarchy: HierarchyResolver,
    router: CompatibilityRouter,
    cache: PermissionCache,
    catalog: Arc<SeedCatalog>,
    config: MigrationConfig,
}

impl MigrationService {
    /// Creates the orchestrator.
    #[must_use]
    pub fn new(
        stores: MigrationStores,
        hierarchy: HierarchyResolver,
        router: CompatibilityRouter,
        cache: PermissionCache,
        catalog: SeedCatalog,
        config: MigrationConfig,
    ) -> Self {
        Self {
            stores,
            hierarchy,
            router,
            cache,
            catalog: Arc::new(catalog),
            config,
        }
    }

    /// Returns the seed catalog.
    #[must_use]
    pub fn catalog(&self) -> &SeedCatalog {
        &self.catalog
    }

    /// Runs every pending phase in order.
    ///
    /// Completed phases of an interrupted run are skipped. In dry-run mode
    /// nothing is written, state included, and every phase runs.
    pub async fn run_migration(&self) -> AppResult<MigrationReport> {
        let dry_run = self.config.dry_run;
        let mut state = self.stores.state.load_state().await?;

        if state.status == MigrationStatus::Completed && !dry_run {
            tracing::info!("migration already completed");
            return Ok(MigrationReport::new(
                false,
                MigrationOutcome::AlreadyCompleted,
            ));
        }
        if state.status == MigrationStatus::RolledBack {
            state = MigrationState::initial();
        }

        let mut report = MigrationReport::new(
            dry_run,
            if dry_run {
                MigrationOutcome::DryRun
            } else {
                MigrationOutcome::Completed
            },
        );

        for phase in MigrationPhase::all().iter().copied() {
            if !dry_run && state.has_completed(phase) {
                report.phases_skipped.push(phase);
                continue;
            }

            state.phase = phase;
            state.status = MigrationStatus::InProgress;
            self.persist(&mut state, dry_run).await?;
            tracing::info!(phase = phase.as_str(), dry_run, "migration phase started");

            let flow = match self.execute_phase(phase, &mut state, &mut report).await {
                Ok(flow) => flow,
                Err(error) => {
                    tracing::error!(phase = phase.as_str(), error = %error, "migration phase failed");
                    state.status = MigrationStatus::Failed;
                    state.last_error = Some(format!("{}: {error}", phase.as_str()));
                    self.persist(&mut state, dry_run).await?;
                    return Err(error);
                }
            };
            report.phases_run.push(phase);

            if let PhaseFlow::Halt = flow {
                state.status = MigrationStatus::Failed;
                state.last_error = Some("validation reported critical findings".to_owned());
                self.persist(&mut state, dry_run).await?;
                tracing::warn!(phase = phase.as_str(), "migration halted");

                let rolled_back = if self.config.auto_rollback_on_critical {
                    let rollback = self.rollback().await?;
                    let completed = rollback.completed;
                    report.rollback = Some(rollback);
                    completed
                } else {
                    false
                };
                report.outcome = MigrationOutcome::Halted { rolled_back };
                return Ok(report);
            }

            state.completed_phases.push(phase);
            state.last_error = None;
            self.persist(&mut state, dry_run).await?;
            tracing::info!(phase = phase.as_str(), dry_run, "migration phase completed");
        }

        state.status = MigrationStatus::Completed;
        self.persist(&mut state, dry_run).await?;
        Ok(report)
    }

    async fn execute_phase(
        &self,
        phase: MigrationPhase,
        state: &mut MigrationState,
        report: &mut MigrationReport,
    ) -> AppResult<PhaseFlow> {
        let dry_run = self.config.dry_run;
        match phase {
            MigrationPhase::Preparation => {
                report.actors_total = self.stores.actors.list_actors().await?.len();
            }
            MigrationPhase::Seeding => {
                report.seed = Some(self.seed(dry_run, state).await?);
            }
            MigrationPhase::UserMigration => {
                report.users = Some(self.migrate_users(dry_run).await?);
            }
            MigrationPhase::Validation => {
                let expectations = if dry_run {
                    validation::Expectations::default()
                } else {
                    validation::Expectations {
                        seeded: true,
                        migrated: true,
                    }
                };
                let validation = self.run_validation(expectations).await?;
                let blocking = validation.has_blocking();
                report.validation = Some(validation);
                if blocking && !dry_run {
                    return Ok(PhaseFlow::Halt);
                }
            }
            MigrationPhase::RolloutSetup => {
                state.rollout_percentage = self.config.rollout_percentage;
            }
            MigrationPhase::Activation => {
                if !dry_run {
                    self.router
                        .set_rollout_percentage(state.rollout_percentage)
                        .await?;
                    state.dynamic_enabled = true;
                }
            }
            MigrationPhase::Cleanup => {
                if !dry_run {
                    let flushed = self.cache.flush_all().await;
                    tracing::info!(flushed, "permission cache flushed");
                }
            }
        }

        Ok(PhaseFlow::Continue)
    }

    /// Runs the read-only validation checks against the current state.
    pub async fn validate(&self) -> AppResult<ValidationReport> {
        let state = self.stores.state.load_state().await?;
        self.run_validation(validation::Expectations {
            seeded: state.has_completed(MigrationPhase::Seeding),
            migrated: state.has_completed(MigrationPhase::UserMigration),
        })
        .await
    }

    /// Returns persisted progress plus live counters.
    pub async fn status(&self) -> AppResult<MigrationStatusReport> {
        let state = self.stores.state.load_state().await?;
        let actors = self.stores.actors.list_actors().await?;

        Ok(MigrationStatusReport {
            state,
            strategy: self.router.strategy().await,
            router: self.router.metrics(),
            cache: self.cache.metrics(),
            actors_total: actors.len(),
            actors_migrated: actors
                .iter()
                .filter(|actor| actor.migration.is_some())
                .count(),
        })
    }

    /// Changes the share of actors routed to the dynamic engine.
    ///
    /// The value is stored and applied to the router once the engine is enabled.
    pub async fn set_rollout_percentage(&self, percentage: u8) -> AppResult<MigrationState> {
        validate_rollout_percentage(percentage)?;

        let mut state = self.stores.state.load_state().await?;
        state.rollout_percentage = percentage;
        if state.dynamic_enabled {
            self.router.set_rollout_percentage(percentage).await?;
        }
        self.persist(&mut state, false).await?;

        tracing::info!(
            percentage,
            dynamic_enabled = state.dynamic_enabled,
            "rollout percentage updated"
        );
        Ok(state)
    }

    /// Aligns the router with the persisted state after a restart.
    pub async fn restore_routing(&self) -> AppResult<RoutingStrategy> {
        let state = self.stores.state.load_state().await?;
        let strategy = if state.dynamic_enabled {
            RoutingStrategy::Percentage(state.rollout_percentage)
        } else {
            RoutingStrategy::ForceLegacy
        };
        self.router.set_strategy(strategy).await?;
        Ok(strategy)
    }

    async fn persist(&self, state: &mut MigrationState, dry_run: bool) -> AppResult<()> {
        if dry_run {
            return Ok(());
        }

        state.updated_at = Utc::now();
        self.stores
            .state
            .save_state(state.clone())
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to persist migration state: {error}"))
            })
    }
}
