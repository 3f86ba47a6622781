use std::str::FromStr;

use aegis_core::AppError;
use serde::{Deserialize, Serialize};

/// Ordered phases of the static-to-dynamic migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPhase {
    /// Nothing migrated; legacy-only mode.
    Preparation,
    /// Permission catalog, system roles and links are inserted.
    Seeding,
    /// Actors receive dynamic role assignments.
    UserMigration,
    /// Read-only checks over the migrated state.
    Validation,
    /// Router rollout percentage is configured.
    RolloutSetup,
    /// The dynamic engine is enabled.
    Activation,
    /// Caches are flushed and the migration is closed.
    Cleanup,
}

impl MigrationPhase {
    /// Returns all phases in execution order.
    #[must_use]
    pub fn all() -> &'static [Self] {
        const ALL: &[MigrationPhase] = &[
            MigrationPhase::Preparation,
            MigrationPhase::Seeding,
            MigrationPhase::UserMigration,
            MigrationPhase::Validation,
            MigrationPhase::RolloutSetup,
            MigrationPhase::Activation,
            MigrationPhase::Cleanup,
        ];

        ALL
    }

    /// Returns the phase that follows this one.
    #[must_use]
    pub fn next(self) -> Option<Self> {
        let phases = Self::all();
        phases
            .iter()
            .position(|phase| *phase == self)
            .and_then(|index| phases.get(index + 1).copied())
    }

    /// Returns a stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preparation => "preparation",
            Self::Seeding => "seeding",
            Self::UserMigration => "user_migration",
            Self::Validation => "validation",
            Self::RolloutSetup => "rollout_setup",
            Self::Activation => "activation",
            Self::Cleanup => "cleanup",
        }
    }

    /// Returns whether the phase writes records.
    #[must_use]
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Self::Preparation | Self::Validation)
    }
}

impl FromStr for MigrationPhase {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|phase| phase.as_str() == value)
            .ok_or_else(|| AppError::Validation(format!("unknown migration phase '{value}'")))
    }
}

/// Lifecycle status of a migration run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    /// No run has started.
    #[default]
    NotStarted,
    /// A run is executing or was interrupted.
    InProgress,
    /// All phases completed.
    Completed,
    /// A phase failed and the run stopped.
    Failed,
    /// The migration was rolled back to legacy-only mode.
    RolledBack,
}

impl MigrationStatus {
    /// Returns a stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
        }
    }
}

/// Severity of a migration finding. Only `Critical` blocks go-live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingSeverity {
    /// Informational.
    Warning,
    /// Cosmetic or performance issue.
    Minor,
    /// Incorrect but not dangerous.
    Major,
    /// Blocks activation and triggers rollback.
    Critical,
}

impl FindingSeverity {
    /// Returns a stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Minor => "minor",
            Self::Major => "major",
            Self::Critical => "critical",
        }
    }

    /// Returns whether the finding halts the pipeline.
    #[must_use]
    pub fn blocks_go_live(&self) -> bool {
        matches!(self, Self::Critical)
    }
}

/// Area a validation finding belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingCategory {
    /// Referential integrity of stored records.
    DataIntegrity,
    /// Agreement between dynamic and legacy decisions.
    PermissionConsistency,
    /// Hierarchy acyclicity, depth and stored levels.
    HierarchyConsistency,
    /// Every actor received its migrated roles.
    UserMigrationCompleteness,
    /// Sampled resolution latency.
    PerformanceSampling,
    /// Risky grants and privileged holders.
    SecurityPosture,
}

impl FindingCategory {
    /// Returns a stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DataIntegrity => "data_integrity",
            Self::PermissionConsistency => "permission_consistency",
            Self::HierarchyConsistency => "hierarchy_consistency",
            Self::UserMigrationCompleteness => "user_migration_completeness",
            Self::PerformanceSampling => "performance_sampling",
            Self::SecurityPosture => "security_posture",
        }
    }
}
