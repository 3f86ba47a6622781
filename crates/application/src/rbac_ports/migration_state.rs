use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use aegis_core::AppResult;
use aegis_domain::{MigrationPhase, MigrationStatus, PermissionAction, RoleId};

/// Persisted progress of the static-to-dynamic migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationState {
    /// Last phase entered.
    pub phase: MigrationPhase,
    /// Run status.
    pub status: MigrationStatus,
    /// Phases finished in the current run, in order.
    pub completed_phases: Vec<MigrationPhase>,
    /// Whether the router may send checks to the dynamic engine.
    pub dynamic_enabled: bool,
    /// Share of actors routed to the dynamic engine once enabled.
    pub rollout_percentage: u8,
    /// Error that stopped the last run.
    pub last_error: Option<String>,
    /// Roles seeding inserted or reactivated, in seeding order.
    #[serde(default)]
    pub seeded_role_ids: Vec<RoleId>,
    /// Permissions seeding inserted or reactivated.
    #[serde(default)]
    pub seeded_actions: Vec<PermissionAction>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl MigrationState {
    /// Returns the legacy-only starting state.
    #[must_use]
    pub fn initial() -> Self {
        Self {
            phase: MigrationPhase::Preparation,
            status: MigrationStatus::NotStarted,
            completed_phases: Vec::new(),
            dynamic_enabled: false,
            rollout_percentage: 0,
            last_error: None,
            seeded_role_ids: Vec::new(),
            seeded_actions: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Records a role written by seeding.
    pub fn record_seeded_role(&mut self, role_id: RoleId) {
        if !self.seeded_role_ids.contains(&role_id) {
            self.seeded_role_ids.push(role_id);
        }
    }

    /// Records a permission written by seeding.
    pub fn record_seeded_action(&mut self, action: &PermissionAction) {
        if !self.seeded_actions.contains(action) {
            self.seeded_actions.push(action.clone());
        }
    }

    /// Returns whether a phase already completed in the current run.
    #[must_use]
    pub fn has_completed(&self, phase: MigrationPhase) -> bool {
        self.completed_phases.contains(&phase)
    }
}

impl Default for MigrationState {
    fn default() -> Self {
        Self::initial()
    }
}

/// Repository port for migration progress.
#[async_trait]
pub trait MigrationStateRepository: Send + Sync {
    /// Loads the current state, returning the initial state when none is stored.
    async fn load_state(&self) -> AppResult<MigrationState>;

    /// Stores the state.
    async fn save_state(&self, state: MigrationState) -> AppResult<()>;
}
