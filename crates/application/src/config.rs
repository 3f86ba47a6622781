use std::time::Duration;

use aegis_core::{AppError, AppResult};

/// Tunables for permission resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationConfig {
    /// Name of the role that grants everything.
    pub super_admin_role: String,
    /// TTL of cached allow decisions, in seconds.
    pub standard_ttl_seconds: u64,
    /// TTL of cached deny decisions, in seconds.
    pub denial_ttl_seconds: u64,
    /// TTL of cached effective permission sets, in seconds.
    pub aggregate_ttl_seconds: u64,
    /// Maximum number of ancestors a role may have.
    pub max_hierarchy_depth: u32,
    /// TTL of cached per-role resolved permission sets, in seconds.
    pub hierarchy_ttl_seconds: u64,
    /// Roles whose holders are denied while their license is rejected.
    pub license_required_roles: Vec<String>,
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            super_admin_role: "super_admin".to_owned(),
            standard_ttl_seconds: 300,
            denial_ttl_seconds: 60,
            aggregate_ttl_seconds: 300,
            max_hierarchy_depth: 10,
            hierarchy_ttl_seconds: 60,
            license_required_roles: vec!["pharmacist".to_owned(), "intern_pharmacist".to_owned()],
        }
    }
}

impl AuthorizationConfig {
    /// Overrides the maximum hierarchy depth.
    pub fn with_max_hierarchy_depth(mut self, max_hierarchy_depth: u32) -> AppResult<Self> {
        if max_hierarchy_depth == 0 {
            return Err(AppError::Validation(
                "max hierarchy depth must be at least 1".to_owned(),
            ));
        }

        self.max_hierarchy_depth = max_hierarchy_depth;
        Ok(self)
    }

    /// Returns whether a static role requires an approved license.
    #[must_use]
    pub fn requires_license(&self, role: &str) -> bool {
        self.license_required_roles
            .iter()
            .any(|candidate| candidate == role)
    }
}

/// Key layout and backend bounds of the permission cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionCacheConfig {
    /// Prefix of every key.
    pub key_prefix: String,
    /// Envelope schema version; entries with another version are ignored.
    pub schema_version: u32,
    /// Upper bound of one backend operation.
    pub operation_timeout: Duration,
}

impl Default for PermissionCacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: "aegis:rbac".to_owned(),
            schema_version: 1,
            operation_timeout: Duration::from_millis(50),
        }
    }
}

impl PermissionCacheConfig {
    /// Overrides the backend operation timeout.
    #[must_use]
    pub fn with_operation_timeout(mut self, operation_timeout: Duration) -> Self {
        self.operation_timeout = operation_timeout;
        self
    }
}

/// Options of one migration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationConfig {
    /// Compute every phase without writing anything.
    pub dry_run: bool,
    /// Share of actors sent to the dynamic engine after activation.
    pub rollout_percentage: u8,
    /// Roll back automatically when validation reports a critical finding.
    pub auto_rollback_on_critical: bool,
    /// Number of actors timed during performance sampling.
    pub performance_sample_size: usize,
    /// Latency budget of one sampled check, in milliseconds.
    pub performance_budget_ms: u64,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            rollout_percentage: 10,
            auto_rollback_on_critical: true,
            performance_sample_size: 25,
            performance_budget_ms: 100,
        }
    }
}

impl MigrationConfig {
    /// Overrides the rollout percentage.
    pub fn with_rollout_percentage(mut self, rollout_percentage: u8) -> AppResult<Self> {
        validate_rollout_percentage(rollout_percentage)?;
        self.rollout_percentage = rollout_percentage;
        Ok(self)
    }

    /// Switches the run to dry-run mode.
    #[must_use]
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }
}

pub(crate) fn validate_rollout_percentage(percentage: u8) -> AppResult<()> {
    if percentage > 100 {
        return Err(AppError::Validation(format!(
            "rollout percentage must be between 0 and 100, got {percentage}"
        )));
    }

    Ok(())
}
