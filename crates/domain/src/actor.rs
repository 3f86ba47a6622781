use std::fmt::{Display, Formatter};
use std::str::FromStr;

use aegis_core::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{PermissionAction, RoleId, SubscriptionTier};

const KEY_RESERVED_CHARACTERS: [char; 6] = [':', '*', '?', '[', ']', '\\'];

/// Identifier of an actor owned by the user directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ActorId(String);

impl ActorId {
    /// Creates a validated actor identifier.
    ///
    /// Identifiers are embedded in cache keys and invalidation globs, so `:`,
    /// whitespace and the glob metacharacters `*?[]\` are rejected.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(AppError::Validation("actor id must not be empty".to_owned()));
        }
        if value.chars().any(|character| {
            character.is_whitespace() || KEY_RESERVED_CHARACTERS.contains(&character)
        }) {
            return Err(AppError::Validation(format!(
                "actor id '{value}' must not contain whitespace or any of ':*?[]\\'"
            )));
        }

        Ok(Self(value))
    }

    /// Returns the underlying identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl TryFrom<String> for ActorId {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ActorId> for String {
    fn from(value: ActorId) -> Self {
        value.0
    }
}

impl Display for ActorId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.0.as_str())
    }
}

/// Account status gate applied before any grant is considered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorStatus {
    /// Fully usable account.
    #[default]
    Active,
    /// Registered but awaiting approval.
    Pending,
    /// Temporarily blocked.
    Suspended,
    /// Closed account.
    Deactivated,
}

impl ActorStatus {
    /// Returns a stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Pending => "pending",
            Self::Suspended => "suspended",
            Self::Deactivated => "deactivated",
        }
    }

    /// Returns whether the status allows any permission to be granted.
    #[must_use]
    pub fn permits_access(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl FromStr for ActorStatus {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "active" => Ok(Self::Active),
            "pending" => Ok(Self::Pending),
            "suspended" => Ok(Self::Suspended),
            "deactivated" => Ok(Self::Deactivated),
            _ => Err(AppError::Validation(format!(
                "unknown actor status '{value}'"
            ))),
        }
    }
}

/// Professional license verification state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseStatus {
    /// The actor's role does not require a license.
    #[default]
    NotRequired,
    /// Submitted and awaiting review.
    Pending,
    /// Verified.
    Approved,
    /// Reviewed and rejected.
    Rejected,
}

/// Read view of the externally owned user record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorRecord {
    /// Stable identifier.
    pub id: ActorId,
    /// Account status.
    #[serde(default)]
    pub status: ActorStatus,
    /// Static role from the pre-dynamic system.
    pub role: String,
    /// Explicit per-actor grants.
    #[serde(default)]
    pub direct_permissions: Vec<PermissionAction>,
    /// Explicit per-actor denials; always override every grant.
    #[serde(default)]
    pub denied_permissions: Vec<PermissionAction>,
    /// Static permission strings from the pre-dynamic system; may contain `*`.
    #[serde(default)]
    pub legacy_permissions: Vec<String>,
    /// Subscription tier used by gated permissions.
    #[serde(default)]
    pub subscription_tier: SubscriptionTier,
    /// License state for license-bound roles.
    #[serde(default)]
    pub license_status: LicenseStatus,
    /// Denormalized record of what the dynamic migration wrote for this actor.
    #[serde(default)]
    pub migration: Option<ActorMigrationMarker>,
}

/// Denormalized migration fields kept on the actor record.
///
/// Rollback uses it to undo exactly what the migration added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorMigrationMarker {
    /// When the actor was migrated.
    pub migrated_at: DateTime<Utc>,
    /// Roles assigned by the migration.
    pub role_ids: Vec<RoleId>,
    /// Direct permissions added by the migration.
    pub added_direct_permissions: Vec<PermissionAction>,
}

impl ActorRecord {
    /// Creates an active actor with only a static role.
    pub fn new(id: &str, role: &str) -> AppResult<Self> {
        Ok(Self {
            id: ActorId::new(id)?,
            status: ActorStatus::Active,
            role: role.to_owned(),
            direct_permissions: Vec::new(),
            denied_permissions: Vec::new(),
            legacy_permissions: Vec::new(),
            subscription_tier: SubscriptionTier::Free,
            license_status: LicenseStatus::NotRequired,
            migration: None,
        })
    }

    /// Returns whether the action is explicitly denied.
    #[must_use]
    pub fn denies(&self, action: &PermissionAction) -> bool {
        self.denied_permissions.contains(action)
    }

    /// Returns whether the action is explicitly granted.
    #[must_use]
    pub fn grants_directly(&self, action: &PermissionAction) -> bool {
        self.direct_permissions.contains(action)
    }
}
