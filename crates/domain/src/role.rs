use std::fmt::{Display, Formatter};
use std::str::FromStr;

use aegis_core::{AppError, AppResult, NonEmptyString};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a role record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoleId(Uuid);

impl RoleId {
    /// Creates a new random role identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a role identifier from an existing UUID value.
    #[must_use]
    pub fn from_uuid(value: Uuid) -> Self {
        Self(value)
    }

    /// Returns the underlying UUID value.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RoleId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RoleId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

impl FromStr for RoleId {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(value)
            .map(Self)
            .map_err(|error| AppError::Validation(format!("invalid role id '{value}': {error}")))
    }
}

/// Unique machine name of a role, lowercase snake case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoleName(String);

impl RoleName {
    /// Creates a validated role name.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into().trim().to_owned();
        if value.is_empty() {
            return Err(AppError::Validation("role name must not be empty".to_owned()));
        }
        if value.len() > 64 {
            return Err(AppError::Validation(format!(
                "role name '{value}' must not exceed 64 characters"
            )));
        }
        if !value
            .chars()
            .all(|character| matches!(character, 'a'..='z' | '0'..='9' | '_'))
        {
            return Err(AppError::Validation(format!(
                "role name '{value}' must be lowercase snake case"
            )));
        }

        Ok(Self(value))
    }

    /// Returns the underlying name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl TryFrom<String> for RoleName {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RoleName> for String {
    fn from(value: RoleName) -> Self {
        value.0
    }
}

impl Display for RoleName {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.0.as_str())
    }
}

/// Category a role belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleCategory {
    /// Platform roles seeded by the system.
    System,
    /// Roles scoped to a workplace (pharmacy, outlet, lab).
    Workplace,
    /// Administrator-defined roles.
    Custom,
}

impl RoleCategory {
    /// Returns a stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Workplace => "workplace",
            Self::Custom => "custom",
        }
    }
}

impl FromStr for RoleCategory {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "system" => Ok(Self::System),
            "workplace" => Ok(Self::Workplace),
            "custom" => Ok(Self::Custom),
            _ => Err(AppError::Validation(format!(
                "unknown role category '{value}'"
            ))),
        }
    }
}

/// Role record with single-parent inheritance.
///
/// Child roles are not stored here; they are derived from the parent
/// references of other roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDefinition {
    /// Stable identifier.
    pub id: RoleId,
    /// Unique machine name.
    pub name: RoleName,
    /// Human-friendly name.
    pub display_name: NonEmptyString,
    /// Role category.
    pub category: RoleCategory,
    /// Parent role whose permissions are inherited.
    pub parent_role_id: Option<RoleId>,
    /// Distance from the hierarchy root, `0` for roots.
    pub hierarchy_level: u32,
    /// Static permission strings kept for compatibility with the legacy matrix.
    pub legacy_permissions: Vec<String>,
    /// At most one active role per exclusivity group may be held by an actor
    /// in the same workspace.
    pub exclusivity_group: Option<String>,
    /// System roles cannot be deactivated or re-parented.
    pub is_system_role: bool,
    /// Inactive roles contribute nothing to resolution.
    pub is_active: bool,
}

impl RoleDefinition {
    /// Creates an active root role.
    pub fn new(name: &str, display_name: &str, category: RoleCategory) -> AppResult<Self> {
        Ok(Self {
            id: RoleId::new(),
            name: RoleName::new(name)?,
            display_name: NonEmptyString::new(display_name)?,
            category,
            parent_role_id: None,
            hierarchy_level: 0,
            legacy_permissions: Vec::new(),
            exclusivity_group: None,
            is_system_role: category == RoleCategory::System,
            is_active: true,
        })
    }

    /// Sets the parent reference. Level is recomputed by the hierarchy resolver.
    #[must_use]
    pub fn with_parent(mut self, parent_role_id: RoleId) -> Self {
        self.parent_role_id = Some(parent_role_id);
        self
    }

    /// Sets the exclusivity group.
    #[must_use]
    pub fn with_exclusivity_group(mut self, group: impl Into<String>) -> Self {
        self.exclusivity_group = Some(group.into());
        self
    }

    /// Sets static compatibility permissions.
    #[must_use]
    pub fn with_legacy_permissions(mut self, permissions: &[&str]) -> Self {
        self.legacy_permissions = permissions.iter().map(|value| (*value).to_owned()).collect();
        self
    }

    /// Returns whether this role is a hierarchy root.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent_role_id.is_none()
    }
}
