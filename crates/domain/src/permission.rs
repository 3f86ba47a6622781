use std::fmt::{Display, Formatter};
use std::str::FromStr;

use aegis_core::{AppError, AppResult, NonEmptyString};
use serde::{Deserialize, Serialize};

/// Legacy permission entry meaning "every permission".
pub const LEGACY_WILDCARD: &str = "*";

/// Permission identifier of the form `resource:operation`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PermissionAction(String);

impl PermissionAction {
    /// Parses and validates an action string.
    ///
    /// Both segments must be non-empty and made of lowercase ASCII letters,
    /// digits or underscores, separated by exactly one `:`.
    pub fn parse(value: &str) -> AppResult<Self> {
        let trimmed = value.trim();
        let Some((resource, operation)) = trimmed.split_once(':') else {
            return Err(AppError::Validation(format!(
                "permission action '{value}' must have the form 'resource:operation'"
            )));
        };

        for (segment_name, segment) in [("resource", resource), ("operation", operation)] {
            if segment.is_empty() {
                return Err(AppError::Validation(format!(
                    "permission action '{value}' has an empty {segment_name} segment"
                )));
            }
            if !segment
                .chars()
                .all(|character| matches!(character, 'a'..='z' | '0'..='9' | '_'))
            {
                return Err(AppError::Validation(format!(
                    "permission action '{value}' has an invalid {segment_name} segment '{segment}'"
                )));
            }
        }

        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Returns the resource segment.
    #[must_use]
    pub fn resource(&self) -> &str {
        self.0.split_once(':').map(|(resource, _)| resource).unwrap_or_default()
    }

    /// Returns the operation segment.
    #[must_use]
    pub fn operation(&self) -> &str {
        self.0
            .split_once(':')
            .map(|(_, operation)| operation)
            .unwrap_or_default()
    }
}

impl FromStr for PermissionAction {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl TryFrom<String> for PermissionAction {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value.as_str())
    }
}

impl From<PermissionAction> for String {
    fn from(value: PermissionAction) -> Self {
        value.0
    }
}

impl Display for PermissionAction {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.0.as_str())
    }
}

/// Risk classification used by security posture checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Read-only or otherwise harmless.
    Low,
    /// Mutates non-sensitive data.
    Medium,
    /// Touches regulated or financial data.
    High,
    /// Administrative control over the access model itself.
    Critical,
}

impl RiskLevel {
    /// Returns a stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Subscription tier an actor is on, ordered from lowest to highest.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionTier {
    /// No paid subscription.
    #[default]
    Free,
    /// Entry paid plan.
    Basic,
    /// Professional plan.
    Professional,
    /// Enterprise plan.
    Enterprise,
}

impl SubscriptionTier {
    /// Returns a stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Basic => "basic",
            Self::Professional => "professional",
            Self::Enterprise => "enterprise",
        }
    }

    /// Returns whether this tier satisfies a required tier.
    #[must_use]
    pub fn satisfies(self, required: Option<Self>) -> bool {
        required.is_none_or(|required| self >= required)
    }
}

impl FromStr for SubscriptionTier {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "free" => Ok(Self::Free),
            "basic" => Ok(Self::Basic),
            "professional" => Ok(Self::Professional),
            "enterprise" => Ok(Self::Enterprise),
            _ => Err(AppError::Validation(format!(
                "unknown subscription tier '{value}'"
            ))),
        }
    }
}

/// Catalog entry for one permission action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionDefinition {
    /// Unique action identifier.
    pub action: PermissionAction,
    /// Grouping used by administrative views.
    pub category: NonEmptyString,
    /// Risk classification.
    pub risk_level: RiskLevel,
    /// Actions that must also be granted for this one to be usable.
    pub dependencies: Vec<PermissionAction>,
    /// Actions that should never be co-granted with this one.
    pub conflicts: Vec<PermissionAction>,
    /// Minimum subscription tier, if gated.
    pub required_subscription_tier: Option<SubscriptionTier>,
    /// System permissions are seeded and never hard-deleted.
    pub is_system_permission: bool,
    /// Inactive permissions are ignored by resolution.
    pub is_active: bool,
}

impl PermissionDefinition {
    /// Creates an active, ungated, non-system permission definition.
    pub fn new(action: &str, category: &str, risk_level: RiskLevel) -> AppResult<Self> {
        Ok(Self {
            action: PermissionAction::parse(action)?,
            category: NonEmptyString::new(category)?,
            risk_level,
            dependencies: Vec::new(),
            conflicts: Vec::new(),
            required_subscription_tier: None,
            is_system_permission: false,
            is_active: true,
        })
    }

    /// Declares actions this permission depends on.
    pub fn with_dependencies(mut self, dependencies: &[&str]) -> AppResult<Self> {
        self.dependencies = dependencies
            .iter()
            .map(|value| PermissionAction::parse(value))
            .collect::<AppResult<Vec<_>>>()?;
        Ok(self)
    }

    /// Declares actions that conflict with this permission.
    pub fn with_conflicts(mut self, conflicts: &[&str]) -> AppResult<Self> {
        self.conflicts = conflicts
            .iter()
            .map(|value| PermissionAction::parse(value))
            .collect::<AppResult<Vec<_>>>()?;
        Ok(self)
    }

    /// Gates the permission behind a subscription tier.
    #[must_use]
    pub fn with_required_tier(mut self, tier: SubscriptionTier) -> Self {
        self.required_subscription_tier = Some(tier);
        self
    }

    /// Marks the permission as system-owned.
    #[must_use]
    pub fn system(mut self) -> Self {
        self.is_system_permission = true;
        self
    }
}
