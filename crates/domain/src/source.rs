use serde::{Deserialize, Serialize};

use crate::RoleId;

/// Origin of a granted or denied permission for an actor.
///
/// Variants that carry a priority take part in conflict resolution; the
/// remaining variants only describe terminal decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PermissionSource {
    /// The actor holds the super-admin sentinel role.
    SuperAdmin,
    /// The actor is explicitly denied the action.
    DirectDenial,
    /// The actor is explicitly granted the action.
    #[serde(rename = "direct_permission")]
    Direct,
    /// A role the actor holds links the action.
    #[serde(rename = "role")]
    RoleGrant {
        /// Role carrying the link.
        role_id: RoleId,
    },
    /// An ancestor of a role the actor holds links the action.
    Inherited {
        /// Ancestor role carrying the link.
        from_role_id: RoleId,
        /// Assigned role the ancestor was reached through.
        via_role_id: RoleId,
    },
    /// A static compatibility permission grants the action.
    Legacy,
    /// The action is gated behind a higher subscription tier.
    Subscription,
    /// The account status blocks all access.
    AccountStatus,
    /// No source grants the action.
    None,
}

impl PermissionSource {
    /// Returns a stable label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SuperAdmin => "super_admin",
            Self::DirectDenial => "direct_denial",
            Self::Direct => "direct_permission",
            Self::RoleGrant { .. } => "role",
            Self::Inherited { .. } => "inherited",
            Self::Legacy => "legacy",
            Self::Subscription => "subscription",
            Self::AccountStatus => "account_status",
            Self::None => "none",
        }
    }

    /// Returns the conflict-resolution priority; higher wins.
    ///
    /// Terminal decision sources have no priority.
    #[must_use]
    pub fn priority(&self) -> Option<u8> {
        match self {
            Self::DirectDenial => Some(100),
            Self::Direct => Some(80),
            Self::RoleGrant { .. } => Some(60),
            Self::Inherited { .. } => Some(40),
            Self::Legacy => Some(20),
            Self::SuperAdmin | Self::Subscription | Self::AccountStatus | Self::None => None,
        }
    }

    /// Returns the role that contributed the source, if any.
    #[must_use]
    pub fn contributing_role(&self) -> Option<RoleId> {
        match self {
            Self::RoleGrant { role_id } => Some(*role_id),
            Self::Inherited { from_role_id, .. } => Some(*from_role_id),
            _ => None,
        }
    }
}
