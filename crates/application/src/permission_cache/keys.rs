use std::str::FromStr;

use aegis_domain::{ActorId, PermissionAction, RoleId};

/// Logical cache entry addressed by the permission cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheKey {
    /// Effective permission set of an actor in one workspace scope.
    UserEffective {
        /// Actor.
        actor_id: ActorId,
        /// Workspace id or `global`.
        scope: String,
    },
    /// Outcome of one check for an actor in one workspace scope.
    UserCheck {
        /// Actor.
        actor_id: ActorId,
        /// Workspace id or `global`.
        scope: String,
        /// Checked action.
        action: PermissionAction,
    },
    /// Resolved hierarchy permission set of one role.
    RolePermissions {
        /// Role.
        role_id: RoleId,
    },
}

impl CacheKey {
    /// Renders the key under a prefix and schema version.
    #[must_use]
    pub fn render(&self, prefix: &str, schema_version: u32) -> String {
        match self {
            Self::UserEffective { actor_id, scope } => {
                format!("{prefix}:v{schema_version}:user:{actor_id}:{scope}:effective")
            }
            Self::UserCheck {
                actor_id,
                scope,
                action,
            } => format!(
                "{prefix}:v{schema_version}:user:{actor_id}:{scope}:check:{}",
                action.as_str()
            ),
            Self::RolePermissions { role_id } => {
                format!("{prefix}:v{schema_version}:role:{role_id}:permissions")
            }
        }
    }

    /// Parses a rendered key, returning its schema version and logical entry.
    ///
    /// Returns `None` for keys outside the prefix or with an unknown layout.
    #[must_use]
    pub fn parse(prefix: &str, key: &str) -> Option<(u32, Self)> {
        let rest = key.strip_prefix(prefix)?.strip_prefix(":v")?;
        let (version, rest) = rest.split_once(':')?;
        let version = version.parse::<u32>().ok()?;

        if let Some(rest) = rest.strip_prefix("role:") {
            let role_id = RoleId::from_str(rest.strip_suffix(":permissions")?).ok()?;
            return Some((version, Self::RolePermissions { role_id }));
        }

        let rest = rest.strip_prefix("user:")?;
        let (actor_id, rest) = rest.split_once(':')?;
        let actor_id = ActorId::new(actor_id).ok()?;
        let (scope, rest) = rest.split_once(':')?;
        if scope.is_empty() {
            return None;
        }

        if rest == "effective" {
            return Some((
                version,
                Self::UserEffective {
                    actor_id,
                    scope: scope.to_owned(),
                },
            ));
        }

        let action = PermissionAction::parse(rest.strip_prefix("check:")?).ok()?;
        Some((
            version,
            Self::UserCheck {
                actor_id,
                scope: scope.to_owned(),
                action,
            },
        ))
    }

    /// Returns the actor the entry belongs to.
    #[must_use]
    pub fn actor_id(&self) -> Option<&ActorId> {
        match self {
            Self::UserEffective { actor_id, .. } | Self::UserCheck { actor_id, .. } => {
                Some(actor_id)
            }
            Self::RolePermissions { .. } => None,
        }
    }

    /// Returns the role the entry belongs to.
    #[must_use]
    pub fn role_id(&self) -> Option<RoleId> {
        match self {
            Self::RolePermissions { role_id } => Some(*role_id),
            Self::UserEffective { .. } | Self::UserCheck { .. } => None,
        }
    }
}
