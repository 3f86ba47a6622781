use std::sync::Arc;

use aegis_domain::{ActorRecord, LEGACY_WILDCARD, PermissionAction};

use crate::rbac_ports::LegacyPermissionMatrix;

/// Outcome of the static-role evaluation path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyDecision {
    /// Whether the static path allows the action.
    pub allowed: bool,
    /// Human-readable explanation.
    pub reason: String,
}

impl LegacyDecision {
    fn allow(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

/// Evaluates the pre-dynamic static role and permission model.
#[derive(Clone)]
pub struct LegacyEvaluator {
    matrix: Arc<dyn LegacyPermissionMatrix>,
    super_admin_role: String,
}

impl LegacyEvaluator {
    /// Creates an evaluator over a static matrix.
    #[must_use]
    pub fn new(matrix: Arc<dyn LegacyPermissionMatrix>, super_admin_role: impl Into<String>) -> Self {
        Self {
            matrix,
            super_admin_role: super_admin_role.into(),
        }
    }

    /// Returns the actions the static matrix knows.
    #[must_use]
    pub fn known_actions(&self) -> Vec<PermissionAction> {
        self.matrix.actions()
    }

    /// Decides an action the way the static model did.
    #[must_use]
    pub fn evaluate(&self, actor: &ActorRecord, action: &PermissionAction) -> LegacyDecision {
        if !actor.status.permits_access() {
            return LegacyDecision::deny(format!("account is {}", actor.status.as_str()));
        }
        if actor.role == self.super_admin_role {
            return LegacyDecision::allow("static super-admin role");
        }
        if actor.denies(action) {
            return LegacyDecision::deny(format!("'{action}' is explicitly denied"));
        }
        if actor
            .legacy_permissions
            .iter()
            .any(|legacy| legacy == LEGACY_WILDCARD || legacy == action.as_str())
        {
            return LegacyDecision::allow(format!("static permission grants '{action}'"));
        }

        let Some(requirement) = self.matrix.requirement_for(action) else {
            return LegacyDecision::deny(format!("static matrix has no rule for '{action}'"));
        };
        if requirement.roles.iter().any(|role| role == &actor.role) {
            return LegacyDecision::allow(format!(
                "static role '{}' may perform '{action}'",
                actor.role
            ));
        }
        if requirement
            .permissions
            .iter()
            .any(|permission| actor.legacy_permissions.contains(permission))
        {
            return LegacyDecision::allow(format!("static permission satisfies '{action}'"));
        }

        LegacyDecision::deny(format!(
            "static role '{}' does not satisfy '{action}'",
            actor.role
        ))
    }
}
