use std::collections::BTreeMap;

use serde::Deserialize;

use aegis_application::{LegacyPermissionMatrix, LegacyRequirement};
use aegis_core::{AppError, AppResult};
use aegis_domain::PermissionAction;

#[derive(Debug, Deserialize)]
struct LegacyRuleFile {
    #[serde(default)]
    roles: Vec<String>,
    #[serde(default)]
    permissions: Vec<String>,
}

/// Pre-dynamic permission matrix held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticLegacyPermissionMatrix {
    rules: BTreeMap<PermissionAction, LegacyRequirement>,
}

impl StaticLegacyPermissionMatrix {
    /// Creates an empty matrix that knows no action.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the rule for one action.
    pub fn with_rule(
        mut self,
        action: &str,
        roles: &[&str],
        permissions: &[&str],
    ) -> AppResult<Self> {
        let action = PermissionAction::parse(action)?;
        self.rules.insert(
            action,
            LegacyRequirement {
                roles: roles.iter().map(|role| (*role).to_owned()).collect(),
                permissions: permissions
                    .iter()
                    .map(|permission| (*permission).to_owned())
                    .collect(),
            },
        );
        Ok(self)
    }

    /// Parses a JSON object mapping actions to `{ "roles": [..], "permissions": [..] }`.
    pub fn from_json(json: &str) -> AppResult<Self> {
        let parsed: BTreeMap<String, LegacyRuleFile> = serde_json::from_str(json)
            .map_err(|error| AppError::Validation(format!("invalid legacy matrix: {error}")))?;

        let mut rules = BTreeMap::new();
        for (action, rule) in parsed {
            rules.insert(
                PermissionAction::parse(action.as_str())?,
                LegacyRequirement {
                    roles: rule.roles,
                    permissions: rule.permissions,
                },
            );
        }

        Ok(Self { rules })
    }

    /// Returns the matrix the pharmacy deployment ran before the dynamic engine.
    ///
    /// Every static role is listed wherever its mapped dynamic role reaches the
    /// action through its own links or an ancestor's.
    pub fn pharmacy() -> AppResult<Self> {
        const EVERYONE: &[&str] = &[
            "staff",
            "cashier",
            "intern_pharmacist",
            "pharmacist",
            "auditor",
            "manager",
            "owner",
        ];
        const CLINICAL: &[&str] = &["intern_pharmacist", "pharmacist"];
        const MANAGEMENT: &[&str] = &["manager", "owner"];

        Self::new()
            .with_rule("inventory:read", EVERYONE, &["view_inventory"])?
            .with_rule("reports:read", EVERYONE, &["view_reports"])?
            .with_rule("patient:read", CLINICAL, &["view_patients"])?
            .with_rule("prescription:read", CLINICAL, &["view_prescriptions"])?
            .with_rule("patient:write", &["pharmacist"], &["edit_patients"])?
            .with_rule("prescription:create", &["pharmacist"], &[])?
            .with_rule("prescription:dispense", &["pharmacist"], &["dispense"])?
            .with_rule(
                "inventory:write",
                &["pharmacist", "manager", "owner"],
                &["edit_inventory"],
            )?
            .with_rule(
                "sales:create",
                &["cashier", "pharmacist", "manager", "owner"],
                &["make_sales"],
            )?
            .with_rule("inventory:adjust", MANAGEMENT, &[])?
            .with_rule("sales:refund", MANAGEMENT, &["issue_refunds"])?
            .with_rule("reports:export", &["auditor", "manager", "owner"], &[])?
            .with_rule("inventory:audit", &["auditor"], &[])?
            .with_rule("audit:read", &["auditor", "owner", "admin"], &[])?
            .with_rule("user:manage", &["owner", "admin"], &[])?
            .with_rule("role:manage", &["admin"], &[])?
            .with_rule("system:configure", &["admin"], &[])
    }
}

impl LegacyPermissionMatrix for StaticLegacyPermissionMatrix {
    fn requirement_for(&self, action: &PermissionAction) -> Option<LegacyRequirement> {
        self.rules.get(action).cloned()
    }

    fn actions(&self) -> Vec<PermissionAction> {
        self.rules.keys().cloned().collect()
    }
}
