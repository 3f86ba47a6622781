use std::collections::BTreeMap;

use chrono::{Datelike, Timelike, Weekday};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::{EvaluationContext, PermissionAction, RoleId};

/// UTC hour window during which a grant applies.
///
/// `start_hour > end_hour` wraps around midnight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Inclusive start hour, `0..=23`.
    pub start_hour: u8,
    /// Exclusive end hour, `0..=24`.
    pub end_hour: u8,
    /// Weekdays the window applies on; empty means every day.
    #[serde(default)]
    pub weekdays: Vec<Weekday>,
}

impl TimeWindow {
    fn contains(&self, context: &EvaluationContext) -> bool {
        let at = context.evaluated_at;
        if !self.weekdays.is_empty() && !self.weekdays.contains(&at.weekday()) {
            return false;
        }

        let hour = at.hour();
        let start = u32::from(self.start_hour);
        let end = u32::from(self.end_hour);
        if start <= end {
            hour >= start && hour < end
        } else {
            hour >= start || hour < end
        }
    }
}

/// Conditions attached to a role-permission link.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionConditions {
    /// Optional time-of-day restriction.
    pub time_window: Option<TimeWindow>,
    /// When non-empty, the caller address must fall in one of these networks.
    #[serde(default)]
    pub allowed_ips: Vec<IpNet>,
    /// The caller address must not fall in any of these networks.
    #[serde(default)]
    pub denied_ips: Vec<IpNet>,
    /// Context attributes that must be present with exactly these values.
    #[serde(default)]
    pub required_context: BTreeMap<String, String>,
}

impl PermissionConditions {
    /// Returns whether no condition is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.time_window.is_none()
            && self.allowed_ips.is_empty()
            && self.denied_ips.is_empty()
            && self.required_context.is_empty()
    }

    /// Checks the conditions against a context, returning the first unmet one.
    pub fn evaluate(&self, context: &EvaluationContext) -> Result<(), String> {
        if let Some(window) = &self.time_window
            && !window.contains(context)
        {
            return Err(format!(
                "outside allowed time window {:02}:00-{:02}:00 UTC",
                window.start_hour, window.end_hour
            ));
        }

        if let Some(ip_address) = context.ip_address {
            if self
                .denied_ips
                .iter()
                .any(|network| network.contains(&ip_address))
            {
                return Err(format!("address {ip_address} is explicitly denied"));
            }
            if !self.allowed_ips.is_empty()
                && !self
                    .allowed_ips
                    .iter()
                    .any(|network| network.contains(&ip_address))
            {
                return Err(format!("address {ip_address} is not in an allowed network"));
            }
        } else if !self.allowed_ips.is_empty() {
            return Err("caller address is required by an IP allow list".to_owned());
        }

        for (key, expected) in &self.required_context {
            match context.attributes.get(key) {
                Some(actual) if actual == expected => {}
                Some(actual) => {
                    return Err(format!(
                        "context '{key}' is '{actual}', expected '{expected}'"
                    ));
                }
                None => return Err(format!("context '{key}' is required")),
            }
        }

        Ok(())
    }
}

/// Link granting or denying one action to a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePermissionGrant {
    /// Role the link belongs to.
    pub role_id: RoleId,
    /// Linked action.
    pub action: PermissionAction,
    /// `true` grants, `false` denies.
    pub granted: bool,
    /// Conditions under which the link applies.
    #[serde(default)]
    pub conditions: PermissionConditions,
    /// Tie-breaker between links of the same source kind; higher wins.
    pub priority: i32,
    /// Inactive links are ignored.
    pub is_active: bool,
}

impl RolePermissionGrant {
    /// Creates an unconditional active grant.
    #[must_use]
    pub fn grant(role_id: RoleId, action: PermissionAction) -> Self {
        Self {
            role_id,
            action,
            granted: true,
            conditions: PermissionConditions::default(),
            priority: 0,
            is_active: true,
        }
    }

    /// Creates an unconditional active denial.
    #[must_use]
    pub fn deny(role_id: RoleId, action: PermissionAction) -> Self {
        Self {
            granted: false,
            ..Self::grant(role_id, action)
        }
    }

    /// Attaches conditions.
    #[must_use]
    pub fn with_conditions(mut self, conditions: PermissionConditions) -> Self {
        self.conditions = conditions;
        self
    }

    /// Sets the tie-breaking priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}
