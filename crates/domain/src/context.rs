use std::collections::BTreeMap;
use std::net::IpAddr;

use aegis_core::WorkspaceId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Request-time facts a permission decision is evaluated against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationContext {
    /// Workspace the request is scoped to, if any.
    pub workspace_id: Option<WorkspaceId>,
    /// Caller address used by IP conditions.
    pub ip_address: Option<IpAddr>,
    /// Evaluation instant used by time-window conditions and assignment expiry.
    pub evaluated_at: DateTime<Utc>,
    /// Free-form request attributes used by context restrictions.
    pub attributes: BTreeMap<String, String>,
}

impl EvaluationContext {
    /// Creates an unscoped context evaluated now.
    #[must_use]
    pub fn now() -> Self {
        Self {
            workspace_id: None,
            ip_address: None,
            evaluated_at: Utc::now(),
            attributes: BTreeMap::new(),
        }
    }

    /// Scopes the context to a workspace.
    #[must_use]
    pub fn in_workspace(mut self, workspace_id: WorkspaceId) -> Self {
        self.workspace_id = Some(workspace_id);
        self
    }

    /// Sets the caller address.
    #[must_use]
    pub fn with_ip(mut self, ip_address: IpAddr) -> Self {
        self.ip_address = Some(ip_address);
        self
    }

    /// Pins the evaluation instant.
    #[must_use]
    pub fn at(mut self, evaluated_at: DateTime<Utc>) -> Self {
        self.evaluated_at = evaluated_at;
        self
    }

    /// Adds one request attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Returns the cache scope label for the workspace dimension.
    #[must_use]
    pub fn workspace_scope(&self) -> String {
        self.workspace_id
            .map(|workspace_id| workspace_id.to_string())
            .unwrap_or_else(|| "global".to_owned())
    }
}

impl Default for EvaluationContext {
    fn default() -> Self {
        Self::now()
    }
}
