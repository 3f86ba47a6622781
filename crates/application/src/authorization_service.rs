mod legacy;


use std::collections::BTreeMap;
use std::sync::Arc;

use aegis_core::{AppError, AppResult};
use aegis_domain::{
    ActorId, ActorRecord, EvaluationContext, LicenseStatus, PermissionAction, PermissionSource,
    RoleId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::AuthorizationConfig;
use crate::permission_aggregator::{
    AggregatedPermissions, ConflictingGrant, PermissionAggregator, PermissionConflict, UnsatisfiedDependency,
};
use crate::permission_cache::{CacheKey, PermissionCache};
use crate::rbac_ports::{ActorRepository, PermissionRepository};

pub use legacy::{LegacyDecision, LegacyEvaluator};

/// Role that would grant a denied action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSuggestion {
    /// Suggested role.
    pub role_id: RoleId,
    /// Suggested role name.
    pub role_name: String,
}

/// Decision for one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionCheck {
    /// Checked action, as requested.
    pub action: String,
    /// Whether the action is allowed.
    pub allowed: bool,
    /// Source that decided.
    pub source: PermissionSource,
    /// Explanation for denials and degraded decisions.
    pub reason: Option<String>,
    /// Roles that would grant the action; only set when no source matched.
    #[serde(default)]
    pub suggestions: Vec<RoleSuggestion>,
    /// Whether the decision came from the cache.
    #[serde(skip)]
    pub cached: bool,
}

impl PermissionCheck {
    fn allow(action: &PermissionAction, source: PermissionSource) -> Self {
        Self {
            action: action.as_str().to_owned(),
            allowed: true,
            source,
            reason: None,
            suggestions: Vec::new(),
            cached: false,
        }
    }

    fn deny(action: &str, source: PermissionSource, reason: impl Into<String>) -> Self {
        Self {
            action: action.to_owned(),
            allowed: false,
            source,
            reason: Some(reason.into()),
            suggestions: Vec::new(),
            cached: false,
        }
    }
}

/// Full permission picture of an actor in one workspace scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectivePermissions {
    /// Resolved actor.
    pub actor_id: ActorId,
    /// Workspace id or `global`.
    pub workspace_scope: String,
    /// Allowed actions.
    pub permissions: Vec<PermissionAction>,
    /// Deciding source per allowed action.
    pub sources: BTreeMap<PermissionAction, PermissionSource>,
    /// Actions explicitly denied or removed by a gate.
    pub denied: Vec<PermissionAction>,
    /// Source disagreements found during aggregation.
    #[serde(default)]
    pub conflicts: Vec<PermissionConflict>,
    /// Granted actions missing a declared dependency.
    #[serde(default)]
    pub unsatisfied_dependencies: Vec<UnsatisfiedDependency>,
    /// Co-granted conflicting actions.
    #[serde(default)]
    pub conflicting_grants: Vec<ConflictingGrant>,
}

/// How long a computed result may be served from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cacheability {
    Unbounded,
    /// Stale once a temporary assignment expires.
    Until(DateTime<Utc>),
    /// Depends on request attributes.
    Never,
}

impl Cacheability {
    fn of(aggregated: &AggregatedPermissions, conditional: bool) -> Self {
        if conditional {
            return Self::Never;
        }
        aggregated.valid_until.map_or(Self::Unbounded, Self::Until)
    }

    /// Caps a TTL so the entry dies before its inputs do; `None` skips caching.
    fn ttl_seconds(self, ttl_seconds: u64, now: DateTime<Utc>) -> Option<u64> {
        match self {
            Self::Unbounded => Some(ttl_seconds),
            Self::Never => None,
            Self::Until(valid_until) => {
                let remaining = u64::try_from((valid_until - now).num_seconds()).unwrap_or(0);
                (remaining > 0).then(|| remaining.min(ttl_seconds))
            }
        }
    }
}

/// Request-time permission resolution.
#[derive(Clone)]
pub struct AuthorizationService {
    actor_repository: Arc<dyn ActorRepository>,
    permission_repository: Arc<dyn PermissionRepository>,
    aggregator: PermissionAggregator,
    legacy: LegacyEvaluator,
    cache: PermissionCache,
    config: AuthorizationConfig,
}

impl AuthorizationService {
    /// Creates a resolution service.
    #[must_use]
    pub fn new(
        actor_repository: Arc<dyn ActorRepository>,
        permission_repository: Arc<dyn PermissionRepository>,
        aggregator: PermissionAggregator,
        legacy: LegacyEvaluator,
        cache: PermissionCache,
        config: AuthorizationConfig,
    ) -> Self {
        Self {
            actor_repository,
            permission_repository,
            aggregator,
            legacy,
            cache,
            config,
        }
    }

    /// Returns the static-path evaluator shared with the router.
    #[must_use]
    pub fn legacy(&self) -> &LegacyEvaluator {
        &self.legacy
    }

    /// Returns the resolution configuration.
    #[must_use]
    pub fn config(&self) -> &AuthorizationConfig {
        &self.config
    }

    /// Returns a concrete decision, converting any failure into a deny.
    pub async fn check_permission(
        &self,
        actor_id: &ActorId,
        action: &str,
        context: &EvaluationContext,
    ) -> PermissionCheck {
        match self.try_check_permission(actor_id, action, context).await {
            Ok(check) => check,
            Err(error) => {
                tracing::warn!(
                    actor_id = %actor_id,
                    action,
                    error = %error,
                    "permission check failed, denying"
                );
                PermissionCheck::deny(action, PermissionSource::None, error.to_string())
            }
        }
    }

    /// Decides one action, surfacing validation and persistence failures.
    ///
    /// Sources are consulted in order: cache, super-admin, account status,
    /// explicit denial, subscription tier, explicit grant, roles and their
    /// ancestors, the static matrix. The first that decides wins and its
    /// outcome is cached.
    pub async fn try_check_permission(
        &self,
        actor_id: &ActorId,
        action: &str,
        context: &EvaluationContext,
    ) -> AppResult<PermissionCheck> {
        let action = PermissionAction::parse(action)?;
        let cache_key = CacheKey::UserCheck {
            actor_id: actor_id.clone(),
            scope: context.workspace_scope(),
            action: action.clone(),
        };
        if let Some(mut cached) = self.cache.get::<PermissionCheck>(&cache_key).await {
            cached.cached = true;
            return Ok(cached);
        }

        let actor = self.load_actor(actor_id).await?;
        let (check, cacheability) = self.decide(&actor, &action, context).await?;
        let ttl = if check.allowed {
            self.config.standard_ttl_seconds
        } else {
            self.config.denial_ttl_seconds
        };
        if let Some(ttl) = cacheability.ttl_seconds(ttl, Utc::now()) {
            self.cache.set(&cache_key, &check, ttl).await;
        }

        tracing::debug!(
            actor_id = %actor_id,
            action = %action,
            allowed = check.allowed,
            source = check.source.as_str(),
            "permission resolved"
        );
        Ok(check)
    }

    /// Computes every allowed action with its source, plus the denied set.
    pub async fn resolve_effective_permissions(
        &self,
        actor_id: &ActorId,
        context: &EvaluationContext,
    ) -> AppResult<EffectivePermissions> {
        let scope = context.workspace_scope();
        let cache_key = CacheKey::UserEffective {
            actor_id: actor_id.clone(),
            scope: scope.clone(),
        };
        if let Some(cached) = self.cache.get::<EffectivePermissions>(&cache_key).await {
            return Ok(cached);
        }

        let actor = self.load_actor(actor_id).await?;
        let catalog = self.permission_repository.list_permissions().await?;
        let mut effective = EffectivePermissions {
            actor_id: actor_id.clone(),
            workspace_scope: scope,
            permissions: Vec::new(),
            sources: BTreeMap::new(),
            denied: Vec::new(),
            conflicts: Vec::new(),
            unsatisfied_dependencies: Vec::new(),
            conflicting_grants: Vec::new(),
        };
        let active_actions = catalog
            .iter()
            .filter(|permission| permission.is_active)
            .map(|permission| permission.action.clone());

        let mut cacheability = Cacheability::Unbounded;
        if self.is_super_admin(&actor) {
            for action in active_actions {
                effective
                    .sources
                    .insert(action.clone(), PermissionSource::SuperAdmin);
                effective.permissions.push(action);
            }
        } else if self.account_block_reason(&actor).is_some() {
            effective.denied = active_actions.collect();
        } else {
            let aggregated = self.aggregator.aggregate(&actor, context).await?;
            cacheability =
                Cacheability::of(&aggregated, !aggregated.conditional_actions.is_empty());

            for (action, resolved) in &aggregated.granted {
                effective.sources.insert(action.clone(), resolved.source);
            }
            effective.denied = aggregated.denied.keys().cloned().collect();

            for action in self.legacy.known_actions() {
                if effective.sources.contains_key(&action) || aggregated.denied.contains_key(&action)
                {
                    continue;
                }
                let permission = catalog
                    .iter()
                    .find(|permission| permission.action == action);
                if permission.is_some_and(|permission| !permission.is_active) {
                    continue;
                }
                if !self.legacy.evaluate(&actor, &action).allowed {
                    continue;
                }
                let required = permission.and_then(|permission| permission.required_subscription_tier);
                if actor.subscription_tier.satisfies(required) {
                    effective.sources.insert(action, PermissionSource::Legacy);
                } else {
                    effective.denied.push(action);
                }
            }

            effective.permissions = effective.sources.keys().cloned().collect();
            effective.denied.sort();
            effective.conflicts = aggregated.conflicts;
            effective.unsatisfied_dependencies = aggregated.unsatisfied_dependencies;
            effective.conflicting_grants = aggregated.conflicting_grants;
        }

        if let Some(ttl) =
            cacheability.ttl_seconds(self.config.aggregate_ttl_seconds, Utc::now())
        {
            self.cache.set(&cache_key, &effective, ttl).await;
        }

        Ok(effective)
    }

    async fn decide(
        &self,
        actor: &ActorRecord,
        action: &PermissionAction,
        context: &EvaluationContext,
    ) -> AppResult<(PermissionCheck, Cacheability)> {
        if self.is_super_admin(actor) {
            return Ok((
                PermissionCheck::allow(action, PermissionSource::SuperAdmin),
                Cacheability::Unbounded,
            ));
        }

        if let Some(reason) = self.account_block_reason(actor) {
            return Ok((
                PermissionCheck::deny(action.as_str(), PermissionSource::AccountStatus, reason),
                Cacheability::Unbounded,
            ));
        }

        if actor.denies(action) {
            return Ok((
                PermissionCheck::deny(
                    action.as_str(),
                    PermissionSource::DirectDenial,
                    format!("'{action}' is explicitly denied"),
                ),
                Cacheability::Unbounded,
            ));
        }

        if let Some(permission) = self.permission_repository.find_permission(action).await? {
            if !permission.is_active {
                return Ok((
                    PermissionCheck::deny(
                        action.as_str(),
                        PermissionSource::None,
                        format!("permission '{action}' is deactivated"),
                    ),
                    Cacheability::Unbounded,
                ));
            }
            if !actor
                .subscription_tier
                .satisfies(permission.required_subscription_tier)
            {
                let required = permission
                    .required_subscription_tier
                    .map(|tier| tier.as_str())
                    .unwrap_or_default();
                return Ok((
                    PermissionCheck::deny(
                        action.as_str(),
                        PermissionSource::Subscription,
                        format!(
                            "'{action}' requires the {required} tier, actor has {}",
                            actor.subscription_tier.as_str()
                        ),
                    ),
                    Cacheability::Unbounded,
                ));
            }
        }

        if actor.grants_directly(action) {
            return Ok((
                PermissionCheck::allow(action, PermissionSource::Direct),
                Cacheability::Unbounded,
            ));
        }

        let aggregated = self
            .aggregator
            .aggregate_action(actor, context, action)
            .await?;
        let cacheability =
            Cacheability::of(&aggregated, aggregated.conditional_actions.contains(action));
        if let Some(resolved) = aggregated.granted.get(action) {
            return Ok((PermissionCheck::allow(action, resolved.source), cacheability));
        }
        if let Some(resolved) = aggregated.denied.get(action) {
            return Ok((
                PermissionCheck::deny(
                    action.as_str(),
                    resolved.source,
                    format!("'{action}' is denied by {}", resolved.source.as_str()),
                ),
                cacheability,
            ));
        }

        let legacy = self.legacy.evaluate(actor, action);
        if legacy.allowed {
            return Ok((PermissionCheck::allow(action, PermissionSource::Legacy), cacheability));
        }

        let mut check = PermissionCheck::deny(
            action.as_str(),
            PermissionSource::None,
            format!("no source grants '{action}'"),
        );
        check.suggestions = self
            .aggregator
            .suggest_roles(action)
            .await?
            .into_iter()
            .map(|holding| RoleSuggestion {
                role_id: holding.role_id,
                role_name: holding.role_name,
            })
            .collect();
        Ok((check, cacheability))
    }

    async fn load_actor(&self, actor_id: &ActorId) -> AppResult<ActorRecord> {
        self.actor_repository
            .find_actor(actor_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("actor '{actor_id}' not found")))
    }

    fn is_super_admin(&self, actor: &ActorRecord) -> bool {
        actor.role == self.config.super_admin_role && actor.status.permits_access()
    }

    fn account_block_reason(&self, actor: &ActorRecord) -> Option<String> {
        if !actor.status.permits_access() {
            return Some(format!("account is {}", actor.status.as_str()));
        }
        if self.config.requires_license(actor.role.as_str())
            && actor.license_status == LicenseStatus::Rejected
        {
            return Some(format!(
                "license for role '{}' was rejected",
                actor.role
            ));
        }

        None
    }
}
