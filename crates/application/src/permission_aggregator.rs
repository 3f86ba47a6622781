#[cfg(test)]
mod tests;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use aegis_core::{AppError, AppResult};
use aegis_domain::{
    ActorRecord, EvaluationContext, LEGACY_WILDCARD, PermissionAction, PermissionDefinition,
    PermissionSource, RoleId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hierarchy_resolver::{HierarchyResolver, RoleHolding};
use crate::rbac_ports::{PermissionRepository, RoleAssignmentRepository};

/// One source's opinion about one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionCandidate {
    /// `true` grants, `false` denies.
    pub granted: bool,
    /// Where the opinion comes from.
    pub source: PermissionSource,
    /// Row priority used between candidates of the same source kind.
    pub priority: i32,
}

impl PermissionCandidate {
    fn rank(&self) -> (u8, i32, bool) {
        (
            self.source.priority().unwrap_or_default(),
            self.priority,
            !self.granted,
        )
    }
}

/// Final decision for one action together with every source that spoke.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPermission {
    /// Decided action.
    pub action: PermissionAction,
    /// Whether the action is granted.
    pub granted: bool,
    /// Source of the decision.
    pub source: PermissionSource,
    /// Every candidate collected for the action, winner included.
    pub candidates: Vec<PermissionCandidate>,
}

/// Disagreement between sources, kept for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionConflict {
    /// Contested action.
    pub action: PermissionAction,
    /// Decision that prevailed.
    pub granted: bool,
    /// Source that prevailed.
    pub winning_source: PermissionSource,
    /// Sources whose opinion was overridden.
    pub overridden_sources: Vec<PermissionSource>,
}

/// Granted action whose declared dependencies are not all granted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsatisfiedDependency {
    /// Granted action.
    pub action: PermissionAction,
    /// Dependencies that are not granted.
    pub missing: Vec<PermissionAction>,
}

/// Pair of granted actions declared as mutually conflicting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictingGrant {
    /// Granted action declaring the conflict.
    pub action: PermissionAction,
    /// Conflicting action that is also granted.
    pub conflicts_with: PermissionAction,
}

/// Combined view of every source for one actor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedPermissions {
    /// Granted actions.
    pub granted: BTreeMap<PermissionAction, ResolvedPermission>,
    /// Actions some source denied, or that a gate removed.
    pub denied: BTreeMap<PermissionAction, ResolvedPermission>,
    /// Source disagreements.
    pub conflicts: Vec<PermissionConflict>,
    /// Granted actions with missing dependencies.
    pub unsatisfied_dependencies: Vec<UnsatisfiedDependency>,
    /// Co-granted conflicting actions.
    pub conflicting_grants: Vec<ConflictingGrant>,
    /// Whether a legacy wildcard applied; dependency checks are skipped then.
    pub legacy_wildcard: bool,
    /// Roles the actor effectively holds in the evaluated scope.
    pub role_ids: Vec<RoleId>,
    /// Actions whose role links carry conditions, making the result context-dependent.
    pub conditional_actions: BTreeSet<PermissionAction>,
    /// Earliest expiry among the temporary assignments in effect.
    pub valid_until: Option<DateTime<Utc>>,
}

/// Collects every source of an actor's permissions and resolves conflicts.
#[derive(Clone)]
pub struct PermissionAggregator {
    assignment_repository: Arc<dyn RoleAssignmentRepository>,
    permission_repository: Arc<dyn PermissionRepository>,
    hierarchy: HierarchyResolver,
}

impl PermissionAggregator {
    /// Creates an aggregator.
    #[must_use]
    pub fn new(
        assignment_repository: Arc<dyn RoleAssignmentRepository>,
        permission_repository: Arc<dyn PermissionRepository>,
        hierarchy: HierarchyResolver,
    ) -> Self {
        Self {
            assignment_repository,
            permission_repository,
            hierarchy,
        }
    }

    /// Aggregates every action for an actor.
    pub async fn aggregate(
        &self,
        actor: &ActorRecord,
        context: &EvaluationContext,
    ) -> AppResult<AggregatedPermissions> {
        self.aggregate_filtered(actor, context, None).await
    }

    /// Aggregates a single action for an actor.
    pub async fn aggregate_action(
        &self,
        actor: &ActorRecord,
        context: &EvaluationContext,
        action: &PermissionAction,
    ) -> AppResult<AggregatedPermissions> {
        self.aggregate_filtered(actor, context, Some(action)).await
    }

    /// Lists roles that would grant a denied action. Has no effect on decisions.
    pub async fn suggest_roles(&self, action: &PermissionAction) -> AppResult<Vec<RoleHolding>> {
        self.hierarchy.get_roles_with_permission(action).await
    }

    async fn aggregate_filtered(
        &self,
        actor: &ActorRecord,
        context: &EvaluationContext,
        filter: Option<&PermissionAction>,
    ) -> AppResult<AggregatedPermissions> {
        let catalog: BTreeMap<PermissionAction, PermissionDefinition> = self
            .permission_repository
            .list_permissions()
            .await?
            .into_iter()
            .map(|permission| (permission.action.clone(), permission))
            .collect();
        let wanted = |action: &PermissionAction| filter.is_none_or(|filter| filter == action);

        let mut collected: BTreeMap<PermissionAction, Vec<PermissionCandidate>> = BTreeMap::new();
        let mut push = |action: PermissionAction, candidate: PermissionCandidate| {
            collected.entry(action).or_default().push(candidate);
        };
        let mut aggregated = AggregatedPermissions::default();

        let mut role_ids: Vec<RoleId> = Vec::new();
        for assignment in self
            .assignment_repository
            .list_assignments_for_actor(&actor.id)
            .await?
        {
            if assignment.is_effective(context.evaluated_at)
                && assignment.applies_to_workspace(context.workspace_id)
            {
                if assignment.is_temporary
                    && let Some(expires_at) = assignment.expires_at
                {
                    aggregated.valid_until = Some(
                        aggregated
                            .valid_until
                            .map_or(expires_at, |current| current.min(expires_at)),
                    );
                }
                if !role_ids.contains(&assignment.role_id) {
                    role_ids.push(assignment.role_id);
                }
            }
        }

        let mut effective_roles = Vec::new();
        for role_id in role_ids {
            let set = match self.hierarchy.get_all_role_permissions(role_id).await {
                Ok(set) => set,
                Err(AppError::NotFound(_)) => {
                    tracing::warn!(actor_id = %actor.id, role_id = %role_id, "assignment references a missing role");
                    continue;
                }
                Err(error) => return Err(error),
            };
            if !set.role_active {
                continue;
            }
            effective_roles.push(role_id);

            for entry in set.entries {
                if !wanted(&entry.action) {
                    continue;
                }
                if !entry.conditions.is_empty() {
                    aggregated.conditional_actions.insert(entry.action.clone());
                }
                if let Err(reason) = entry.conditions.evaluate(context) {
                    tracing::debug!(actor_id = %actor.id, action = %entry.action, reason = %reason, "role link conditions not met");
                    continue;
                }
                push(entry.action, PermissionCandidate {
                    granted: entry.granted,
                    source: entry.source,
                    priority: entry.priority,
                });
            }

            for action in set.legacy_permissions.into_iter().filter(|action| wanted(action)) {
                push(action, legacy_candidate());
            }
            aggregated.legacy_wildcard |= set.legacy_wildcard;
        }
        aggregated.role_ids = effective_roles;

        for legacy in &actor.legacy_permissions {
            if legacy == LEGACY_WILDCARD {
                aggregated.legacy_wildcard = true;
                continue;
            }
            if let Ok(action) = PermissionAction::parse(legacy)
                && wanted(&action)
            {
                push(action, legacy_candidate());
            }
        }

        if aggregated.legacy_wildcard {
            for permission in catalog.values() {
                if permission.is_active && wanted(&permission.action) {
                    push(permission.action.clone(), legacy_candidate());
                }
            }
        }

        for action in actor.direct_permissions.iter().filter(|action| wanted(action)) {
            push(action.clone(), PermissionCandidate {
                granted: true,
                source: PermissionSource::Direct,
                priority: 0,
            });
        }
        for action in actor.denied_permissions.iter().filter(|action| wanted(action)) {
            push(action.clone(), PermissionCandidate {
                granted: false,
                source: PermissionSource::DirectDenial,
                priority: 0,
            });
        }

        for (action, candidates) in collected {
            let Some(winner) = candidates.iter().copied().max_by_key(PermissionCandidate::rank)
            else {
                continue;
            };

            let overridden_sources: Vec<PermissionSource> = candidates
                .iter()
                .filter(|candidate| candidate.granted != winner.granted)
                .map(|candidate| candidate.source)
                .collect();
            if !overridden_sources.is_empty() {
                aggregated.conflicts.push(PermissionConflict {
                    action: action.clone(),
                    granted: winner.granted,
                    winning_source: winner.source,
                    overridden_sources,
                });
            }

            let definition = catalog.get(&action);
            if definition.is_some_and(|definition| !definition.is_active) {
                continue;
            }

            let mut resolved = ResolvedPermission {
                action: action.clone(),
                granted: winner.granted,
                source: winner.source,
                candidates,
            };

            if resolved.granted
                && let Some(required) = definition.and_then(|definition| definition.required_subscription_tier)
                && !actor.subscription_tier.satisfies(Some(required))
            {
                resolved.granted = false;
                resolved.source = PermissionSource::Subscription;
            }

            if resolved.granted {
                aggregated.granted.insert(action, resolved);
            } else {
                aggregated.denied.insert(action, resolved);
            }
        }

        if !aggregated.legacy_wildcard {
            validate_grants(&catalog, &mut aggregated);
        }

        Ok(aggregated)
    }
}

fn legacy_candidate() -> PermissionCandidate {
    PermissionCandidate {
        granted: true,
        source: PermissionSource::Legacy,
        priority: 0,
    }
}

/// Reports missing dependencies and co-granted conflicts. Nothing is auto-granted.
fn validate_grants(
    catalog: &BTreeMap<PermissionAction, PermissionDefinition>,
    aggregated: &mut AggregatedPermissions,
) {
    let mut reported_pairs: BTreeSet<(PermissionAction, PermissionAction)> = BTreeSet::new();

    for action in aggregated.granted.keys() {
        let Some(definition) = catalog.get(action) else {
            continue;
        };

        let missing: Vec<PermissionAction> = definition
            .dependencies
            .iter()
            .filter(|dependency| !aggregated.granted.contains_key(*dependency))
            .cloned()
            .collect();
        if !missing.is_empty() {
            aggregated.unsatisfied_dependencies.push(UnsatisfiedDependency {
                action: action.clone(),
                missing,
            });
        }

        for conflict in &definition.conflicts {
            if !aggregated.granted.contains_key(conflict) {
                continue;
            }
            let pair = if action < conflict {
                (action.clone(), conflict.clone())
            } else {
                (conflict.clone(), action.clone())
            };
            if reported_pairs.insert(pair) {
                aggregated.conflicting_grants.push(ConflictingGrant {
                    action: action.clone(),
                    conflicts_with: conflict.clone(),
                });
            }
        }
    }
}
