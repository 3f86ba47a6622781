use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use aegis_core::{AppError, AppResult};
use aegis_domain::{ActorId, EvaluationContext, PermissionAction, PermissionSource};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::authorization_service::AuthorizationService;
use crate::config::validate_rollout_percentage;
use crate::rbac_ports::ActorRepository;

/// How checks are split between the dynamic engine and the static path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "percentage", rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// Actors whose bucket is below the percentage use the dynamic engine.
    Percentage(u8),
    /// Every check uses the dynamic engine.
    ForceDynamic,
    /// Every check uses the static path.
    ForceLegacy,
}

/// Path that produced a routed decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationPath {
    /// The dynamic engine decided.
    Dynamic,
    /// The static path decided.
    Legacy,
    /// The dynamic engine failed and the static path decided instead.
    Fallback,
}

/// Decision returned by the router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutedDecision {
    /// Whether the action is allowed.
    pub allowed: bool,
    /// Path that decided.
    pub path: EvaluationPath,
    /// Dynamic source, when the dynamic engine decided.
    pub source: Option<PermissionSource>,
    /// Explanation, when available.
    pub reason: Option<String>,
}

/// Counter snapshot of the router.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RouterMetrics {
    /// Checks decided by the dynamic engine.
    pub dynamic_checks: u64,
    /// Checks decided by the static path.
    pub legacy_checks: u64,
    /// Dynamic failures answered by the static path.
    pub fallbacks: u64,
    /// Dynamic engine failures.
    pub errors: u64,
    /// Mean check latency in microseconds.
    pub average_latency_micros: u64,
}

#[derive(Debug, Default)]
struct RouterCounters {
    dynamic_checks: AtomicU64,
    legacy_checks: AtomicU64,
    fallbacks: AtomicU64,
    errors: AtomicU64,
    total_checks: AtomicU64,
    total_latency_micros: AtomicU64,
}

/// Action on which the two paths disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsistencyMismatch {
    /// Compared action.
    pub action: PermissionAction,
    /// Dynamic decision.
    pub dynamic_allowed: bool,
    /// Dynamic source.
    pub dynamic_source: PermissionSource,
    /// Dynamic explanation.
    pub dynamic_reason: Option<String>,
    /// Static decision.
    pub legacy_allowed: bool,
    /// Static explanation.
    pub legacy_reason: String,
}

/// Outcome of probing both paths for one actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsistencyReport {
    /// Compared actor.
    pub actor_id: ActorId,
    /// Number of compared actions.
    pub checked: usize,
    /// Disagreements.
    pub mismatches: Vec<ConsistencyMismatch>,
}

impl ConsistencyReport {
    /// Returns whether both paths agreed on every action.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Splits checks between the dynamic engine and the static path during cutover.
#[derive(Clone)]
pub struct CompatibilityRouter {
    authorization: AuthorizationService,
    actor_repository: Arc<dyn ActorRepository>,
    strategy: Arc<RwLock<RoutingStrategy>>,
    counters: Arc<RouterCounters>,
}

impl CompatibilityRouter {
    /// Creates a router that starts in legacy-only mode.
    #[must_use]
    pub fn new(
        authorization: AuthorizationService,
        actor_repository: Arc<dyn ActorRepository>,
    ) -> Self {
        Self {
            authorization,
            actor_repository,
            strategy: Arc::new(RwLock::new(RoutingStrategy::ForceLegacy)),
            counters: Arc::new(RouterCounters::default()),
        }
    }

    /// Returns the resolution service behind the dynamic path.
    #[must_use]
    pub fn authorization(&self) -> &AuthorizationService {
        &self.authorization
    }

    /// Returns the active strategy.
    pub async fn strategy(&self) -> RoutingStrategy {
        *self.strategy.read().await
    }

    /// Replaces the active strategy.
    pub async fn set_strategy(&self, strategy: RoutingStrategy) -> AppResult<()> {
        if let RoutingStrategy::Percentage(percentage) = strategy {
            validate_rollout_percentage(percentage)?;
        }

        *self.strategy.write().await = strategy;
        tracing::info!(?strategy, "routing strategy updated");
        Ok(())
    }

    /// Routes a share of actors to the dynamic engine.
    pub async fn set_rollout_percentage(&self, percentage: u8) -> AppResult<()> {
        self.set_strategy(RoutingStrategy::Percentage(percentage))
            .await
    }

    /// Returns the stable `0..100` bucket of an actor.
    #[must_use]
    pub fn bucket(actor_id: &ActorId) -> u8 {
        let digest = Sha256::digest(actor_id.as_str().as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        (u64::from_be_bytes(prefix) % 100) as u8
    }

    /// Decides an action on the path selected for the actor.
    pub async fn check(
        &self,
        actor_id: &ActorId,
        action: &str,
        context: &EvaluationContext,
    ) -> RoutedDecision {
        let started = Instant::now();
        let use_dynamic = match self.strategy().await {
            RoutingStrategy::ForceDynamic => true,
            RoutingStrategy::ForceLegacy => false,
            RoutingStrategy::Percentage(percentage) => Self::bucket(actor_id) < percentage,
        };

        let decision = if use_dynamic {
            match self
                .authorization
                .try_check_permission(actor_id, action, context)
                .await
            {
                Ok(check) => {
                    self.counters.dynamic_checks.fetch_add(1, Ordering::Relaxed);
                    RoutedDecision {
                        allowed: check.allowed,
                        path: EvaluationPath::Dynamic,
                        source: Some(check.source),
                        reason: check.reason,
                    }
                }
                Err(error) => {
                    self.counters.errors.fetch_add(1, Ordering::Relaxed);
                    self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        actor_id = %actor_id,
                        action,
                        error = %error,
                        "dynamic check failed, falling back to static path"
                    );
                    let mut decision = self.check_legacy(actor_id, action).await;
                    decision.path = EvaluationPath::Fallback;
                    decision
                }
            }
        } else {
            self.counters.legacy_checks.fetch_add(1, Ordering::Relaxed);
            self.check_legacy(actor_id, action).await
        };

        let elapsed = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
        self.counters.total_checks.fetch_add(1, Ordering::Relaxed);
        self.counters
            .total_latency_micros
            .fetch_add(elapsed, Ordering::Relaxed);
        decision
    }

    /// Runs both paths over a set of actions and reports disagreements.
    ///
    /// Mismatches are logged, never returned as errors.
    pub async fn validate_permission_consistency(
        &self,
        actor_id: &ActorId,
        actions: &[PermissionAction],
        context: &EvaluationContext,
    ) -> AppResult<ConsistencyReport> {
        let actor = self
            .actor_repository
            .find_actor(actor_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("actor '{actor_id}' not found")))?;

        let mut mismatches = Vec::new();
        for action in actions {
            let dynamic = self
                .authorization
                .check_permission(actor_id, action.as_str(), context)
                .await;
            let legacy = self.authorization.legacy().evaluate(&actor, action);
            if dynamic.allowed == legacy.allowed {
                continue;
            }

            tracing::warn!(
                actor_id = %actor_id,
                action = %action,
                dynamic_allowed = dynamic.allowed,
                dynamic_source = dynamic.source.as_str(),
                legacy_reason = %legacy.reason,
                "dynamic and static paths disagree"
            );
            mismatches.push(ConsistencyMismatch {
                action: action.clone(),
                dynamic_allowed: dynamic.allowed,
                dynamic_source: dynamic.source,
                dynamic_reason: dynamic.reason,
                legacy_allowed: legacy.allowed,
                legacy_reason: legacy.reason,
            });
        }

        Ok(ConsistencyReport {
            actor_id: actor_id.clone(),
            checked: actions.len(),
            mismatches,
        })
    }

    /// Returns a counter snapshot.
    #[must_use]
    pub fn metrics(&self) -> RouterMetrics {
        let total_checks = self.counters.total_checks.load(Ordering::Relaxed);
        let total_latency = self.counters.total_latency_micros.load(Ordering::Relaxed);
        RouterMetrics {
            dynamic_checks: self.counters.dynamic_checks.load(Ordering::Relaxed),
            legacy_checks: self.counters.legacy_checks.load(Ordering::Relaxed),
            fallbacks: self.counters.fallbacks.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            average_latency_micros: total_latency.checked_div(total_checks).unwrap_or_default(),
        }
    }

    async fn check_legacy(&self, actor_id: &ActorId, action: &str) -> RoutedDecision {
        let deny = |reason: String| RoutedDecision {
            allowed: false,
            path: EvaluationPath::Legacy,
            source: None,
            reason: Some(reason),
        };

        let action = match PermissionAction::parse(action) {
            Ok(action) => action,
            Err(error) => return deny(error.to_string()),
        };
        let actor = match self.actor_repository.find_actor(actor_id).await {
            Ok(Some(actor)) => actor,
            Ok(None) => return deny(format!("actor '{actor_id}' not found")),
            Err(error) => return deny(error.to_string()),
        };

        let decision = self.authorization.legacy().evaluate(&actor, &action);
        RoutedDecision {
            allowed: decision.allowed,
            path: EvaluationPath::Legacy,
            source: None,
            reason: Some(decision.reason),
        }
    }
}
