
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use aegis_core::AppResult;
use aegis_domain::{ActorId, ActorStatus, PermissionAction, RoleId};
use serde::Serialize;

use crate::permission_cache::{CacheEntryState, CacheKey, PermissionCache};
use crate::rbac_ports::{
    ActorRepository, PermissionRepository, RoleAssignmentRepository, RoleRepository,
};

/// Kind of divergence found by a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConsistencyIssueKind {
    /// The cache backend could not be scanned.
    CacheUnavailable,
    /// A key under the prefix has an unknown layout.
    MalformedCacheKey,
    /// A value is not a valid envelope.
    MalformedCacheEntry,
    /// The entry was written by another schema version.
    SchemaMismatch {
        /// Version found on the entry.
        found: u32,
    },
    /// The entry outlived its expiry.
    ExpiredCacheEntry,
    /// The entry belongs to a missing or deactivated actor.
    StaleActorEntry,
    /// The entry belongs to a missing or deactivated role.
    StaleRoleEntry,
    /// A role-permission link points at a missing role.
    OrphanRolePermission,
    /// A role assignment points at a missing role or actor.
    OrphanAssignment,
    /// A role-permission link names an action outside the catalog.
    UnknownPermissionAction,
}

/// One finding of a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsistencyIssue {
    /// What was found.
    #[serde(flatten)]
    pub kind: ConsistencyIssueKind,
    /// Cache key or record the finding refers to.
    pub subject: String,
    /// Whether the sweep removed the offending entry.
    pub repaired: bool,
}

/// Result of a full sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsistencySweepReport {
    /// Cache keys inspected.
    pub scanned_cache_keys: usize,
    /// Findings, repaired or not.
    pub issues: Vec<ConsistencyIssue>,
    /// Number of entries removed.
    pub repaired: usize,
}

impl ConsistencySweepReport {
    fn record(&mut self, kind: ConsistencyIssueKind, subject: String, repaired: bool) {
        if repaired {
            self.repaired += 1;
        }
        self.issues.push(ConsistencyIssue {
            kind,
            subject,
            repaired,
        });
    }
}

/// Detects and repairs divergence between cache, store and catalog.
#[derive(Clone)]
pub struct ConsistencyService {
    permission_repository: Arc<dyn PermissionRepository>,
    role_repository: Arc<dyn RoleRepository>,
    assignment_repository: Arc<dyn RoleAssignmentRepository>,
    actor_repository: Arc<dyn ActorRepository>,
    cache: PermissionCache,
}

struct Snapshot {
    actors: HashMap<ActorId, ActorStatus>,
    roles: HashMap<RoleId, bool>,
    actions: BTreeSet<PermissionAction>,
}

impl ConsistencyService {
    /// Creates the consistency service.
    #[must_use]
    pub fn new(
        permission_repository: Arc<dyn PermissionRepository>,
        role_repository: Arc<dyn RoleRepository>,
        assignment_repository: Arc<dyn RoleAssignmentRepository>,
        actor_repository: Arc<dyn ActorRepository>,
        cache: PermissionCache,
    ) -> Self {
        Self {
            permission_repository,
            role_repository,
            assignment_repository,
            actor_repository,
            cache,
        }
    }

    /// Runs the store sweep followed by the cache sweep.
    ///
    /// Cache failures become findings; only store read failures are returned
    /// as errors.
    pub async fn run(&self) -> AppResult<ConsistencySweepReport> {
        let mut report = ConsistencySweepReport::default();
        let snapshot = self.snapshot().await?;

        self.sweep_store(&snapshot, &mut report).await?;
        self.sweep_cache(&snapshot, &mut report).await;

        if report.issues.is_empty() {
            tracing::debug!(
                scanned = report.scanned_cache_keys,
                "consistency sweep found nothing"
            );
        } else {
            tracing::warn!(
                issues = report.issues.len(),
                repaired = report.repaired,
                scanned = report.scanned_cache_keys,
                "consistency sweep finished with findings"
            );
        }

        Ok(report)
    }

    async fn snapshot(&self) -> AppResult<Snapshot> {
        let actors = self
            .actor_repository
            .list_actors()
            .await?
            .into_iter()
            .map(|actor| (actor.id, actor.status))
            .collect();
        let roles = self
            .role_repository
            .list_roles()
            .await?
            .into_iter()
            .map(|role| (role.id, role.is_active))
            .collect();
        let actions = self
            .permission_repository
            .list_permissions()
            .await?
            .into_iter()
            .map(|permission| permission.action)
            .collect();

        Ok(Snapshot {
            actors,
            roles,
            actions,
        })
    }

    async fn sweep_store(
        &self,
        snapshot: &Snapshot,
        report: &mut ConsistencySweepReport,
    ) -> AppResult<()> {
        for link in self.role_repository.list_all_role_permissions().await? {
            let subject = format!("role_permission:{}:{}", link.role_id, link.action);
            if !snapshot.roles.contains_key(&link.role_id) {
                let removed = self
                    .role_repository
                    .remove_role_permission(link.role_id, &link.action)
                    .await?;
                report.record(ConsistencyIssueKind::OrphanRolePermission, subject, removed);
                continue;
            }
            if !snapshot.actions.contains(&link.action) {
                tracing::warn!(
                    role_id = %link.role_id,
                    action = %link.action,
                    "role permission names an action outside the catalog"
                );
                report.record(ConsistencyIssueKind::UnknownPermissionAction, subject, false);
            }
        }

        for assignment in self.assignment_repository.list_all_assignments().await? {
            if snapshot.roles.contains_key(&assignment.role_id)
                && snapshot.actors.contains_key(&assignment.actor_id)
            {
                continue;
            }

            self.assignment_repository
                .delete_assignment(assignment.id)
                .await?;
            self.cache
                .invalidate_user_cache(&assignment.actor_id, None)
                .await;
            report.record(
                ConsistencyIssueKind::OrphanAssignment,
                format!("assignment:{}", assignment.id),
                true,
            );
        }

        Ok(())
    }

    async fn sweep_cache(&self, snapshot: &Snapshot, report: &mut ConsistencySweepReport) {
        let keys = match self.cache.scan_all_keys().await {
            Ok(keys) => keys,
            Err(error) => {
                tracing::warn!(error = %error, "permission cache scan failed");
                report.record(
                    ConsistencyIssueKind::CacheUnavailable,
                    self.cache.config().key_prefix.clone(),
                    false,
                );
                return;
            }
        };
        report.scanned_cache_keys = keys.len();

        let config = self.cache.config();
        for raw_key in keys {
            let kind = match CacheKey::parse(config.key_prefix.as_str(), raw_key.as_str()) {
                None => Some(ConsistencyIssueKind::MalformedCacheKey),
                Some((version, _)) if version != config.schema_version => {
                    Some(ConsistencyIssueKind::SchemaMismatch { found: version })
                }
                Some((_, key)) => match self.cache.inspect_raw(raw_key.as_str()).await {
                    Ok(CacheEntryState::Missing) => None,
                    Ok(CacheEntryState::Malformed) => {
                        Some(ConsistencyIssueKind::MalformedCacheEntry)
                    }
                    Ok(CacheEntryState::SchemaMismatch(found)) => {
                        Some(ConsistencyIssueKind::SchemaMismatch { found })
                    }
                    Ok(CacheEntryState::Expired) => Some(ConsistencyIssueKind::ExpiredCacheEntry),
                    Ok(CacheEntryState::Live) => stale_reference(snapshot, &key),
                    Err(error) => {
                        tracing::warn!(key = %raw_key, error = %error, "permission cache read failed");
                        None
                    }
                },
            };

            if let Some(kind) = kind {
                let repaired = self.cache.delete_raw(raw_key.as_str()).await;
                report.record(kind, raw_key, repaired);
            }
        }
    }
}

fn stale_reference(snapshot: &Snapshot, key: &CacheKey) -> Option<ConsistencyIssueKind> {
    if let Some(actor_id) = key.actor_id() {
        let live = snapshot
            .actors
            .get(actor_id)
            .is_some_and(|status| *status != ActorStatus::Deactivated);
        return (!live).then_some(ConsistencyIssueKind::StaleActorEntry);
    }
    if let Some(role_id) = key.role_id() {
        let live = snapshot.roles.get(&role_id).copied().unwrap_or(false);
        return (!live).then_some(ConsistencyIssueKind::StaleRoleEntry);
    }

    None
}
