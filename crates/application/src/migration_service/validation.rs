use super::*;

use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

use aegis_domain::{
    ActorRecord, EvaluationContext, FindingCategory, FindingSeverity, PermissionAction, RoleId,
};

use crate::hierarchy_resolver::HierarchyIssue;

/// One classified validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationFinding {
    /// Checked area.
    pub category: FindingCategory,
    /// Severity; only critical findings block go-live.
    pub severity: FindingSeverity,
    /// Description.
    pub message: String,
}

/// Findings of one validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    /// Findings in check order.
    pub findings: Vec<MigrationFinding>,
    /// Actors sampled for consistency and latency.
    pub sampled_actors: usize,
}

impl ValidationReport {
    /// Returns whether any finding blocks go-live.
    #[must_use]
    pub fn has_blocking(&self) -> bool {
        self.findings
            .iter()
            .any(|finding| finding.severity.blocks_go_live())
    }

    /// Counts findings of one severity.
    #[must_use]
    pub fn count(&self, severity: FindingSeverity) -> usize {
        self.findings
            .iter()
            .filter(|finding| finding.severity == severity)
            .count()
    }

    fn push(&mut self, category: FindingCategory, severity: FindingSeverity, message: String) {
        self.findings.push(MigrationFinding {
            category,
            severity,
            message,
        });
    }
}

/// What the validated state is expected to contain.
#[derive(Debug, Clone, Copy, Default)]
pub(super) struct Expectations {
    pub(super) seeded: bool,
    pub(super) migrated: bool,
}

impl MigrationService {
    pub(super) async fn run_validation(
        &self,
        expectations: Expectations,
    ) -> AppResult<ValidationReport> {
        let mut report = ValidationReport::default();
        let actors = self.stores.actors.list_actors().await?;

        self.check_data_integrity(expectations, &actors, &mut report)
            .await?;
        self.check_hierarchy(&mut report).await?;
        self.check_user_completeness(expectations, &actors, &mut report)
            .await?;

        let sample: Vec<&ActorRecord> = actors
            .iter()
            .filter(|actor| actor.migration.is_some())
            .take(self.config.performance_sample_size)
            .collect();
        report.sampled_actors = sample.len();
        self.check_permission_consistency(&sample, &mut report)
            .await?;
        self.check_performance(&sample, &mut report).await;
        self.check_security_posture(&actors, &mut report).await?;

        tracing::info!(
            findings = report.findings.len(),
            critical = report.count(FindingSeverity::Critical),
            major = report.count(FindingSeverity::Major),
            "validation finished"
        );
        Ok(report)
    }

    async fn check_data_integrity(
        &self,
        expectations: Expectations,
        actors: &[ActorRecord],
        report: &mut ValidationReport,
    ) -> AppResult<()> {
        let category = FindingCategory::DataIntegrity;
        let missing_severity = if expectations.seeded {
            FindingSeverity::Critical
        } else {
            FindingSeverity::Warning
        };

        let permissions: HashMap<PermissionAction, bool> = self
            .stores
            .permissions
            .list_permissions()
            .await?
            .into_iter()
            .map(|permission| (permission.action, permission.is_active))
            .collect();
        for seeded in self.catalog.permissions() {
            match permissions.get(&seeded.action) {
                None => report.push(
                    category,
                    missing_severity,
                    format!("seeded permission '{}' is missing", seeded.action),
                ),
                Some(false) if expectations.seeded => report.push(
                    category,
                    FindingSeverity::Major,
                    format!("seeded permission '{}' is inactive", seeded.action),
                ),
                Some(_) => {}
            }
        }

        let roles: HashMap<RoleId, bool> = self
            .stores
            .roles
            .list_roles()
            .await?
            .into_iter()
            .map(|role| (role.id, role.is_active))
            .collect();
        let seeded_roles = self.seeded_role_ids().await?;
        for seeded in self.catalog.roles() {
            if !seeded_roles.contains_key(&seeded.name) {
                report.push(
                    category,
                    missing_severity,
                    format!("seeded role '{}' is missing or inactive", seeded.name.as_str()),
                );
            }
        }

        for link in self.stores.roles.list_all_role_permissions().await? {
            if !roles.contains_key(&link.role_id) {
                report.push(
                    category,
                    FindingSeverity::Critical,
                    format!(
                        "role permission '{}' points at missing role '{}'",
                        link.action, link.role_id
                    ),
                );
            } else if !permissions.contains_key(&link.action) {
                report.push(
                    category,
                    FindingSeverity::Minor,
                    format!(
                        "role '{}' links '{}' which is not in the catalog",
                        link.role_id, link.action
                    ),
                );
            }
        }

        let known_actors: BTreeSet<_> = actors.iter().map(|actor| &actor.id).collect();
        for assignment in self.stores.assignments.list_all_assignments().await? {
            if !roles.contains_key(&assignment.role_id)
                || !known_actors.contains(&assignment.actor_id)
            {
                report.push(
                    category,
                    FindingSeverity::Major,
                    format!("assignment '{}' has a dangling reference", assignment.id),
                );
            }
        }

        Ok(())
    }

    async fn check_hierarchy(&self, report: &mut ValidationReport) -> AppResult<()> {
        let category = FindingCategory::HierarchyConsistency;
        for issue in self.hierarchy.validate_hierarchy().await? {
            let (severity, message) = match issue {
                HierarchyIssue::Cycle { role_id } => (
                    FindingSeverity::Critical,
                    format!("role '{role_id}' is part of a cycle"),
                ),
                HierarchyIssue::MissingParent {
                    role_id,
                    parent_role_id,
                } => (
                    FindingSeverity::Critical,
                    format!("role '{role_id}' points at missing parent '{parent_role_id}'"),
                ),
                HierarchyIssue::DepthExceeded { role_id, depth } => (
                    FindingSeverity::Major,
                    format!("role '{role_id}' sits at depth {depth}"),
                ),
                HierarchyIssue::InactiveParent {
                    role_id,
                    parent_role_id,
                } => (
                    FindingSeverity::Major,
                    format!("active role '{role_id}' hangs under inactive '{parent_role_id}'"),
                ),
                HierarchyIssue::LevelMismatch {
                    role_id,
                    stored,
                    expected,
                } => (
                    FindingSeverity::Minor,
                    format!("role '{role_id}' stores level {stored}, expected {expected}"),
                ),
            };
            report.push(category, severity, message);
        }

        Ok(())
    }

    async fn check_user_completeness(
        &self,
        expectations: Expectations,
        actors: &[ActorRecord],
        report: &mut ValidationReport,
    ) -> AppResult<()> {
        let category = FindingCategory::UserMigrationCompleteness;
        let seeded_roles = self.seeded_role_ids().await?;
        let now = Utc::now();
        let mut pending = 0_usize;
        let mut unmapped = 0_usize;

        for actor in actors {
            let mapped = self.catalog.roles_for_legacy_role(actor.role.as_str());
            if mapped.is_empty() {
                unmapped += 1;
                continue;
            }
            if actor.migration.is_none() {
                pending += 1;
                continue;
            }

            let held: BTreeSet<RoleId> = self
                .stores
                .assignments
                .list_assignments_for_actor(&actor.id)
                .await?
                .into_iter()
                .filter(|assignment| assignment.is_effective(now))
                .map(|assignment| assignment.role_id)
                .collect();
            for seed_role in mapped {
                let Some(role_id) = seeded_roles.get(&seed_role.name) else {
                    continue;
                };
                if !held.contains(role_id) {
                    report.push(
                        category,
                        FindingSeverity::Major,
                        format!(
                            "actor '{}' is missing migrated role '{}'",
                            actor.id,
                            seed_role.name.as_str()
                        ),
                    );
                }
            }
        }

        if pending > 0 {
            let severity = if expectations.migrated {
                FindingSeverity::Major
            } else {
                FindingSeverity::Warning
            };
            report.push(
                category,
                severity,
                format!("{pending} actors with a mapped static role are not migrated"),
            );
        }
        if unmapped > 0 {
            report.push(
                category,
                FindingSeverity::Warning,
                format!("{unmapped} actors hold a static role without a dynamic mapping"),
            );
        }

        Ok(())
    }

    async fn check_permission_consistency(
        &self,
        sample: &[&ActorRecord],
        report: &mut ValidationReport,
    ) -> AppResult<()> {
        let compared_actions = self.router.authorization().legacy().known_actions();
        if compared_actions.is_empty() {
            return Ok(());
        }

        let context = EvaluationContext::now();
        for actor in sample {
            let consistency = self
                .router
                .validate_permission_consistency(&actor.id, &compared_actions, &context)
                .await?;
            for mismatch in consistency.mismatches {
                let (severity, direction) = if mismatch.dynamic_allowed {
                    (FindingSeverity::Critical, "grants")
                } else {
                    (FindingSeverity::Major, "denies")
                };
                report.push(
                    FindingCategory::PermissionConsistency,
                    severity,
                    format!(
                        "dynamic engine {direction} '{}' for actor '{}' ({}); static path says {}",
                        mismatch.action,
                        actor.id,
                        mismatch.dynamic_source.as_str(),
                        mismatch.legacy_reason
                    ),
                );
            }
        }

        Ok(())
    }

    async fn check_performance(&self, sample: &[&ActorRecord], report: &mut ValidationReport) {
        let Some(sampled) = self.catalog.permissions().first() else {
            return;
        };

        let budget_ms = self.config.performance_budget_ms;
        let context = EvaluationContext::now();
        let mut slow = 0_usize;
        let mut slowest_ms = 0_u64;
        for actor in sample {
            let started = Instant::now();
            self.router
                .authorization()
                .check_permission(&actor.id, sampled.action.as_str(), &context)
                .await;
            let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            slowest_ms = slowest_ms.max(elapsed_ms);
            if elapsed_ms > budget_ms {
                slow += 1;
            }
        }

        if slow > 0 {
            report.push(
                FindingCategory::PerformanceSampling,
                FindingSeverity::Minor,
                format!(
                    "{slow} of {} sampled checks exceeded {budget_ms} ms (slowest {slowest_ms} ms)",
                    sample.len()
                ),
            );
        }
    }

    async fn check_security_posture(
        &self,
        actors: &[ActorRecord],
        report: &mut ValidationReport,
    ) -> AppResult<()> {
        let category = FindingCategory::SecurityPosture;
        let super_admin_role = self
            .router
            .authorization()
            .config()
            .super_admin_role
            .as_str();

        let super_admins = actors
            .iter()
            .filter(|actor| actor.role == super_admin_role && actor.status.permits_access())
            .count();
        if super_admins > 0 {
            report.push(
                category,
                FindingSeverity::Warning,
                format!("{super_admins} active actors hold the super-admin role"),
            );
        }

        for actor in actors {
            for action in &actor.direct_permissions {
                if actor.denies(action) {
                    report.push(
                        category,
                        FindingSeverity::Warning,
                        format!("actor '{}' is both granted and denied '{action}'", actor.id),
                    );
                }
            }
        }

        let links = self.stores.roles.list_all_role_permissions().await?;
        for role in self.stores.roles.list_roles().await? {
            if !role.is_system_role || !role.is_active {
                continue;
            }
            let grants = links
                .iter()
                .any(|link| link.role_id == role.id && link.granted && link.is_active);
            if !grants {
                report.push(
                    category,
                    FindingSeverity::Major,
                    format!("system role '{}' grants no permissions", role.name.as_str()),
                );
            }
        }

        Ok(())
    }
}
