mod graph;

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::sync::Arc;

use aegis_core::{AppError, AppResult};
use aegis_domain::{
    LEGACY_WILDCARD, PermissionAction, PermissionConditions, PermissionSource, RoleDefinition,
    RoleId, RolePermissionGrant,
};
use serde::{Deserialize, Serialize};

use crate::config::AuthorizationConfig;
use crate::permission_cache::{CacheKey, PermissionCache};
use crate::rbac_ports::RoleRepository;

pub(crate) use graph::RoleGraph;

/// One link reached while walking a role's chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyPermission {
    /// Linked action.
    pub action: PermissionAction,
    /// `true` grants, `false` denies.
    pub granted: bool,
    /// `RoleGrant` at the originating role, `Inherited` above it.
    pub source: PermissionSource,
    /// Row priority of the link.
    pub priority: i32,
    /// Conditions the link is subject to.
    pub conditions: PermissionConditions,
    /// Distance from the originating role.
    pub depth: u32,
}

/// Irregularity found while walking one role's chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HierarchyConflict {
    /// The same action is linked at more than one level of the chain.
    DuplicateAction {
        /// Repeated action.
        action: PermissionAction,
        /// Roles carrying the action, nearest first.
        role_ids: Vec<RoleId>,
    },
    /// The parent chain loops back on itself.
    Cycle {
        /// Role at which the loop closed.
        role_id: RoleId,
    },
    /// A parent reference points at a missing role.
    MissingParent {
        /// Role holding the reference.
        role_id: RoleId,
        /// Missing parent.
        parent_role_id: RoleId,
    },
}

/// Resolved permission set of one role, including everything inherited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePermissionSet {
    /// Originating role.
    pub role_id: RoleId,
    /// Whether the originating role is active; inactive roles resolve to nothing.
    pub role_active: bool,
    /// Links from the role and its active ancestors.
    pub entries: Vec<HierarchyPermission>,
    /// Parsed legacy permissions from the role and its active ancestors.
    pub legacy_permissions: Vec<PermissionAction>,
    /// Whether any role in the chain carries the legacy wildcard.
    pub legacy_wildcard: bool,
    /// Irregularities found during the walk.
    pub conflicts: Vec<HierarchyConflict>,
}

/// How a role comes to grant an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoleHoldingKind {
    /// Linked on the role itself.
    Direct,
    /// Linked on an ancestor.
    Inherited {
        /// Ancestor carrying the link.
        from_role_id: RoleId,
    },
    /// Granted by the role's legacy permission list.
    Legacy,
}

/// Role that grants a given action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleHolding {
    /// Granting role.
    pub role_id: RoleId,
    /// Role name.
    pub role_name: String,
    /// How the grant is obtained.
    pub kind: RoleHoldingKind,
}

/// Problem found by a full hierarchy validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HierarchyIssue {
    /// The role's parent chain loops.
    Cycle {
        /// Affected role.
        role_id: RoleId,
    },
    /// The role sits deeper than the configured maximum.
    DepthExceeded {
        /// Affected role.
        role_id: RoleId,
        /// Actual depth.
        depth: u32,
    },
    /// The stored level disagrees with the structure.
    LevelMismatch {
        /// Affected role.
        role_id: RoleId,
        /// Persisted level.
        stored: u32,
        /// Level implied by the parent chain.
        expected: u32,
    },
    /// The parent reference points at a missing role.
    MissingParent {
        /// Affected role.
        role_id: RoleId,
        /// Missing parent.
        parent_role_id: RoleId,
    },
    /// An active role hangs under an inactive parent.
    InactiveParent {
        /// Affected role.
        role_id: RoleId,
        /// Inactive parent.
        parent_role_id: RoleId,
    },
}

/// Resolves role inheritance over the parent chain.
#[derive(Clone)]
pub struct HierarchyResolver {
    role_repository: Arc<dyn RoleRepository>,
    cache: PermissionCache,
    config: AuthorizationConfig,
}

impl HierarchyResolver {
    /// Creates a resolver.
    #[must_use]
    pub fn new(
        role_repository: Arc<dyn RoleRepository>,
        cache: PermissionCache,
        config: AuthorizationConfig,
    ) -> Self {
        Self {
            role_repository,
            cache,
            config,
        }
    }

    /// Returns the role's own links plus everything inherited from active ancestors.
    ///
    /// Inactive ancestors contribute nothing but do not stop the walk. The
    /// result is cached per role with the hierarchy TTL.
    pub async fn get_all_role_permissions(&self, role_id: RoleId) -> AppResult<RolePermissionSet> {
        let cache_key = CacheKey::RolePermissions { role_id };
        if let Some(cached) = self.cache.get::<RolePermissionSet>(&cache_key).await {
            return Ok(cached);
        }

        let graph = self.load_graph().await?;
        let set = self.resolve_role_set(&graph, role_id).await?;
        self.cache
            .set(&cache_key, &set, self.config.hierarchy_ttl_seconds)
            .await;

        Ok(set)
    }

    /// Drops the cached sets of a role and of every role related to it.
    pub async fn clear_hierarchy_cache(&self, role_id: RoleId) -> AppResult<u64> {
        let graph = self.load_graph().await?;
        let related: Vec<RoleId> = match graph.index_of(role_id) {
            Some(node) => graph
                .ancestor_chain(node)
                .nodes
                .into_iter()
                .chain(graph.descendants(node))
                .map(|related| graph.role(related).id)
                .collect(),
            None => Vec::new(),
        };

        Ok(self.cache.invalidate_role_cache(role_id, &related).await)
    }

    /// Returns whether making `candidate_parent_id` the parent of `role_id` closes a loop.
    pub async fn detect_circular_dependency(
        &self,
        role_id: RoleId,
        candidate_parent_id: RoleId,
    ) -> AppResult<bool> {
        let graph = self.load_graph().await?;
        Ok(graph.would_create_cycle(role_id, candidate_parent_id))
    }

    /// Computes a role's level from its parent chain: 0 for roots, parent + 1 otherwise.
    pub async fn calculate_hierarchy_level(&self, role_id: RoleId) -> AppResult<u32> {
        let graph = self.load_graph().await?;
        structural_level(&graph, role_id)
    }

    /// Recomputes and persists the level of a role and cascades to active descendants.
    ///
    /// The starting role is computed from its chain. Every descendant then
    /// recomputes from its parent's current stored level, so an interrupted
    /// run converges when repeated. Returns the roles whose level changed.
    pub async fn update_hierarchy_levels(&self, role_id: RoleId) -> AppResult<Vec<RoleId>> {
        let graph = self.load_graph().await?;
        let start = graph
            .index_of(role_id)
            .ok_or_else(|| AppError::NotFound(format!("role '{role_id}' not found")))?;

        let mut changed = Vec::new();
        let start_level = structural_level(&graph, role_id)?;
        if graph.role(start).hierarchy_level != start_level {
            self.role_repository
                .set_hierarchy_level(role_id, start_level)
                .await?;
            changed.push(role_id);
        }

        for node in graph.descendants(start) {
            let role = graph.role(node);
            if !role.is_active {
                continue;
            }
            let Some(parent_id) = role.parent_role_id else {
                continue;
            };
            let parent = self
                .role_repository
                .find_role(parent_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("role '{parent_id}' not found")))?;

            let level = parent.hierarchy_level + 1;
            if role.hierarchy_level != level {
                self.role_repository
                    .set_hierarchy_level(role.id, level)
                    .await?;
                changed.push(role.id);
            }
        }

        if !changed.is_empty() {
            tracing::info!(role_id = %role_id, changed = changed.len(), "updated hierarchy levels");
        }

        Ok(changed)
    }

    /// Rejects a parent link that would push any role past the maximum depth.
    pub async fn ensure_depth_within_limit(
        &self,
        role_id: RoleId,
        candidate_parent_id: RoleId,
    ) -> AppResult<()> {
        let graph = self.load_graph().await?;
        let parent_level = structural_level(&graph, candidate_parent_id)?;
        let subtree_height = graph
            .index_of(role_id)
            .map(|node| graph.subtree_height(node))
            .unwrap_or_default();

        let deepest = parent_level + 1 + subtree_height;
        if deepest > self.config.max_hierarchy_depth {
            return Err(AppError::Validation(format!(
                "placing role '{role_id}' under '{candidate_parent_id}' reaches depth {deepest}, maximum is {}",
                self.config.max_hierarchy_depth
            )));
        }

        Ok(())
    }

    /// Lists active roles that grant an action, directly, by inheritance or through legacy permissions.
    pub async fn get_roles_with_permission(
        &self,
        action: &PermissionAction,
    ) -> AppResult<Vec<RoleHolding>> {
        let graph = self.load_graph().await?;
        let links = self.role_repository.list_all_role_permissions().await?;
        let mut links_by_role: BTreeMap<RoleId, Vec<&RolePermissionGrant>> = BTreeMap::new();
        for link in links
            .iter()
            .filter(|link| link.is_active && &link.action == action)
        {
            links_by_role.entry(link.role_id).or_default().push(link);
        }

        let mut holdings = Vec::new();
        for role in graph.roles().filter(|role| role.is_active) {
            let Some(node) = graph.index_of(role.id) else {
                continue;
            };

            let own = links_by_role.get(&role.id).map(Vec::as_slice).unwrap_or(&[]);
            let kind = match winning_link(own) {
                Some(true) => Some(RoleHoldingKind::Direct),
                Some(false) => None,
                None => {
                    let inherited: Vec<(RoleId, &RolePermissionGrant)> = graph
                        .ancestor_chain(node)
                        .nodes
                        .iter()
                        .map(|ancestor| graph.role(*ancestor))
                        .filter(|ancestor| ancestor.is_active)
                        .flat_map(|ancestor| {
                            links_by_role
                                .get(&ancestor.id)
                                .into_iter()
                                .flatten()
                                .map(move |link| (ancestor.id, *link))
                        })
                        .collect();
                    let inherited_links: Vec<&RolePermissionGrant> =
                        inherited.iter().map(|(_, link)| *link).collect();

                    match winning_link(&inherited_links) {
                        Some(true) => inherited
                            .iter()
                            .find(|(_, link)| link.granted)
                            .map(|(from_role_id, _)| RoleHoldingKind::Inherited {
                                from_role_id: *from_role_id,
                            }),
                        Some(false) => None,
                        None => legacy_grants(role, action).then_some(RoleHoldingKind::Legacy),
                    }
                }
            };

            if let Some(kind) = kind {
                holdings.push((role.hierarchy_level, RoleHolding {
                    role_id: role.id,
                    role_name: role.name.as_str().to_owned(),
                    kind,
                }));
            }
        }

        holdings.sort_by(|left, right| {
            left.0
                .cmp(&right.0)
                .then_with(|| left.1.role_name.cmp(&right.1.role_name))
        });
        Ok(holdings.into_iter().map(|(_, holding)| holding).collect())
    }

    /// Checks every role for cycles, depth, stored levels and parent references.
    pub async fn validate_hierarchy(&self) -> AppResult<Vec<HierarchyIssue>> {
        let graph = self.load_graph().await?;
        let mut issues = Vec::new();

        for role in graph.roles() {
            let Some(node) = graph.index_of(role.id) else {
                continue;
            };
            let chain = graph.ancestor_chain(node);

            if chain.cycle {
                issues.push(HierarchyIssue::Cycle { role_id: role.id });
                continue;
            }
            if let Some(parent_role_id) = chain.dangling_parent {
                issues.push(HierarchyIssue::MissingParent {
                    role_id: role.id,
                    parent_role_id,
                });
            }
            if role.is_active
                && let Some(parent_role_id) = role.parent_role_id
                && graph
                    .find(parent_role_id)
                    .is_some_and(|parent| !parent.is_active)
            {
                issues.push(HierarchyIssue::InactiveParent {
                    role_id: role.id,
                    parent_role_id,
                });
            }

            let depth = u32::try_from(chain.nodes.len()).unwrap_or(u32::MAX);
            if depth > self.config.max_hierarchy_depth {
                issues.push(HierarchyIssue::DepthExceeded {
                    role_id: role.id,
                    depth,
                });
            }
            if role.is_active && chain.dangling_parent.is_none() && role.hierarchy_level != depth {
                issues.push(HierarchyIssue::LevelMismatch {
                    role_id: role.id,
                    stored: role.hierarchy_level,
                    expected: depth,
                });
            }
        }

        Ok(issues)
    }

    /// Returns the role's ancestors, nearest first.
    pub async fn ancestors(&self, role_id: RoleId) -> AppResult<Vec<RoleDefinition>> {
        let graph = self.load_graph().await?;
        let node = graph
            .index_of(role_id)
            .ok_or_else(|| AppError::NotFound(format!("role '{role_id}' not found")))?;

        Ok(graph
            .ancestor_chain(node)
            .nodes
            .into_iter()
            .map(|ancestor| graph.role(ancestor).clone())
            .collect())
    }

    /// Returns the role's descendants in depth-first order.
    pub async fn descendants(&self, role_id: RoleId) -> AppResult<Vec<RoleDefinition>> {
        let graph = self.load_graph().await?;
        let node = graph
            .index_of(role_id)
            .ok_or_else(|| AppError::NotFound(format!("role '{role_id}' not found")))?;

        Ok(graph
            .descendants(node)
            .into_iter()
            .map(|descendant| graph.role(descendant).clone())
            .collect())
    }

    pub(crate) async fn load_graph(&self) -> AppResult<RoleGraph> {
        let roles = self.role_repository.list_roles().await?;
        Ok(RoleGraph::from_roles(roles))
    }

    async fn resolve_role_set(
        &self,
        graph: &RoleGraph,
        role_id: RoleId,
    ) -> AppResult<RolePermissionSet> {
        let origin = graph
            .index_of(role_id)
            .ok_or_else(|| AppError::NotFound(format!("role '{role_id}' not found")))?;

        let mut set = RolePermissionSet {
            role_id,
            role_active: graph.role(origin).is_active,
            entries: Vec::new(),
            legacy_permissions: Vec::new(),
            legacy_wildcard: false,
            conflicts: Vec::new(),
        };
        if !set.role_active {
            return Ok(set);
        }

        let chain = graph.ancestor_chain(origin);
        if chain.cycle {
            let closing = chain.nodes.last().copied().unwrap_or(origin);
            set.conflicts.push(HierarchyConflict::Cycle {
                role_id: graph.role(closing).id,
            });
        }
        if let Some(parent_role_id) = chain.dangling_parent {
            let last = chain.nodes.last().copied().unwrap_or(origin);
            set.conflicts.push(HierarchyConflict::MissingParent {
                role_id: graph.role(last).id,
                parent_role_id,
            });
        }

        let mut carriers: BTreeMap<PermissionAction, Vec<RoleId>> = BTreeMap::new();
        for (depth, node) in std::iter::once(origin).chain(chain.nodes).enumerate() {
            let role = graph.role(node);
            if !role.is_active {
                continue;
            }
            let depth = u32::try_from(depth).unwrap_or(u32::MAX);

            for link in self.role_repository.list_role_permissions(role.id).await? {
                if !link.is_active {
                    continue;
                }
                let source = if depth == 0 {
                    PermissionSource::RoleGrant { role_id: role.id }
                } else {
                    PermissionSource::Inherited {
                        from_role_id: role.id,
                        via_role_id: role_id,
                    }
                };

                let roles = carriers.entry(link.action.clone()).or_default();
                if !roles.contains(&role.id) {
                    roles.push(role.id);
                }
                set.entries.push(HierarchyPermission {
                    action: link.action,
                    granted: link.granted,
                    source,
                    priority: link.priority,
                    conditions: link.conditions,
                    depth,
                });
            }

            for legacy in &role.legacy_permissions {
                if legacy == LEGACY_WILDCARD {
                    set.legacy_wildcard = true;
                    continue;
                }
                match PermissionAction::parse(legacy) {
                    Ok(action) if !set.legacy_permissions.contains(&action) => {
                        set.legacy_permissions.push(action);
                    }
                    Ok(_) => {}
                    Err(_) => {
                        tracing::debug!(role_id = %role.id, legacy = %legacy, "skipping unparseable legacy permission");
                    }
                }
            }
        }

        for (action, role_ids) in carriers {
            if role_ids.len() > 1 {
                set.conflicts
                    .push(HierarchyConflict::DuplicateAction { action, role_ids });
            }
        }

        Ok(set)
    }
}

fn structural_level(graph: &RoleGraph, role_id: RoleId) -> AppResult<u32> {
    let node = graph
        .index_of(role_id)
        .ok_or_else(|| AppError::NotFound(format!("role '{role_id}' not found")))?;
    let chain = graph.ancestor_chain(node);
    if chain.cycle {
        return Err(AppError::Consistency(format!(
            "role '{role_id}' has a cyclic parent chain"
        )));
    }

    Ok(u32::try_from(chain.nodes.len()).unwrap_or(u32::MAX))
}

/// Resolves links of one source kind: highest row priority wins, ties deny.
fn winning_link(links: &[&RolePermissionGrant]) -> Option<bool> {
    links
        .iter()
        .max_by_key(|link| (link.priority, !link.granted))
        .map(|link| link.granted)
}

fn legacy_grants(role: &RoleDefinition, action: &PermissionAction) -> bool {
    role.legacy_permissions
        .iter()
        .any(|legacy| legacy == LEGACY_WILDCARD || legacy == action.as_str())
}
