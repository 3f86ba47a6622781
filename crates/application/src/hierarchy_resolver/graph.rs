use std::collections::HashMap;

use aegis_domain::{RoleDefinition, RoleId};

struct RoleNode {
    role: RoleDefinition,
    parent: Option<usize>,
    children: Vec<usize>,
}

/// Ancestor walk result for one role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct AncestorChain {
    /// Ancestor indices, nearest first.
    pub nodes: Vec<usize>,
    /// The walk revisited a node.
    pub cycle: bool,
    /// The last reached node points at a role missing from the snapshot.
    pub dangling_parent: Option<RoleId>,
}

/// Arena snapshot of the role forest.
///
/// Nodes are addressed by index; parent and child links are indices into the
/// same arena, so traversals guard against cycles with a flat visited vector.
pub(crate) struct RoleGraph {
    nodes: Vec<RoleNode>,
    index: HashMap<RoleId, usize>,
}

impl RoleGraph {
    pub(crate) fn from_roles(roles: Vec<RoleDefinition>) -> Self {
        let index: HashMap<RoleId, usize> = roles
            .iter()
            .enumerate()
            .map(|(position, role)| (role.id, position))
            .collect();

        let mut nodes: Vec<RoleNode> = roles
            .into_iter()
            .map(|role| {
                let parent = role
                    .parent_role_id
                    .and_then(|parent_id| index.get(&parent_id).copied());
                RoleNode {
                    role,
                    parent,
                    children: Vec::new(),
                }
            })
            .collect();

        for position in 0..nodes.len() {
            if let Some(parent) = nodes[position].parent {
                nodes[parent].children.push(position);
            }
        }

        Self { nodes, index }
    }

    pub(crate) fn index_of(&self, role_id: RoleId) -> Option<usize> {
        self.index.get(&role_id).copied()
    }

    pub(crate) fn role(&self, node: usize) -> &RoleDefinition {
        &self.nodes[node].role
    }

    pub(crate) fn find(&self, role_id: RoleId) -> Option<&RoleDefinition> {
        self.index_of(role_id).map(|node| self.role(node))
    }

    pub(crate) fn roles(&self) -> impl Iterator<Item = &RoleDefinition> {
        self.nodes.iter().map(|node| &node.role)
    }

    /// Walks parent links from `start`, nearest ancestor first.
    pub(crate) fn ancestor_chain(&self, start: usize) -> AncestorChain {
        let mut visited = vec![false; self.nodes.len()];
        visited[start] = true;
        let mut chain = AncestorChain::default();
        let mut current = start;

        loop {
            let node = &self.nodes[current];
            let Some(parent) = node.parent else {
                chain.dangling_parent = node.role.parent_role_id;
                return chain;
            };
            if visited[parent] {
                chain.cycle = true;
                return chain;
            }

            visited[parent] = true;
            chain.nodes.push(parent);
            current = parent;
        }
    }

    /// Returns every descendant of `start` in depth-first pre-order.
    pub(crate) fn descendants(&self, start: usize) -> Vec<usize> {
        let mut visited = vec![false; self.nodes.len()];
        visited[start] = true;
        let mut ordered = Vec::new();
        let mut stack: Vec<usize> = self.nodes[start].children.iter().rev().copied().collect();

        while let Some(node) = stack.pop() {
            if visited[node] {
                continue;
            }
            visited[node] = true;
            ordered.push(node);
            stack.extend(self.nodes[node].children.iter().rev().copied());
        }

        ordered
    }

    /// Returns the longest downward path below `start`, in edges.
    pub(crate) fn subtree_height(&self, start: usize) -> u32 {
        let mut visited = vec![false; self.nodes.len()];
        visited[start] = true;
        let mut height = 0;
        let mut stack = vec![(start, 0u32)];

        while let Some((node, depth)) = stack.pop() {
            height = height.max(depth);
            for child in &self.nodes[node].children {
                if !visited[*child] {
                    visited[*child] = true;
                    stack.push((*child, depth + 1));
                }
            }
        }

        height
    }

    /// Returns whether linking `role_id` under `candidate_parent_id` closes a loop.
    ///
    /// True when the candidate is the role itself, when the role appears in
    /// the candidate's ancestor chain, or when that chain already repeats.
    pub(crate) fn would_create_cycle(&self, role_id: RoleId, candidate_parent_id: RoleId) -> bool {
        if role_id == candidate_parent_id {
            return true;
        }
        let Some(candidate) = self.index_of(candidate_parent_id) else {
            return false;
        };

        let chain = self.ancestor_chain(candidate);
        chain.cycle
            || chain
                .nodes
                .iter()
                .any(|node| self.nodes[*node].role.id == role_id)
    }
}
