//! Dependency graph for the systems of one stage.
//!
//! Each [`DependencyGraphNode`] carries two kinds of edges:
//!
//! - **ordering** edges (`depends_on` / `dependents`), taken from the
//!   systems' explicit `after` declarations;
//! - **conflict** edges, derived from overlapping [`QueryDescriptor`]s for
//!   every pair of systems that explicit ordering does not already separate.
//!
//! The graph is built once and never mutated. All per-tick bookkeeping lives
//! in the scheduler, indexed by [`NodeId`].
//!
//! [`QueryDescriptor`]: engine_component::QueryDescriptor

use std::collections::HashMap;

use crate::error::GraphError;
use crate::system::TickSystem;

/// Dense index of a node within one stage's graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl NodeId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One system together with its edges. Edge lists are sorted and unique.
#[derive(Debug)]
pub struct DependencyGraphNode {
    id: NodeId,
    system: TickSystem,
    depends_on: Vec<NodeId>,
    dependents: Vec<NodeId>,
    conflicts: Vec<NodeId>,
}

impl DependencyGraphNode {
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    #[must_use]
    pub fn system(&self) -> &TickSystem {
        &self.system
    }

    /// Nodes that must complete before this one may start.
    #[must_use]
    pub fn depends_on(&self) -> &[NodeId] {
        &self.depends_on
    }

    /// Nodes that list this one in their `depends_on`.
    #[must_use]
    pub fn dependents(&self) -> &[NodeId] {
        &self.dependents
    }

    /// Nodes that must never run at the same time as this one.
    #[must_use]
    pub fn conflicts(&self) -> &[NodeId] {
        &self.conflicts
    }

    #[must_use]
    pub fn conflicts_with(&self, other: NodeId) -> bool {
        self.conflicts.binary_search(&other).is_ok()
    }
}

/// The immutable node collection of one stage.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: Vec<DependencyGraphNode>,
}

impl DependencyGraph {
    /// Build the graph for a stage. Node IDs follow declaration order.
    ///
    /// The explicit ordering is assumed to be acyclic; only self-loops are
    /// rejected here.
    ///
    /// # Errors
    ///
    /// Returns a [`GraphError`] for duplicate names, self-dependencies and
    /// dependencies on systems outside the stage.
    pub fn build(systems: Vec<TickSystem>) -> Result<Self, GraphError> {
        let mut by_name: HashMap<&str, NodeId> = HashMap::with_capacity(systems.len());
        for (index, system) in systems.iter().enumerate() {
            if by_name.insert(system.name(), NodeId(index)).is_some() {
                return Err(GraphError::DuplicateSystem(system.name().to_string()));
            }
        }

        let mut depends_on: Vec<Vec<NodeId>> = Vec::with_capacity(systems.len());
        for system in &systems {
            let mut edges = Vec::with_capacity(system.dependencies().len());
            for dependency in system.dependencies() {
                if dependency == system.name() {
                    return Err(GraphError::SelfDependency(dependency.clone()));
                }
                let id = by_name.get(dependency.as_str()).copied().ok_or_else(|| {
                    GraphError::UnknownDependency {
                        system: system.name().to_string(),
                        dependency: dependency.clone(),
                    }
                })?;
                edges.push(id);
            }
            edges.sort_unstable();
            edges.dedup();
            depends_on.push(edges);
        }

        let mut dependents: Vec<Vec<NodeId>> = vec![Vec::new(); systems.len()];
        for (index, edges) in depends_on.iter().enumerate() {
            for dependency in edges {
                dependents[dependency.0].push(NodeId(index));
            }
        }

        let reachable = reachability(&dependents);
        let mut conflicts: Vec<Vec<NodeId>> = vec![Vec::new(); systems.len()];
        for a in 0..systems.len() {
            for b in (a + 1)..systems.len() {
                let ordered = reachable[a][b] || reachable[b][a];
                if !ordered && systems[a].query().conflicts_with(systems[b].query()) {
                    conflicts[a].push(NodeId(b));
                    conflicts[b].push(NodeId(a));
                }
            }
        }

        let nodes = systems
            .into_iter()
            .zip(depends_on)
            .zip(dependents)
            .zip(conflicts)
            .enumerate()
            .map(
                |(index, (((system, depends_on), dependents), mut conflicts))| {
                    conflicts.sort_unstable();
                    DependencyGraphNode {
                        id: NodeId(index),
                        system,
                        depends_on,
                        dependents,
                        conflicts,
                    }
                },
            )
            .collect();

        Ok(Self { nodes })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// # Panics
    ///
    /// Panics if `id` does not belong to this graph.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &DependencyGraphNode {
        &self.nodes[id.0]
    }

    pub fn nodes(&self) -> impl Iterator<Item = &DependencyGraphNode> {
        self.nodes.iter()
    }

    /// Look up a node by system name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&DependencyGraphNode> {
        self.nodes.iter().find(|node| node.system.name() == name)
    }
}

/// `result[a][b]` is `true` when `b` is reachable from `a` along
/// `dependents` edges. Terminates on cyclic input too.
fn reachability(dependents: &[Vec<NodeId>]) -> Vec<Vec<bool>> {
    let n = dependents.len();
    let mut result = vec![vec![false; n]; n];
    let mut stack = Vec::new();
    for (start, row) in result.iter_mut().enumerate() {
        stack.extend(dependents[start].iter().copied());
        while let Some(next) = stack.pop() {
            if !row[next.0] {
                row[next.0] = true;
                stack.extend(dependents[next.0].iter().copied());
            }
        }
    }
    result
}
