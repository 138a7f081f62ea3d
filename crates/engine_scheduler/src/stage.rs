//! Stages: barrier-separated phases of a tick.
//!
//! Every system of a stage, and the stage's command buffer flush, completes
//! before any system of the next stage starts.

use std::sync::Arc;

use crate::error::GraphError;
use crate::graph::DependencyGraph;
use crate::system::TickSystem;

/// A named stage owning the dependency graph of its systems.
#[derive(Debug)]
pub struct Stage {
    name: Arc<str>,
    graph: Arc<DependencyGraph>,
}

impl Stage {
    /// Build a stage from its systems.
    ///
    /// # Errors
    ///
    /// Returns a [`GraphError`] if the systems' ordering declarations are
    /// malformed.
    pub fn new(name: impl Into<String>, systems: Vec<TickSystem>) -> Result<Self, GraphError> {
        let graph = DependencyGraph::build(systems)?;
        Ok(Self::from_graph(name, graph))
    }

    /// Wrap an already built graph.
    #[must_use]
    pub fn from_graph(name: impl Into<String>, graph: DependencyGraph) -> Self {
        Self {
            name: Arc::from(name.into()),
            graph: Arc::new(graph),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub(crate) fn shared_name(&self) -> &Arc<str> {
        &self.name
    }

    pub(crate) fn shared_graph(&self) -> &Arc<DependencyGraph> {
        &self.graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::TickSystemCommand;

    fn noop(_: &mut TickSystemCommand) -> anyhow::Result<()> {
        Ok(())
    }

    #[test]
    fn test_stage_builds_graph() {
        let stage = Stage::new(
            "update",
            vec![TickSystem::new("a", noop), TickSystem::new("b", noop).after("a")],
        )
        .unwrap();
        assert_eq!(stage.name(), "update");
        assert_eq!(stage.graph().len(), 2);
    }

    #[test]
    fn test_stage_propagates_graph_errors() {
        let err = Stage::new("update", vec![TickSystem::new("a", noop).after("b")]).unwrap_err();
        assert!(matches!(err, GraphError::UnknownDependency { .. }));
    }
}
