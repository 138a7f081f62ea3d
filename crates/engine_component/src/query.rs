//! Query descriptors for system data access declarations.
//!
//! A [`QueryDescriptor`] declares which component types a system reads and
//! writes. The scheduler derives the conflict relation between systems of a
//! stage from these declarations.

use serde::{Deserialize, Serialize};

use crate::component::ComponentTypeId;

/// Describes the data access requirements of a system.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    /// Component types the system reads immutably.
    pub reads: Vec<ComponentTypeId>,
    /// Component types the system writes (mutable access).
    pub writes: Vec<ComponentTypeId>,
}

impl QueryDescriptor {
    /// Create a new empty query descriptor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a read-only component requirement.
    #[must_use]
    pub fn read(mut self, type_id: ComponentTypeId) -> Self {
        if !self.reads.contains(&type_id) {
            self.reads.push(type_id);
        }
        self
    }

    /// Add a mutable component requirement.
    #[must_use]
    pub fn write(mut self, type_id: ComponentTypeId) -> Self {
        if !self.writes.contains(&type_id) {
            self.writes.push(type_id);
        }
        self
    }

    /// Returns `true` if the query declares no access at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reads.is_empty() && self.writes.is_empty()
    }

    /// Checks whether this query conflicts with another.
    ///
    /// Two queries conflict when one writes a component type that the other
    /// reads or writes:
    ///
    /// ```text
    /// A.writes ∩ (B.reads ∪ B.writes) ≠ ∅  OR
    /// B.writes ∩ (A.reads ∪ A.writes) ≠ ∅
    /// ```
    #[must_use]
    pub fn conflicts_with(&self, other: &QueryDescriptor) -> bool {
        let writes_into = |a: &QueryDescriptor, b: &QueryDescriptor| {
            a.writes
                .iter()
                .any(|w| b.reads.contains(w) || b.writes.contains(w))
        };
        writes_into(self, other) || writes_into(other, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRANSFORM: ComponentTypeId = ComponentTypeId(1);
    const VELOCITY: ComponentTypeId = ComponentTypeId(2);
    const AI_STATE: ComponentTypeId = ComponentTypeId(3);

    #[test]
    fn test_no_conflict_both_read() {
        let q1 = QueryDescriptor::new().read(TRANSFORM);
        let q2 = QueryDescriptor::new().read(TRANSFORM);
        assert!(!q1.conflicts_with(&q2));
    }

    #[test]
    fn test_conflict_read_vs_write_is_symmetric() {
        let q1 = QueryDescriptor::new().read(TRANSFORM);
        let q2 = QueryDescriptor::new().write(TRANSFORM);
        assert!(q1.conflicts_with(&q2));
        assert!(q2.conflicts_with(&q1));
    }

    #[test]
    fn test_conflict_write_vs_write() {
        let q1 = QueryDescriptor::new().write(VELOCITY);
        let q2 = QueryDescriptor::new().write(VELOCITY);
        assert!(q1.conflicts_with(&q2));
    }

    #[test]
    fn test_no_conflict_different_types() {
        // Physics: reads Transform, writes Velocity
        let physics = QueryDescriptor::new().read(TRANSFORM).write(VELOCITY);
        // AI: reads Transform, writes AiState
        let ai = QueryDescriptor::new().read(TRANSFORM).write(AI_STATE);
        assert!(!physics.conflicts_with(&ai));
    }

    #[test]
    fn test_empty_query_never_conflicts() {
        let empty = QueryDescriptor::new();
        let writer = QueryDescriptor::new().write(TRANSFORM);
        assert!(empty.is_empty());
        assert!(!empty.conflicts_with(&writer));
    }

    #[test]
    fn test_builder_deduplicates() {
        let q = QueryDescriptor::new()
            .read(TRANSFORM)
            .read(TRANSFORM)
            .write(TRANSFORM)
            .write(VELOCITY);
        assert_eq!(q.reads, vec![TRANSFORM]);
        assert_eq!(q.writes, vec![TRANSFORM, VELOCITY]);
    }
}
