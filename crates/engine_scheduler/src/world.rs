//! Live entity storage shared by the scheduler and every running system.
//!
//! The [`World`] tracks which entities are alive and which component types
//! each one carries. Component values and archetype layout live elsewhere;
//! the scheduler only needs structural state so that immediate mutations and
//! flushed command buffers have something to act on.
//!
//! All operations take `&self`. Systems in one stage run on different
//! threads and may perform immediate mutations at the same time, so the
//! entity table is a [`DashMap`].

use std::collections::BTreeSet;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use engine_component::{ComponentTypeId, Entity, EntityAllocator};
use thiserror::Error;

/// Errors raised by structural world operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorldError {
    #[error("{0} not found")]
    EntityNotFound(Entity),
    #[error("{0} is already alive")]
    EntityAlreadyAlive(Entity),
    #[error("component {component} not present on {entity}")]
    ComponentNotFound {
        entity: Entity,
        component: ComponentTypeId,
    },
    #[error("component {component} already present on {entity}")]
    ComponentAlreadyPresent {
        entity: Entity,
        component: ComponentTypeId,
    },
}

/// The structural world state.
#[derive(Debug, Default)]
pub struct World {
    /// Entity ID allocator. Shared by immediate spawns and deferred spawns.
    allocator: EntityAllocator,
    /// Live entities and the component types attached to each.
    entities: DashMap<Entity, BTreeSet<ComponentTypeId>>,
}

impl World {
    /// Create a new empty world.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve an entity ID without making the entity alive.
    ///
    /// Used by deferred spawns so the recording system can refer to the
    /// entity before the command buffer is flushed.
    pub fn reserve_entity(&self) -> Entity {
        self.allocator.allocate()
    }

    /// Spawn a new live entity carrying the given component types.
    pub fn spawn(&self, components: impl IntoIterator<Item = ComponentTypeId>) -> Entity {
        let entity = self.allocator.allocate();
        self.entities
            .insert(entity, components.into_iter().collect());
        entity
    }

    /// Make a previously reserved entity alive.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::EntityAlreadyAlive`] if the entity is already in
    /// the world.
    pub fn insert_reserved(
        &self,
        entity: Entity,
        components: impl IntoIterator<Item = ComponentTypeId>,
    ) -> Result<(), WorldError> {
        match self.entities.entry(entity) {
            Entry::Occupied(_) => Err(WorldError::EntityAlreadyAlive(entity)),
            Entry::Vacant(slot) => {
                slot.insert(components.into_iter().collect());
                Ok(())
            }
        }
    }

    /// Destroy an entity.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::EntityNotFound`] if the entity is not alive.
    pub fn despawn(&self, entity: Entity) -> Result<(), WorldError> {
        self.entities
            .remove(&entity)
            .map(|_| ())
            .ok_or(WorldError::EntityNotFound(entity))
    }

    /// Attach a component type to a live entity.
    ///
    /// # Errors
    ///
    /// Fails if the entity is not alive or already has the component.
    pub fn add_component(
        &self,
        entity: Entity,
        component: ComponentTypeId,
    ) -> Result<(), WorldError> {
        let mut types = self
            .entities
            .get_mut(&entity)
            .ok_or(WorldError::EntityNotFound(entity))?;
        if types.insert(component) {
            Ok(())
        } else {
            Err(WorldError::ComponentAlreadyPresent { entity, component })
        }
    }

    /// Detach a component type from a live entity.
    ///
    /// # Errors
    ///
    /// Fails if the entity is not alive or does not have the component.
    pub fn remove_component(
        &self,
        entity: Entity,
        component: ComponentTypeId,
    ) -> Result<(), WorldError> {
        let mut types = self
            .entities
            .get_mut(&entity)
            .ok_or(WorldError::EntityNotFound(entity))?;
        if types.remove(&component) {
            Ok(())
        } else {
            Err(WorldError::ComponentNotFound { entity, component })
        }
    }

    /// Returns `true` if the entity is alive.
    #[must_use]
    pub fn contains(&self, entity: Entity) -> bool {
        self.entities.contains_key(&entity)
    }

    /// Returns `true` if the entity is alive and carries the component type.
    #[must_use]
    pub fn has_component(&self, entity: Entity, component: ComponentTypeId) -> bool {
        self.entities
            .get(&entity)
            .is_some_and(|types| types.contains(&component))
    }

    /// Returns the number of live entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Returns the number of live entities carrying the component type.
    #[must_use]
    pub fn count_with(&self, component: ComponentTypeId) -> usize {
        self.entities
            .iter()
            .filter(|entry| entry.value().contains(&component))
            .count()
    }

    /// Returns the live entities carrying the component type, in ID order.
    #[must_use]
    pub fn entities_with(&self, component: ComponentTypeId) -> Vec<Entity> {
        let mut found: Vec<Entity> = self
            .entities
            .iter()
            .filter(|entry| entry.value().contains(&component))
            .map(|entry| *entry.key())
            .collect();
        found.sort();
        found
    }
}
