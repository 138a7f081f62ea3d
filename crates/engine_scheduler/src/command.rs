//! Deferred structural mutations and the buffers that hold them.
//!
//! A [`CommandBuffer`] is an ordered queue of [`EntityCommand`]s. The
//! scheduler owns two of them: one flushed after every stage and one flushed
//! after the last stage of a tick. Systems never write into these buffers
//! directly; they record into their own [`TickSystemCommand`] and the
//! scheduler appends those records once the system's task has been joined.
//! Flushing therefore never races with recording and the buffer needs no
//! lock.
//!
//! [`TickSystemCommand`]: crate::system::TickSystemCommand

use std::collections::VecDeque;

use engine_component::{ComponentTypeId, Entity};
use thiserror::Error;

use crate::world::{World, WorldError};

/// One deferred structural mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityCommand {
    /// Make a reserved entity alive with the given component types.
    Spawn {
        entity: Entity,
        components: Vec<ComponentTypeId>,
    },
    /// Destroy a live entity.
    Despawn { entity: Entity },
    /// Attach a component type to a live entity.
    AddComponent {
        entity: Entity,
        component: ComponentTypeId,
    },
    /// Detach a component type from a live entity.
    RemoveComponent {
        entity: Entity,
        component: ComponentTypeId,
    },
}

impl EntityCommand {
    /// The entity this command targets.
    #[must_use]
    pub fn entity(&self) -> Entity {
        match self {
            Self::Spawn { entity, .. }
            | Self::Despawn { entity }
            | Self::AddComponent { entity, .. }
            | Self::RemoveComponent { entity, .. } => *entity,
        }
    }

    /// Apply the command against live storage.
    ///
    /// # Errors
    ///
    /// Propagates the [`WorldError`] of the underlying world operation.
    pub fn apply(&self, world: &World) -> Result<(), WorldError> {
        match self {
            Self::Spawn { entity, components } => {
                world.insert_reserved(*entity, components.iter().copied())
            }
            Self::Despawn { entity } => world.despawn(*entity),
            Self::AddComponent { entity, component } => world.add_component(*entity, *component),
            Self::RemoveComponent { entity, component } => {
                world.remove_component(*entity, *component)
            }
        }
    }
}

/// Which buffer a deferred command is recorded into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferScope {
    /// Flushed once the current stage has fully drained.
    EndOfStage,
    /// Flushed once every stage of the current tick has run.
    EndOfTick,
}

impl std::fmt::Display for BufferScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EndOfStage => f.write_str("end-of-stage"),
            Self::EndOfTick => f.write_str("end-of-tick"),
        }
    }
}

/// A command that failed during a flush.
#[derive(Debug, Error)]
#[error("command {index} of {scope} flush failed on {}", .command.entity())]
pub struct CommandError {
    /// The buffer being flushed.
    pub scope: BufferScope,
    /// Position of the failing command within this flush.
    pub index: usize,
    /// The failing command. It has been removed from the buffer.
    pub command: EntityCommand,
    /// Commands still queued behind the failing one.
    pub remaining: usize,
    #[source]
    pub source: WorldError,
}

/// An ordered queue of deferred [`EntityCommand`]s.
#[derive(Debug)]
pub struct CommandBuffer {
    scope: BufferScope,
    commands: VecDeque<EntityCommand>,
}

impl CommandBuffer {
    /// Create an empty buffer for the given scope.
    #[must_use]
    pub fn new(scope: BufferScope) -> Self {
        Self {
            scope,
            commands: VecDeque::new(),
        }
    }

    /// Append a command.
    pub fn record(&mut self, command: EntityCommand) {
        self.commands.push_back(command);
    }

    /// Number of pending commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns `true` if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Apply every pending command in FIFO order, then leave the buffer empty.
    ///
    /// Returns the number of commands applied. Flushing an empty buffer is a
    /// no-op that returns `Ok(0)`.
    ///
    /// # Errors
    ///
    /// Stops at the first command that fails. Commands before it stay
    /// applied, the failing command is moved into the returned
    /// [`CommandError`], and the commands after it remain queued.
    pub fn execute(&mut self, world: &World) -> Result<usize, CommandError> {
        let mut applied = 0;
        while let Some(command) = self.commands.pop_front() {
            if let Err(source) = command.apply(world) {
                return Err(CommandError {
                    scope: self.scope,
                    index: applied,
                    command,
                    remaining: self.commands.len(),
                    source,
                });
            }
            applied += 1;
        }
        Ok(applied)
    }
}

impl Extend<EntityCommand> for CommandBuffer {
    fn extend<I: IntoIterator<Item = EntityCommand>>(&mut self, iter: I) {
        self.commands.extend(iter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POSITION: ComponentTypeId = ComponentTypeId(1);

    #[test]
    fn test_execute_applies_in_fifo_order() {
        let world = World::new();
        let mut buffer = CommandBuffer::new(BufferScope::EndOfStage);
        let e = world.reserve_entity();

        // Spawn must run before AddComponent and Despawn for this to succeed.
        buffer.record(EntityCommand::Spawn {
            entity: e,
            components: vec![],
        });
        buffer.record(EntityCommand::AddComponent {
            entity: e,
            component: POSITION,
        });
        assert_eq!(buffer.execute(&world).unwrap(), 2);
        assert!(world.has_component(e, POSITION));

        buffer.record(EntityCommand::Despawn { entity: e });
        assert_eq!(buffer.execute(&world).unwrap(), 1);
        assert!(!world.contains(e));
    }

    #[test]
    fn test_execute_leaves_buffer_empty_and_is_idempotent() {
        let world = World::new();
        let mut buffer = CommandBuffer::new(BufferScope::EndOfTick);
        let e = world.reserve_entity();
        buffer.record(EntityCommand::Spawn {
            entity: e,
            components: vec![POSITION],
        });

        assert_eq!(buffer.execute(&world).unwrap(), 1);
        assert!(buffer.is_empty());
        assert_eq!(buffer.execute(&world).unwrap(), 0);
        assert_eq!(world.entity_count(), 1);
    }

    #[test]
    fn test_failed_flush_keeps_remaining_commands() {
        let world = World::new();
        let mut buffer = CommandBuffer::new(BufferScope::EndOfStage);
        let alive = world.spawn([POSITION]);
        let ghost = Entity::from_raw(999);
        let later = world.reserve_entity();

        buffer.record(EntityCommand::Despawn { entity: alive });
        buffer.record(EntityCommand::Despawn { entity: ghost });
        buffer.record(EntityCommand::Spawn {
            entity: later,
            components: vec![],
        });

        let err = buffer.execute(&world).unwrap_err();
        assert_eq!(err.scope, BufferScope::EndOfStage);
        assert_eq!(err.index, 1);
        assert_eq!(err.command, EntityCommand::Despawn { entity: ghost });
        assert_eq!(err.source, WorldError::EntityNotFound(ghost));
        assert_eq!(err.remaining, 1);

        // The first command stays applied, the tail stays queued.
        assert!(!world.contains(alive));
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.execute(&world).unwrap(), 1);
        assert!(world.contains(later));
    }
}
