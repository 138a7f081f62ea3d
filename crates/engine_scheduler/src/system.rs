//! Tick systems, their executors, and the per-execution context.
//!
//! A [`TickSystem`] is the unit the scheduler places in a stage graph: a name,
//! a [`QueryDescriptor`] describing its data access, the names of the systems
//! it must run after, and the executor that does the work.

use std::sync::Arc;

use engine_component::{ComponentTypeId, Entity, QueryDescriptor};

use crate::command::{BufferScope, EntityCommand};
use crate::world::{World, WorldError};

/// The body of a system.
///
/// `execute` runs on a blocking worker thread, possibly at the same time as
/// other executors of the same stage. The scheduler guarantees that no
/// executor with a conflicting [`QueryDescriptor`] runs concurrently, so
/// implementations only need interior mutability for their own state.
///
/// Closures of the form `Fn(&mut TickSystemCommand) -> anyhow::Result<()>`
/// implement this trait.
pub trait TickSystemExecutor: Send + Sync + 'static {
    /// Run the system once for the current tick.
    ///
    /// # Errors
    ///
    /// Any error aborts the tick; see [`ScheduleError::System`].
    ///
    /// [`ScheduleError::System`]: crate::error::ScheduleError::System
    fn execute(&self, command: &mut TickSystemCommand) -> anyhow::Result<()>;
}

impl<F> TickSystemExecutor for F
where
    F: Fn(&mut TickSystemCommand) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn execute(&self, command: &mut TickSystemCommand) -> anyhow::Result<()> {
        self(command)
    }
}

/// A schedulable system declaration.
#[derive(Clone)]
pub struct TickSystem {
    name: String,
    query: QueryDescriptor,
    after: Vec<String>,
    executor: Arc<dyn TickSystemExecutor>,
}

impl TickSystem {
    /// Create a system with no declared access and no ordering constraints.
    #[must_use]
    pub fn new(name: impl Into<String>, executor: impl TickSystemExecutor) -> Self {
        Self::from_arc(name, Arc::new(executor))
    }

    /// Create a system from an executor that is already shared, for example
    /// one the caller keeps a handle to for inspecting its state.
    #[must_use]
    pub fn from_arc(name: impl Into<String>, executor: Arc<dyn TickSystemExecutor>) -> Self {
        Self {
            name: name.into(),
            query: QueryDescriptor::new(),
            after: Vec::new(),
            executor,
        }
    }

    /// Declare the system's data access.
    #[must_use]
    pub fn with_query(mut self, query: QueryDescriptor) -> Self {
        self.query = query;
        self
    }

    /// Require this system to start only after `system` (in the same stage)
    /// has completed.
    #[must_use]
    pub fn after(mut self, system: impl Into<String>) -> Self {
        self.after.push(system.into());
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn query(&self) -> &QueryDescriptor {
        &self.query
    }

    /// Names of the systems this one depends on.
    #[must_use]
    pub fn dependencies(&self) -> &[String] {
        &self.after
    }

    #[must_use]
    pub fn executor(&self) -> &Arc<dyn TickSystemExecutor> {
        &self.executor
    }
}

impl std::fmt::Debug for TickSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickSystem")
            .field("name", &self.name)
            .field("query", &self.query)
            .field("after", &self.after)
            .finish_non_exhaustive()
    }
}

/// Commands recorded by one system execution, split by flush point.
#[derive(Debug, Default)]
pub(crate) struct RecordedCommands {
    pub(crate) end_of_stage: Vec<EntityCommand>,
    pub(crate) end_of_tick: Vec<EntityCommand>,
}

impl RecordedCommands {
    pub(crate) fn len(&self) -> usize {
        self.end_of_stage.len() + self.end_of_tick.len()
    }
}

/// Context handed to a [`TickSystemExecutor`] for one execution.
///
/// Structural mutations can be made in three modes:
///
/// - **immediate** (`spawn`, `despawn`, ...): applied to the live world at
///   the point of the call;
/// - **end of stage** (`BufferScope::EndOfStage`): applied when the current stage has drained;
/// - **end of tick** (`BufferScope::EndOfTick`): applied after the last stage of the tick.
///
/// Deferred spawns reserve their entity ID right away, so the returned
/// [`Entity`] can be referenced by later commands before it is alive.
#[derive(Debug)]
pub struct TickSystemCommand {
    tick_id: u64,
    stage: Arc<str>,
    system: Arc<str>,
    world: Arc<World>,
    recorded: RecordedCommands,
}

impl TickSystemCommand {
    pub(crate) fn new(tick_id: u64, stage: Arc<str>, system: Arc<str>, world: Arc<World>) -> Self {
        Self {
            tick_id,
            stage,
            system,
            world,
            recorded: RecordedCommands::default(),
        }
    }

    /// The tick being executed (starts at 1).
    #[must_use]
    pub fn tick_id(&self) -> u64 {
        self.tick_id
    }

    /// Name of the stage the system runs in.
    #[must_use]
    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Name of the executing system.
    #[must_use]
    pub fn system(&self) -> &str {
        &self.system
    }

    /// Read access to the live world.
    #[must_use]
    pub fn world(&self) -> &World {
        &self.world
    }

    // -- Immediate mutations --

    /// Spawn an entity immediately.
    pub fn spawn(&self, components: impl IntoIterator<Item = ComponentTypeId>) -> Entity {
        self.world.spawn(components)
    }

    /// Destroy an entity immediately.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::EntityNotFound`] if the entity is not alive.
    pub fn despawn(&self, entity: Entity) -> Result<(), WorldError> {
        self.world.despawn(entity)
    }

    /// Attach a component type immediately.
    ///
    /// # Errors
    ///
    /// See [`World::add_component`].
    pub fn add_component(
        &self,
        entity: Entity,
        component: ComponentTypeId,
    ) -> Result<(), WorldError> {
        self.world.add_component(entity, component)
    }

    /// Detach a component type immediately.
    ///
    /// # Errors
    ///
    /// See [`World::remove_component`].
    pub fn remove_component(
        &self,
        entity: Entity,
        component: ComponentTypeId,
    ) -> Result<(), WorldError> {
        self.world.remove_component(entity, component)
    }

    // -- Deferred mutations --

    /// Record a command into the buffer for `scope`.
    pub fn record(&mut self, scope: BufferScope, command: EntityCommand) {
        match scope {
            BufferScope::EndOfStage => self.recorded.end_of_stage.push(command),
            BufferScope::EndOfTick => self.recorded.end_of_tick.push(command),
        }
    }

    /// Record a spawn and return the reserved entity.
    pub fn spawn_deferred(
        &mut self,
        scope: BufferScope,
        components: impl IntoIterator<Item = ComponentTypeId>,
    ) -> Entity {
        let entity = self.world.reserve_entity();
        self.record(
            scope,
            EntityCommand::Spawn {
                entity,
                components: components.into_iter().collect(),
            },
        );
        entity
    }

    /// Record a despawn.
    pub fn despawn_deferred(&mut self, scope: BufferScope, entity: Entity) {
        self.record(scope, EntityCommand::Despawn { entity });
    }

    /// Record a component addition.
    pub fn add_component_deferred(
        &mut self,
        scope: BufferScope,
        entity: Entity,
        component: ComponentTypeId,
    ) {
        self.record(scope, EntityCommand::AddComponent { entity, component });
    }

    /// Record a component removal.
    pub fn remove_component_deferred(
        &mut self,
        scope: BufferScope,
        entity: Entity,
        component: ComponentTypeId,
    ) {
        self.record(scope, EntityCommand::RemoveComponent { entity, component });
    }

    /// Number of commands recorded so far by this execution.
    #[must_use]
    pub fn recorded_len(&self) -> usize {
        self.recorded.len()
    }

    pub(crate) fn into_recorded(self) -> RecordedCommands {
        self.recorded
    }
}
