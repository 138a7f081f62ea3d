//! # engine_scheduler
//!
//! Concurrent execution engine for the ECS runtime.
//!
//! A tick runs an ordered list of [`Stage`]s. Within a stage, systems are
//! nodes of a [`DependencyGraph`] with explicit ordering edges and derived
//! conflict edges; the [`Scheduler`] runs every system exactly once per tick
//! with as much parallelism as those edges allow. Structural changes can be
//! applied immediately or deferred into a [`CommandBuffer`] flushed at the end
//! of the stage or at the end of the tick.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use engine_component::{ComponentTypeId, QueryDescriptor};
//! use engine_scheduler::{
//!     BufferScope, Scheduler, SchedulerConfig, Stage, TickSystem, TickSystemCommand,
//! };
//!
//! let position = ComponentTypeId::from_name("Position");
//!
//! let spawn = TickSystem::new("spawn", move |cmd: &mut TickSystemCommand| -> anyhow::Result<()> {
//!     cmd.spawn_deferred(BufferScope::EndOfStage, [position]);
//!     Ok(())
//! })
//! .with_query(QueryDescriptor::new().write(position));
//!
//! let stage = Stage::new("update", vec![spawn]).unwrap();
//! let mut scheduler = Scheduler::new(vec![stage], SchedulerConfig::default());
//! scheduler.tick().unwrap();
//! assert_eq!(scheduler.world().count_with(position), 1);
//! ```

pub mod command;
pub mod config;
pub mod error;
pub mod graph;
pub mod scheduler;
pub mod stage;
pub mod system;
pub mod tick;
pub mod world;

pub use command::{BufferScope, CommandBuffer, CommandError, EntityCommand};
pub use config::{ConfigError, EngineConfig, SchedulerConfig, TickConfig};
pub use error::{GraphError, ScheduleError};
pub use graph::{DependencyGraph, DependencyGraphNode, NodeId};
pub use scheduler::{PendingCommands, Scheduler};
pub use stage::Stage;
pub use system::{TickSystem, TickSystemCommand, TickSystemExecutor};
pub use tick::TickLoop;
pub use world::{World, WorldError};
