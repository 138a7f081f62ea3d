//! Scheduler error types.

use crate::command::{BufferScope, CommandError};

/// Errors detected while building a stage's dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// Two systems in the same stage share a name.
    #[error("system '{0}' is declared more than once in the stage")]
    DuplicateSystem(String),

    /// A dependency names a system that is not part of the stage.
    #[error("system '{system}' depends on unknown system '{dependency}'")]
    UnknownDependency { system: String, dependency: String },

    /// A system lists itself as a dependency.
    #[error("system '{0}' depends on itself")]
    SelfDependency(String),
}

/// Errors that abort a tick.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    /// A system executor returned an error.
    #[error("system '{system}' in stage '{stage}' failed")]
    System {
        stage: String,
        system: String,
        #[source]
        source: anyhow::Error,
    },

    /// A system executor panicked.
    #[error("system '{system}' in stage '{stage}' panicked")]
    SystemPanicked { stage: String, system: String },

    /// A command buffer could not be flushed.
    #[error("{scope} command buffer flush failed")]
    Flush {
        scope: BufferScope,
        #[source]
        source: CommandError,
    },

    /// The admission loop ran out of work before every system executed.
    ///
    /// Only reachable when the dependency graph is cyclic.
    #[error("stage '{stage}' stalled with {remaining} system(s) never admitted")]
    Stalled { stage: String, remaining: usize },

    /// The blocking [`Scheduler::tick`] was called from inside an async
    /// runtime. Use [`Scheduler::tick_async`] there instead.
    ///
    /// [`Scheduler::tick`]: crate::scheduler::Scheduler::tick
    /// [`Scheduler::tick_async`]: crate::scheduler::Scheduler::tick_async
    #[error("blocking tick called from within an async runtime")]
    NestedRuntime,

    /// The scheduler's runtime could not be built.
    #[error("failed to build the scheduler runtime: {0}")]
    Runtime(#[from] std::io::Error),

    /// A node task could not be joined.
    #[error("node task failed to join: {0}")]
    Join(#[from] tokio::task::JoinError),
}
