//! Concurrent stage scheduler.
//!
//! Stages run strictly one after another. Inside a stage, systems are
//! admitted in **waves**: every waiting node whose dependencies have all
//! completed and that conflicts with nothing currently running is started at
//! once. Each admitted node runs as its own task; when it finishes it updates
//! the shared bookkeeping itself and the orchestrating loop, woken by the
//! task's completion, runs the next admission pass.
//!
//! ```text
//! tick:
//!   for stage in stages:
//!     reset bookkeeping
//!     loop:
//!       lock → admit eligible waiting nodes → unlock → spawn them
//!       await next finished node (its bookkeeping is already done)
//!     append recorded commands to the buffers in completion order
//!     flush end-of-stage buffer
//!   flush end-of-tick buffer
//! ```
//!
//! The four bookkeeping structures (waiting, running, completion counters,
//! executed flags) sit behind one lock that is never held across a system
//! execution. A finishing node also queues its recorded commands under that
//! lock, so a dependent's records always follow its dependency's.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use tokio::runtime::{Handle, Runtime};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::command::{BufferScope, CommandBuffer};
use crate::config::SchedulerConfig;
use crate::error::ScheduleError;
use crate::graph::{DependencyGraph, DependencyGraphNode, NodeId};
use crate::stage::Stage;
use crate::system::{RecordedCommands, TickSystemCommand};
use crate::world::World;

/// Commands queued in the scheduler buffers and not yet applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PendingCommands {
    pub end_of_stage: usize,
    pub end_of_tick: usize,
}

/// Per-stage scheduling bookkeeping, reused across stages and ticks.
///
/// The dense arrays are indexed by [`NodeId`] and sized to the largest
/// stage when the scheduler is built.
#[derive(Debug, Default)]
struct AdmissionState {
    waiting: BTreeSet<NodeId>,
    running: BTreeSet<NodeId>,
    completion_count: Vec<usize>,
    executed: Vec<bool>,
    /// Commands of completed nodes, in completion order.
    recorded: Vec<RecordedCommands>,
}

impl AdmissionState {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            waiting: BTreeSet::new(),
            running: BTreeSet::new(),
            completion_count: Vec::with_capacity(capacity),
            executed: Vec::with_capacity(capacity),
            recorded: Vec::new(),
        }
    }

    fn reset(&mut self, graph: &DependencyGraph) {
        self.running.clear();
        self.waiting.clear();
        self.waiting.extend(graph.nodes().map(DependencyGraphNode::id));
        self.completion_count.clear();
        self.completion_count.resize(graph.len(), 0);
        self.executed.clear();
        self.executed.resize(graph.len(), false);
        self.recorded.clear();
    }

    /// One admission pass over the waiting set.
    ///
    /// A node admitted earlier in the pass counts as running for the nodes
    /// after it, so the returned wave never contains two conflicting nodes.
    fn admit(&mut self, graph: &DependencyGraph) -> Vec<NodeId> {
        let Self {
            waiting,
            running,
            completion_count,
            ..
        } = self;
        let mut wave = Vec::new();
        waiting.retain(|&id| {
            let node = graph.node(id);
            let ready = completion_count[id.index()] == node.depends_on().len();
            if !ready || node.conflicts().iter().any(|other| running.contains(other)) {
                return true;
            }
            running.insert(id);
            wave.push(id);
            false
        });
        wave
    }

    fn complete(&mut self, node: &DependencyGraphNode) {
        let id = node.id();
        debug_assert!(!self.executed[id.index()], "node {id} executed twice");
        self.running.remove(&id);
        self.executed[id.index()] = true;
        for dependent in node.dependents() {
            self.completion_count[dependent.index()] += 1;
        }
        // A conflicting node may have been held back only by this one.
        for &other in node.dependents().iter().chain(node.conflicts()) {
            if !self.executed[other.index()] && !self.running.contains(&other) {
                self.waiting.insert(other);
            }
        }
    }

    /// Release a failed node's running slot without marking it executed.
    fn abandon(&mut self, id: NodeId) {
        self.running.remove(&id);
    }

    fn remaining(&self) -> usize {
        self.executed.iter().filter(|done| !**done).count()
    }

    fn is_drained(&self) -> bool {
        self.waiting.is_empty() && self.running.is_empty() && self.remaining() == 0
    }
}

/// Everything a node task needs, owned so the task is `'static`.
struct NodeTask {
    tick_id: u64,
    stage: Arc<str>,
    graph: Arc<DependencyGraph>,
    node: NodeId,
    world: Arc<World>,
    state: Arc<Mutex<AdmissionState>>,
}

impl NodeTask {
    async fn run(self) -> Result<(), ScheduleError> {
        let node = self.graph.node(self.node);
        let system: Arc<str> = Arc::from(node.system().name());
        let executor = Arc::clone(node.system().executor());
        let mut command = TickSystemCommand::new(
            self.tick_id,
            Arc::clone(&self.stage),
            Arc::clone(&system),
            Arc::clone(&self.world),
        );

        let joined = tokio::task::spawn_blocking(move || {
            let result = executor.execute(&mut command);
            (command, result)
        })
        .await;

        let mut state = self.state.lock().await;
        match joined {
            Ok((command, Ok(()))) => {
                state.complete(node);
                state.recorded.push(command.into_recorded());
                Ok(())
            }
            Ok((command, Err(source))) => {
                state.abandon(self.node);
                drop(state);
                let discarded = command.recorded_len();
                if discarded > 0 {
                    warn!(
                        tick_id = self.tick_id,
                        stage = %self.stage,
                        system = %system,
                        discarded,
                        "discarding commands recorded by failed system"
                    );
                }
                Err(ScheduleError::System {
                    stage: self.stage.to_string(),
                    system: system.to_string(),
                    source,
                })
            }
            Err(join) => {
                state.abandon(self.node);
                if join.is_panic() {
                    Err(ScheduleError::SystemPanicked {
                        stage: self.stage.to_string(),
                        system: system.to_string(),
                    })
                } else {
                    Err(ScheduleError::Join(join))
                }
            }
        }
    }
}

/// Runs the stages of a world once per tick.
#[derive(Debug)]
pub struct Scheduler {
    stages: Vec<Stage>,
    world: Arc<World>,
    config: SchedulerConfig,
    state: Arc<Mutex<AdmissionState>>,
    end_of_stage: CommandBuffer,
    end_of_tick: CommandBuffer,
    tick_id: u64,
    /// Built on the first blocking [`Scheduler::tick`].
    runtime: Option<Runtime>,
}

impl Scheduler {
    /// Create a scheduler over a fresh, empty world.
    #[must_use]
    pub fn new(stages: Vec<Stage>, config: SchedulerConfig) -> Self {
        Self::with_world(stages, Arc::new(World::new()), config)
    }

    /// Create a scheduler over an existing world.
    #[must_use]
    pub fn with_world(stages: Vec<Stage>, world: Arc<World>, config: SchedulerConfig) -> Self {
        let largest = stages.iter().map(|s| s.graph().len()).max().unwrap_or(0);
        let systems: usize = stages.iter().map(|s| s.graph().len()).sum();

        info!(
            stage_count = stages.len(),
            system_count = systems,
            largest_stage = largest,
            "scheduler configured"
        );

        Self {
            stages,
            world,
            config,
            state: Arc::new(Mutex::new(AdmissionState::with_capacity(largest))),
            end_of_stage: CommandBuffer::new(BufferScope::EndOfStage),
            end_of_tick: CommandBuffer::new(BufferScope::EndOfTick),
            tick_id: 0,
            runtime: None,
        }
    }

    /// Number of ticks started so far.
    #[must_use]
    pub fn tick_id(&self) -> u64 {
        self.tick_id
    }

    #[must_use]
    pub fn world(&self) -> &Arc<World> {
        &self.world
    }

    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Commands still queued, for example after a failed tick.
    #[must_use]
    pub fn pending_commands(&self) -> PendingCommands {
        PendingCommands {
            end_of_stage: self.end_of_stage.len(),
            end_of_tick: self.end_of_tick.len(),
        }
    }

    /// Run one tick, blocking the current thread until every stage and both
    /// buffer flushes have completed.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::NestedRuntime`] when called from inside an
    /// async runtime, [`ScheduleError::Runtime`] if the runtime cannot be
    /// built, and otherwise whatever [`Scheduler::tick_async`] returns.
    pub fn tick(&mut self) -> Result<(), ScheduleError> {
        if Handle::try_current().is_ok() {
            return Err(ScheduleError::NestedRuntime);
        }
        let runtime = match self.runtime.take() {
            Some(runtime) => runtime,
            None => self.build_runtime()?,
        };
        let result = runtime.block_on(self.tick_async());
        self.runtime = Some(runtime);
        result
    }

    /// Run one tick.
    ///
    /// # Errors
    ///
    /// The first system failure of a stage is returned once every system
    /// already running in that stage has finished; no later system, flush or
    /// stage runs. A failed flush aborts the tick the same way.
    pub async fn tick_async(&mut self) -> Result<(), ScheduleError> {
        self.tick_id += 1;
        let started = Instant::now();
        debug!(tick_id = self.tick_id, stages = self.stages.len(), "tick start");

        for index in 0..self.stages.len() {
            self.execute_stage(index).await?;
            let applied = self
                .end_of_stage
                .execute(&self.world)
                .map_err(|source| ScheduleError::Flush {
                    scope: BufferScope::EndOfStage,
                    source,
                })?;
            debug!(
                tick_id = self.tick_id,
                stage = self.stages[index].name(),
                applied,
                "stage complete"
            );
        }

        let applied = self
            .end_of_tick
            .execute(&self.world)
            .map_err(|source| ScheduleError::Flush {
                scope: BufferScope::EndOfTick,
                source,
            })?;
        debug!(
            tick_id = self.tick_id,
            applied,
            elapsed_us = started.elapsed().as_micros() as u64,
            "tick complete"
        );
        Ok(())
    }

    /// Run the admission loop of one stage until it drains.
    async fn execute_stage(&mut self, index: usize) -> Result<(), ScheduleError> {
        let stage = &self.stages[index];
        let stage_name = Arc::clone(stage.shared_name());
        let graph = Arc::clone(stage.shared_graph());
        self.state.lock().await.reset(&graph);

        let mut in_flight = JoinSet::new();
        let mut failure: Option<ScheduleError> = None;
        let mut wave_index = 0usize;

        loop {
            if failure.is_none() {
                let wave = self.state.lock().await.admit(&graph);
                if !wave.is_empty() {
                    debug!(
                        tick_id = self.tick_id,
                        stage = %stage_name,
                        wave = wave_index,
                        width = wave.len(),
                        "admitting wave"
                    );
                    wave_index += 1;
                }
                for node in wave {
                    let task = NodeTask {
                        tick_id: self.tick_id,
                        stage: Arc::clone(&stage_name),
                        graph: Arc::clone(&graph),
                        node,
                        world: Arc::clone(&self.world),
                        state: Arc::clone(&self.state),
                    };
                    in_flight.spawn(task.run());
                }
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };
            match joined.map_err(ScheduleError::from).and_then(|outcome| outcome) {
                Ok(()) => {}
                Err(err) if failure.is_none() => {
                    warn!(
                        tick_id = self.tick_id,
                        stage = %stage_name,
                        running = in_flight.len(),
                        error = %err,
                        "system failed, draining stage"
                    );
                    failure = Some(err);
                }
                Err(err) => {
                    error!(
                        tick_id = self.tick_id,
                        stage = %stage_name,
                        error = %err,
                        "additional system failure while draining stage"
                    );
                }
            }
        }

        let mut state = self.state.lock().await;
        for recorded in state.recorded.drain(..) {
            self.end_of_stage.extend(recorded.end_of_stage);
            self.end_of_tick.extend(recorded.end_of_tick);
        }

        if let Some(err) = failure {
            return Err(err);
        }
        if !state.is_drained() {
            return Err(ScheduleError::Stalled {
                stage: stage_name.to_string(),
                remaining: state.remaining(),
            });
        }
        Ok(())
    }

    fn build_runtime(&self) -> std::io::Result<Runtime> {
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder
            .enable_all()
            .thread_name(self.config.thread_name.clone())
            .max_blocking_threads(self.config.max_blocking_threads);
        if let Some(threads) = self.config.worker_threads {
            builder.worker_threads(threads);
        }
        builder.build()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        // Dropping a runtime from async context panics.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::bail;
    use engine_component::{ComponentTypeId, QueryDescriptor};

    use super::*;
    use crate::system::TickSystem;

    const TRANSFORM: ComponentTypeId = ComponentTypeId(1);
    const VELOCITY: ComponentTypeId = ComponentTypeId(2);

    fn noop(_: &mut TickSystemCommand) -> anyhow::Result<()> {
        Ok(())
    }

    fn writer(name: &str, component: ComponentTypeId) -> TickSystem {
        TickSystem::new(name, noop).with_query(QueryDescriptor::new().write(component))
    }

    fn graph(systems: Vec<TickSystem>) -> DependencyGraph {
        DependencyGraph::build(systems).unwrap()
    }

    /// Drive the bookkeeping to completion without running anything,
    /// completing whole waves at a time. Returns the admitted waves.
    fn simulate(graph: &DependencyGraph) -> Vec<Vec<NodeId>> {
        let mut state = AdmissionState::with_capacity(graph.len());
        state.reset(graph);
        let mut waves = Vec::new();
        loop {
            let wave = state.admit(graph);
            if wave.is_empty() {
                break;
            }
            for &id in &wave {
                state.complete(graph.node(id));
            }
            waves.push(wave);
        }
        assert!(state.is_drained());
        waves
    }

    #[test]
    fn test_independent_nodes_form_one_wave() {
        let g = graph(vec![
            writer("a", TRANSFORM),
            writer("b", VELOCITY),
            TickSystem::new("c", noop),
        ]);
        assert_eq!(simulate(&g), vec![vec![NodeId(0), NodeId(1), NodeId(2)]]);
    }

    #[test]
    fn test_conflicting_nodes_never_share_a_wave() {
        let g = graph(vec![
            writer("a", TRANSFORM),
            writer("b", TRANSFORM),
            writer("c", VELOCITY),
        ]);
        assert_eq!(
            simulate(&g),
            vec![vec![NodeId(0), NodeId(2)], vec![NodeId(1)]]
        );
    }

    #[test]
    fn test_dependencies_gate_admission() {
        let g = graph(vec![
            TickSystem::new("c", noop).after("b"),
            TickSystem::new("b", noop).after("a"),
            TickSystem::new("a", noop),
        ]);
        assert_eq!(
            simulate(&g),
            vec![vec![NodeId(2)], vec![NodeId(1)], vec![NodeId(0)]]
        );
    }

    #[test]
    fn test_conflict_release_readmits_waiting_node() {
        let g = graph(vec![writer("a", TRANSFORM), writer("b", TRANSFORM)]);
        let mut state = AdmissionState::with_capacity(2);
        state.reset(&g);

        assert_eq!(state.admit(&g), vec![NodeId(0)]);
        // `b` stays waiting while `a` runs.
        assert!(state.admit(&g).is_empty());
        assert!(state.waiting.contains(&NodeId(1)));

        state.complete(g.node(NodeId(0)));
        assert_eq!(state.admit(&g), vec![NodeId(1)]);
        state.complete(g.node(NodeId(1)));
        assert!(state.is_drained());
    }

    #[test]
    fn test_reset_clears_previous_stage() {
        let small = graph(vec![TickSystem::new("a", noop)]);
        let large = graph(vec![
            TickSystem::new("a", noop),
            TickSystem::new("b", noop).after("a"),
        ]);
        let mut state = AdmissionState::with_capacity(2);

        state.reset(&large);
        let first = state.admit(&large);
        state.complete(large.node(first[0]));
        assert_eq!(state.completion_count, vec![0, 1]);

        state.reset(&small);
        assert_eq!(state.completion_count, vec![0]);
        assert_eq!(state.executed, vec![false]);
        assert_eq!(state.remaining(), 1);
    }

    #[test]
    fn test_abandon_frees_slot_without_executing() {
        let g = graph(vec![writer("a", TRANSFORM), writer("b", TRANSFORM)]);
        let mut state = AdmissionState::with_capacity(2);
        state.reset(&g);
        assert_eq!(state.admit(&g), vec![NodeId(0)]);
        state.abandon(NodeId(0));
        assert!(state.running.is_empty());
        assert_eq!(state.remaining(), 2);
    }

    #[test]
    fn test_blocking_tick_runs_every_system_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let systems = (0..8)
            .map(|i| {
                let counter = Arc::clone(&counter);
                TickSystem::new(
                    format!("system-{i}"),
                    move |_: &mut TickSystemCommand| -> anyhow::Result<()> {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    },
                )
            })
            .collect();
        let stage = Stage::new("update", systems).unwrap();
        let mut scheduler = Scheduler::new(vec![stage], SchedulerConfig::default());

        scheduler.tick().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 8);
        scheduler.tick().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 16);
        assert_eq!(scheduler.tick_id(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocking_tick_inside_runtime_is_rejected() {
        let mut scheduler = Scheduler::new(Vec::new(), SchedulerConfig::default());
        assert!(matches!(scheduler.tick(), Err(ScheduleError::NestedRuntime)));
        scheduler.tick_async().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_empty_stage_completes() {
        let stage = Stage::new("empty", Vec::new()).unwrap();
        let mut scheduler = Scheduler::new(vec![stage], SchedulerConfig::default());
        scheduler.tick_async().await.unwrap();
        assert_eq!(scheduler.pending_commands(), PendingCommands::default());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cyclic_dependencies_stall_instead_of_hanging() {
        let stage = Stage::new(
            "cyclic",
            vec![
                TickSystem::new("a", noop).after("b"),
                TickSystem::new("b", noop).after("a"),
                TickSystem::new("c", noop),
            ],
        )
        .unwrap();
        let mut scheduler = Scheduler::new(vec![stage], SchedulerConfig::default());

        let err = scheduler.tick_async().await.unwrap_err();
        match err {
            ScheduleError::Stalled { stage, remaining } => {
                assert_eq!(stage, "cyclic");
                assert_eq!(remaining, 2);
            }
            other => panic!("expected stall, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failure_drains_stage_and_keeps_sibling_commands() {
        let stage = Stage::new(
            "update",
            vec![
                TickSystem::new("fails", |cmd: &mut TickSystemCommand| -> anyhow::Result<()> {
                    cmd.spawn_deferred(BufferScope::EndOfStage, [TRANSFORM]);
                    bail!("boom")
                }),
                TickSystem::new("records", |cmd: &mut TickSystemCommand| -> anyhow::Result<()> {
                    cmd.spawn_deferred(BufferScope::EndOfTick, [VELOCITY]);
                    Ok(())
                }),
                TickSystem::new("after-fails", noop).after("fails"),
            ],
        )
        .unwrap();
        let mut scheduler = Scheduler::new(vec![stage], SchedulerConfig::default());

        let err = scheduler.tick_async().await.unwrap_err();
        match &err {
            ScheduleError::System { stage, system, source } => {
                assert_eq!(stage, "update");
                assert_eq!(system, "fails");
                assert_eq!(source.to_string(), "boom");
            }
            other => panic!("expected system failure, got {other:?}"),
        }
        // The sibling's record survives, the failing system's does not, and
        // nothing was flushed.
        assert_eq!(
            scheduler.pending_commands(),
            PendingCommands {
                end_of_stage: 0,
                end_of_tick: 1
            }
        );
        assert_eq!(scheduler.world().entity_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_panicking_system_is_reported() {
        let stage = Stage::new(
            "update",
            vec![TickSystem::new(
                "panics",
                |_: &mut TickSystemCommand| -> anyhow::Result<()> { panic!("system bug") },
            )],
        )
        .unwrap();
        let mut scheduler = Scheduler::new(vec![stage], SchedulerConfig::default());

        let err = scheduler.tick_async().await.unwrap_err();
        assert!(matches!(
            err,
            ScheduleError::SystemPanicked { ref system, .. } if system == "panics"
        ));
    }
}
