//! # engine_scheduler demo runner
//!
//! Runs a small three-stage world through the scheduler:
//!
//! 1. `spawn`: spawns movers (end-of-stage) while a reader counts them.
//! 2. `simulate`: physics and AI run in parallel, movement after physics.
//! 3. `cleanup`: retires old movers at the end of the tick.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use engine_component::{Component, QueryDescriptor};
use engine_scheduler::{
    BufferScope, EngineConfig, Scheduler, Stage, TickLoop, TickSystem, TickSystemCommand,
};

/// Command-line options.
#[derive(Debug, Parser)]
#[command(name = "engine_scheduler", about = "Run the demo world through the stage scheduler")]
struct Args {
    /// JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of ticks to run, 0 for no limit (overrides the config).
    #[arg(long)]
    ticks: Option<u64>,

    /// Ticks per second (overrides the config).
    #[arg(long)]
    tick_rate: Option<f64>,

    /// Movers spawned per tick.
    #[arg(long, default_value_t = 4)]
    spawn_per_tick: usize,
}

struct Transform;
impl Component for Transform {
    fn type_name() -> &'static str {
        "Transform"
    }
}

struct Velocity;
impl Component for Velocity {
    fn type_name() -> &'static str {
        "Velocity"
    }
}

struct AiState;
impl Component for AiState {
    fn type_name() -> &'static str {
        "AiState"
    }
}

fn build_stages(spawn_per_tick: usize) -> Result<Vec<Stage>> {
    let transform = Transform::component_type_id();
    let velocity = Velocity::component_type_id();
    let ai_state = AiState::component_type_id();

    let spawn = Stage::new(
        "spawn",
        vec![
            TickSystem::new(
                "spawner",
                move |cmd: &mut TickSystemCommand| -> Result<()> {
                    for _ in 0..spawn_per_tick {
                        cmd.spawn_deferred(BufferScope::EndOfStage, [transform, velocity]);
                    }
                    Ok(())
                },
            ),
            TickSystem::new(
                "census",
                move |cmd: &mut TickSystemCommand| -> Result<()> {
                    debug!(
                        tick_id = cmd.tick_id(),
                        stage = cmd.stage(),
                        movers = cmd.world().count_with(velocity),
                        "census"
                    );
                    Ok(())
                },
            )
            .with_query(QueryDescriptor::new().read(velocity))
            .after("spawner"),
        ],
    )?;

    let simulate = Stage::new(
        "simulate",
        vec![
            TickSystem::new("physics", |_: &mut TickSystemCommand| -> Result<()> { Ok(()) })
                .with_query(QueryDescriptor::new().read(transform).write(velocity)),
            TickSystem::new(
                "ai",
                move |cmd: &mut TickSystemCommand| -> Result<()> {
                    // Tag one untagged mover per tick.
                    let untagged = cmd
                        .world()
                        .entities_with(transform)
                        .into_iter()
                        .find(|&e| !cmd.world().has_component(e, ai_state));
                    if let Some(entity) = untagged {
                        cmd.add_component(entity, ai_state)?;
                    }
                    Ok(())
                },
            )
            .with_query(QueryDescriptor::new().read(transform).write(ai_state)),
            TickSystem::new("movement", |_: &mut TickSystemCommand| -> Result<()> { Ok(()) })
                .with_query(QueryDescriptor::new().read(velocity).write(transform))
                .after("physics"),
        ],
    )?;

    let cleanup = Stage::new(
        "cleanup",
        vec![TickSystem::new(
            "retire",
            move |cmd: &mut TickSystemCommand| -> Result<()> {
                // Keep the population bounded: retire the oldest tagged mover.
                if let Some(&oldest) = cmd.world().entities_with(ai_state).first() {
                    cmd.despawn_deferred(BufferScope::EndOfTick, oldest);
                }
                Ok(())
            },
        )
        .with_query(QueryDescriptor::new().write(ai_state))],
    )?;

    Ok(vec![spawn, simulate, cleanup])
}

fn main() -> Result<()> {
    // Initialise structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("engine_scheduler=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => EngineConfig::default(),
    }
    .with_env_overrides()?;
    if let Some(ticks) = args.ticks {
        config.tick.max_ticks = ticks;
    }
    if let Some(rate) = args.tick_rate {
        config.tick.tick_rate = rate;
    }
    config.validate()?;

    info!(?config, "engine scheduler starting");

    let stages = build_stages(args.spawn_per_tick)?;
    let scheduler = Scheduler::new(stages, config.scheduler);
    for stage in scheduler.stages() {
        info!(
            stage = stage.name(),
            systems = stage.graph().len(),
            "stage registered"
        );
    }
    let mut tick_loop = TickLoop::new(config.tick, scheduler)?;
    tick_loop.run()?;

    info!(
        ticks = tick_loop.tick_id(),
        entities = tick_loop.scheduler().world().entity_count(),
        "engine scheduler shut down"
    );
    Ok(())
}
