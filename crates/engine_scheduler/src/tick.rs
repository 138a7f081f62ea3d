//! Fixed-timestep tick loop.
//!
//! Drives a [`Scheduler`] at the configured rate:
//!
//! 1. Run every stage of the tick (systems, then the end-of-stage flush).
//! 2. Flush the end-of-tick buffer.
//! 3. Sleep for the rest of the tick budget, or warn if it was exceeded.

use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::{ConfigError, TickConfig};
use crate::error::ScheduleError;
use crate::scheduler::Scheduler;

/// The tick loop state.
#[derive(Debug)]
pub struct TickLoop {
    config: TickConfig,
    scheduler: Scheduler,
}

impl TickLoop {
    /// Create a new tick loop around a configured scheduler.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] unless the tick rate is finite and
    /// positive.
    pub fn new(config: TickConfig, scheduler: Scheduler) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, scheduler })
    }

    /// Returns the number of ticks started so far.
    #[must_use]
    pub fn tick_id(&self) -> u64 {
        self.scheduler.tick_id()
    }

    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Run a single tick.
    ///
    /// # Errors
    ///
    /// Propagates the scheduler's error.
    pub fn tick(&mut self) -> Result<(), ScheduleError> {
        self.scheduler.tick()
    }

    /// Run the tick loop for the configured number of ticks, or until a tick
    /// fails.
    ///
    /// # Errors
    ///
    /// Returns the first tick's error; the loop stops there.
    pub fn run(&mut self) -> Result<(), ScheduleError> {
        let tick_duration = Duration::from_secs_f64(1.0 / self.config.tick_rate);
        let mut tick_count = 0u64;

        info!(
            tick_rate = self.config.tick_rate,
            max_ticks = self.config.max_ticks,
            "starting tick loop"
        );

        loop {
            let start = Instant::now();

            self.tick()?;

            tick_count += 1;
            if self.config.max_ticks > 0 && tick_count >= self.config.max_ticks {
                info!(
                    ticks = tick_count,
                    entities = self.scheduler.world().entity_count(),
                    "tick loop complete"
                );
                return Ok(());
            }

            let elapsed = start.elapsed();
            if elapsed < tick_duration {
                std::thread::sleep(tick_duration - elapsed);
            } else {
                warn!(
                    tick_id = self.tick_id(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    budget_ms = tick_duration.as_millis() as u64,
                    "tick exceeded time budget"
                );
            }
        }
    }
}
