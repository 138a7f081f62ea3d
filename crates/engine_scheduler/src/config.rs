//! Scheduler and tick loop configuration.
//!
//! Both configs have sensible defaults, can be loaded from a JSON document
//! (missing fields fall back to the defaults), and accept environment
//! overrides.

use std::path::Path;

use serde::Deserialize;

/// Environment variable overriding [`SchedulerConfig::worker_threads`].
pub const WORKER_THREADS_ENV: &str = "ENGINE_WORKER_THREADS";

/// Environment variable overriding [`TickConfig::tick_rate`].
pub const TICK_RATE_ENV: &str = "ENGINE_TICK_RATE";

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value '{value}' for {key}")]
    InvalidEnv { key: &'static str, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Configuration for the runtime the scheduler executes systems on.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Async worker threads driving the admission loop. `None` uses one per
    /// CPU core.
    pub worker_threads: Option<usize>,
    /// Upper bound on threads running system executors concurrently.
    pub max_blocking_threads: usize,
    /// Name given to runtime threads.
    pub thread_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: None,
            max_blocking_threads: 512,
            thread_name: "engine-scheduler".to_string(),
        }
    }
}

impl SchedulerConfig {
    /// Apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] if an override does not parse.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Ok(value) = std::env::var(WORKER_THREADS_ENV) {
            let threads = value
                .parse::<usize>()
                .ok()
                .filter(|&n| n > 0)
                .ok_or(ConfigError::InvalidEnv {
                    key: WORKER_THREADS_ENV,
                    value,
                })?;
            self.worker_threads = Some(threads);
        }
        Ok(self)
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for zero thread counts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_threads == Some(0) {
            return Err(ConfigError::Invalid("worker_threads must be > 0".into()));
        }
        if self.max_blocking_threads == 0 {
            return Err(ConfigError::Invalid(
                "max_blocking_threads must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration for the fixed-timestep tick loop.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TickConfig {
    /// Target ticks per second.
    pub tick_rate: f64,
    /// Maximum number of ticks to run (0 = unlimited).
    pub max_ticks: u64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60.0,
            max_ticks: 0,
        }
    }
}

impl TickConfig {
    /// Apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] if an override does not parse.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Ok(value) = std::env::var(TICK_RATE_ENV) {
            self.tick_rate = value
                .parse::<f64>()
                .map_err(|_| ConfigError::InvalidEnv {
                    key: TICK_RATE_ENV,
                    value,
                })?;
        }
        Ok(self)
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] unless the tick rate is finite and
    /// positive.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.tick_rate.is_finite() || self.tick_rate <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "tick_rate must be positive, got {}",
                self.tick_rate
            )));
        }
        Ok(())
    }
}

/// Top-level configuration document.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scheduler: SchedulerConfig,
    pub tick: TickConfig,
}

impl EngineConfig {
    /// Parse a JSON configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on malformed JSON or
    /// [`ConfigError::Invalid`] on out-of-range values.
    pub fn from_json(document: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON configuration file.
    ///
    /// # Errors
    ///
    /// See [`EngineConfig::from_json`]; also fails if the file is unreadable.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let document = std::fs::read_to_string(path)?;
        Self::from_json(&document)
    }

    /// Apply environment overrides to both sections and re-validate.
    ///
    /// # Errors
    ///
    /// See [`SchedulerConfig::with_env_overrides`] and
    /// [`TickConfig::with_env_overrides`].
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        let config = Self {
            scheduler: self.scheduler.with_env_overrides()?,
            tick: self.tick.with_env_overrides()?,
        };
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns the first section's validation error.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheduler.validate()?;
        self.tick.validate()
    }
}
