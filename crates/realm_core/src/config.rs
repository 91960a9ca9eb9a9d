//! Scheduler configuration.
//!
//! Every field has a default, so an empty JSON object (or no environment
//! variables at all) yields a working configuration.

use serde::Deserialize;

use crate::event::DEFAULT_HISTORY_CAPACITY;
use crate::tick::TickConfig;

/// Environment variable overriding [`TickConfig::tick_rate`].
pub const ENV_TICK_RATE: &str = "REALM_TICK_RATE";
/// Environment variable overriding [`TickConfig::max_ticks`].
pub const ENV_MAX_TICKS: &str = "REALM_MAX_TICKS";
/// Environment variable overriding [`SchedulerConfig::event_history`].
pub const ENV_EVENT_HISTORY: &str = "REALM_EVENT_HISTORY";
/// Environment variable overriding [`SchedulerConfig::failure_threshold`].
/// `0` turns the circuit breaker off.
pub const ENV_FAILURE_THRESHOLD: &str = "REALM_FAILURE_THRESHOLD";

/// What [`Scheduler::add_entity`](crate::Scheduler::add_entity) does when the
/// identifier is already present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateEntityPolicy {
    /// Fail with [`CoreError::DuplicateEntity`](crate::CoreError::DuplicateEntity).
    #[default]
    Reject,
    /// Remove the existing entity (with the usual events and hooks), then add
    /// the new one.
    Replace,
}

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },

    #[error("tick rate must be positive and finite, got {0}")]
    InvalidTickRate(f64),
}

/// Configuration for a [`Scheduler`](crate::Scheduler) and its tick loop.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick: TickConfig,
    /// Number of events retained in the bus history (0 keeps none).
    pub event_history: usize,
    pub duplicate_entities: DuplicateEntityPolicy,
    /// Consecutive update failures after which a system is disabled.
    /// `None` or `Some(0)` never disables.
    pub failure_threshold: Option<u32>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: TickConfig::default(),
            event_history: DEFAULT_HISTORY_CAPACITY,
            duplicate_entities: DuplicateEntityPolicy::default(),
            failure_threshold: None,
        }
    }
}

impl SchedulerConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Malformed JSON or a tick rate with no usable period.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_json::from_str(json)?;
        config.failure_threshold = config.breaker_threshold();
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by the `REALM_*` environment variables.
    ///
    /// # Errors
    ///
    /// A variable that is set but does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from a key lookup (the environment, in
    /// [`SchedulerConfig::from_env`]).
    ///
    /// # Errors
    ///
    /// A present value that does not parse.
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&'static str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(rate) = parse(&lookup, ENV_TICK_RATE)? {
            self.tick.tick_rate = rate;
        }
        if let Some(max) = parse(&lookup, ENV_MAX_TICKS)? {
            self.tick.max_ticks = max;
        }
        if let Some(history) = parse(&lookup, ENV_EVENT_HISTORY)? {
            self.event_history = history;
        }
        if let Some(threshold) = parse::<u32>(&lookup, ENV_FAILURE_THRESHOLD)? {
            self.failure_threshold = (threshold > 0).then_some(threshold);
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.tick.validate()
    }

    /// The effective circuit breaker threshold; zero counts as off.
    #[must_use]
    pub fn breaker_threshold(&self) -> Option<u32> {
        self.failure_threshold.filter(|threshold| *threshold > 0)
    }

    #[must_use]
    pub fn with_tick(mut self, tick: TickConfig) -> Self {
        self.tick = tick;
        self
    }

    #[must_use]
    pub fn with_tick_rate(mut self, tick_rate: f64) -> Self {
        self.tick.tick_rate = tick_rate;
        self
    }

    #[must_use]
    pub fn with_max_ticks(mut self, max_ticks: u64) -> Self {
        self.tick.max_ticks = max_ticks;
        self
    }

    #[must_use]
    pub fn with_event_history(mut self, capacity: usize) -> Self {
        self.event_history = capacity;
        self
    }

    #[must_use]
    pub fn with_duplicate_entities(mut self, policy: DuplicateEntityPolicy) -> Self {
        self.duplicate_entities = policy;
        self
    }

    /// Disable systems after `threshold` consecutive update failures
    /// (0 turns the breaker off).
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = (threshold > 0).then_some(threshold);
        self
    }
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&'static str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value }),
    }
}
