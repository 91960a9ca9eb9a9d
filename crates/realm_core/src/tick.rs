//! Fixed-rate tick loop.
//!
//! [`TickLoop::run`] drives a [`Scheduler`] from a `tokio` interval:
//!
//! 1. Initialize the scheduler if nobody has yet.
//! 2. Wait for the next interval tick, or for a stop request.
//! 3. Run [`Scheduler::tick`] with the wall-clock time since the previous
//!    tick.
//! 4. Report ticks that overran their budget.
//!
//! A stop request never interrupts a tick in progress; the loop exits at the
//! next wait.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::config::ConfigError;
use crate::event::kinds;
use crate::scheduler::{SCHEDULER_SOURCE, Scheduler};

/// What the loop does when a tick runs past the next scheduled deadline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissedTickPolicy {
    /// Fire missed ticks back to back until caught up (fixed rate).
    Burst,
    /// Restart the schedule from the late tick (fixed delay).
    #[default]
    Delay,
    /// Drop missed ticks and wait for the next aligned deadline.
    Skip,
}

impl From<MissedTickPolicy> for MissedTickBehavior {
    fn from(policy: MissedTickPolicy) -> Self {
        match policy {
            MissedTickPolicy::Burst => Self::Burst,
            MissedTickPolicy::Delay => Self::Delay,
            MissedTickPolicy::Skip => Self::Skip,
        }
    }
}

/// Configuration for the tick loop.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TickConfig {
    /// Target ticks per second.
    pub tick_rate: f64,
    /// Maximum number of ticks to run (0 = unlimited).
    pub max_ticks: u64,
    pub missed_tick: MissedTickPolicy,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60.0,
            max_ticks: 0,
            missed_tick: MissedTickPolicy::default(),
        }
    }
}

impl TickConfig {
    /// Time budget of one tick.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidTickRate`] unless the rate is positive, finite
    /// and low enough to leave a non-zero period.
    pub fn period(&self) -> Result<Duration, ConfigError> {
        let rate = self.tick_rate;
        if !rate.is_finite() || rate <= 0.0 {
            return Err(ConfigError::InvalidTickRate(rate));
        }
        Duration::try_from_secs_f64(rate.recip())
            .ok()
            .filter(|period| !period.is_zero())
            .ok_or(ConfigError::InvalidTickRate(rate))
    }

    /// # Errors
    ///
    /// See [`TickConfig::period`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.period().map(drop)
    }
}

/// Cloneable handle that stops a running [`TickLoop`].
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    /// Request a stop. The tick in progress (if any) completes first.
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Why [`TickLoop::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// [`StopHandle::stop`] was called.
    Stopped,
    /// `max_ticks` ticks were run.
    MaxTicks,
}

/// Totals for one [`TickLoop::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct TickSummary {
    pub ticks: u64,
    pub overruns: u64,
    /// System update failures across all ticks.
    pub failures: u64,
    pub reason: StopReason,
}

/// Drives a [`Scheduler`] at a fixed rate.
#[derive(Debug)]
pub struct TickLoop {
    config: TickConfig,
    period: Duration,
    stop_tx: Arc<watch::Sender<bool>>,
    stop_rx: watch::Receiver<bool>,
}

impl TickLoop {
    /// Create a new tick loop with the given configuration.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidTickRate`] for a rate with no usable period.
    pub fn new(config: TickConfig) -> Result<Self, ConfigError> {
        let period = config.period()?;
        let (stop_tx, stop_rx) = watch::channel(false);
        Ok(Self {
            config,
            period,
            stop_tx: Arc::new(stop_tx),
            stop_rx,
        })
    }

    #[must_use]
    pub fn config(&self) -> &TickConfig {
        &self.config
    }

    /// Handle for stopping the loop from another task.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: Arc::clone(&self.stop_tx),
        }
    }

    /// Run until stopped or until `max_ticks` ticks have completed.
    ///
    /// A stop requested before the call ends the run before its first tick.
    /// The stop flag is cleared on return, so the loop can be run again.
    ///
    /// System failures are reported through the scheduler's event bus and
    /// logs; they never end the loop.
    pub async fn run(&mut self, scheduler: &mut Scheduler) -> TickSummary {
        if !scheduler.is_initialized()
            && let Err(err) = scheduler.initialize()
        {
            error!(error = %err, "scheduler initialized with failures");
        }

        let period = self.period;
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(self.config.missed_tick.into());

        info!(
            tick_rate = self.config.tick_rate,
            max_ticks = self.config.max_ticks,
            missed_tick = ?self.config.missed_tick,
            "starting tick loop"
        );

        let mut summary = TickSummary {
            ticks: 0,
            overruns: 0,
            failures: 0,
            reason: StopReason::Stopped,
        };
        let mut last = Instant::now();

        loop {
            if *self.stop_rx.borrow_and_update() {
                break;
            }
            tokio::select! {
                biased;
                _ = self.stop_rx.changed() => continue,
                _ = interval.tick() => {}
            }

            let start = Instant::now();
            let delta = start.duration_since(last);
            last = start;

            let report = scheduler.tick(delta);
            summary.ticks += 1;
            summary.failures += report.failures.len() as u64;

            let elapsed = start.elapsed();
            if elapsed > period {
                summary.overruns += 1;
                warn!(
                    tick_id = report.tick_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    budget_ms = period.as_millis() as u64,
                    "tick exceeded time budget"
                );
                scheduler.bus_mut().publish(
                    kinds::TICK_OVERRUN,
                    json!({
                        "tick_id": report.tick_id,
                        "elapsed_ms": elapsed.as_millis() as u64,
                        "budget_ms": period.as_millis() as u64,
                    }),
                    SCHEDULER_SOURCE,
                );
            }

            if self.config.max_ticks > 0 && summary.ticks >= self.config.max_ticks {
                summary.reason = StopReason::MaxTicks;
                break;
            }
        }

        info!(
            ticks = summary.ticks,
            overruns = summary.overruns,
            failures = summary.failures,
            reason = ?summary.reason,
            "tick loop complete"
        );
        self.stop_tx.send_replace(false);
        summary
    }
}
