//! Retry delay policy for transient failures.
//!
//! Delays grow as `initial_delay * multiplier^(failures - 1)`, capped at
//! `max_delay`. Each delay is shortened by a random share of up to
//! `jitter_factor` so that a fleet of hosts recovering from the same outage
//! does not hammer the directory in lockstep.
//!
//! There is no retry ceiling. A host keeps trying at the capped delay for as
//! long as failures are transient; only specific rejections stop the sender.
//!
//! # Invariants
//!
//! - Within one failure streak, [`BackoffController::next_delay`] never
//!   returns less than it returned before.
//! - No delay exceeds `max_delay`.
//! - [`BackoffController::record_success`] resets to baseline: no failures,
//!   zero delay.

use std::time::Duration;

use crate::{config::BackoffConfig, env::Environment};

/// Exponential backoff with bounded jitter
#[derive(Debug, Clone)]
pub struct BackoffController {
    config: BackoffConfig,
    attempt_count: u32,
    last_delay: Duration,
}

impl BackoffController {
    /// Create a controller at baseline
    #[must_use]
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt_count: 0, last_delay: Duration::ZERO }
    }

    /// Consecutive failures since the last success
    #[must_use]
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Reset to baseline
    pub fn record_success(&mut self) {
        self.attempt_count = 0;
        self.last_delay = Duration::ZERO;
    }

    /// Count one more failure
    pub fn record_failure(&mut self) {
        self.attempt_count = self.attempt_count.saturating_add(1);
    }

    /// Un-jittered delay for the current failure count
    #[must_use]
    pub fn nominal_delay(&self) -> Duration {
        if self.attempt_count == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(self.attempt_count - 1).unwrap_or(i32::MAX);
        let secs = self.config.initial_delay.as_secs_f64() * self.config.multiplier.powi(exponent);
        let max = self.config.max_delay.as_secs_f64();

        // powi overflows to +inf long before attempt_count saturates, and a cap
        // near Duration::MAX rounds past it as f64
        Duration::try_from_secs_f64(secs.min(max)).unwrap_or(self.config.max_delay)
    }

    /// Delay before the next retry, jittered
    ///
    /// Draws one random fraction from `env`.
    pub fn next_delay(&mut self, env: &impl Environment) -> Duration {
        let nominal = self.nominal_delay();
        let share = self.config.jitter_factor * env.random_fraction();
        let shave = Duration::try_from_secs_f64(nominal.as_secs_f64() * share)
            .unwrap_or(Duration::ZERO)
            .min(nominal);
        let delay = nominal.saturating_sub(shave).max(self.last_delay).min(self.config.max_delay);

        self.last_delay = delay;
        delay
    }
}
