//! Heartbeat sender configuration.
//!
//! Every policy knob the engine consults lives here, including the retry
//! budgets for authentication failures and sequence corrections, so that
//! tests can pin them explicitly.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest delay any timer may be armed for, configured or directory-supplied
pub const MAX_DELAY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Invalid configuration values.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// The gate must watch one or two signaling channels
    #[error("gate must monitor 1 or 2 channels, got {0}")]
    ChannelCount(usize),

    /// A duration that must be positive was zero
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    /// A duration exceeds [`MAX_DELAY`]
    #[error("{0} must not exceed {MAX_DELAY:?}")]
    TooLong(&'static str),

    /// Backoff must not shrink between failures
    #[error("backoff multiplier must be >= 1.0, got {0}")]
    Multiplier(f64),

    /// Jitter must leave some of the delay in place
    #[error("jitter factor must be in [0, 1), got {0}")]
    JitterFactor(f64),

    /// Cap below the first delay
    #[error("max backoff delay {max:?} is below initial delay {initial:?}")]
    MaxBelowInitial {
        /// Configured initial delay
        initial: Duration,
        /// Configured cap
        max: Duration,
    },
}

/// Startup gate settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Number of signaling channels that must connect (1 or 2)
    pub channels: usize,
    /// How long a partially connected gate waits before opening anyway
    pub timeout: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self { channels: 2, timeout: Duration::from_secs(5) }
    }
}

/// Exponential backoff settings for transient failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Growth factor per consecutive failure
    pub multiplier: f64,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Fraction of each delay that may be shaved off at random
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            multiplier: 2.0,
            max_delay: Duration::from_secs(300),
            jitter_factor: 0.5,
        }
    }
}

/// What to do when the directory does not know the host id
///
/// Freshly registered hosts can race the directory's replication, so a few
/// spaced retries may be allowed before giving up for good.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnknownHostPolicy {
    /// Retries before the stop becomes permanent (0 = stop on first)
    pub max_retries: u32,
    /// Fixed delay between those retries
    pub retry_delay: Duration,
}

impl Default for UnknownHostPolicy {
    fn default() -> Self {
        Self { max_retries: 0, retry_delay: Duration::from_secs(10) }
    }
}

/// Heartbeat sender configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Delay between heartbeats after an accepted one, unless the directory
    /// asks for a different interval
    pub heartbeat_interval: Duration,
    /// Startup gate settings
    pub gate: GateConfig,
    /// Backoff for transient failures
    pub backoff: BackoffConfig,
    /// Authentication failures tolerated (with a credential refresh each
    /// time) before stopping permanently
    pub max_auth_retries: u32,
    /// Consecutive sequence corrections resent immediately before falling
    /// back to backoff
    pub max_sequence_corrections: u32,
    /// Unknown host id handling
    pub unknown_host: UnknownHostPolicy,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5 * 60),
            gate: GateConfig::default(),
            backoff: BackoffConfig::default(),
            max_auth_retries: 1,
            max_sequence_corrections: 1,
            unknown_host: UnknownHostPolicy::default(),
        }
    }
}

impl SenderConfig {
    /// Check invariants the engine relies on.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=2).contains(&self.gate.channels) {
            return Err(ConfigError::ChannelCount(self.gate.channels));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("heartbeat_interval"));
        }
        if self.gate.timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("gate.timeout"));
        }
        if self.backoff.initial_delay.is_zero() {
            return Err(ConfigError::ZeroDuration("backoff.initial_delay"));
        }
        if self.unknown_host.max_retries > 0 && self.unknown_host.retry_delay.is_zero() {
            return Err(ConfigError::ZeroDuration("unknown_host.retry_delay"));
        }
        let bounded = [
            ("heartbeat_interval", self.heartbeat_interval),
            ("gate.timeout", self.gate.timeout),
            ("backoff.max_delay", self.backoff.max_delay),
            ("unknown_host.retry_delay", self.unknown_host.retry_delay),
        ];
        if let Some((name, _)) = bounded.into_iter().find(|(_, value)| *value > MAX_DELAY) {
            return Err(ConfigError::TooLong(name));
        }
        if self.backoff.multiplier.is_nan() || self.backoff.multiplier < 1.0 {
            return Err(ConfigError::Multiplier(self.backoff.multiplier));
        }
        if !(0.0..1.0).contains(&self.backoff.jitter_factor) {
            return Err(ConfigError::JitterFactor(self.backoff.jitter_factor));
        }
        if self.backoff.max_delay < self.backoff.initial_delay {
            return Err(ConfigError::MaxBelowInitial {
                initial: self.backoff.initial_delay,
                max: self.backoff.max_delay,
            });
        }
        Ok(())
    }
}
