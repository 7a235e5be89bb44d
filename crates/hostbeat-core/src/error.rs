//! Error types for the heartbeat sender core.
//!
//! Two families live here:
//! - [`SenderError`]: misuse of the engine API (wrong state, bad channel
//!   index, bad config). These are returned to the caller.
//! - [`FailureKind`]: the classification of a failed heartbeat attempt.
//!   These are never returned; each drives an explicit engine transition and
//!   shows up in logs.

use std::fmt;

use thiserror::Error;

use crate::{config::ConfigError, sender::SenderState};

/// Errors returned by [`HeartbeatEngine`](crate::HeartbeatEngine) operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SenderError {
    /// Operation not allowed in the current state
    #[error("invalid state transition: cannot {operation} from {state:?}")]
    InvalidState {
        /// Current state when error occurred
        state: SenderState,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Channel index outside the gate's monitored channels
    #[error("channel {channel} out of range: gate monitors {channels} channel(s)")]
    InvalidChannel {
        /// Index that was passed
        channel: usize,
        /// Number of monitored channels
        channels: usize,
    },

    /// Rejected configuration
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl SenderError {
    /// Returns true if retrying the same call later may succeed.
    ///
    /// All current variants are caller bugs, so this is always false.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        false
    }
}

/// Why a heartbeat attempt did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Network/channel error, timeout, malformed response. Retried with
    /// backoff, never surfaced to the owner.
    TransientTransport,
    /// Directory corrected the sequence id. Retried immediately, escalated to
    /// `TransientTransport` on repeat.
    SequenceMismatch,
    /// Directory does not know the host. Permanent.
    UnknownHost,
    /// Credentials rejected. Permanent once retries are exhausted.
    AuthFailure,
    /// An offline reason was not acknowledged in time. Surfaced only to the
    /// announcer.
    OfflineAckTimeout,
}

impl FailureKind {
    /// Whether this failure can end the sender
    #[must_use]
    pub fn can_be_permanent(self) -> bool {
        matches!(self, Self::UnknownHost | Self::AuthFailure)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TransientTransport => "transient transport failure",
            Self::SequenceMismatch => "sequence mismatch",
            Self::UnknownHost => "unknown host id",
            Self::AuthFailure => "authentication failure",
            Self::OfflineAckTimeout => "offline reason acknowledgement timeout",
        };
        f.write_str(name)
    }
}
