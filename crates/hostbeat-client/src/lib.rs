//! Tokio driver for the hostbeat heartbeat sender.
//!
//! `hostbeat-core` decides; this crate acts. [`HeartbeatSender`] owns one
//! [`HeartbeatEngine`](hostbeat_core::HeartbeatEngine) inside a single Tokio
//! task and executes its actions: timers, RPC dispatch, credential refresh,
//! and owner callbacks.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod driver;
pub mod system_env;

pub use driver::{HeartbeatSender, SenderCallbacks};
pub use system_env::SystemEnv;
