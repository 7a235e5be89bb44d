//! Deterministic simulation harness for hostbeat testing.
//!
//! This crate provides:
//!
//! - [`SimEnv`]: seeded `Environment` for reproducible jitter
//! - [`scenario`]: discrete-event scenarios over virtual time, verified by
//!   oracles
//! - [`ScriptedRpc`]: canned directory responses for driver tests
//! - [`SimDirectory`] and [`TcpRpc`]: a directory server and client speaking
//!   framed CBOR over Turmoil's simulated TCP

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod directory;
pub mod scenario;
pub mod scripted_rpc;
pub mod sim_env;
pub mod tcp_rpc;

pub use directory::{DirectoryModel, SimDirectory};
pub use scripted_rpc::{CountingTokens, ScriptedRpc};
pub use sim_env::SimEnv;
pub use tcp_rpc::TcpRpc;
