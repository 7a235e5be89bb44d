//! Scenario testing framework for deterministic heartbeat tests.
//!
//! This module provides a declarative API for writing timed scenarios that
//! follow the Oracle Pattern. Scenarios drive a real `HeartbeatEngine`
//! against a [`DirectoryModel`](crate::DirectoryModel) in virtual time and
//! hand the resulting [`World`] to a mandatory oracle.

mod builder;
pub mod oracle;
mod world;

pub use builder::{HOST_ID, RunnableScenario, Scenario};
pub use oracle::OracleFn;
pub use world::{Event, Observation, World};
