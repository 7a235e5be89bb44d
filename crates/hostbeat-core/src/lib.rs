//! Hostbeat protocol core logic
//!
//! This crate contains the pure state machine logic for a host's heartbeat
//! sender: the component that proves to a directory service, over and over,
//! that the host is alive and reachable.
//!
//! # Architecture: "The Hollow Shell"
//!
//! ```text
//!      ┌──────────────────────────────┐
//!      │ hostbeat-core                │
//!      │ - HeartbeatEngine            │
//!      │ - StartupGate, Backoff       │
//!      │ - Offline-reason acks        │
//!      │ - Signing                    │
//!      └──────────────────────────────┘
//!         ↓                        ↓
//! ┌──────────────────┐  ┌──────────────────┐
//! │ hostbeat-harness │  │ hostbeat-client  │
//! │ - Virtual time   │  │ - Tokio task     │
//! │ - Seeded RNG     │  │ - System clock   │
//! │ - Scenarios      │  │ - Real RPC       │
//! └──────────────────┘  └──────────────────┘
//! ```
//!
//! # Key Principles
//!
//! - No I/O in Core: Never call `tokio::spawn`, `std::time::Instant::now()`, or
//!   `rand::thread_rng()` directly
//! - Environment Trait: All randomness goes through the `Environment` trait
//! - Actions, not effects: every operation returns a list of
//!   [`sender::SenderAction`] for the driver to execute, in order
//!
//! # Modules
//!
//! - [`sender`]: The heartbeat engine (sequence tracking, classification)
//! - [`gate`]: Decides when heartbeating may begin
//! - [`backoff`]: Retry delay policy
//! - [`offline`]: Offline-reason announcements and their acknowledgement
//! - [`signer`]: Heartbeat signatures
//! - [`timer`]: One-shot timer identities with race-free cancellation
//! - [`rpc`]: Collaborator traits for the directory RPC and credentials
//! - [`config`]: Tunables
//! - [`env`]: Environment abstraction (time, RNG)
//! - [`error`]: Error types

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod backoff;
pub mod config;
pub mod env;
pub mod error;
pub mod gate;
pub mod offline;
pub mod rpc;
pub mod sender;
pub mod signer;
pub mod timer;

pub use config::SenderConfig;
pub use error::{FailureKind, SenderError};
pub use sender::{ChannelEvent, HeartbeatEngine, SenderAction, SenderState};
pub use signer::{HeartbeatIdentity, SignatureSigner};
