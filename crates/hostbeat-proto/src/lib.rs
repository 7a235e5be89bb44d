//! # Hostbeat Protocol: Wire Format
//!
//! This crate implements the framing layer spoken between a host's heartbeat
//! sender and the directory service.
//!
//! ## Protocol Design
//!
//! - **FrameHeader**: 16 bytes of raw binary (Big Endian) carrying magic,
//!   version, opcode, a request id used to pair responses with requests, and
//!   the payload length.
//! - **Payload**: CBOR-encoded [`HeartbeatRequest`] or [`HeartbeatResponse`].
//!
//! The logical heartbeat fields (host id, sequence id, signature, signaling
//! id, optional offline reason) live entirely in the payload. The header is
//! only plumbing for the transport.
//!
//! ## Security Properties
//!
//! - **No Unsafe Deserialization**: Header parsing uses `zerocopy` with
//!   compile-time layout verification.
//! - **Size Limits**: Payloads are capped at 64 KiB. A heartbeat is a few
//!   hundred bytes; anything larger is garbage or abuse.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod errors;
pub mod frame;
pub mod header;
pub mod opcodes;
pub mod payloads;

pub use errors::{ProtocolError, Result};
pub use frame::Frame;
pub use header::FrameHeader;
pub use opcodes::Opcode;
pub use payloads::{HeartbeatRequest, HeartbeatResponse, Payload, ResponseStatus};
