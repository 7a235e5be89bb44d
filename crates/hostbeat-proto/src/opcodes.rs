//! Operation codes for hostbeat frames.
//!
//! The directory protocol is unary: a host sends one request, the directory
//! answers with exactly one response carrying the same request id.

/// Frame operation codes
///
/// Opcodes are serialized as Big Endian `u16` values in the frame header.
/// Unknown values are rejected with
/// [`ProtocolError::InvalidOpcode`](crate::ProtocolError::InvalidOpcode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    /// Host heartbeat (host -> directory)
    Heartbeat = 0x0001,
    /// Directory verdict on a heartbeat (directory -> host)
    HeartbeatResponse = 0x0002,
}

impl Opcode {
    /// Convert to raw u16 value
    #[must_use]
    pub const fn to_u16(self) -> u16 {
        self as u16
    }

    /// Convert from raw u16 value
    ///
    /// Returns `None` if the value doesn't correspond to a known opcode.
    #[must_use]
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0001 => Some(Self::Heartbeat),
            0x0002 => Some(Self::HeartbeatResponse),
            _ => None,
        }
    }
}
