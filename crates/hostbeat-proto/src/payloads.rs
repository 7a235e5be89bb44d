//! CBOR-encoded heartbeat payloads.
//!
//! The payload type is determined by the `Opcode` in the frame header, so
//! only the inner struct is serialized (no variant tag in CBOR).

use bytes::BufMut;
use serde::{Deserialize, Serialize};

use crate::{
    Frame, FrameHeader, Opcode,
    errors::{ProtocolError, Result},
};

/// A single liveness proof sent by a host.
///
/// Constructed fresh for every attempt and never mutated afterwards. The
/// `signature` is the base64 signature over `"<signaling_full_id>
/// <sequence_id>"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    /// Directory-assigned host identifier
    pub host_id: String,
    /// Sequence id the directory expects next
    pub sequence_id: u64,
    /// Base64 signature over the signaling id and sequence id
    pub signature: String,
    /// Full signaling address the signature is bound to
    pub signaling_full_id: String,
    /// Why the host is about to go away, if it is
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub host_offline_reason: Option<String>,
}

/// Directory verdict on a heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    /// Heartbeat recorded
    Accepted,
    /// Sequence id was not the one the directory expected
    SequenceMismatch,
    /// Host id is not registered with the directory
    UnknownHostId,
    /// Request credentials were rejected
    Unauthenticated,
}

/// Response to a [`HeartbeatRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    /// Verdict
    pub status: ResponseStatus,
    /// Sequence id the directory expects (set on `SequenceMismatch`)
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub expected_sequence_id: Option<u64>,
    /// Directory-requested interval until the next heartbeat
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub interval_secs: Option<u64>,
}

impl HeartbeatResponse {
    /// Plain acceptance
    #[must_use]
    pub fn accepted() -> Self {
        Self { status: ResponseStatus::Accepted, expected_sequence_id: None, interval_secs: None }
    }

    /// Rejection carrying the sequence id the directory expects
    #[must_use]
    pub fn sequence_mismatch(expected_sequence_id: u64) -> Self {
        Self {
            status: ResponseStatus::SequenceMismatch,
            expected_sequence_id: Some(expected_sequence_id),
            interval_secs: None,
        }
    }

    /// Rejection for an unregistered host
    #[must_use]
    pub fn unknown_host_id() -> Self {
        Self {
            status: ResponseStatus::UnknownHostId,
            expected_sequence_id: None,
            interval_secs: None,
        }
    }

    /// Rejection for bad credentials
    #[must_use]
    pub fn unauthenticated() -> Self {
        Self {
            status: ResponseStatus::Unauthenticated,
            expected_sequence_id: None,
            interval_secs: None,
        }
    }

    /// Attach a directory-requested heartbeat interval
    #[must_use]
    pub fn with_interval_secs(mut self, interval_secs: u64) -> Self {
        self.interval_secs = Some(interval_secs);
        self
    }

    /// Whether the directory recorded the heartbeat
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        self.status == ResponseStatus::Accepted
    }
}

/// All possible frame payloads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Host heartbeat
    Heartbeat(HeartbeatRequest),
    /// Directory response
    HeartbeatResponse(HeartbeatResponse),
}

impl Payload {
    /// Get the opcode for this payload variant
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::Heartbeat(_) => Opcode::Heartbeat,
            Self::HeartbeatResponse(_) => Opcode::HeartbeatResponse,
        }
    }

    /// Encode payload to buffer
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::CborEncode`] if serialization fails.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        let mut writer = dst.writer();

        match self {
            Self::Heartbeat(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::HeartbeatResponse(inner) => ciborium::ser::into_writer(inner, &mut writer),
        }
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))
    }

    /// Decode payload from bytes based on opcode
    ///
    /// # Errors
    ///
    /// Returns error if the payload is oversized or CBOR decoding fails.
    pub fn decode(opcode: Opcode, bytes: &[u8]) -> Result<Self> {
        if bytes.len() > FrameHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: bytes.len(),
                max: FrameHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        let payload = match opcode {
            Opcode::Heartbeat => Self::Heartbeat(
                ciborium::de::from_reader(bytes)
                    .map_err(|e| ProtocolError::CborDecode(e.to_string()))?,
            ),
            Opcode::HeartbeatResponse => Self::HeartbeatResponse(
                ciborium::de::from_reader(bytes)
                    .map_err(|e| ProtocolError::CborDecode(e.to_string()))?,
            ),
        };

        Ok(payload)
    }

    /// Convert payload into a transport frame tagged with `request_id`
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::CborEncode` if serialization fails
    pub fn into_frame(self, request_id: u32) -> Result<Frame> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        Ok(Frame::new(FrameHeader::new(self.opcode(), request_id), buf))
    }

    /// Parse payload from a raw transport frame
    ///
    /// # Errors
    ///
    /// Returns error if the opcode is unknown or CBOR decoding fails
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let opcode = frame
            .header
            .opcode_enum()
            .ok_or_else(|| ProtocolError::InvalidOpcode(frame.header.opcode()))?;
        Self::decode(opcode, &frame.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> HeartbeatRequest {
        HeartbeatRequest {
            host_id: "host-1".to_string(),
            sequence_id: 42,
            signature: "c2lnbmF0dXJl".to_string(),
            signaling_full_id: "user@example.com/chromoting_ftl_abc".to_string(),
            host_offline_reason: Some("POLICY_READ_ERROR".to_string()),
        }
    }

    #[test]
    fn heartbeat_through_frame() {
        let payload = Payload::Heartbeat(sample_request());

        let frame = payload.clone().into_frame(9).expect("should create frame");
        assert_eq!(frame.header.opcode_enum(), Some(Opcode::Heartbeat));
        assert_eq!(frame.header.request_id(), 9);

        let decoded = Payload::from_frame(&frame).expect("should parse payload");
        assert_eq!(payload, decoded);
    }

    #[test]
    fn absent_offline_reason_is_omitted() {
        let mut request = sample_request();
        request.host_offline_reason = None;

        let mut with_reason = Vec::new();
        Payload::Heartbeat(sample_request()).encode(&mut with_reason).unwrap();
        let mut without_reason = Vec::new();
        Payload::Heartbeat(request.clone()).encode(&mut without_reason).unwrap();

        assert!(without_reason.len() < with_reason.len());
        assert_eq!(
            Payload::decode(Opcode::Heartbeat, &without_reason).unwrap(),
            Payload::Heartbeat(request)
        );
    }

    #[test]
    fn response_constructors() {
        assert!(HeartbeatResponse::accepted().is_accepted());
        assert!(!HeartbeatResponse::unauthenticated().is_accepted());

        let mismatch = HeartbeatResponse::sequence_mismatch(17);
        assert_eq!(mismatch.status, ResponseStatus::SequenceMismatch);
        assert_eq!(mismatch.expected_sequence_id, Some(17));

        let slow = HeartbeatResponse::accepted().with_interval_secs(600);
        assert_eq!(slow.interval_secs, Some(600));
    }

    #[test]
    fn unknown_status_fails_to_decode() {
        #[derive(Serialize)]
        struct Bogus {
            status: &'static str,
        }

        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&Bogus { status: "exploded" }, &mut bytes).unwrap();

        let result = Payload::decode(Opcode::HeartbeatResponse, &bytes);
        assert!(matches!(result, Err(ProtocolError::CborDecode(_))));
    }

    #[test]
    fn unknown_opcode_in_frame() {
        let mut frame = Payload::HeartbeatResponse(HeartbeatResponse::accepted())
            .into_frame(1)
            .unwrap();
        frame.header.opcode = 0x7777u16.to_be_bytes();

        assert_eq!(Payload::from_frame(&frame), Err(ProtocolError::InvalidOpcode(0x7777)));
    }
}
