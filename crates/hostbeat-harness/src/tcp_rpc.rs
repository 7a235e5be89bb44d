//! Heartbeat RPC over Turmoil TCP using hostbeat frames.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use hostbeat_core::rpc::{HeartbeatRpc, TransportError};
use hostbeat_proto::{Frame, FrameHeader, HeartbeatRequest, HeartbeatResponse, Payload};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use turmoil::net::TcpStream;

/// Read one frame: fixed header, then exactly `payload_size` bytes
///
/// # Errors
///
/// Returns [`TransportError::Unavailable`] on I/O failure or EOF and
/// [`TransportError::Protocol`] on an invalid header.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame, TransportError> {
    let mut header_buf = [0u8; FrameHeader::SIZE];
    reader.read_exact(&mut header_buf).await?;
    let header = *FrameHeader::from_bytes(&header_buf)?;

    let mut payload = vec![0u8; header.payload_size() as usize];
    reader.read_exact(&mut payload).await?;

    Ok(Frame::new(header, payload))
}

/// Write one frame
///
/// # Errors
///
/// Returns error if the frame is oversized or the write fails.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Frame,
) -> Result<(), TransportError> {
    let mut buf = Vec::with_capacity(frame.encoded_len());
    frame.encode(&mut buf)?;
    writer.write_all(&buf).await?;
    Ok(())
}

/// [`HeartbeatRpc`] client for [`SimDirectory`](crate::SimDirectory)
///
/// Opens one connection per call. The access token is not sent: the
/// simulated directory authenticates by signature alone.
#[derive(Debug)]
pub struct TcpRpc {
    address: String,
    next_request_id: AtomicU32,
}

impl TcpRpc {
    /// Client for the directory at `address` (e.g. `"directory:443"`)
    pub fn new(address: impl Into<String>) -> Self {
        Self { address: address.into(), next_request_id: AtomicU32::new(1) }
    }
}

#[async_trait]
impl HeartbeatRpc for TcpRpc {
    async fn send(
        &self,
        request: HeartbeatRequest,
        _access_token: &str,
    ) -> Result<HeartbeatResponse, TransportError> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let frame = Payload::Heartbeat(request).into_frame(request_id)?;

        let mut stream = TcpStream::connect(self.address.as_str()).await?;
        write_frame(&mut stream, &frame).await?;
        let reply = read_frame(&mut stream).await?;

        if reply.header.request_id() != request_id {
            return Err(TransportError::Malformed(format!(
                "response for request {} while waiting for {}",
                reply.header.request_id(),
                request_id
            )));
        }

        match Payload::from_frame(&reply)? {
            Payload::HeartbeatResponse(response) => Ok(response),
            other => Err(TransportError::Malformed(format!(
                "expected heartbeat response, got {:?}",
                other.opcode()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frame_survives_a_stream() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let frame =
            Payload::HeartbeatResponse(HeartbeatResponse::accepted()).into_frame(77).unwrap();

        write_frame(&mut client, &frame).await.unwrap();
        let read = read_frame(&mut server).await.unwrap();

        assert_eq!(read, frame);
    }

    #[tokio::test]
    async fn truncated_stream_is_unavailable() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let frame =
            Payload::HeartbeatResponse(HeartbeatResponse::accepted()).into_frame(1).unwrap();
        let mut bytes = Vec::new();
        frame.encode(&mut bytes).unwrap();

        client.write_all(&bytes[..bytes.len() - 1]).await.unwrap();
        drop(client);

        assert!(matches!(read_frame(&mut server).await, Err(TransportError::Unavailable(_))));
    }

    #[tokio::test]
    async fn garbage_header_is_protocol_error() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_all(&[0xAB; FrameHeader::SIZE]).await.unwrap();

        assert!(matches!(read_frame(&mut server).await, Err(TransportError::Protocol(_))));
    }
}
