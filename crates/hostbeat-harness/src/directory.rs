//! Simulated directory service.
//!
//! [`DirectoryModel`] is the verdict logic: registered hosts, signature
//! checks, and the expected sequence id per host. Scenarios call it directly;
//! [`SimDirectory`] serves it over Turmoil TCP for end-to-end tests.

use std::{
    collections::HashMap,
    io,
    sync::{Arc, Mutex, PoisonError},
};

use ed25519_dalek::VerifyingKey;
use hostbeat_core::signer::verify_signature;
use hostbeat_proto::{HeartbeatRequest, HeartbeatResponse, Payload};
use turmoil::net::{TcpListener, TcpStream};

use crate::tcp_rpc::{read_frame, write_frame};

#[derive(Debug, Clone)]
struct HostRecord {
    key: VerifyingKey,
    /// `None` until the first accepted heartbeat, then any sequence id is
    /// accepted once
    expected_sequence_id: Option<u64>,
    offline_reason: Option<String>,
    accepted: u64,
}

/// Directory verdict logic
#[derive(Debug, Clone, Default)]
pub struct DirectoryModel {
    hosts: HashMap<String, HostRecord>,
    interval_secs: Option<u64>,
    requests: u64,
}

impl DirectoryModel {
    /// Directory that knows no hosts
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `host_id` with the key its heartbeats must verify against
    pub fn register(&mut self, host_id: impl Into<String>, key: VerifyingKey) {
        self.hosts.insert(
            host_id.into(),
            HostRecord { key, expected_sequence_id: None, offline_reason: None, accepted: 0 },
        );
    }

    /// Ask hosts for a different heartbeat interval on every accept
    pub fn set_interval_secs(&mut self, interval_secs: Option<u64>) {
        self.interval_secs = interval_secs;
    }

    /// Force the next expected sequence id, as after a directory restore
    pub fn expect_sequence(&mut self, host_id: &str, sequence_id: u64) {
        if let Some(host) = self.hosts.get_mut(host_id) {
            host.expected_sequence_id = Some(sequence_id);
        }
    }

    /// Judge one heartbeat
    pub fn handle(&mut self, request: &HeartbeatRequest) -> HeartbeatResponse {
        self.requests += 1;

        let Some(host) = self.hosts.get_mut(&request.host_id) else {
            tracing::debug!(host_id = %request.host_id, "directory: unknown host");
            return HeartbeatResponse::unknown_host_id();
        };

        if !verify_signature(
            &host.key,
            &request.signaling_full_id,
            request.sequence_id,
            &request.signature,
        ) {
            tracing::debug!(host_id = %request.host_id, "directory: bad signature");
            return HeartbeatResponse::unauthenticated();
        }

        if let Some(expected) = host.expected_sequence_id {
            if request.sequence_id != expected {
                tracing::debug!(
                    host_id = %request.host_id,
                    sent = request.sequence_id,
                    expected,
                    "directory: sequence mismatch"
                );
                return HeartbeatResponse::sequence_mismatch(expected);
            }
        }

        host.expected_sequence_id = Some(request.sequence_id.saturating_add(1));
        host.accepted += 1;
        if request.host_offline_reason.is_some() {
            host.offline_reason.clone_from(&request.host_offline_reason);
        }

        match self.interval_secs {
            Some(secs) => HeartbeatResponse::accepted().with_interval_secs(secs),
            None => HeartbeatResponse::accepted(),
        }
    }

    /// Heartbeats received, whatever their verdict
    pub fn request_count(&self) -> u64 {
        self.requests
    }

    /// Heartbeats accepted for `host_id`
    pub fn accepted_count(&self, host_id: &str) -> u64 {
        self.hosts.get(host_id).map_or(0, |host| host.accepted)
    }

    /// Sequence id `host_id` must send next, once established
    pub fn expected_sequence(&self, host_id: &str) -> Option<u64> {
        self.hosts.get(host_id).and_then(|host| host.expected_sequence_id)
    }

    /// Last offline reason accepted from `host_id`
    pub fn offline_reason(&self, host_id: &str) -> Option<&str> {
        self.hosts.get(host_id).and_then(|host| host.offline_reason.as_deref())
    }
}

/// [`DirectoryModel`] served over Turmoil TCP
///
/// One request frame, one response frame with the same request id, repeated
/// until the peer closes.
#[derive(Debug, Clone)]
pub struct SimDirectory {
    model: Arc<Mutex<DirectoryModel>>,
}

impl SimDirectory {
    /// Serve `model`; keep a clone of the `Arc` to inspect it afterwards
    pub fn new(model: Arc<Mutex<DirectoryModel>>) -> Self {
        Self { model }
    }

    /// Accept connections on `address` forever
    ///
    /// # Errors
    ///
    /// Returns error if the address cannot be bound or accepting fails.
    pub async fn serve(self, address: &str) -> io::Result<()> {
        let listener = TcpListener::bind(address).await?;

        loop {
            let (stream, peer) = listener.accept().await?;
            tracing::trace!(%peer, "directory: connection accepted");
            tokio::spawn(serve_connection(stream, Arc::clone(&self.model)));
        }
    }
}

async fn serve_connection(mut stream: TcpStream, model: Arc<Mutex<DirectoryModel>>) {
    while let Ok(frame) = read_frame(&mut stream).await {
        let request_id = frame.header.request_id();

        let request = match Payload::from_frame(&frame) {
            Ok(Payload::Heartbeat(request)) => request,
            Ok(other) => {
                tracing::warn!(opcode = ?other.opcode(), "directory: unexpected payload");
                return;
            },
            Err(err) => {
                tracing::warn!(error = %err, "directory: undecodable frame");
                return;
            },
        };

        let response =
            model.lock().unwrap_or_else(PoisonError::into_inner).handle(&request);

        let reply = match Payload::HeartbeatResponse(response).into_frame(request_id) {
            Ok(reply) => reply,
            Err(err) => {
                tracing::warn!(error = %err, "directory: cannot encode response");
                return;
            },
        };
        if write_frame(&mut stream, &reply).await.is_err() {
            return;
        }
    }
}
