//! Collaborator interfaces for the directory RPC and credentials.
//!
//! The engine never calls these itself. Drivers invoke them when executing
//! [`SenderAction::SendHeartbeat`](crate::SenderAction::SendHeartbeat) and
//! [`SenderAction::RefreshCredentials`](crate::SenderAction::RefreshCredentials),
//! then feed the outcome back through
//! [`HeartbeatEngine::on_rpc_result`](crate::HeartbeatEngine::on_rpc_result).
//!
//! # Implementations
//!
//! - `TcpRpc` (hostbeat-harness): framed CBOR over Turmoil TCP
//! - `ScriptedRpc` (hostbeat-harness): canned responses for driver tests

use std::{io, time::Duration};

use async_trait::async_trait;
use hostbeat_proto::{HeartbeatRequest, HeartbeatResponse, ProtocolError};
use thiserror::Error;

/// Failure to obtain any verdict from the directory.
///
/// Every variant is classified as a transient transport failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Channel down, connection refused, reset
    #[error("directory unavailable: {0}")]
    Unavailable(String),

    /// No response within the call deadline
    #[error("directory call timed out after {0:?}")]
    Timeout(Duration),

    /// Response arrived but made no sense
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Wire format violation
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Bearer token could not be obtained
    #[error("credentials unavailable: {0}")]
    Credentials(String),
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        TransportError::Unavailable(err.to_string())
    }
}

/// Unary heartbeat RPC to the directory service
///
/// Implementations must deliver exactly one response or one error per call.
/// The engine guarantees at most one outstanding call per sender.
#[async_trait]
pub trait HeartbeatRpc: Send + Sync + 'static {
    /// Send `request`, authorised by `access_token`
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when no well-formed response arrived.
    async fn send(
        &self,
        request: HeartbeatRequest,
        access_token: &str,
    ) -> Result<HeartbeatResponse, TransportError>;
}

/// Source of bearer tokens attached to each RPC out-of-band
#[async_trait]
pub trait AccessTokenSource: Send + Sync + 'static {
    /// Current token, fetching a fresh one if none is cached
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Credentials`] when no token can be obtained.
    async fn access_token(&self) -> Result<String, TransportError>;

    /// Drop any cached token so the next call fetches a fresh one
    fn invalidate(&self) {}
}

/// Fixed token, for tests and for directories that use mTLS instead
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

#[async_trait]
impl AccessTokenSource for StaticToken {
    async fn access_token(&self) -> Result<String, TransportError> {
        Ok(self.0.clone())
    }
}
