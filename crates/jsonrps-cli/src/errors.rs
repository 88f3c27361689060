//! Error types for the client runtime.

use std::io;

use jsonrps::{HandshakeError, SessionError};
use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("params must be a JSON document: {0}")]
    InvalidParams(serde_json::Error),
    #[error("failed to resolve daemon address {endpoint}: {source}")]
    Resolve { endpoint: String, source: io::Error },
    #[error("failed to connect to daemon at {endpoint}: {source}")]
    Connect { endpoint: String, source: io::Error },
    #[cfg(not(unix))]
    #[error("platform does not support Unix sockets: {0}")]
    UnsupportedUnixTransport(String),
    #[error("failed to configure connection: {0}")]
    Configure(io::Error),
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("daemon closed the connection during the handshake: {0}")]
    IncompleteHandshake(SessionError),
    #[error("failed to send request: {0}")]
    Send(SessionError),
    #[error("no response from daemon: {0}")]
    Receive(SessionError),
    #[error("daemon answered with error {code}: {message}")]
    Remote { code: i64, message: String },
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

impl AppError {
    /// Exit status reported for this failure.
    pub(crate) const fn exit_code(&self) -> u8 {
        match self {
            Self::InvalidParams(_) => 2,
            Self::Remote { .. } => 3,
            _ => 1,
        }
    }
}
