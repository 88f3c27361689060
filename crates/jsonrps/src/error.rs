//! Error types for session framing, handshakes, and method invocation.

use std::io;

use thiserror::Error;

use crate::Status;

/// Failures surfaced while framing messages on a session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The peer closed the stream before a complete line arrived.
    #[error("connection closed by peer")]
    EndOfStream,

    /// A line exceeded the configured size limit.
    #[error("line exceeds {limit} byte limit")]
    LineTooLong {
        /// Maximum accepted line length in bytes.
        limit: usize,
    },

    /// A line could not be decoded as the expected JSON-RPC message.
    #[error("malformed JSON-RPC line: {source}")]
    Decode {
        /// Underlying decoder error.
        #[source]
        source: serde_json::Error,
    },

    /// A message could not be serialised.
    #[error("failed to encode JSON-RPC message: {source}")]
    Encode {
        /// Underlying encoder error.
        #[source]
        source: serde_json::Error,
    },

    /// The transport failed while reading or writing.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

impl SessionError {
    /// Returns true when the peer simply went away.
    #[must_use]
    pub const fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::EndOfStream)
    }

    pub(crate) const fn decode(source: serde_json::Error) -> Self {
        Self::Decode { source }
    }

    pub(crate) const fn encode(source: serde_json::Error) -> Self {
        Self::Encode { source }
    }
}

/// Failures that prevent a handshake from producing a session.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// A header line lacked the `": "` separator.
    #[error("malformed header line: {line:?}")]
    MalformedHeader {
        /// The offending line without its line ending.
        line: String,
    },

    /// The peer answered with an unexpected protocol signature.
    #[error("invalid protocol signature: {signature}")]
    InvalidSignature {
        /// Signature read from the peer.
        signature: String,
    },

    /// The peer answered the handshake with a non-success status.
    #[error("session rejected with status {status}")]
    Rejected {
        /// Status sent by the peer.
        status: Status,
        /// Reason phrase as received.
        reason: String,
    },

    /// The connection could not be prepared for a session.
    #[error("transport error during handshake: {0}")]
    Io(#[from] io::Error),
}

impl HandshakeError {
    pub(crate) fn malformed_header(line: impl Into<String>) -> Self {
        Self::MalformedHeader { line: line.into() }
    }

    pub(crate) fn invalid_signature(signature: impl Into<String>) -> Self {
        Self::InvalidSignature {
            signature: signature.into(),
        }
    }

    pub(crate) fn rejected(status: Status, reason: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            reason: reason.into(),
        }
    }
}

/// Failure returned by a registered method.
///
/// The dispatch pipeline logs and drops these; methods that want the peer to
/// see an error return a [`JsonRpcResponse`](crate::JsonRpcResponse) carrying
/// a [`JsonRpcError`](crate::JsonRpcError) instead.
#[derive(Debug, Error)]
pub enum MethodError {
    /// The method failed while producing a result.
    #[error("method failed: {message}")]
    Failed {
        /// Description of the failure.
        message: String,
    },

    /// A result value could not be serialised.
    #[error("failed to serialise result: {0}")]
    Serialise(#[from] serde_json::Error),
}

impl MethodError {
    /// Creates a generic failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}
