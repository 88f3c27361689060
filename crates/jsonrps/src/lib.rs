//! Session protocol for newline-delimited JSON-RPC 2.0 over raw byte streams.
//!
//! A connection starts with a textual handshake: each peer sends a block of
//! `Name: Value` header lines terminated by an empty line. Once the block has
//! been exchanged the connection becomes a [`Session`] and carries one compact
//! JSON-RPC document per line in both directions.
//!
//! The crate is organised leaves first:
//!
//! - [`Headers`] and the header codec read and write the line-oriented header
//!   block shared by the handshake and status responses.
//! - [`Session`] owns one connection and provides request/response framing
//!   through a single persistent buffered reader.
//! - [`handshake`] builds sessions for the server ([`handshake::accept`]) and
//!   client ([`handshake::connect`]) roles.
//! - [`Router`] queries an ordered list of [`SessionHandler`]s and hands the
//!   session to the first one willing to own it.
//! - [`DefaultServer`] runs the concurrent dispatch pipeline: a reader, a
//!   method dispatcher, one invocation per request, and a writer, all torn
//!   down through one-shot [`Signal`]s.
//!
//! ```text
//! connection ──▶ handshake ──▶ Session ──▶ Router ──▶ DefaultServer pipeline
//! ```

mod codec;
mod connection;
mod error;
pub mod handshake;
mod headers;
mod protocol;
mod router;
mod server;
mod session;
mod signal;
mod status;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use connection::{Connection, ConnectionStream};
pub use error::{HandshakeError, MethodError, SessionError};
pub use handshake::{Handshake, default_client_headers};
pub use headers::Headers;
pub use protocol::{JSONRPC_VERSION, JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestId};
pub use router::{NotImplementedHandler, Router, SessionHandler};
pub use server::{
    DefaultServer, Method, MethodContext, MethodRegistry, PipelineConfig, PipelineState, Server,
};
pub use session::{DEFAULT_MAX_LINE_BYTES, Session};
pub use signal::Signal;
pub use status::Status;

/// Protocol signature written in status lines and expected from peers.
pub const DEFAULT_PROTOCOL_SIGNATURE: &str = "JSONRPS/1.0";

/// Content-type token advertised in `Accept` headers by JSONRPS clients.
pub const DEFAULT_MIME_TYPE: &str = "application/json+rps";
