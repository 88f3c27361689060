//! Header exchange that turns a raw connection into a [`Session`].
//!
//! [`accept`] runs the server side: it reads the client's header block and
//! answers a malformed line with `400 Bad Request`. It never writes a success
//! status; the handler that takes the session decides what to announce.
//!
//! [`connect`] runs the client side: it sends the local header block from a
//! background thread, reads the server's answer, and validates the protocol
//! signature once the block is complete.

use std::mem;

use tracing::{debug, warn};

use crate::codec::{HeaderLine, parse_header_line, parse_status_line, strip_line_ending};
use crate::{
    Connection, DEFAULT_MIME_TYPE, HandshakeError, Headers, Session, SessionError, Status,
};

const HANDSHAKE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::handshake");

/// Session produced by a handshake.
///
/// A transport failure before the block terminator still yields the
/// partially populated session; the failure is reported alongside it.
#[derive(Debug)]
pub struct Handshake {
    /// The new session.
    pub session: Session,
    /// Read failure that cut the header block short, if any.
    pub read_error: Option<SessionError>,
}

impl Handshake {
    /// Returns true when the header block arrived intact.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.read_error.is_none()
    }

    /// Discards any read failure and returns the session.
    #[must_use]
    pub fn into_session(self) -> Session {
        self.session
    }
}

/// Headers a client sends when the caller supplies none.
#[must_use]
pub fn default_client_headers() -> Headers {
    [("Accept", DEFAULT_MIME_TYPE)].into_iter().collect()
}

/// Runs the server side of the handshake on `conn`.
///
/// # Errors
///
/// Returns [`HandshakeError::MalformedHeader`] after answering `400 Bad
/// Request` and closing the connection when a header line lacks its
/// separator or exceeds the session's line limit, or [`HandshakeError::Io`]
/// when the connection cannot be split.
pub fn accept(conn: impl Connection) -> Result<Handshake, HandshakeError> {
    accept_session(Session::new(conn)?)
}

/// Runs the server side of the handshake on a preconfigured session.
///
/// # Errors
///
/// Returns [`HandshakeError::MalformedHeader`] as [`accept`] does.
pub fn accept_session(mut session: Session) -> Result<Handshake, HandshakeError> {
    loop {
        let bytes = match session.read_line() {
            Ok(bytes) => bytes,
            Err(SessionError::LineTooLong { limit }) => {
                warn!(
                    target: HANDSHAKE_TARGET,
                    session_id = session.id(),
                    limit,
                    "rejecting oversized header line"
                );
                return Err(reject_header(
                    &session,
                    format!("header line exceeds {limit} bytes"),
                ));
            }
            Err(error) => {
                debug!(
                    target: HANDSHAKE_TARGET,
                    session_id = session.id(),
                    %error,
                    "header block ended early"
                );
                return Ok(Handshake {
                    session,
                    read_error: Some(error),
                });
            }
        };
        let line = String::from_utf8_lossy(&bytes);
        match parse_header_line(&line) {
            HeaderLine::Terminator => {
                return Ok(Handshake {
                    session,
                    read_error: None,
                });
            }
            HeaderLine::Field { name, value } => session.remote_headers_mut().add(name, value),
            HeaderLine::Malformed => {
                let line = strip_line_ending(&line);
                warn!(
                    target: HANDSHAKE_TARGET,
                    session_id = session.id(),
                    line,
                    "rejecting malformed header line"
                );
                return Err(reject_header(&session, line));
            }
        }
    }
}

/// Answers `400 Bad Request` and closes the session.
fn reject_header(session: &Session, line: impl Into<String>) -> HandshakeError {
    if let Err(error) = session.write_status(Status::BAD_REQUEST) {
        debug!(target: HANDSHAKE_TARGET, %error, "failed to write 400 status");
    }
    session.close();
    HandshakeError::malformed_header(line)
}

/// Runs the client side of the handshake on `conn`, sending `headers`.
///
/// # Errors
///
/// Returns [`HandshakeError::InvalidSignature`] when the peer answers with a
/// different protocol signature, [`HandshakeError::Rejected`] when it answers
/// with a non-success status, or [`HandshakeError::Io`] when the connection
/// cannot be split. The connection is closed in the first two cases.
pub fn connect(conn: impl Connection, headers: Headers) -> Result<Handshake, HandshakeError> {
    connect_session(Session::new(conn)?.with_local_headers(headers))
}

/// Runs the client side of the handshake on a preconfigured session.
///
/// The session's local headers are sent and its current protocol signature
/// is the one expected from the peer.
///
/// # Errors
///
/// Returns the same failures as [`connect`].
pub fn connect_session(mut session: Session) -> Result<Handshake, HandshakeError> {
    let expected = session.protocol_signature().to_owned();
    session.spawn_header_flush();

    let mut status = None;
    let mut first_line = true;
    let mut read_error = None;
    loop {
        let bytes = match session.read_line() {
            Ok(bytes) => bytes,
            Err(error) => {
                debug!(
                    target: HANDSHAKE_TARGET,
                    session_id = session.id(),
                    %error,
                    "server header block ended early"
                );
                read_error = Some(error);
                break;
            }
        };
        let line = String::from_utf8_lossy(&bytes);
        if mem::take(&mut first_line)
            && let Some(parsed) = parse_status_line(&line)
        {
            session.set_protocol_signature(parsed.signature);
            status = Some((parsed.status, parsed.reason.to_owned()));
            continue;
        }
        match parse_header_line(&line) {
            HeaderLine::Terminator => break,
            HeaderLine::Field { name, value } => session.remote_headers_mut().add(name, value),
            HeaderLine::Malformed => debug!(
                target: HANDSHAKE_TARGET,
                line = strip_line_ending(&line),
                "ignoring malformed server header line"
            ),
        }
    }

    if session.protocol_signature() != expected {
        let signature = session.protocol_signature().to_owned();
        warn!(target: HANDSHAKE_TARGET, %signature, "unexpected protocol signature");
        session.close();
        return Err(HandshakeError::invalid_signature(signature));
    }
    if let Some((code, reason)) = status
        && !code.is_success()
    {
        session.close();
        return Err(HandshakeError::rejected(code, reason));
    }
    Ok(Handshake {
        session,
        read_error,
    })
}
