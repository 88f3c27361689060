//! A framed JSON-RPC session bound to one connection.
//!
//! The connection is split into three handles at construction: a buffered
//! reader that serves every line read for the lifetime of the session, a
//! writer guarded by a mutex so the header block and body frames never
//! interleave, and a control handle used to close the stream from any thread.

use std::fmt;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use serde::Serialize;
use tracing::{Span, debug, warn};
use uuid::Uuid;

use crate::codec::{BLOCK_TERMINATOR, render_header_block, render_status_block};
use crate::{
    Connection, DEFAULT_PROTOCOL_SIGNATURE, Headers, JsonRpcRequest, JsonRpcResponse,
    SessionError, Status,
};

/// Largest line, including its newline, accepted by a session reader.
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

const SESSION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::session");

/// Progress of the local header block on the wire.
#[derive(Debug)]
enum HeaderLatch {
    /// Nothing sent; the first body write emits a bare terminator.
    Unsent,
    /// A rendered block waits to be written before any body bytes.
    Scheduled(Vec<u8>),
    /// The block has been written.
    Sent,
}

struct SessionWriter {
    conn: Box<dyn Connection>,
    latch: HeaderLatch,
}

impl SessionWriter {
    fn flush_pending_header(&mut self) -> Result<(), SessionError> {
        match mem::replace(&mut self.latch, HeaderLatch::Sent) {
            HeaderLatch::Unsent => self.conn.write_all(BLOCK_TERMINATOR)?,
            HeaderLatch::Scheduled(block) => self.conn.write_all(&block)?,
            HeaderLatch::Sent => return Ok(()),
        }
        self.conn.flush()?;
        Ok(())
    }

    fn write_frame(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        self.flush_pending_header()?;
        self.conn.write_all(bytes)?;
        self.conn.flush()?;
        Ok(())
    }
}

/// One logical JSONRPS session.
///
/// Sessions are produced by [`handshake::accept`](crate::handshake::accept)
/// and [`handshake::connect`](crate::handshake::connect). All I/O methods
/// take `&self`, so a session can be shared between a reader thread and a
/// writer thread through an [`Arc`].
pub struct Session {
    id: String,
    protocol_signature: String,
    local_headers: Mutex<Headers>,
    remote_headers: Headers,
    reader: Mutex<BufReader<Box<dyn Connection>>>,
    writer: Arc<Mutex<SessionWriter>>,
    control: Mutex<Box<dyn Connection>>,
    max_line_bytes: usize,
    span: Span,
}

impl Session {
    /// Wraps `conn` in a new session with a fresh identifier.
    ///
    /// # Errors
    ///
    /// Returns the transport error when the connection cannot be split into
    /// independent read, write, and control handles.
    pub fn new(conn: impl Connection) -> io::Result<Self> {
        let writer = conn.try_clone_connection()?;
        let control = conn.try_clone_connection()?;
        let reader: Box<dyn Connection> = Box::new(conn);
        let id = Uuid::new_v4().to_string();
        let span = tracing::info_span!(target: SESSION_TARGET, "session", session_id = %id);
        Ok(Self {
            id,
            protocol_signature: DEFAULT_PROTOCOL_SIGNATURE.to_owned(),
            local_headers: Mutex::new(Headers::new()),
            remote_headers: Headers::new(),
            reader: Mutex::new(BufReader::new(reader)),
            writer: Arc::new(Mutex::new(SessionWriter {
                conn: writer,
                latch: HeaderLatch::Unsent,
            })),
            control: Mutex::new(control),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            span,
        })
    }

    /// Replaces the headers this side will send.
    #[must_use]
    pub fn with_local_headers(mut self, headers: Headers) -> Self {
        *self
            .local_headers
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner) = headers;
        self
    }

    /// Replaces the headers recorded as received from the peer.
    #[must_use]
    pub fn with_remote_headers(mut self, headers: Headers) -> Self {
        self.remote_headers = headers;
        self
    }

    /// Overrides the protocol signature used on status lines.
    #[must_use]
    pub fn with_protocol_signature(mut self, signature: impl Into<String>) -> Self {
        self.protocol_signature = signature.into();
        self
    }

    /// Overrides the maximum accepted line length.
    #[must_use]
    pub const fn with_max_line_bytes(mut self, limit: usize) -> Self {
        self.max_line_bytes = limit;
        self
    }

    /// Opaque identifier assigned at creation.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Protocol signature written on status lines.
    #[must_use]
    pub fn protocol_signature(&self) -> &str {
        &self.protocol_signature
    }

    /// Headers received from the peer during the handshake.
    #[must_use]
    pub const fn remote_headers(&self) -> &Headers {
        &self.remote_headers
    }

    /// Snapshot of the headers this side sends.
    #[must_use]
    pub fn local_headers(&self) -> Headers {
        self.lock_local_headers().clone()
    }

    /// Adds a local header. Has no wire effect once the block was flushed.
    pub fn add_local_header(&self, name: impl Into<String>, value: impl AsRef<str>) {
        self.lock_local_headers().add(name, value);
    }

    /// Adds a local header unless one with the same name exists.
    pub fn add_local_header_if_absent(&self, name: &str, value: impl AsRef<str>) {
        let mut headers = self.lock_local_headers();
        if !headers.contains(name) {
            headers.add(name, value);
        }
    }

    /// Returns true once the local header block has been written.
    #[must_use]
    pub fn header_sent(&self) -> bool {
        matches!(self.lock_writer().latch, HeaderLatch::Sent)
    }

    /// Logging span carrying the session identifier.
    #[must_use]
    pub const fn span(&self) -> &Span {
        &self.span
    }

    /// Writes a status line, every local header, and the terminator.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Io`] when the transport rejects the write.
    pub fn write_header(&self, status: Status) -> Result<(), SessionError> {
        let block = render_status_block(&self.protocol_signature, status, &self.local_headers());
        self.write_block(&block)
    }

    /// Writes a bare status line with an empty header block.
    pub(crate) fn write_status(&self, status: Status) -> Result<(), SessionError> {
        let block = render_status_block(&self.protocol_signature, status, &Headers::new());
        self.write_block(&block)
    }

    fn write_block(&self, block: &[u8]) -> Result<(), SessionError> {
        let mut writer = self.lock_writer();
        writer.latch = HeaderLatch::Sent;
        writer.conn.write_all(block)?;
        writer.conn.flush()?;
        Ok(())
    }

    /// Writes raw body bytes, emitting any pending header block first.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Io`] when the transport rejects the write.
    pub fn write(&self, bytes: &[u8]) -> Result<(), SessionError> {
        self.lock_writer().write_frame(bytes)
    }

    /// Writes `request` as one compact JSON line.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Encode`] when serialisation fails, or
    /// [`SessionError::Io`] when the transport rejects the write.
    pub fn write_request(&self, request: &JsonRpcRequest) -> Result<(), SessionError> {
        self.write_json_line(request)
    }

    /// Writes `response` as one compact JSON line.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Encode`] when serialisation fails, or
    /// [`SessionError::Io`] when the transport rejects the write.
    pub fn write_response(&self, response: &JsonRpcResponse) -> Result<(), SessionError> {
        self.write_json_line(response)
    }

    fn write_json_line<T: Serialize>(&self, message: &T) -> Result<(), SessionError> {
        let mut line = serde_json::to_vec(message).map_err(SessionError::encode)?;
        line.push(b'\n');
        self.write(&line)
    }

    /// Reads one line and decodes it as a request.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::EndOfStream`] when the peer has gone,
    /// [`SessionError::Decode`] for malformed lines, and
    /// [`SessionError::LineTooLong`] when the size limit is exceeded.
    pub fn read_request(&self) -> Result<JsonRpcRequest, SessionError> {
        let line = self.read_line()?;
        serde_json::from_slice(&line).map_err(SessionError::decode)
    }

    /// Reads one line and decodes it as a response.
    ///
    /// # Errors
    ///
    /// Returns the same failures as [`read_request`](Self::read_request).
    pub fn read_response(&self) -> Result<JsonRpcResponse, SessionError> {
        let line = self.read_line()?;
        serde_json::from_slice(&line).map_err(SessionError::decode)
    }

    /// Reads one newline-terminated line through the persistent reader.
    ///
    /// The returned bytes include the newline.
    pub(crate) fn read_line(&self) -> Result<Vec<u8>, SessionError> {
        let mut reader = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let limit = self.max_line_bytes;
        let mut line = Vec::new();
        let read = (&mut *reader)
            .take(u64::try_from(limit).unwrap_or(u64::MAX))
            .read_until(b'\n', &mut line)?;
        if read == 0 {
            return Err(SessionError::EndOfStream);
        }
        if line.last() != Some(&b'\n') {
            if line.len() >= limit {
                return Err(SessionError::LineTooLong { limit });
            }
            return Err(SessionError::EndOfStream);
        }
        Ok(line)
    }

    pub(crate) fn set_protocol_signature(&mut self, signature: impl Into<String>) {
        self.protocol_signature = signature.into();
    }

    pub(crate) const fn remote_headers_mut(&mut self) -> &mut Headers {
        &mut self.remote_headers
    }

    /// Queues the local header block and writes it from a background thread.
    ///
    /// Body writes that win the race emit the queued block themselves, so the
    /// block reaches the wire exactly once and ahead of any frame.
    pub(crate) fn spawn_header_flush(&self) {
        let block = render_header_block(&self.local_headers());
        self.lock_writer().latch = HeaderLatch::Scheduled(block);

        let writer = Arc::clone(&self.writer);
        let span = self.span.clone();
        let spawned = thread::Builder::new()
            .name("jsonrps-header-flush".to_owned())
            .spawn(move || {
                let _entered = span.enter();
                let mut writer = writer.lock().unwrap_or_else(PoisonError::into_inner);
                if let Err(error) = writer.flush_pending_header() {
                    warn!(target: SESSION_TARGET, %error, "failed to flush header block");
                }
            });
        if let Err(error) = spawned {
            warn!(target: SESSION_TARGET, %error, "failed to spawn header flush thread");
        }
    }

    /// Shuts the connection down in both directions.
    ///
    /// Closing wakes any thread blocked reading the session. Calling it more
    /// than once is harmless.
    pub fn close(&self) {
        let control = self
            .control
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Err(error) = control.close() {
            debug!(target: SESSION_TARGET, session_id = %self.id, %error, "close failed");
        }
    }

    fn lock_writer(&self) -> MutexGuard<'_, SessionWriter> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_local_headers(&self) -> MutexGuard<'_, Headers> {
        self.local_headers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Session")
            .field("id", &self.id)
            .field("protocol_signature", &self.protocol_signature)
            .field("remote_headers", &self.remote_headers)
            .field("max_line_bytes", &self.max_line_bytes)
            .finish_non_exhaustive()
    }
}
