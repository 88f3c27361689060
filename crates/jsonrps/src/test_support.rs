//! Scripted in-memory connection for exercising sessions without sockets.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::Connection;

#[derive(Debug, Default)]
struct MockState {
    input: VecDeque<u8>,
    written: Vec<u8>,
    closed: bool,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<MockState>,
    changed: Condvar,
    block_at_end: bool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-memory [`Connection`] that serves scripted input and records output.
///
/// Reads return one byte at a time so buffered readers are exercised the way
/// a slow socket would. Every clone shares the same state, which lets a test
/// keep a handle while the session owns the connection.
///
/// In [`MockConnection::new`] mode the stream reports end of input once the
/// script is exhausted. In [`MockConnection::blocking`] mode readers wait for
/// more input until the connection is closed, mimicking an idle peer.
#[derive(Debug, Clone)]
pub struct MockConnection {
    shared: Arc<Shared>,
}

impl MockConnection {
    /// Creates a connection that ends after `input` has been read.
    pub fn new(input: impl AsRef<[u8]>) -> Self {
        Self::build(input.as_ref(), false)
    }

    /// Creates a connection whose reads block at the end of `input` until
    /// the connection is closed.
    pub fn blocking(input: impl AsRef<[u8]>) -> Self {
        Self::build(input.as_ref(), true)
    }

    fn build(input: &[u8], block_at_end: bool) -> Self {
        let shared = Shared {
            state: Mutex::new(MockState {
                input: input.iter().copied().collect(),
                ..MockState::default()
            }),
            changed: Condvar::new(),
            block_at_end,
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    /// Returns every byte written so far.
    #[must_use]
    pub fn written(&self) -> Vec<u8> {
        self.shared.lock().written.clone()
    }

    /// Returns the written bytes as lossy UTF-8.
    #[must_use]
    pub fn written_string(&self) -> String {
        String::from_utf8_lossy(&self.written()).into_owned()
    }

    /// Returns true once any handle has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Waits until the written output contains `needle` at least `count`
    /// times. Returns false when `timeout` elapses first.
    pub fn wait_for_output(&self, needle: &str, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();
        loop {
            if String::from_utf8_lossy(&state.written).matches(needle).count() >= count {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            state = self
                .shared
                .changed
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl Read for MockConnection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(slot) = buf.first_mut() else {
            return Ok(0);
        };
        let mut state = self.shared.lock();
        loop {
            if let Some(byte) = state.input.pop_front() {
                *slot = byte;
                return Ok(1);
            }
            if state.closed || !self.shared.block_at_end {
                return Ok(0);
            }
            state = self
                .shared
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

impl Write for MockConnection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.shared.lock();
        if state.closed {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "mock connection closed",
            ));
        }
        state.written.extend_from_slice(buf);
        self.shared.changed.notify_all();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Connection for MockConnection {
    fn try_clone_connection(&self) -> io::Result<Box<dyn Connection>> {
        Ok(Box::new(self.clone()))
    }

    fn close(&self) -> io::Result<()> {
        let mut state = self.shared.lock();
        state.closed = true;
        self.shared.changed.notify_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_one_byte_at_a_time() {
        let mut conn = MockConnection::new("ab");
        let mut buf = [0_u8; 4];
        assert_eq!(conn.read(&mut buf).expect("read"), 1);
        assert_eq!(buf[0], b'a');
        assert_eq!(conn.read(&mut buf).expect("read"), 1);
        assert_eq!(conn.read(&mut buf).expect("read"), 0);
    }

    #[test]
    fn blocking_reader_wakes_on_close() {
        let conn = MockConnection::blocking("");
        let handle = conn.clone();
        let reader = std::thread::spawn(move || {
            let mut conn = conn;
            let mut buf = [0_u8; 1];
            conn.read(&mut buf)
        });

        handle.close().expect("close");
        let read = reader.join().expect("join").expect("read");
        assert_eq!(read, 0);
    }

    #[test]
    fn writes_after_close_fail() {
        let mut conn = MockConnection::new("");
        conn.close().expect("close");
        let error = conn.write(b"x").expect_err("write should fail");
        assert_eq!(error.kind(), io::ErrorKind::BrokenPipe);
    }
}
