//! Blocking duplex byte streams that can carry a session.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};

#[cfg(unix)]
use std::os::unix::net::UnixStream;

/// Blocking duplex byte stream owned by a [`Session`](crate::Session).
///
/// A session reads and writes from different threads, so implementations
/// hand out independent handles to the same stream through
/// [`try_clone_connection`](Self::try_clone_connection). Closing any handle
/// must wake readers blocked on the others.
pub trait Connection: Read + Write + Send + 'static {
    /// Returns another handle to the same underlying stream.
    ///
    /// # Errors
    ///
    /// Returns the operating system error when the handle cannot be
    /// duplicated.
    fn try_clone_connection(&self) -> io::Result<Box<dyn Connection>>;

    /// Shuts down both directions of the stream.
    ///
    /// # Errors
    ///
    /// Returns the operating system error when shutdown fails for a reason
    /// other than the stream already being disconnected.
    fn close(&self) -> io::Result<()>;
}

impl Connection for Box<dyn Connection> {
    fn try_clone_connection(&self) -> io::Result<Box<dyn Connection>> {
        (**self).try_clone_connection()
    }

    fn close(&self) -> io::Result<()> {
        (**self).close()
    }
}

/// Socket streams accepted by the daemon or opened by the client.
#[derive(Debug)]
pub enum ConnectionStream {
    /// TCP stream.
    Tcp(TcpStream),
    /// Unix domain socket stream.
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Read for ConnectionStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for ConnectionStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            Self::Unix(stream) => stream.flush(),
        }
    }
}

impl Connection for ConnectionStream {
    fn try_clone_connection(&self) -> io::Result<Box<dyn Connection>> {
        let clone = match self {
            Self::Tcp(stream) => Self::Tcp(stream.try_clone()?),
            #[cfg(unix)]
            Self::Unix(stream) => Self::Unix(stream.try_clone()?),
        };
        Ok(Box::new(clone))
    }

    fn close(&self) -> io::Result<()> {
        let result = match self {
            Self::Tcp(stream) => stream.shutdown(Shutdown::Both),
            #[cfg(unix)]
            Self::Unix(stream) => stream.shutdown(Shutdown::Both),
        };
        match result {
            Err(error) if error.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

impl From<TcpStream> for ConnectionStream {
    fn from(stream: TcpStream) -> Self {
        Self::Tcp(stream)
    }
}

#[cfg(unix)]
impl From<UnixStream> for ConnectionStream {
    fn from(stream: UnixStream) -> Self {
        Self::Unix(stream)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn closing_a_clone_wakes_the_reader() {
        let (local, _peer) = UnixStream::pair().expect("socket pair");
        let stream = ConnectionStream::from(local);
        let closer = stream.try_clone_connection().expect("clone handle");

        let reader = std::thread::spawn(move || {
            let mut stream = stream;
            let mut buf = [0_u8; 8];
            stream.read(&mut buf)
        });

        closer.close().expect("close");
        let read = reader.join().expect("join reader").expect("read result");
        assert_eq!(read, 0);
    }

    #[test]
    fn closing_twice_is_harmless() {
        let (local, _peer) = UnixStream::pair().expect("socket pair");
        let stream = ConnectionStream::from(local);
        stream.close().expect("first close");
        stream.close().expect("second close");
    }
}
