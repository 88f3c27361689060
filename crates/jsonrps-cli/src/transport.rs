//! Connects to the daemon endpoint.

use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use jsonrps::ConnectionStream;
use jsonrps_config::SocketEndpoint;

#[cfg(unix)]
use std::os::unix::net::UnixStream;

use super::AppError;

/// Opens a stream to `endpoint`. Reads on it time out after `timeout`;
/// zero waits forever.
pub(super) fn connect(
    endpoint: &SocketEndpoint,
    timeout: Duration,
) -> Result<ConnectionStream, AppError> {
    let stream = match endpoint {
        SocketEndpoint::Tcp { host, port } => {
            let address = resolve_tcp_address(host, *port).map_err(|source| AppError::Resolve {
                endpoint: endpoint.to_string(),
                source,
            })?;
            if timeout.is_zero() {
                TcpStream::connect(address)
            } else {
                TcpStream::connect_timeout(&address, timeout)
            }
            .map(ConnectionStream::Tcp)
        }
        #[cfg(unix)]
        SocketEndpoint::Unix { path } => {
            UnixStream::connect(path.as_std_path()).map(ConnectionStream::Unix)
        }
        #[cfg(not(unix))]
        SocketEndpoint::Unix { .. } => {
            return Err(AppError::UnsupportedUnixTransport(endpoint.to_string()));
        }
    }
    .map_err(|source| AppError::Connect {
        endpoint: endpoint.to_string(),
        source,
    })?;

    set_read_timeout(&stream, timeout).map_err(AppError::Configure)?;
    Ok(stream)
}

fn set_read_timeout(stream: &ConnectionStream, timeout: Duration) -> io::Result<()> {
    let timeout = Some(timeout).filter(|timeout| !timeout.is_zero());
    match stream {
        ConnectionStream::Tcp(stream) => stream.set_read_timeout(timeout),
        #[cfg(unix)]
        ConnectionStream::Unix(stream) => stream.set_read_timeout(timeout),
    }
}

fn resolve_tcp_address(host: &str, port: u16) -> io::Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no resolved addresses"))
}
