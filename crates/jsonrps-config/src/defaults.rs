//! Default values shared by the daemon and the client.

use std::time::Duration;

#[cfg(unix)]
use camino::Utf8PathBuf;
#[cfg(unix)]
use dirs::runtime_dir;

use crate::logging::LogFormat;
use crate::socket::SocketEndpoint;

/// TCP port used where Unix domain sockets are unavailable.
pub const DEFAULT_TCP_PORT: u16 = 9780;

/// Default `tracing` filter expression.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default log output format.
pub const DEFAULT_LOG_FORMAT: LogFormat = LogFormat::Json;

/// Default capacity of each per-session queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = jsonrps::PipelineConfig::DEFAULT_QUEUE_CAPACITY;

/// Default interval at which pipeline threads poll shutdown signals.
pub const DEFAULT_POLL_INTERVAL: Duration = jsonrps::PipelineConfig::DEFAULT_POLL_INTERVAL;

/// Default limit on a single framed line.
pub const DEFAULT_MAX_LINE_BYTES: usize = jsonrps::DEFAULT_MAX_LINE_BYTES;

const SOCKET_DIRECTORY: &str = "jsonrps";
const SOCKET_FILE: &str = "jsonrpsd.sock";

/// Computes the endpoint the daemon listens on when none is configured.
///
/// On Unix this is `$XDG_RUNTIME_DIR/jsonrps/jsonrpsd.sock`, falling back to
/// a per-user directory under the system temporary directory.
#[must_use]
pub fn default_socket_endpoint() -> SocketEndpoint {
    default_socket_endpoint_inner()
}

#[cfg(unix)]
fn default_socket_endpoint_inner() -> SocketEndpoint {
    let mut base = match runtime_dir().and_then(|path| Utf8PathBuf::from_path_buf(path).ok()) {
        Some(dir) => dir.join(SOCKET_DIRECTORY),
        None => fallback_base_directory()
            .join(SOCKET_DIRECTORY)
            .join(user_namespace()),
    };
    base.push(SOCKET_FILE);
    SocketEndpoint::unix(base)
}

#[cfg(unix)]
fn fallback_base_directory() -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(std::env::temp_dir()).unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
}

#[cfg(unix)]
fn user_namespace() -> String {
    // SAFETY: geteuid has no preconditions and cannot fail.
    let uid = unsafe { libc::geteuid() };
    format!("uid-{uid}")
}

#[cfg(not(unix))]
fn default_socket_endpoint_inner() -> SocketEndpoint {
    SocketEndpoint::tcp("127.0.0.1", DEFAULT_TCP_PORT)
}
