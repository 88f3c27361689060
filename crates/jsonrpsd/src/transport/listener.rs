//! Accept loop for the daemon socket.

use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::sync::{
    Arc, Condvar, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};
use std::thread;
use std::time::Duration;

use jsonrps::ConnectionStream;
use jsonrps_config::SocketEndpoint;
use tracing::{debug, info, warn};

use super::{ConnectionHandler, LISTENER_TARGET, ListenerError};

#[cfg(unix)]
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::FileTypeExt;
#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};
#[cfg(unix)]
use std::path::Path;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(25);
const ERROR_BACKOFF: Duration = Duration::from_millis(150);

/// Listener bound to a configured endpoint.
#[derive(Debug)]
pub(crate) struct SocketListener {
    endpoint: SocketEndpoint,
    listener: ListenerKind,
}

#[derive(Debug)]
enum ListenerKind {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

impl SocketListener {
    /// Binds `endpoint`, replacing a stale Unix socket left by a dead daemon.
    pub(crate) fn bind(endpoint: &SocketEndpoint) -> Result<Self, ListenerError> {
        let listener = match endpoint {
            SocketEndpoint::Tcp { host, port } => ListenerKind::Tcp(bind_tcp(host, *port)?),
            #[cfg(unix)]
            SocketEndpoint::Unix { path } => ListenerKind::Unix(bind_unix(path.as_std_path())?),
            #[cfg(not(unix))]
            SocketEndpoint::Unix { .. } => {
                return Err(ListenerError::UnsupportedUnix {
                    endpoint: endpoint.to_string(),
                });
            }
        };
        Ok(Self {
            endpoint: endpoint.clone(),
            listener,
        })
    }

    /// Address of a TCP listener; `None` for Unix sockets.
    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        match &self.listener {
            ListenerKind::Tcp(listener) => listener.local_addr().ok(),
            #[cfg(unix)]
            ListenerKind::Unix(_) => None,
        }
    }

    /// Starts accepting on a background thread, one thread per connection.
    pub(crate) fn start(
        self,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<ListenerHandle, ListenerError> {
        let result = match &self.listener {
            ListenerKind::Tcp(listener) => listener.set_nonblocking(true),
            #[cfg(unix)]
            ListenerKind::Unix(listener) => listener.set_nonblocking(true),
        };
        if let Err(source) = result {
            #[cfg(unix)]
            cleanup_unix_socket(&self.endpoint);
            return Err(ListenerError::NonBlocking { source });
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let connections = Arc::new(ActiveConnections::default());
        let flag = Arc::clone(&shutdown);
        let tracked = Arc::clone(&connections);
        let handle = thread::Builder::new()
            .name("jsonrpsd-listener".to_owned())
            .spawn(move || run_accept_loop(&self, &flag, &handler, &tracked))
            .map_err(|source| ListenerError::Spawn { source })?;
        Ok(ListenerHandle {
            shutdown,
            connections,
            handle: Some(handle),
        })
    }
}

/// Number of connection threads still running.
#[derive(Debug, Default)]
struct ActiveConnections {
    count: Mutex<usize>,
    idle: Condvar,
}

impl ActiveConnections {
    fn enter(self: &Arc<Self>) -> ConnectionGuard {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        ConnectionGuard {
            connections: Arc::clone(self),
        }
    }

    /// Waits up to `timeout` for every connection to finish and returns how
    /// many are still running.
    fn wait_idle(&self, timeout: Duration) -> usize {
        let count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        let (count, _) = self
            .idle
            .wait_timeout_while(count, timeout, |count| *count > 0)
            .unwrap_or_else(PoisonError::into_inner);
        *count
    }
}

struct ConnectionGuard {
    connections: Arc<ActiveConnections>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let mut count = self
            .connections
            .count
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.connections.idle.notify_all();
        }
    }
}

/// Handle to the background accept thread.
#[derive(Debug)]
pub(crate) struct ListenerHandle {
    shutdown: Arc<AtomicBool>,
    connections: Arc<ActiveConnections>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ListenerHandle {
    /// Asks the accept loop to stop after its current iteration.
    pub(crate) fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Waits for the accept loop to exit, then gives connection threads up to
    /// `drain` to finish. Connections still running afterwards are logged and
    /// left behind.
    pub(crate) fn join(mut self, drain: Duration) -> Result<(), ListenerError> {
        let joined = self
            .handle
            .take()
            .map_or(Ok(()), |handle| handle.join().map_err(|_| ListenerError::ThreadPanic));
        let remaining = self.connections.wait_idle(drain);
        if remaining > 0 {
            warn!(
                target: LISTENER_TARGET,
                remaining,
                "connections still active after shutdown"
            );
        }
        joined
    }

    /// Number of connection threads currently running.
    pub(crate) fn active_connections(&self) -> usize {
        *self
            .connections
            .count
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

fn run_accept_loop(
    listener: &SocketListener,
    shutdown: &AtomicBool,
    handler: &Arc<dyn ConnectionHandler>,
    connections: &Arc<ActiveConnections>,
) {
    info!(
        target: LISTENER_TARGET,
        endpoint = %listener.endpoint,
        "socket listener active"
    );
    let mut last_error = None::<io::ErrorKind>;
    while !shutdown.load(Ordering::SeqCst) {
        match accept_connection(listener) {
            Ok(Some(stream)) => {
                last_error = None;
                spawn_connection(Arc::clone(handler), stream, connections.enter());
            }
            Ok(None) => thread::sleep(ACCEPT_BACKOFF),
            Err(error) => {
                let kind = error.kind();
                if last_error != Some(kind) {
                    warn!(target: LISTENER_TARGET, %error, "socket accept error");
                }
                last_error = Some(kind);
                thread::sleep(ERROR_BACKOFF);
            }
        }
    }

    #[cfg(unix)]
    cleanup_unix_socket(&listener.endpoint);
    info!(target: LISTENER_TARGET, endpoint = %listener.endpoint, "socket listener stopped");
}

fn spawn_connection(
    handler: Arc<dyn ConnectionHandler>,
    stream: ConnectionStream,
    guard: ConnectionGuard,
) {
    let spawned = thread::Builder::new()
        .name("jsonrpsd-connection".to_owned())
        .spawn(move || {
            let _guard = guard;
            handler.handle(stream);
        });
    if let Err(error) = spawned {
        warn!(target: LISTENER_TARGET, %error, "failed to spawn connection thread");
    } else {
        debug!(target: LISTENER_TARGET, "connection accepted");
    }
}

fn accept_connection(listener: &SocketListener) -> io::Result<Option<ConnectionStream>> {
    let accepted = match &listener.listener {
        ListenerKind::Tcp(tcp) => tcp.accept().and_then(|(stream, _)| {
            stream.set_nonblocking(false)?;
            Ok(ConnectionStream::Tcp(stream))
        }),
        #[cfg(unix)]
        ListenerKind::Unix(unix) => unix.accept().and_then(|(stream, _)| {
            stream.set_nonblocking(false)?;
            Ok(ConnectionStream::Unix(stream))
        }),
    };
    match accepted {
        Ok(stream) => Ok(Some(stream)),
        Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
        Err(error) => Err(error),
    }
}

fn bind_tcp(host: &str, port: u16) -> Result<TcpListener, ListenerError> {
    let addr = (host, port)
        .to_socket_addrs()
        .map_err(|source| ListenerError::Resolve {
            host: host.to_owned(),
            port,
            source,
        })?
        .next()
        .ok_or_else(|| ListenerError::ResolveEmpty {
            host: host.to_owned(),
            port,
        })?;
    TcpListener::bind(addr).map_err(|source| ListenerError::BindTcp { addr, source })
}

#[cfg(unix)]
fn bind_unix(path: &Path) -> Result<UnixListener, ListenerError> {
    let display = || path.display().to_string();
    match fs::symlink_metadata(path) {
        Ok(metadata) if !metadata.file_type().is_socket() => {
            return Err(ListenerError::UnixNotSocket { path: display() });
        }
        Ok(_) => remove_stale_socket(path)?,
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(ListenerError::UnixInspect {
                path: display(),
                source,
            });
        }
    }

    UnixListener::bind(path).map_err(|source| ListenerError::BindUnix {
        path: display(),
        source,
    })
}

/// Removes a socket file nobody is listening on; a live one is an error.
#[cfg(unix)]
fn remove_stale_socket(path: &Path) -> Result<(), ListenerError> {
    let display = || path.display().to_string();
    match UnixStream::connect(path) {
        Ok(_stream) => Err(ListenerError::UnixInUse { path: display() }),
        Err(error)
            if matches!(
                error.kind(),
                io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
            ) =>
        {
            info!(target: LISTENER_TARGET, path = %path.display(), "removing stale unix socket");
            fs::remove_file(path).map_err(|source| ListenerError::UnixCleanup {
                path: display(),
                source,
            })
        }
        Err(source) => Err(ListenerError::UnixInspect {
            path: display(),
            source,
        }),
    }
}

#[cfg(unix)]
fn cleanup_unix_socket(endpoint: &SocketEndpoint) {
    let Some(path) = endpoint.unix_path() else {
        return;
    };
    if let Err(error) = fs::remove_file(path.as_std_path())
        && error.kind() != io::ErrorKind::NotFound
    {
        warn!(
            target: LISTENER_TARGET,
            %error,
            %path,
            "failed to remove unix socket file"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpStream;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    use camino::Utf8PathBuf;

    struct CountingHandler {
        count: Arc<AtomicUsize>,
    }

    impl ConnectionHandler for CountingHandler {
        fn handle(&self, _stream: ConnectionStream) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting() -> (Arc<AtomicUsize>, Arc<CountingHandler>) {
        let count = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(CountingHandler {
            count: Arc::clone(&count),
        });
        (count, handler)
    }

    fn wait_for_count(count: &AtomicUsize, expected: usize) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if count.load(Ordering::SeqCst) >= expected {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    fn utf8(path: std::path::PathBuf) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(path).expect("utf8 path")
    }

    #[test]
    fn tcp_listener_accepts_connections() {
        let listener =
            SocketListener::bind(&SocketEndpoint::tcp("127.0.0.1", 0)).expect("bind tcp listener");
        let addr = listener.local_addr().expect("local address");
        let (count, handler) = counting();
        let handle = listener.start(handler).expect("start listener");

        TcpStream::connect(addr).expect("connect first client");
        TcpStream::connect(addr).expect("connect second client");

        assert!(wait_for_count(&count, 2), "expected two connections");
        handle.shutdown();
        handle.join(Duration::from_secs(2)).expect("join listener");
    }

    struct GatedHandler {
        started: Arc<AtomicUsize>,
        release: Arc<jsonrps::Signal>,
    }

    impl ConnectionHandler for GatedHandler {
        fn handle(&self, _stream: ConnectionStream) {
            self.started.fetch_add(1, Ordering::SeqCst);
            self.release.wait();
        }
    }

    #[test]
    fn join_waits_for_connection_threads() {
        let listener =
            SocketListener::bind(&SocketEndpoint::tcp("127.0.0.1", 0)).expect("bind tcp listener");
        let addr = listener.local_addr().expect("local address");
        let started = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(jsonrps::Signal::new());
        let handle = listener
            .start(Arc::new(GatedHandler {
                started: Arc::clone(&started),
                release: Arc::clone(&release),
            }))
            .expect("start listener");

        let _client = TcpStream::connect(addr).expect("connect client");
        assert!(wait_for_count(&started, 1), "connection never handled");
        assert_eq!(handle.active_connections(), 1);

        let releaser = {
            let release = Arc::clone(&release);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                release.fire();
            })
        };
        handle.shutdown();
        let began = Instant::now();
        handle.join(Duration::from_secs(5)).expect("join listener");

        assert!(release.is_fired(), "join returned before the connection finished");
        assert!(began.elapsed() < Duration::from_secs(5));
        releaser.join().expect("releaser thread");
    }

    #[test]
    fn join_gives_up_on_stuck_connections() {
        let listener =
            SocketListener::bind(&SocketEndpoint::tcp("127.0.0.1", 0)).expect("bind tcp listener");
        let addr = listener.local_addr().expect("local address");
        let started = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(jsonrps::Signal::new());
        let handle = listener
            .start(Arc::new(GatedHandler {
                started: Arc::clone(&started),
                release: Arc::clone(&release),
            }))
            .expect("start listener");

        let _client = TcpStream::connect(addr).expect("connect client");
        assert!(wait_for_count(&started, 1), "connection never handled");

        handle.shutdown();
        handle
            .join(Duration::from_millis(50))
            .expect("join returns after the drain timeout");
        release.fire();
    }

    #[test]
    fn unresolvable_hosts_are_reported() {
        let error = SocketListener::bind(&SocketEndpoint::tcp("no-such-host.invalid", 1))
            .expect_err("resolution fails");
        assert!(matches!(
            error,
            ListenerError::Resolve { .. } | ListenerError::ResolveEmpty { .. }
        ));
    }

    #[cfg(unix)]
    #[test]
    fn unix_listener_replaces_stale_socket_files() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("jsonrpsd.sock");
        drop(UnixListener::bind(&path).expect("bind stale listener"));
        assert!(path.exists(), "stale socket should remain");

        let listener = SocketListener::bind(&SocketEndpoint::unix(utf8(path.clone())))
            .expect("bind over stale socket");
        assert!(listener.local_addr().is_none());
        let (count, handler) = counting();
        let handle = listener.start(handler).expect("start listener");

        UnixStream::connect(&path).expect("connect unix client");
        assert!(wait_for_count(&count, 1), "expected one connection");

        handle.shutdown();
        handle.join(Duration::from_secs(2)).expect("join listener");
        assert!(!path.exists(), "socket file removed on shutdown");
    }

    #[cfg(unix)]
    #[test]
    fn unix_listener_rejects_in_use_socket() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("jsonrpsd.sock");
        let _existing = UnixListener::bind(&path).expect("bind existing listener");

        let error =
            SocketListener::bind(&SocketEndpoint::unix(utf8(path))).expect_err("socket in use");
        assert!(matches!(error, ListenerError::UnixInUse { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn unix_listener_refuses_regular_files() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("jsonrpsd.sock");
        fs::write(&path, b"not a socket").expect("write file");

        let error =
            SocketListener::bind(&SocketEndpoint::unix(utf8(path))).expect_err("not a socket");
        assert!(matches!(error, ListenerError::UnixNotSocket { .. }));
    }
}
