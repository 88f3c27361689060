//! Start-up and shutdown orchestration.

use std::sync::Arc;
use std::time::Duration;

use jsonrps::{DefaultServer, NotImplementedHandler, Router, Server, SessionHandler};
use jsonrps_config::Config;
use tracing::info;

use super::{LaunchError, PROCESS_TARGET, ShutdownSignal, SystemShutdownSignal};
use crate::methods::register_builtin_methods;
use crate::telemetry;
use crate::transport::{SessionConnectionHandler, SocketListener};

/// Longest wait for connection threads once sessions have been released.
const CONNECTION_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs the daemon with layered configuration from the process arguments,
/// environment and configuration file until a termination signal arrives.
pub fn run_daemon() -> Result<(), LaunchError> {
    let config = Config::resolve()?;
    telemetry::initialise(&config)?;
    run_daemon_with(&config, &SystemShutdownSignal)
}

/// Serves `config.socket` until `shutdown` returns.
///
/// Active sessions are released and the listener is joined even when
/// waiting for the signal fails.
pub fn run_daemon_with<S>(config: &Config, shutdown: &S) -> Result<(), LaunchError>
where
    S: ShutdownSignal + ?Sized,
{
    info!(
        target: PROCESS_TARGET,
        endpoint = %config.socket,
        queue_capacity = config.queue_capacity,
        "starting daemon"
    );
    config.socket.prepare_filesystem()?;
    let listener = SocketListener::bind(&config.socket)?;
    if let Some(addr) = listener.local_addr() {
        info!(target: PROCESS_TARGET, %addr, "bound tcp listener");
    }

    let server = Arc::new(DefaultServer::with_config(config.pipeline()));
    register_builtin_methods(&server);
    let router = Router::default()
        .with_handler(Arc::clone(&server) as Arc<dyn SessionHandler>)
        .with_handler(Arc::new(NotImplementedHandler));
    let handler = Arc::new(SessionConnectionHandler::new(
        Arc::new(router),
        config.max_line_bytes,
    ));
    let listener_handle = listener.start(handler)?;
    info!(target: PROCESS_TARGET, "daemon ready");

    let waited = shutdown.wait();
    info!(
        target: PROCESS_TARGET,
        active_connections = listener_handle.active_connections(),
        "stopping daemon"
    );
    listener_handle.shutdown();
    server.close();
    listener_handle.join(CONNECTION_DRAIN_TIMEOUT)?;
    waited?;
    info!(target: PROCESS_TARGET, "shutdown sequence completed");
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;
    use std::path::Path;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Instant;

    use camino::Utf8PathBuf;
    use jsonrps::{
        ConnectionStream, HandshakeError, Headers, JsonRpcRequest, Session, Status,
        default_client_headers, handshake,
    };
    use jsonrps_config::SocketEndpoint;
    use mockall::mock;
    use serde_json::json;

    use crate::process::ShutdownError;

    mock! {
        Shutdown {}
        impl ShutdownSignal for Shutdown {
            fn wait(&self) -> Result<(), ShutdownError>;
        }
    }

    fn config_for(dir: &Path) -> Config {
        let path = Utf8PathBuf::from_path_buf(dir.join("run/jsonrpsd.sock")).expect("utf8 path");
        Config {
            socket: SocketEndpoint::unix(path),
            poll_interval_ms: 5,
            ..Config::default()
        }
    }

    fn dial(path: &Path) -> UnixStream {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match UnixStream::connect(path) {
                Ok(stream) => return stream,
                Err(error) if Instant::now() >= deadline => panic!("daemon never bound: {error}"),
                Err(_) => thread::sleep(Duration::from_millis(10)),
            }
        }
    }

    fn open_session(path: &Path, headers: Headers) -> Result<Session, HandshakeError> {
        handshake::connect(ConnectionStream::from(dial(path)), headers)
            .map(handshake::Handshake::into_session)
    }

    #[test]
    fn serves_builtin_methods_until_shutdown() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = config_for(dir.path());
        let socket = config.socket.unix_path().expect("unix path").to_owned();

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let mut shutdown = MockShutdown::new();
        shutdown.expect_wait().times(1).returning(move || {
            stop_rx.recv().ok();
            Ok(())
        });
        let daemon = thread::spawn(move || run_daemon_with(&config, &shutdown));

        let session =
            open_session(socket.as_std_path(), default_client_headers()).expect("handshake");
        session
            .write_request(&JsonRpcRequest::new("rps.ping", None, 1_i64))
            .expect("write ping");
        assert_eq!(session.read_response().expect("pong").result, Some(json!("pong")));
        session
            .write_request(&JsonRpcRequest::new("rps.methods", None, 2_i64))
            .expect("write methods");
        assert_eq!(
            session.read_response().expect("methods").result,
            Some(json!(["rps.echo", "rps.methods", "rps.ping"]))
        );
        session
            .write_request(&JsonRpcRequest::notification("rps.ping", None))
            .expect("write notification");
        session
            .write_request(&JsonRpcRequest::new("rps.echo", Some(json!("after")), 3_i64))
            .expect("write echo");
        let echoed = session.read_response().expect("echo");
        assert_eq!(echoed.id, Some(3_i64.into()));
        assert_eq!(echoed.result, Some(json!("after")));

        let refused = open_session(socket.as_std_path(), Headers::new()).expect_err("refused");
        assert!(matches!(
            refused,
            HandshakeError::Rejected { status, .. } if status == Status::NOT_IMPLEMENTED
        ));

        stop_tx.send(()).expect("daemon waiting");
        daemon.join().expect("daemon thread").expect("clean shutdown");

        assert!(session.read_response().is_err(), "session released on shutdown");
        assert!(!socket.exists(), "socket removed on shutdown");
    }

    #[test]
    fn shutdown_failures_still_stop_the_listener() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = config_for(dir.path());
        let mut shutdown = MockShutdown::new();
        shutdown.expect_wait().times(1).returning(|| {
            Err(ShutdownError::Install {
                source: std::io::Error::other("no signals"),
            })
        });

        let error = run_daemon_with(&config, &shutdown).expect_err("wait fails");

        assert!(matches!(error, LaunchError::Shutdown(_)));
        assert!(!config.socket.unix_path().expect("unix path").exists());
    }

    #[test]
    fn in_use_sockets_abort_start_up() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = config_for(dir.path());
        config.socket.prepare_filesystem().expect("socket dir");
        let path = config.socket.unix_path().expect("unix path");
        let _existing = std::os::unix::net::UnixListener::bind(path).expect("bind existing");
        let mut shutdown = MockShutdown::new();
        shutdown.expect_wait().never();

        let error = run_daemon_with(&config, &shutdown).expect_err("socket in use");

        assert!(matches!(error, LaunchError::Listener(_)));
    }
}
