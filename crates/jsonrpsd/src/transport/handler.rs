//! Turns accepted connections into served sessions.

use std::sync::Arc;

use jsonrps::handshake::accept_session;
use jsonrps::{ConnectionStream, HandshakeError, Router, Session, SessionHandler};
use tracing::{debug, warn};

use super::LISTENER_TARGET;

/// Handles accepted socket connections.
pub(crate) trait ConnectionHandler: Send + Sync + 'static {
    /// Handles a single connection on the calling thread.
    fn handle(&self, stream: ConnectionStream);
}

/// Runs the server handshake and hands the session to a router.
#[derive(Debug)]
pub(crate) struct SessionConnectionHandler {
    router: Arc<Router>,
    max_line_bytes: usize,
}

impl SessionConnectionHandler {
    pub(crate) fn new(router: Arc<Router>, max_line_bytes: usize) -> Self {
        Self {
            router,
            max_line_bytes,
        }
    }
}

impl ConnectionHandler for SessionConnectionHandler {
    fn handle(&self, stream: ConnectionStream) {
        let session = match Session::new(stream) {
            Ok(session) => session.with_max_line_bytes(self.max_line_bytes),
            Err(error) => {
                warn!(target: LISTENER_TARGET, %error, "failed to prepare session");
                return;
            }
        };

        let handshake = match accept_session(session) {
            Ok(handshake) => handshake,
            Err(HandshakeError::MalformedHeader { line }) => {
                debug!(target: LISTENER_TARGET, %line, "refused malformed handshake");
                return;
            }
            Err(error) => {
                warn!(target: LISTENER_TARGET, %error, "handshake failed");
                return;
            }
        };
        if let Some(error) = &handshake.read_error {
            debug!(
                target: LISTENER_TARGET,
                session_id = handshake.session.id(),
                %error,
                "handshake ended early"
            );
        }

        let session = Arc::new(handshake.into_session());
        self.router.handle_session(Arc::clone(&session));
        session.close();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream;
    use std::thread;

    use jsonrps::{DefaultServer, NotImplementedHandler, default_client_headers, handshake};
    use rstest::{fixture, rstest};

    #[fixture]
    fn handler() -> Arc<SessionConnectionHandler> {
        let router = Router::default()
            .with_handler(Arc::new(DefaultServer::new()))
            .with_handler(Arc::new(NotImplementedHandler));
        Arc::new(SessionConnectionHandler::new(Arc::new(router), 1024))
    }

    fn serve(
        handler: &Arc<SessionConnectionHandler>,
        stream: UnixStream,
    ) -> thread::JoinHandle<()> {
        let handler = Arc::clone(handler);
        thread::spawn(move || handler.handle(ConnectionStream::from(stream)))
    }

    #[rstest]
    fn accepted_sessions_reach_the_router(handler: Arc<SessionConnectionHandler>) {
        let (client, server) = UnixStream::pair().expect("socket pair");
        let serving = serve(&handler, server);

        let session = handshake::connect(ConnectionStream::from(client), default_client_headers())
            .expect("handshake")
            .into_session();
        session.close();

        serving.join().expect("handler thread");
    }

    #[rstest]
    fn malformed_handshakes_are_answered_and_closed(handler: Arc<SessionConnectionHandler>) {
        let (mut client, server) = UnixStream::pair().expect("socket pair");
        let serving = serve(&handler, server);

        client.write_all(b"no separator\n\n").expect("write headers");
        let mut reply = String::new();
        client.read_to_string(&mut reply).expect("read reply");

        assert_eq!(reply, "JSONRPS/1.0 400 Bad Request\r\n\r\n");
        serving.join().expect("handler thread");
    }

    #[test]
    fn oversized_header_lines_are_refused_with_400() {
        let router = Router::default()
            .with_handler(Arc::new(DefaultServer::new()))
            .with_handler(Arc::new(NotImplementedHandler));
        let handler = Arc::new(SessionConnectionHandler::new(Arc::new(router), 64));
        let (mut client, server) = UnixStream::pair().expect("socket pair");
        let serving = serve(&handler, server);

        let headers = format!(
            "Accept: application/json+rps\r\nX-Long: {}\r\n\r\n",
            "a".repeat(200)
        );
        client.write_all(headers.as_bytes()).expect("write headers");
        let mut reply = String::new();
        client.read_to_string(&mut reply).expect("read reply");

        assert_eq!(reply, "JSONRPS/1.0 400 Bad Request\r\n\r\n");
        serving.join().expect("handler thread");
    }

    #[rstest]
    fn peers_that_hang_up_early_are_released(handler: Arc<SessionConnectionHandler>) {
        let (mut client, server) = UnixStream::pair().expect("socket pair");
        let serving = serve(&handler, server);

        client.write_all(b"Accept: text/plain\r\n").expect("partial header");
        client
            .shutdown(std::net::Shutdown::Write)
            .expect("half close");
        let mut reply = String::new();
        client.read_to_string(&mut reply).expect("read reply");

        assert!(reply.starts_with("JSONRPS/1.0 501 Not Implemented"));
        serving.join().expect("handler thread");
    }
}
