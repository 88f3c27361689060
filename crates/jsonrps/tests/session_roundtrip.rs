//! End-to-end sessions over Unix socket pairs.
#![cfg(unix)]

use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use jsonrps::handshake::{accept, connect};
use jsonrps::{
    ConnectionStream, DEFAULT_MIME_TYPE, DefaultServer, HandshakeError, Headers, JsonRpcRequest,
    JsonRpcResponse, MethodContext, MethodError, NotImplementedHandler, Router, SessionHandler,
    Status, default_client_headers,
};
use rstest::{fixture, rstest};
use serde_json::{Value, json};

fn echo(_context: &MethodContext, request: JsonRpcRequest) -> Result<JsonRpcResponse, MethodError> {
    Ok(JsonRpcResponse::success(
        request.id,
        request.params.unwrap_or(Value::Null),
    ))
}

#[fixture]
fn router() -> Arc<Router> {
    let server = DefaultServer::new();
    server.register("test.echo", echo);
    Arc::new(
        Router::default()
            .with_handler(Arc::new(server))
            .with_handler(Arc::new(NotImplementedHandler)),
    )
}

fn serve_one(router: &Arc<Router>, stream: UnixStream) -> JoinHandle<()> {
    let router = Arc::clone(router);
    thread::spawn(move || {
        let Ok(handshake) = accept(ConnectionStream::from(stream)) else {
            return;
        };
        let session = Arc::new(handshake.session);
        router.handle_session(Arc::clone(&session));
        session.close();
    })
}

#[rstest]
fn client_and_server_exchange_requests(router: Arc<Router>) {
    let (client_end, server_end) = UnixStream::pair().expect("socket pair");
    let server = serve_one(&router, server_end);

    let handshake =
        connect(ConnectionStream::from(client_end), default_client_headers()).expect("connect");
    assert!(handshake.is_complete());
    let session = handshake.session;
    assert_eq!(
        session.remote_headers().get("Content-Type"),
        Some(DEFAULT_MIME_TYPE)
    );

    for id in 1..=3_i64 {
        let request = JsonRpcRequest::new("test.echo", Some(json!({"n": id})), id);
        session.write_request(&request).expect("write request");
        let response = session.read_response().expect("read response");
        assert_eq!(response.id, request.id);
        assert_eq!(response.result, Some(json!({"n": id})));
    }

    session.close();
    server.join().expect("server thread");
}

#[rstest]
fn unsupported_clients_are_refused(router: Arc<Router>) {
    let (client_end, server_end) = UnixStream::pair().expect("socket pair");
    let server = serve_one(&router, server_end);

    let headers: Headers = [("Accept", "text/plain")].into_iter().collect();
    let error = connect(ConnectionStream::from(client_end), headers).expect_err("refused");

    assert!(matches!(
        error,
        HandshakeError::Rejected { status, .. } if status == Status::NOT_IMPLEMENTED
    ));
    server.join().expect("server thread");
}

#[rstest]
fn malformed_headers_get_bad_request(router: Arc<Router>) {
    let (mut client_end, server_end) = UnixStream::pair().expect("socket pair");
    let server = serve_one(&router, server_end);

    client_end
        .write_all(b"InvalidHeaderLine\r\n\n")
        .expect("write headers");
    let mut reply = String::new();
    client_end.read_to_string(&mut reply).expect("read reply");

    assert_eq!(reply, "JSONRPS/1.0 400 Bad Request\r\n\r\n");
    server.join().expect("server thread");
}

#[rstest]
fn sessions_run_over_a_bound_socket(router: Arc<Router>) {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("jsonrps.sock");
    let listener = UnixListener::bind(&path).expect("bind socket");

    let client = thread::spawn(move || {
        let stream = UnixStream::connect(&path).expect("connect socket");
        let session = connect(ConnectionStream::from(stream), default_client_headers())
            .expect("handshake")
            .into_session();
        let request = JsonRpcRequest::new("test.echo", Some(json!("hello")), "abc");
        session.write_request(&request).expect("write request");
        let response = session.read_response().expect("read response");
        session.close();
        response
    });

    let (stream, _) = listener.accept().expect("accept");
    serve_one(&router, stream).join().expect("server thread");
    let response = client.join().expect("client thread");

    assert_eq!(response.result, Some(json!("hello")));
}
