//! Per-session dispatch pipeline.
//!
//! Four kinds of thread cooperate on one session:
//!
//! - the reader decodes requests and pushes them onto the request queue;
//! - the dispatcher pops requests and spawns one invocation per known method;
//! - each invocation calls its method and queues the response;
//! - the writer drains the response queue onto the session.
//!
//! The threads share two bounded queues and two one-shot signals: the
//! session-done signal owned by the pipeline and the server-closing signal
//! shared by every session of a server. Blocking waits poll the signals at
//! the configured interval.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::MethodRegistry;
use super::registry::MethodContext;
use crate::{JsonRpcRequest, JsonRpcResponse, Session, Signal};

/// Tracing target for pipeline activity.
pub(crate) const PIPELINE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::pipeline");

/// Tunables for the dispatch pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Capacity of the request queue and of the response queue.
    pub queue_capacity: usize,
    /// How often blocked threads re-check the shutdown signals.
    pub poll_interval: Duration,
}

impl PipelineConfig {
    /// Default capacity of each queue.
    pub const DEFAULT_QUEUE_CAPACITY: usize = 200;
    /// Default signal polling interval.
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(25);
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: Self::DEFAULT_QUEUE_CAPACITY,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Lifecycle of one session's pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Threads are reading, dispatching, and writing.
    Running,
    /// A shutdown signal fired; threads are winding down.
    Draining,
    /// The session has been closed and the pipeline has returned.
    Closed,
}

/// Count of invocations that have not yet queued their response.
#[derive(Debug, Default)]
struct InFlight {
    count: AtomicUsize,
}

impl InFlight {
    fn enter(self: &Arc<Self>) -> InFlightGuard {
        self.count.fetch_add(1, Ordering::AcqRel);
        InFlightGuard {
            in_flight: Arc::clone(self),
        }
    }

    fn current(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }
}

struct InFlightGuard {
    in_flight: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.count.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Shared state for the threads serving one session.
struct Shared {
    session: Arc<Session>,
    registry: Arc<MethodRegistry>,
    closing: Arc<Signal>,
    done: Signal,
    in_flight: Arc<InFlight>,
    poll_interval: Duration,
}

impl Shared {
    fn should_stop(&self) -> bool {
        self.done.is_fired() || self.closing.is_fired()
    }

    fn finish(&self) {
        if self.done.fire() {
            debug!(target: PIPELINE_TARGET, "session done");
        }
    }
}

/// Dispatch pipeline bound to one session.
pub(crate) struct Pipeline {
    shared: Arc<Shared>,
    queue_capacity: usize,
    state: Mutex<PipelineState>,
}

impl Pipeline {
    pub(crate) fn new(
        session: Arc<Session>,
        registry: Arc<MethodRegistry>,
        closing: Arc<Signal>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                session,
                registry,
                closing,
                done: Signal::new(),
                in_flight: Arc::new(InFlight::default()),
                poll_interval: config.poll_interval,
            }),
            queue_capacity: config.queue_capacity,
            state: Mutex::new(PipelineState::Running),
        }
    }

    fn state(&self) -> PipelineState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn advance(&self, next: PipelineState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        debug!(target: PIPELINE_TARGET, from = ?*state, to = ?next, "pipeline state");
        *state = next;
    }

    /// Serves the session until it ends or the server closes, then closes it.
    pub(crate) fn run(&self) {
        let shared = &self.shared;
        let span = shared.session.span().clone();
        let _entered = span.enter();
        info!(target: PIPELINE_TARGET, "session pipeline started");

        let (request_tx, request_rx) = mpsc::sync_channel(self.queue_capacity);
        let (response_tx, response_rx) = mpsc::sync_channel(self.queue_capacity);

        let reader = spawn_stage("jsonrps-reader", shared, move |shared| {
            read_requests(&shared, &request_tx);
        });
        let dispatcher = spawn_stage("jsonrps-dispatcher", shared, move |shared| {
            dispatch_requests(&shared, &request_rx, &response_tx);
        });
        let writer = spawn_stage("jsonrps-writer", shared, move |shared| {
            write_responses(&shared, &response_rx);
        });
        if reader.is_none() || dispatcher.is_none() || writer.is_none() {
            shared.finish();
        }

        while !shared.done.wait_timeout(shared.poll_interval) {
            if shared.closing.is_fired() {
                debug!(target: PIPELINE_TARGET, "server closing; releasing session");
                break;
            }
        }

        self.advance(PipelineState::Draining);
        shared.finish();
        shared.session.close();
        for handle in [dispatcher, writer].into_iter().flatten() {
            if handle.join().is_err() {
                warn!(target: PIPELINE_TARGET, "pipeline thread panicked");
            }
        }
        // The reader and any invocations still running exit on their own
        // once they observe the closed connection or the done signal.
        drop(reader);
        self.advance(PipelineState::Closed);
        info!(
            target: PIPELINE_TARGET,
            state = ?self.state(),
            in_flight = shared.in_flight.current(),
            "session pipeline finished"
        );
    }
}

fn spawn_stage<F>(name: &str, shared: &Arc<Shared>, stage: F) -> Option<JoinHandle<()>>
where
    F: FnOnce(Arc<Shared>) + Send + 'static,
{
    let shared = Arc::clone(shared);
    let span = shared.session.span().clone();
    let spawned = thread::Builder::new()
        .name(name.to_owned())
        .spawn(move || {
            let _entered = span.enter();
            stage(shared);
        });
    match spawned {
        Ok(handle) => Some(handle),
        Err(error) => {
            warn!(
                target: PIPELINE_TARGET,
                thread = name,
                %error,
                "failed to spawn pipeline thread"
            );
            None
        }
    }
}

fn read_requests(shared: &Shared, requests: &SyncSender<JsonRpcRequest>) {
    loop {
        match shared.session.read_request() {
            Ok(request) => {
                if requests.send(request).is_err() {
                    debug!(target: PIPELINE_TARGET, "dispatcher gone; reader exiting");
                    break;
                }
            }
            Err(error) => {
                if error.is_end_of_stream() {
                    debug!(target: PIPELINE_TARGET, "peer closed the session");
                } else {
                    warn!(target: PIPELINE_TARGET, %error, "failed to read request");
                }
                shared.finish();
                break;
            }
        }
    }
}

fn dispatch_requests(
    shared: &Arc<Shared>,
    requests: &Receiver<JsonRpcRequest>,
    responses: &SyncSender<JsonRpcResponse>,
) {
    while !shared.should_stop() {
        match requests.recv_timeout(shared.poll_interval) {
            Ok(request) => dispatch(shared, request, responses),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn dispatch(
    shared: &Arc<Shared>,
    request: JsonRpcRequest,
    responses: &SyncSender<JsonRpcResponse>,
) {
    let Some(method) = shared.registry.get(&request.method) else {
        debug!(
            target: PIPELINE_TARGET,
            method = %request.method,
            "dropping request for unknown method"
        );
        return;
    };

    let guard = shared.in_flight.enter();
    let context = MethodContext::new(shared.session.id(), Arc::clone(&shared.closing));
    let responses = responses.clone();
    let invocation = Arc::clone(shared);
    let span = shared.session.span().clone();
    let method_name = request.method.clone();
    let notification = request.is_notification();

    let spawned = thread::Builder::new()
        .name(format!("jsonrps-call-{method_name}"))
        .spawn(move || {
            let _entered = span.enter();
            let _guard = guard;
            match method.call(&context, request) {
                Ok(_) if notification => {
                    debug!(target: PIPELINE_TARGET, method = %method_name, "notification handled");
                }
                Ok(response) => enqueue(&invocation, &responses, response),
                Err(error) => {
                    warn!(target: PIPELINE_TARGET, method = %method_name, %error, "method failed");
                }
            }
        });
    if let Err(error) = spawned {
        warn!(target: PIPELINE_TARGET, %error, "failed to spawn invocation thread");
    }
}

/// Queues `response`, giving up once either shutdown signal fires or the
/// writer has gone away.
fn enqueue(shared: &Shared, responses: &SyncSender<JsonRpcResponse>, response: JsonRpcResponse) {
    let mut pending = response;
    loop {
        if shared.should_stop() {
            debug!(target: PIPELINE_TARGET, "dropping response during shutdown");
            return;
        }
        match responses.try_send(pending) {
            Ok(()) => return,
            Err(TrySendError::Full(returned)) => {
                pending = returned;
                shared.done.wait_timeout(shared.poll_interval);
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!(target: PIPELINE_TARGET, "writer gone; dropping response");
                return;
            }
        }
    }
}

fn write_responses(shared: &Shared, responses: &Receiver<JsonRpcResponse>) {
    while !shared.should_stop() {
        match responses.recv_timeout(shared.poll_interval) {
            Ok(response) => {
                if let Err(error) = shared.session.write_response(&response) {
                    warn!(target: PIPELINE_TARGET, %error, "failed to write response");
                    shared.finish();
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}
