//! Capability-based routing of sessions to handlers.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::{Session, Status};

/// Tracing target for routing decisions.
pub(crate) const ROUTER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::router");

/// Component that can take ownership of a session.
///
/// Routers query [`can_handle_session`](Self::can_handle_session) before
/// calling [`handle_session`](Self::handle_session), which runs until the
/// handler is done with the session.
pub trait SessionHandler: Send + Sync {
    /// Returns true when this handler is willing to own `session`.
    fn can_handle_session(&self, session: &Session) -> bool;

    /// Serves `session` until the handler is done with it.
    fn handle_session(&self, session: Arc<Session>);
}

/// Ordered list of handlers; the first willing handler wins.
#[derive(Default, Clone)]
pub struct Router {
    handlers: Vec<Arc<dyn SessionHandler>>,
}

impl Router {
    /// Creates a router over `handlers`, asked in order.
    #[must_use]
    pub const fn new(handlers: Vec<Arc<dyn SessionHandler>>) -> Self {
        Self { handlers }
    }

    /// Appends a handler with the lowest priority so far.
    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn SessionHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Number of registered handlers.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns true when no handlers are registered.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    fn select(&self, session: &Session) -> Option<&Arc<dyn SessionHandler>> {
        self.handlers
            .iter()
            .find(|handler| handler.can_handle_session(session))
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Router")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl SessionHandler for Router {
    fn can_handle_session(&self, session: &Session) -> bool {
        self.select(session).is_some()
    }

    fn handle_session(&self, session: Arc<Session>) {
        match self.select(&session) {
            Some(handler) => handler.handle_session(session),
            None => debug!(
                target: ROUTER_TARGET,
                session_id = session.id(),
                "no handler accepted session"
            ),
        }
    }
}

/// Fallback handler that accepts every session and refuses it with
/// `501 Not Implemented`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotImplementedHandler;

impl SessionHandler for NotImplementedHandler {
    fn can_handle_session(&self, _session: &Session) -> bool {
        true
    }

    fn handle_session(&self, session: Arc<Session>) {
        debug!(
            target: ROUTER_TARGET,
            session_id = session.id(),
            "refusing session with 501"
        );
        if let Err(error) = session.write_status(Status::NOT_IMPLEMENTED) {
            warn!(target: ROUTER_TARGET, %error, "failed to write 501 status");
        }
        session.close();
    }
}
