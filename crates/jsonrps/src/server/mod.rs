//! Default JSON-RPC server and the trait it implements.

mod pipeline;
mod registry;


use std::sync::Arc;

use tracing::{info, warn};

pub use self::pipeline::{PipelineConfig, PipelineState};
pub use self::registry::{Method, MethodContext, MethodRegistry};

use self::pipeline::{PIPELINE_TARGET, Pipeline};
use crate::{DEFAULT_MIME_TYPE, Session, SessionHandler, Signal, Status};

/// Session handler that serves JSON-RPC methods.
pub trait Server: SessionHandler {
    /// Registers `method` under `name`, or removes `name` when `None`.
    fn set_method(&self, name: &str, method: Option<Arc<dyn Method>>);

    /// Signals every active session to stop and releases them.
    ///
    /// Calling it more than once has no further effect.
    fn close(&self);
}

/// Server that accepts sessions whose `Accept` header names its content type
/// and runs the dispatch pipeline on them.
#[derive(Debug)]
pub struct DefaultServer {
    registry: Arc<MethodRegistry>,
    closing: Arc<Signal>,
    config: PipelineConfig,
}

impl Default for DefaultServer {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultServer {
    /// Creates a server with no methods and default tunables.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(PipelineConfig::default())
    }

    /// Creates a server with the given pipeline tunables.
    #[must_use]
    pub fn with_config(config: PipelineConfig) -> Self {
        Self {
            registry: Arc::new(MethodRegistry::new()),
            closing: Arc::new(Signal::new()),
            config,
        }
    }

    /// Registers `method` under `name`.
    pub fn register(&self, name: impl Into<String>, method: impl Method + 'static) {
        self.registry.set(name, Some(Arc::new(method)));
    }

    /// Methods served by this server.
    #[must_use]
    pub const fn registry(&self) -> &Arc<MethodRegistry> {
        &self.registry
    }

    /// Pipeline tunables applied to new sessions.
    #[must_use]
    pub const fn config(&self) -> PipelineConfig {
        self.config
    }

    /// Returns true once [`Server::close`] has been called.
    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.closing.is_fired()
    }
}

impl SessionHandler for DefaultServer {
    fn can_handle_session(&self, session: &Session) -> bool {
        session.remote_headers().get("Accept") == Some(DEFAULT_MIME_TYPE)
    }

    fn handle_session(&self, session: Arc<Session>) {
        if self.closing.is_fired() {
            if let Err(error) = session.write_status(Status::SERVICE_UNAVAILABLE) {
                warn!(target: PIPELINE_TARGET, %error, "failed to write 503 status");
            }
            session.close();
            return;
        }

        session.add_local_header_if_absent("Content-Type", DEFAULT_MIME_TYPE);
        if let Err(error) = session.write_header(Status::OK) {
            warn!(
                target: PIPELINE_TARGET,
                session_id = session.id(),
                %error,
                "failed to announce session"
            );
            session.close();
            return;
        }

        Pipeline::new(
            session,
            Arc::clone(&self.registry),
            Arc::clone(&self.closing),
            self.config,
        )
        .run();
    }
}

impl Server for DefaultServer {
    fn set_method(&self, name: &str, method: Option<Arc<dyn Method>>) {
        self.registry.set(name, method);
    }

    fn close(&self) {
        if self.closing.fire() {
            info!(target: PIPELINE_TARGET, "server closing");
        }
    }
}
