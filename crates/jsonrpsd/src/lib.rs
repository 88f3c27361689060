//! The `jsonrpsd` daemon.
//!
//! Start-up runs in a fixed order: load configuration, install telemetry,
//! prepare the socket directory, bind the listener, and register the
//! built-in methods on a [`jsonrps::DefaultServer`]. Each accepted
//! connection gets its own thread which performs the server handshake and
//! hands the session to a router of the default server followed by the
//! `501 Not Implemented` fallback. A termination signal stops the listener
//! and releases every active session.

mod methods;
mod process;
mod telemetry;
mod transport;

pub use methods::{BUILTIN_METHODS, register_builtin_methods};
pub use process::{
    LaunchError, ShutdownError, ShutdownSignal, SystemShutdownSignal, run_daemon, run_daemon_with,
};
pub use telemetry::{TelemetryError, TelemetryHandle, initialise as initialise_telemetry};
pub use transport::ListenerError;
