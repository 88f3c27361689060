//! Socket transport for the daemon.

mod errors;
mod handler;
mod listener;

pub use errors::ListenerError;
pub(crate) use handler::{ConnectionHandler, SessionConnectionHandler};
pub(crate) use listener::SocketListener;

pub(crate) const LISTENER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::listener");
