use jsonrps_config::{ConfigError, SocketPreparationError};
use thiserror::Error;

use super::ShutdownError;
use crate::telemetry::TelemetryError;
use crate::transport::ListenerError;

/// Errors that stop the daemon from starting or shutting down cleanly.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Flags, environment or the configuration file could not be resolved.
    #[error("failed to load configuration: {source}")]
    Config {
        /// Underlying configuration error.
        #[source]
        source: ConfigError,
    },
    /// Telemetry could not be installed.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    /// The socket directory could not be prepared.
    #[error(transparent)]
    Socket(#[from] SocketPreparationError),
    /// Binding or running the listener failed.
    #[error("listener failure: {0}")]
    Listener(#[from] ListenerError),
    /// Waiting for the shutdown signal failed.
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
}

impl From<ConfigError> for LaunchError {
    fn from(source: ConfigError) -> Self {
        Self::Config { source }
    }
}
