//! Configuration shared by the `jsonrpsd` daemon and the `jsonrps` client.
//!
//! Values are layered by `ortho_config`: built-in defaults, then a TOML file
//! named by `--config-path` or `JSONRPS_CONFIG_PATH`, then `JSONRPS_*`
//! environment variables, then command-line flags.

pub mod defaults;
mod logging;
mod socket;

use std::ffi::OsString;
use std::sync::Arc;
use std::time::Duration;

use ortho_config::{OrthoConfig, OrthoError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use logging::{LogFormat, LogFormatParseError};
pub use socket::{SocketEndpoint, SocketParseError, SocketPreparationError};

use defaults::{
    DEFAULT_LOG_FILTER, DEFAULT_LOG_FORMAT, DEFAULT_MAX_LINE_BYTES, DEFAULT_POLL_INTERVAL,
    DEFAULT_QUEUE_CAPACITY, default_socket_endpoint,
};

/// Smallest accepted line limit; a header line must fit comfortably.
const MIN_LINE_BYTES: usize = 64;

/// Resolved daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "JSONRPS")]
pub struct Config {
    /// Endpoint the daemon listens on, `unix:///path` or `tcp://host:port`.
    #[serde(default = "default_socket_endpoint")]
    pub socket: SocketEndpoint,
    /// `tracing` filter expression.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Log output format: `json` or `compact`.
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
    /// Capacity of each per-session queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Signal polling interval in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Maximum accepted line length in bytes.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket: default_socket_endpoint(),
            log_filter: default_log_filter(),
            log_format: default_log_format(),
            queue_capacity: default_queue_capacity(),
            poll_interval_ms: default_poll_interval_ms(),
            max_line_bytes: default_max_line_bytes(),
        }
    }
}

impl Config {
    /// Loads configuration from the process arguments and environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] when a layer cannot be read or parsed
    /// and [`ConfigError::Invalid`] for out-of-range values.
    pub fn resolve() -> Result<Self, ConfigError> {
        Self::resolve_from_iter(std::env::args_os())
    }

    /// Loads configuration using `args` as the command line, the first item
    /// being the program name.
    ///
    /// # Errors
    ///
    /// Returns the same failures as [`Config::resolve`].
    pub fn resolve_from_iter<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as OrthoConfig>::load_from_iter(args)?.validate()
    }

    /// Signal polling interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Pipeline tunables for the default server.
    #[must_use]
    pub const fn pipeline(&self) -> jsonrps::PipelineConfig {
        jsonrps::PipelineConfig {
            queue_capacity: self.queue_capacity,
            poll_interval: self.poll_interval(),
        }
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::invalid("queue_capacity", "must be at least 1"));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::invalid("poll_interval_ms", "must be at least 1"));
        }
        if self.max_line_bytes < MIN_LINE_BYTES {
            return Err(ConfigError::invalid(
                "max_line_bytes",
                format!("must be at least {MIN_LINE_BYTES}"),
            ));
        }
        if self.log_filter.trim().is_empty() {
            return Err(ConfigError::invalid("log_filter", "must not be empty"));
        }
        Ok(self)
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Flags, environment or a configuration file could not be parsed.
    #[error(transparent)]
    Load(#[from] Arc<OrthoError>),
    /// A value was outside its accepted range.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Name of the offending setting.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

const fn default_log_format() -> LogFormat {
    DEFAULT_LOG_FORMAT
}

const fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_poll_interval_ms() -> u64 {
    u64::try_from(DEFAULT_POLL_INTERVAL.as_millis()).unwrap_or(u64::MAX)
}

const fn default_max_line_bytes() -> usize {
    DEFAULT_MAX_LINE_BYTES
}
