//! Socket endpoints the daemon listens on and the client dials.

use std::fmt;
use std::fs::DirBuilder;
use std::io;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Transport address written as `unix:///path` or `tcp://host:port`.
///
/// Serialises as a table tagged by `transport`. Deserialisation also accepts
/// the URL form, which is how environment variables carry it.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "transport", rename_all = "snake_case", try_from = "EndpointRepr")]
pub enum SocketEndpoint {
    /// Unix domain socket.
    Unix {
        /// Filesystem path of the socket.
        path: Utf8PathBuf,
    },
    /// TCP socket.
    Tcp {
        /// Host name or address.
        host: String,
        /// Port number.
        port: u16,
    },
}

impl SocketEndpoint {
    /// Builds a Unix domain socket endpoint.
    #[must_use]
    pub fn unix(path: impl Into<Utf8PathBuf>) -> Self {
        Self::Unix { path: path.into() }
    }

    /// Builds a TCP endpoint.
    #[must_use]
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Socket path for Unix endpoints.
    #[must_use]
    pub fn unix_path(&self) -> Option<&Utf8Path> {
        match self {
            Self::Unix { path } => Some(path.as_ref()),
            Self::Tcp { .. } => None,
        }
    }

    /// Creates the parent directory of a Unix socket, owner-only on Unix.
    ///
    /// TCP endpoints need no preparation.
    ///
    /// # Errors
    ///
    /// Returns [`SocketPreparationError`] when the path has no parent or the
    /// directory cannot be created.
    pub fn prepare_filesystem(&self) -> Result<(), SocketPreparationError> {
        let Some(path) = self.unix_path() else {
            return Ok(());
        };
        let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) else {
            return Err(SocketPreparationError::MissingParent {
                path: path.to_path_buf(),
            });
        };

        let mut builder = DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }

        match builder.create(parent.as_std_path()) {
            Err(source) if source.kind() != io::ErrorKind::AlreadyExists => {
                Err(SocketPreparationError::CreateDirectory {
                    path: parent.to_path_buf(),
                    source,
                })
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for SocketEndpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix { path } => write!(formatter, "unix://{path}"),
            Self::Tcp { host, port } => write!(formatter, "tcp://{host}:{port}"),
        }
    }
}

impl FromStr for SocketEndpoint {
    type Err = SocketParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(input)?;
        match url.scheme() {
            "unix" => {
                let path = url.path();
                if path.is_empty() || path == "/" {
                    return Err(SocketParseError::MissingUnixPath(input.to_owned()));
                }
                Ok(Self::unix(path))
            }
            "tcp" => {
                let host = url
                    .host_str()
                    .ok_or_else(|| SocketParseError::MissingHost(input.to_owned()))?;
                let port = url
                    .port()
                    .ok_or_else(|| SocketParseError::MissingPort(input.to_owned()))?;
                Ok(Self::tcp(host, port))
            }
            other => Err(SocketParseError::UnsupportedScheme(other.to_owned())),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EndpointRepr {
    Url(String),
    Table(EndpointTable),
}

#[derive(Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
enum EndpointTable {
    Unix { path: Utf8PathBuf },
    Tcp { host: String, port: u16 },
}

impl TryFrom<EndpointRepr> for SocketEndpoint {
    type Error = SocketParseError;

    fn try_from(repr: EndpointRepr) -> Result<Self, Self::Error> {
        match repr {
            EndpointRepr::Url(text) => text.parse(),
            EndpointRepr::Table(EndpointTable::Unix { path }) => Ok(Self::Unix { path }),
            EndpointRepr::Table(EndpointTable::Tcp { host, port }) => Ok(Self::Tcp { host, port }),
        }
    }
}

/// Errors raised while parsing a [`SocketEndpoint`].
#[derive(Debug, Error)]
pub enum SocketParseError {
    /// The scheme is neither `unix` nor `tcp`.
    #[error("unsupported socket scheme '{0}'")]
    UnsupportedScheme(String),
    /// A TCP address lacked a host.
    #[error("missing TCP host in '{0}'")]
    MissingHost(String),
    /// A TCP address lacked a port.
    #[error("missing TCP port in '{0}'")]
    MissingPort(String),
    /// A Unix address lacked a path.
    #[error("missing Unix socket path in '{0}'")]
    MissingUnixPath(String),
    /// The text is not a URL.
    #[error(transparent)]
    Url(#[from] url::ParseError),
}

/// Errors raised while preparing a socket directory.
#[derive(Debug, Error)]
pub enum SocketPreparationError {
    /// The socket path has no parent directory.
    #[error("socket path '{path}' has no parent directory")]
    MissingParent {
        /// Socket path as configured.
        path: Utf8PathBuf,
    },
    /// The parent directory could not be created.
    #[error("failed to create socket directory '{path}': {source}")]
    CreateDirectory {
        /// Directory that could not be created.
        path: Utf8PathBuf,
        /// Underlying filesystem error.
        #[source]
        source: io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("unix:///run/jsonrps/jsonrpsd.sock", SocketEndpoint::unix("/run/jsonrps/jsonrpsd.sock"))]
    #[case("tcp://127.0.0.1:9780", SocketEndpoint::tcp("127.0.0.1", 9780))]
    #[case("tcp://localhost:1", SocketEndpoint::tcp("localhost", 1))]
    fn parses_endpoints(#[case] input: &str, #[case] expected: SocketEndpoint) {
        let endpoint: SocketEndpoint = input.parse().expect("valid endpoint");
        assert_eq!(endpoint, expected);
        assert_eq!(endpoint.to_string(), input);
    }

    #[rstest]
    #[case("http://localhost:80")]
    #[case("tcp://localhost")]
    #[case("unix://")]
    #[case("not a url")]
    fn rejects_invalid_endpoints(#[case] input: &str) {
        assert!(input.parse::<SocketEndpoint>().is_err());
    }

    #[test]
    fn serialises_with_transport_tag() {
        let endpoint = SocketEndpoint::tcp("::1", 4000);
        let value = serde_json::to_value(&endpoint).expect("serialise");
        assert_eq!(
            value,
            serde_json::json!({"transport": "tcp", "host": "::1", "port": 4000})
        );
    }

    #[rstest]
    #[case(serde_json::json!("tcp://127.0.0.1:4000"))]
    #[case(serde_json::json!({"transport": "tcp", "host": "127.0.0.1", "port": 4000}))]
    fn deserialises_from_url_or_table(#[case] value: serde_json::Value) {
        let endpoint: SocketEndpoint = serde_json::from_value(value).expect("endpoint");
        assert_eq!(endpoint, SocketEndpoint::tcp("127.0.0.1", 4000));
    }

    #[test]
    fn rejects_unknown_scheme_when_deserialising() {
        let result = serde_json::from_value::<SocketEndpoint>(serde_json::json!("ftp://x:1"));
        assert!(result.is_err());
    }

    #[test]
    fn prepares_missing_socket_directory() {
        let dir = tempfile::tempdir().expect("temp dir");
        let base = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 temp dir");
        let endpoint = SocketEndpoint::unix(base.join("nested/run/jsonrpsd.sock"));

        endpoint.prepare_filesystem().expect("first preparation");
        endpoint.prepare_filesystem().expect("idempotent preparation");

        assert!(base.join("nested/run").is_dir());
    }

    #[test]
    fn tcp_endpoints_need_no_preparation() {
        SocketEndpoint::tcp("127.0.0.1", 9780)
            .prepare_filesystem()
            .expect("nothing to prepare");
    }
}
