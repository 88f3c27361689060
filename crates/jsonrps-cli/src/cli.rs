//! Argument definitions for the `jsonrps` client.

use std::time::Duration;

use clap::{Parser, Subcommand};
use jsonrps::{Headers, RequestId, default_client_headers};
use jsonrps_config::SocketEndpoint;

const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// Command-line client for JSONRPS daemons.
#[derive(Parser, Debug)]
#[command(name = "jsonrps", version, disable_help_subcommand = true)]
pub(crate) struct Cli {
    /// Daemon endpoint, `unix:///path` or `tcp://host:port`.
    #[arg(long, env = "JSONRPS_SOCKET", value_name = "URL", global = true)]
    pub(crate) socket: Option<SocketEndpoint>,
    /// Extra handshake header; repeat for more. Replaces the default
    /// `Accept` header when it names `Accept`.
    #[arg(
        long = "header",
        short = 'H',
        value_name = "NAME: VALUE",
        value_parser = parse_header,
        global = true
    )]
    pub(crate) headers: Vec<(String, String)>,
    /// How long to wait for the daemon to answer, in milliseconds.
    #[arg(long, value_name = "MS", default_value_t = DEFAULT_TIMEOUT_MS, global = true)]
    pub(crate) timeout_ms: u64,
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

impl Cli {
    /// Headers sent in the handshake: defaults overridden by `--header`.
    pub(crate) fn handshake_headers(&self) -> Headers {
        let mut headers: Headers = self
            .headers
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect();
        for (name, value) in default_client_headers().iter() {
            if !headers.contains(name) {
                headers.add(name, value);
            }
        }
        headers
    }

    pub(crate) const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Subcommand, Debug, Clone)]
pub(crate) enum CliCommand {
    /// Performs the handshake and prints the daemon's headers.
    Handshake,
    /// Sends one request and prints the matching response line.
    Call {
        /// Method name, for example `rps.ping`.
        #[arg(value_name = "METHOD")]
        method: String,
        /// Params as a JSON document.
        #[arg(value_name = "PARAMS")]
        params: Option<String>,
        /// Request id; numeric text is sent as a number.
        #[arg(long, value_name = "ID", value_parser = parse_request_id, default_value = "1")]
        id: RequestId,
        /// Sends a notification and exits without waiting for a response.
        #[arg(long)]
        notify: bool,
    },
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected 'Name: Value', got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() || name.contains(char::is_whitespace) {
        return Err(format!("invalid header name in '{raw}'"));
    }
    Ok((name.to_owned(), value.trim().to_owned()))
}

fn parse_request_id(raw: &str) -> Result<RequestId, String> {
    Ok(raw
        .parse::<i64>()
        .map_or_else(|_| RequestId::from(raw), RequestId::from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args.iter().copied()).expect("valid arguments")
    }

    #[rstest]
    #[case("Accept: text/plain", ("Accept", "text/plain"))]
    #[case("X-Trace:abc", ("X-Trace", "abc"))]
    #[case("Empty:", ("Empty", ""))]
    fn parses_header_arguments(#[case] raw: &str, #[case] expected: (&str, &str)) {
        let (name, value) = parse_header(raw).expect("valid header");
        assert_eq!((name.as_str(), value.as_str()), expected);
    }

    #[rstest]
    #[case("no separator")]
    #[case(": value")]
    #[case("Bad Name: value")]
    fn rejects_malformed_headers(#[case] raw: &str) {
        assert!(parse_header(raw).is_err());
    }

    #[rstest]
    #[case("7", RequestId::from(7_i64))]
    #[case("abc", RequestId::from("abc"))]
    fn request_ids_keep_their_json_type(#[case] raw: &str, #[case] expected: RequestId) {
        assert_eq!(parse_request_id(raw).expect("id"), expected);
    }

    #[test]
    fn call_accepts_params_and_flags() {
        let cli = parse(&["jsonrps", "call", "rps.echo", "[1,2]", "--id", "x", "--notify"]);
        let CliCommand::Call {
            method,
            params,
            id,
            notify,
        } = cli.command
        else {
            panic!("expected call");
        };
        assert_eq!(method, "rps.echo");
        assert_eq!(params.as_deref(), Some("[1,2]"));
        assert_eq!(id, RequestId::from("x"));
        assert!(notify);
    }

    #[test]
    fn default_accept_header_is_sent() {
        let cli = parse(&["jsonrps", "-H", "X-Client: test", "handshake"]);
        let headers = cli.handshake_headers();
        assert_eq!(headers.get("Accept"), Some(jsonrps::DEFAULT_MIME_TYPE));
        assert_eq!(headers.get("X-Client"), Some("test"));
    }

    #[test]
    fn explicit_accept_header_replaces_default() {
        let cli = parse(&["jsonrps", "handshake", "--header", "Accept: text/plain"]);
        assert_eq!(cli.handshake_headers().get_all("Accept"), ["text/plain"]);
    }
}
