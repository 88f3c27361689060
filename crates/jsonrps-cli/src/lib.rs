//! Runtime for the `jsonrps` command-line client.
//!
//! [`run`] parses arguments, dials the daemon, performs the client
//! handshake and then either prints the negotiated headers or sends a single
//! request. Output streams are injected so tests can capture them.

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use jsonrps::handshake::{self, Handshake};
use jsonrps::{JsonRpcRequest, Session};
use jsonrps_config::defaults::default_socket_endpoint;
use serde_json::Value;

mod cli;
mod errors;
mod transport;


use cli::{Cli, CliCommand};
use errors::AppError;

/// Runs the client with `args`, the first item being the program name.
///
/// Exit status is `0` on success, `1` for transport and handshake failures,
/// `2` for usage errors and `3` when the daemon answers with an error.
pub fn run<I, T, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
    W: Write,
    E: Write,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => return report_usage(&error, stdout, stderr),
    };
    match execute(&cli, stdout) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            if writeln!(stderr, "jsonrps: {error}").is_err() {
                return ExitCode::FAILURE;
            }
            ExitCode::from(error.exit_code())
        }
    }
}

fn report_usage<W: Write, E: Write>(
    error: &clap::Error,
    stdout: &mut W,
    stderr: &mut E,
) -> ExitCode {
    let rendered = error.render().to_string();
    let written = if error.use_stderr() {
        stderr.write_all(rendered.as_bytes())
    } else {
        stdout.write_all(rendered.as_bytes())
    };
    if written.is_err() {
        return ExitCode::FAILURE;
    }
    ExitCode::from(u8::try_from(error.exit_code()).unwrap_or(2))
}

fn execute<W: Write>(cli: &Cli, stdout: &mut W) -> Result<(), AppError> {
    let params = match &cli.command {
        CliCommand::Call {
            params: Some(raw), ..
        } => Some(serde_json::from_str::<Value>(raw).map_err(AppError::InvalidParams)?),
        _ => None,
    };

    let endpoint = cli.socket.clone().unwrap_or_else(default_socket_endpoint);
    let stream = transport::connect(&endpoint, cli.timeout())?;
    let session = open_session(handshake::connect(stream, cli.handshake_headers())?)?;

    let outcome = match &cli.command {
        CliCommand::Handshake => print_handshake(&session, stdout),
        CliCommand::Call {
            method, id, notify, ..
        } => {
            let request = if *notify {
                JsonRpcRequest::notification(method.as_str(), params)
            } else {
                JsonRpcRequest::new(method.as_str(), params, id.clone())
            };
            call(&session, &request, stdout)
        }
    };
    session.close();
    outcome
}

fn open_session(handshake: Handshake) -> Result<Session, AppError> {
    let Handshake {
        session,
        read_error,
    } = handshake;
    match read_error {
        Some(error) => {
            session.close();
            Err(AppError::IncompleteHandshake(error))
        }
        None => Ok(session),
    }
}

fn print_handshake<W: Write>(session: &Session, stdout: &mut W) -> Result<(), AppError> {
    writeln!(stdout, "{}", session.protocol_signature())?;
    for (name, value) in session.remote_headers().iter() {
        writeln!(stdout, "{name}: {value}")?;
    }
    Ok(())
}

fn call<W: Write>(
    session: &Session,
    request: &JsonRpcRequest,
    stdout: &mut W,
) -> Result<(), AppError> {
    session.write_request(request).map_err(AppError::Send)?;
    let Some(expected) = request.id.as_ref() else {
        return Ok(());
    };

    let response = loop {
        let response = session.read_response().map_err(AppError::Receive)?;
        if response.id.as_ref() == Some(expected) {
            break response;
        }
    };
    let line = serde_json::to_string(&response).map_err(|error| AppError::Output(error.into()))?;
    writeln!(stdout, "{line}")?;

    match response.error {
        Some(error) => Err(AppError::Remote {
            code: error.code,
            message: error.message,
        }),
        None => Ok(()),
    }
}
