//! Wire grammar for header blocks and status lines.
//!
//! A header block is a run of `Name: Value\r\n` lines closed by one empty
//! line. The separator is exactly colon-then-space; anything else is
//! malformed. A status line, `<Signature> <Code> <Reason>\r\n`, may precede a
//! header block when a server answers a handshake.

use crate::Headers;
use crate::Status;

/// Separator between a header name and its value.
pub(crate) const HEADER_SEPARATOR: &str = ": ";

/// Line that closes a header block.
pub(crate) const BLOCK_TERMINATOR: &[u8] = b"\r\n";

/// Classification of one raw header line.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum HeaderLine<'a> {
    /// The empty line closing the block.
    Terminator,
    /// A `Name: Value` pair with the value trimmed.
    Field { name: &'a str, value: &'a str },
    /// A line without the mandatory separator.
    Malformed,
}

/// Parsed `<Signature> <Code> <Reason>` status line.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct StatusLine<'a> {
    pub(crate) signature: &'a str,
    pub(crate) status: Status,
    pub(crate) reason: &'a str,
}

/// Removes one trailing `\n` or `\r\n`.
pub(crate) fn strip_line_ending(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

pub(crate) fn parse_header_line(line: &str) -> HeaderLine<'_> {
    let content = strip_line_ending(line);
    if content.is_empty() {
        return HeaderLine::Terminator;
    }
    match content.split_once(HEADER_SEPARATOR) {
        Some((name, value)) => HeaderLine::Field {
            name,
            value: value.trim(),
        },
        None => HeaderLine::Malformed,
    }
}

/// Recognises a status line; header fields never parse as one because their
/// first token ends with a colon.
pub(crate) fn parse_status_line(line: &str) -> Option<StatusLine<'_>> {
    let content = strip_line_ending(line);
    let (signature, rest) = content.split_once(' ')?;
    if !signature.contains('/') || signature.contains(':') {
        return None;
    }
    let (code, reason) = rest.split_once(' ').unwrap_or((rest, ""));
    if code.len() != 3 {
        return None;
    }
    let code = code.parse::<u16>().ok()?;
    Some(StatusLine {
        signature,
        status: Status::new(code),
        reason: reason.trim(),
    })
}

/// Renders `headers` followed by the block terminator.
pub(crate) fn render_header_block(headers: &Headers) -> Vec<u8> {
    let mut block = headers.to_string().into_bytes();
    block.extend_from_slice(BLOCK_TERMINATOR);
    block
}

/// Renders a status line followed by `headers` and the block terminator.
pub(crate) fn render_status_block(signature: &str, status: Status, headers: &Headers) -> Vec<u8> {
    let mut block = format!("{signature} {status}\r\n").into_bytes();
    block.extend(render_header_block(headers));
    block
}
