//! Status codes written on status lines.

use std::fmt;

/// Numeric status carried on a `<Signature> <Code> <Reason>` status line.
///
/// Codes follow HTTP numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(u16);

impl Status {
    /// The session was accepted.
    pub const OK: Self = Self(200);
    /// The peer sent a malformed header block.
    pub const BAD_REQUEST: Self = Self(400);
    /// No handler accepts the session.
    pub const NOT_IMPLEMENTED: Self = Self(501);
    /// The server is shutting down.
    pub const SERVICE_UNAVAILABLE: Self = Self(503);

    /// Wraps an arbitrary status code.
    #[must_use]
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Returns the numeric code.
    #[must_use]
    pub const fn code(self) -> u16 {
        self.0
    }

    /// Returns true for codes in the 2xx range.
    #[must_use]
    pub const fn is_success(self) -> bool {
        self.0 >= 200 && self.0 < 300
    }

    /// Canonical reason phrase, empty for codes without one.
    #[must_use]
    pub const fn reason(self) -> &'static str {
        match self.0 {
            200 => "OK",
            202 => "Accepted",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            406 => "Not Acceptable",
            408 => "Request Timeout",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            503 => "Service Unavailable",
            _ => "",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{} {}", self.0, self.reason())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Status::OK, "200 OK")]
    #[case(Status::BAD_REQUEST, "400 Bad Request")]
    #[case(Status::NOT_IMPLEMENTED, "501 Not Implemented")]
    fn renders_code_and_reason(#[case] status: Status, #[case] expected: &str) {
        assert_eq!(status.to_string(), expected);
    }

    #[test]
    fn success_range() {
        assert!(Status::OK.is_success());
        assert!(Status::new(204).is_success());
        assert!(!Status::BAD_REQUEST.is_success());
    }
}
