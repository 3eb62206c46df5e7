//! Request-level error kinds and their HTTP disposition.
//!
//! A macro-driven status/close-behavior table, in the same spirit as the
//! error-to-response mapping a request-handling crate typically keeps
//! close to its error enum; the engine (`crate::engine`) turns a kind into
//! an actual [`crate::http::response::Response`], since this server's error
//! bodies are always empty and carry no JSON error-format knob.

use std::{error, fmt, io};

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ErrorKind {
    /// Request line used a method other than GET/HEAD.
    UnknownMethod,
    /// Request line, headers, or version string was malformed.
    Malformed,
    /// Request block exceeded the connection buffer before CRLFCRLF appeared.
    TooLarge,
    /// Version string outside {HTTP/1.0, HTTP/1.1}.
    UnsupportedVersion,
    /// Path resolution rejected the request (traversal, NUL, escapes root).
    PathRejected,
    /// No such file under the document root.
    NotFound,
    /// Allocation, compression, or I/O failure before any bytes were sent.
    Internal,
}

macro_rules! dispositions {
    ($($name:ident => $code:expr, $close:expr;)*) => {
        impl ErrorKind {
            /// The numeric status code this error kind maps to (spec §7).
            pub(crate) const fn status(&self) -> u16 {
                match self { $( Self::$name => $code, )* }
            }

            /// Whether this disposition forces connection close per spec §4.G
            /// keep-alive rules ("any non-2xx outcome caused by a client error
            /// ... forces close").
            pub(crate) const fn forces_close(&self) -> bool {
                match self { $( Self::$name => $close, )* }
            }
        }
    };
}

dispositions! {
    Malformed => 400, true;
    TooLarge => 413, true;
    UnsupportedVersion => 505, true;
    UnknownMethod => 501, true;
    PathRejected => 403, true;
    NotFound => 404, false;
    Internal => 500, true;
}

impl error::Error for ErrorKind {}
impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<io::Error> for ErrorKind {
    fn from(_: io::Error) -> Self {
        ErrorKind::Internal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_force_close() {
        assert!(ErrorKind::PathRejected.forces_close());
        assert_eq!(ErrorKind::PathRejected.status(), 403);
    }

    #[test]
    fn not_found_does_not_force_close() {
        assert!(!ErrorKind::NotFound.forces_close());
    }

    #[test]
    fn status_codes_match_spec_table() {
        assert_eq!(ErrorKind::Malformed.status(), 400);
        assert_eq!(ErrorKind::TooLarge.status(), 413);
        assert_eq!(ErrorKind::UnsupportedVersion.status(), 505);
        assert_eq!(ErrorKind::UnknownMethod.status(), 501);
        assert_eq!(ErrorKind::PathRejected.status(), 403);
        assert_eq!(ErrorKind::NotFound.status(), 404);
    }
}
