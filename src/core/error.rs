//! Error types for trident-dl
//!
//! Every failure inside a worker is caught at the worker boundary and turned
//! into an ERROR transition; only `InvalidSource` and `IllegalTransition`
//! ever reach a caller synchronously.

use std::fmt;

use crate::core::download::{Command, Status};

/// Main error type for trident-dl operations
#[derive(Debug)]
pub enum Error {
    /// Malformed URL or unsupported scheme at submission time
    InvalidSource(String),

    /// Cannot establish the network session (DNS, auth, socket)
    Connection(String),

    /// Remote object missing or reporting an invalid length
    Metadata(String),

    /// Free space on the destination volume is not strictly greater than the remote size
    InsufficientSpace { available: u64, required: u64 },

    /// Failure opening, seeking or writing the destination file
    LocalIo(std::io::Error),

    /// Network failure or stall after the stream was opened
    Transfer(String),

    /// Command issued from a status that does not allow it
    IllegalTransition { status: Status, command: Command },

    /// No download with this id in the visible set
    NotFound(u64),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidSource(msg) => {
                write!(f, "Invalid download URL: {}", msg)
            }
            Error::Connection(msg) => {
                write!(f, "Connection error: {}", msg)
            }
            Error::Metadata(msg) => {
                write!(f, "Invalid or empty remote object: {}", msg)
            }
            Error::InsufficientSpace { available, required } => {
                write!(
                    f,
                    "Insufficient disk space: {} free, download needs {}",
                    crate::core::download::display_size(*available),
                    crate::core::download::display_size(*required)
                )
            }
            Error::LocalIo(err) => {
                write!(f, "Local I/O error: {}", err)
            }
            Error::Transfer(msg) => {
                write!(f, "Transfer error: {}", msg)
            }
            Error::IllegalTransition { status, command } => {
                write!(f, "Cannot {} a download that is {}", command, status)
            }
            Error::NotFound(id) => {
                write!(f, "No download with id {}", id)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::LocalIo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::LocalIo(err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || err.is_request() {
            Error::Connection(err.to_string())
        } else {
            Error::Transfer(err.to_string())
        }
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::InvalidSource(err.to_string())
    }
}

impl From<suppaftp::FtpError> for Error {
    fn from(err: suppaftp::FtpError) -> Self {
        Error::Connection(err.to_string())
    }
}

impl From<ssh2::Error> for Error {
    fn from(err: ssh2::Error) -> Self {
        Error::Connection(err.to_string())
    }
}

/// Convenience result type for trident-dl operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_space_message_uses_display_sizes() {
        let err = Error::InsufficientSpace {
            available: 1024,
            required: 3 * 1024 * 1024,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient disk space: 1 KB free, download needs 3 MB"
        );
    }

    #[test]
    fn test_illegal_transition_message() {
        let err = Error::IllegalTransition {
            status: Status::Downloading,
            command: Command::Clear,
        };
        assert_eq!(err.to_string(), "Cannot clear a download that is Downloading");
    }

    #[test]
    fn test_io_error_conversion_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err: Error = io.into();
        assert!(matches!(err, Error::LocalIo(_)));
        assert!(std::error::Error::source(&err).is_some());
    }
}
