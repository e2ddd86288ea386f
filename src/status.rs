//! Compact status/error representation shared by every layer of the engine.
//!
//! Mirrors the closed set of kinds carried by the reference implementation's
//! `Status` type: a successful result is simply `Ok(T)`; failures are one of a
//! small fixed set of kinds plus an optional, human-readable message. Two
//! messages may be chained, joined by `": "`, matching the on-disk/in-memory
//! layout the reference implementation uses for its packed state buffer.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// The closed set of error kinds the core ever produces.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Corruption(String),

    #[error("{0}")]
    NotSupported(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Builds a `NotFound` with a short message.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Error::NotFound(msg.into())
    }

    /// Builds a `NotFound` with two messages joined the way the reference
    /// implementation joins a status's primary and secondary message.
    pub fn not_found_chained<S: Into<String>, T: Into<String>>(msg: S, detail: T) -> Self {
        Error::NotFound(join(msg, detail))
    }

    pub fn corruption<S: Into<String>>(msg: S) -> Self {
        Error::Corruption(msg.into())
    }

    pub fn not_supported<S: Into<String>>(msg: S) -> Self {
        Error::NotSupported(msg.into())
    }

    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// True for the `NotFound` kind specifically; the memtable `get` path
    /// relies on distinguishing "resolved as a tombstone" from other errors.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

fn join<S: Into<String>, T: Into<String>>(msg: S, detail: T) -> String {
    format!("{}: {}", msg.into(), detail.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_recognized() {
        let err = Error::not_found("key absent");
        assert!(err.is_not_found());
        assert!(!Error::corruption("bad checksum").is_not_found());
    }

    #[test]
    fn chained_message_is_joined_with_colon_space() {
        let err = Error::not_found_chained("missing block", "offset 128");
        assert_eq!(err.to_string(), "missing block: offset 128");
    }

    #[test]
    fn io_error_converts_via_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
