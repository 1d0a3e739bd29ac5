//! Error types for mailsweep
//!
//! Errors are split by how the engine reacts to them: connectivity
//! failures are retried with a reconnect, everything else surfaces to
//! the unit of work that produced it.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Transport-level failure (abort, timeout, socket error).
    #[error("Connection error: {0}")]
    Connectivity(String),

    /// The server rejected a command (missing folder, bad criterion).
    #[error("Server rejected command: {0}")]
    Protocol(String),

    /// A single message header could not be interpreted.
    #[error("Header parse error: {0}")]
    Parse(String),

    /// Missing credentials or bad arguments, detected before any I/O.
    #[error("Setup error: {0}")]
    Setup(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),
}

impl Error {
    /// Whether a fresh connection might make the failed call succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Connectivity(_) | Self::Io(_))
    }

    /// Classify an `async-imap` failure raised while running `context`.
    pub(crate) fn from_imap(context: &str, err: async_imap::error::Error) -> Self {
        use async_imap::error::Error as Imap;

        match err {
            Imap::Io(e) => Self::Connectivity(format!("{context}: {e}")),
            Imap::ConnectionLost => Self::Connectivity(format!("{context}: connection lost")),
            other => Self::Protocol(format!("{context}: {other}")),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
