//! Error types for tunmitm.

use std::io;

use thiserror::Error;

use crate::types::Network;

/// Result type alias for tunmitm operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for tunmitm.
#[derive(Error, Debug)]
pub enum Error {
    // Virtual stack errors
    #[error("stack error: {0}")]
    Stack(#[from] StackError),

    // Link errors
    #[error("buffer overrun: requested {requested} bytes, pool holds {capacity}")]
    BufferOverrun { requested: usize, capacity: usize },

    #[error("endpoint already attached")]
    AlreadyAttached,

    #[error("TUN device error: {0}")]
    Tun(String),

    // Forwarding errors
    #[error("dial {network} {addr} failed: {reason}")]
    DialFailed {
        network: Network,
        addr: String,
        reason: String,
    },

    // Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Errors reported by the virtual network stack at its API boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StackError {
    #[error("connection refused")]
    ConnectionRefused,

    #[error("connection aborted")]
    Aborted,

    #[error("no buffer space available")]
    NoBufferSpace,

    #[error("option not supported: {0}")]
    NotSupported(&'static str),

    #[error("invalid option value: {0}")]
    InvalidOptionValue(&'static str),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Check if error only affects a single flow.
    pub fn is_per_flow(&self) -> bool {
        matches!(self, Error::Stack(_) | Error::DialFailed { .. })
    }
}

/// Check if an IO error is the ordinary end of a bridged connection.
pub fn is_connection_closed(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
    )
}
