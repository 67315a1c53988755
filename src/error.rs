//! Error types for ferry.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Every failure a connection, session or transfer can surface.
#[derive(Debug, Error)]
pub enum Error {
    /// Deadline elapsed, or the peer made no progress for longer than the idle threshold.
    #[error("operation timed out")]
    Timeout,

    /// Peer closed the stream mid-operation. Terminal for that connection.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// Protocol violation (bad field, oversized message, unexpected reply).
    #[error("malformed message: {0}")]
    Malformed(String),

    /// Control message started with an opcode outside the protocol.
    #[error("unknown opcode 0x{0:02x}")]
    UnknownOpcode(u8),

    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// Name cannot refer to a file in the flat served directory.
    #[error("invalid file name: {0:?}")]
    InvalidName(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Payload stream ended before the announced byte count.
    #[error("transfer truncated: expected {expected} bytes, got {received}")]
    Truncated { expected: u64, received: u64 },

    /// Upload bytes went out but the server never confirmed the full count.
    #[error("upload unconfirmed: sent {sent} bytes, server acknowledged {acknowledged:?}")]
    UploadUnconfirmed {
        sent: u64,
        acknowledged: Option<u64>,
    },

    /// The server answered with an ERROR response.
    #[error("server error: {0}")]
    Remote(String),

    #[error("cannot resolve address: {0}")]
    Unresolved(String),
}

impl Error {
    /// True for failures that belong to the I/O class (transport faults and short transfers).
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Truncated { .. } | Error::ConnectionClosed
        )
    }
}

/// Result type alias using ferry's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
