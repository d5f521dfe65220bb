//! Error types for irflash.

use std::io;
use thiserror::Error;

/// Result type for irflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for irflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (socket, LIRC device, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Unparseable or out-of-range hex record.
    #[error("Malformed image at line {line}: {reason}")]
    MalformedImage {
        /// 1-based line number in the hex stream.
        line: usize,
        /// What was wrong with the record.
        reason: String,
    },

    /// Hex record checksum mismatch (strict mode only).
    #[error("Checksum mismatch at line {line}: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch {
        /// 1-based line number in the hex stream.
        line: usize,
        /// Checksum computed from the record bytes.
        expected: u8,
        /// Checksum stored in the record.
        actual: u8,
    },

    /// Socket bind or accept failed; the server leaves the listening state.
    #[error("Listener failure: {0}")]
    ListenerFailure(String),

    /// A single upload failed; the listener keeps running.
    #[error("Transfer aborted: {0}")]
    TransferAborted(#[source] Box<Error>),

    /// Internal protocol invariant broken (page counter overflow, frame length).
    #[error("Protocol invariant violated: {0}")]
    ProtocolInvariantViolation(String),

    /// Wake message cannot be encoded.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// The operation was cancelled by a server stop.
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Wrap a per-connection failure, leaving cancellations as they are.
    pub(crate) fn aborted(self) -> Self {
        match self {
            Self::Cancelled | Self::TransferAborted(_) => self,
            other => Self::TransferAborted(Box::new(other)),
        }
    }
}
