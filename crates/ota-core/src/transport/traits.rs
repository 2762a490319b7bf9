//! Byte transport abstraction.
//!
//! Defines the `ByteTransport` trait for the serial link,
//! allowing different implementations (TCP bridge, mock, etc.).

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to open transport: {0}")]
    OpenFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Peer disconnected")]
    Disconnected,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    pub(crate) fn timeout(timeout: Duration) -> Self {
        Self::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Whether the error only means "no input yet".
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout { .. })
    }
}

/// Abstract byte-oriented link.
///
/// Reads are all-or-nothing: `read_exact` either returns exactly `len`
/// bytes or fails with `Timeout` and leaves every buffered byte in place,
/// so a later call with a longer deadline still sees them.
pub trait ByteTransport: Send {
    /// Wait at most `timeout` for `len` bytes.
    fn read_exact(&self, len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    /// Write raw bytes to the link.
    fn write(&self, data: &[u8]) -> Result<usize, TransportError>;

    /// Push buffered output onto the wire.
    fn flush(&self) -> Result<(), TransportError> {
        Ok(())
    }
}
