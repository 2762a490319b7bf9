//! Frame codec.
//!
//! Wire layout in both directions:
//!
//! ```text
//! [code:1][length:1][payload:length][checksum:1]
//! ```
//!
//! The checksum is the XOR of every preceding byte of the frame. It catches
//! most line noise and truncation but is not an integrity guarantee.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, trace, warn};

use super::constants::{HEADER_TIMEOUT, MAX_PAYLOAD_LEN, PAYLOAD_TIMEOUT};
use crate::transport::{ByteTransport, TransportError};

/// Capacity-checked frame payload buffer.
pub type Payload = heapless::Vec<u8, MAX_PAYLOAD_LEN>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Payload too long: {len} bytes, maximum 250")]
    PayloadTooLong { len: usize },
}

/// Why `decode` produced no frame.
///
/// Everything except a transport failure is the silent "no frame" outcome:
/// the bytes are dropped and nothing is sent back.
#[derive(Error, Debug)]
pub enum DecodeOutcome {
    #[error("No frame header within {timeout_ms}ms")]
    Idle { timeout_ms: u64 },

    #[error("Length byte {length} exceeds 250 (code 0x{code:02X})")]
    Oversized { code: u8, length: u8 },

    #[error("Payload of {length} bytes incomplete within {timeout_ms}ms (code 0x{code:02X})")]
    Truncated { code: u8, length: u8, timeout_ms: u64 },

    #[error("Frame checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    BadChecksum { expected: u8, actual: u8 },

    #[error(transparent)]
    Transport(TransportError),
}

impl DecodeOutcome {
    /// Whether the link itself is gone (as opposed to simply no valid input).
    pub fn is_disconnect(&self) -> bool {
        matches!(self, DecodeOutcome::Transport(TransportError::Disconnected))
    }

    /// Whether input arrived but was discarded.
    pub fn is_dropped_frame(&self) -> bool {
        matches!(
            self,
            DecodeOutcome::Oversized { .. }
                | DecodeOutcome::Truncated { .. }
                | DecodeOutcome::BadChecksum { .. }
        )
    }
}

/// XOR-fold of `data`.
pub fn xor_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc ^ b)
}

/// One validated frame, in either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command code (requests) or response code (responses).
    pub code: u8,
    pub payload: Payload,
}

impl Frame {
    pub fn new(code: u8, payload: &[u8]) -> Result<Self, FrameError> {
        let payload = Payload::from_slice(payload)
            .map_err(|_| FrameError::PayloadTooLong { len: payload.len() })?;
        Ok(Self { code, payload })
    }

    /// Frame from a fixed-size payload; the size bound is checked at compile time.
    pub fn from_array<const N: usize>(code: u8, data: [u8; N]) -> Self {
        const { assert!(N <= MAX_PAYLOAD_LEN) };
        let mut payload = Payload::new();
        // Cannot overflow, see the assertion above.
        let _ = payload.extend_from_slice(&data);
        Self { code, payload }
    }

    /// Frame without payload.
    pub fn empty(code: u8) -> Self {
        Self {
            code,
            payload: Payload::new(),
        }
    }

    /// Payload length as carried in the length byte.
    pub fn len(&self) -> u8 {
        // Bounded by the payload capacity (250).
        self.payload.len() as u8
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// XOR of code, length and payload.
    pub fn checksum(&self) -> u8 {
        self.code ^ self.len() ^ xor_checksum(&self.payload)
    }

    /// Serialize to wire bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.payload.len() + 3);
        out.push(self.code);
        out.push(self.len());
        out.extend_from_slice(&self.payload);
        out.push(self.checksum());
        out
    }
}

/// Reads and writes frames with bounded waits.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    /// Wait for the 2 header bytes.
    pub header_timeout: Duration,
    /// Wait for payload + checksum once the header is in.
    pub payload_timeout: Duration,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self {
            header_timeout: HEADER_TIMEOUT,
            payload_timeout: PAYLOAD_TIMEOUT,
        }
    }
}

impl FrameCodec {
    pub fn new(header_timeout: Duration, payload_timeout: Duration) -> Self {
        Self {
            header_timeout,
            payload_timeout,
        }
    }

    /// Try to extract one complete, checksummed frame.
    ///
    /// A frame is either returned whole or discarded whole.
    pub fn decode<T: ByteTransport + ?Sized>(&self, transport: &T) -> Result<Frame, DecodeOutcome> {
        let header = match transport.read_exact(2, self.header_timeout) {
            Ok(h) => h,
            Err(e) if e.is_timeout() => {
                return Err(DecodeOutcome::Idle {
                    timeout_ms: self.header_timeout.as_millis() as u64,
                });
            }
            Err(e) => return Err(DecodeOutcome::Transport(e)),
        };
        let (code, length) = (header[0], header[1]);

        // Desync guard: the header is consumed, scanning restarts after it.
        if length as usize > MAX_PAYLOAD_LEN {
            warn!(code = %format!("0x{:02X}", code), length, "Suspicious length byte");
            return Err(DecodeOutcome::Oversized { code, length });
        }

        let rest = match transport.read_exact(length as usize + 1, self.payload_timeout) {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                warn!(code = %format!("0x{:02X}", code), length, "Timeout waiting for frame payload");
                return Err(DecodeOutcome::Truncated {
                    code,
                    length,
                    timeout_ms: self.payload_timeout.as_millis() as u64,
                });
            }
            Err(e) => return Err(DecodeOutcome::Transport(e)),
        };

        let (body, trailer) = rest.split_at(length as usize);
        let expected = code ^ length ^ xor_checksum(body);
        let actual = trailer[0];
        if expected != actual {
            warn!(
                expected = %format!("0x{:02X}", expected),
                actual = %format!("0x{:02X}", actual),
                "Frame checksum error"
            );
            return Err(DecodeOutcome::BadChecksum { expected, actual });
        }

        let payload =
            Payload::from_slice(body).map_err(|_| DecodeOutcome::Oversized { code, length })?;
        trace!(code = %format!("0x{:02X}", code), length, "Frame decoded");
        Ok(Frame { code, payload })
    }

    /// Serialize `frame` and write it out, then flush.
    pub fn send<T: ByteTransport + ?Sized>(
        &self,
        transport: &T,
        frame: &Frame,
    ) -> Result<(), TransportError> {
        let bytes = frame.to_bytes();
        transport.write(&bytes)?;
        transport.flush()?;
        debug!(code = %format!("0x{:02X}", frame.code), len = frame.len(), "Frame sent");
        Ok(())
    }
}
