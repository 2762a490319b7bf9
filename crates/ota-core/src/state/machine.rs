//! Update session state machine.
//!
//! ```text
//! Idle --init--> Receiving --packet--> Receiving
//!                Receiving --finish (complete)--> Idle
//!                Receiving --abort / timeout--> Idle
//! ```

use std::fmt;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::flash::{FlashDevice, FlashError};
use crate::protocol::command::{InitRequest, Packet};
use crate::protocol::constants::*;
use crate::protocol::response::ErrorCode;
use crate::registry::VersionRegistry;

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Receiving,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "IDLE"),
            SessionState::Receiving => write!(f, "RECEIVING"),
        }
    }
}

/// Bounds an INIT must satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    pub max_image_size: u32,
    pub slot_a: u32,
    pub slot_b: u32,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_image_size: MAX_FILE_SIZE,
            slot_a: SLOT_A_ADDRESS,
            slot_b: SLOT_B_ADDRESS,
        }
    }
}

impl SessionLimits {
    pub fn is_slot(&self, address: u32) -> bool {
        address == self.slot_a || address == self.slot_b
    }
}

#[derive(Error, Debug)]
pub enum InitError {
    #[error("An update is already in progress")]
    AlreadyActive,
    #[error("Invalid image size {size} (maximum {max})")]
    BadSize { size: u32, max: u32 },
    #[error("Address 0x{0:08X} is not a slot")]
    BadAddress(u32),
    #[error("Flash erase failed: {0}")]
    Erase(#[source] FlashError),
}

impl InitError {
    /// Code reported in the ERROR response.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            InitError::AlreadyActive => ErrorCode::AlreadyActive,
            InitError::BadSize { .. } => ErrorCode::BadSize,
            InitError::BadAddress(_) => ErrorCode::BadAddress,
            InitError::Erase(_) => ErrorCode::EraseFailed,
        }
    }
}

#[derive(Error, Debug)]
pub enum PacketError {
    #[error("No update in progress")]
    NotActive,
    #[error("Packet sequence error: expected {expected}, got {actual}")]
    OutOfSequence { expected: u16, actual: u16 },
    #[error("Packet checksum error: expected 0x{expected:02X}, got 0x{actual:02X}")]
    Checksum { expected: u8, actual: u8 },
    #[error("Flash write failed: {0}")]
    Flash(#[source] FlashError),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FinishError {
    #[error("No update in progress")]
    NotActive,
    #[error("Incomplete update: received {received} of {expected} bytes")]
    Incomplete { received: u32, expected: u32 },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AbortError {
    #[error("No update to abort")]
    NotActive,
}

/// Image committed by a successful finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletedImage {
    pub version: u32,
    pub address: u32,
    pub size: u32,
}

/// State of the single in-flight update.
///
/// Outside `Receiving` the transfer fields are stale; `init` resets all of them.
#[derive(Debug, Default)]
pub struct UpdateSession {
    state: SessionState,
    version: u32,
    target_address: u32,
    total_size: u32,
    bytes_written: u32,
    expected_sequence: u16,
    last_activity: Option<Instant>,
}

impl UpdateSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Receiving
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn target_address(&self) -> u32 {
        self.target_address
    }

    pub fn total_size(&self) -> u32 {
        self.total_size
    }

    pub fn bytes_written(&self) -> u32 {
        self.bytes_written
    }

    pub fn expected_sequence(&self) -> u16 {
        self.expected_sequence
    }

    pub fn last_activity(&self) -> Option<Instant> {
        self.last_activity
    }

    /// Record that a frame was received.
    pub fn touch(&mut self, now: Instant) {
        self.last_activity = Some(now);
    }

    /// Whether an active session has been idle longer than `timeout`.
    pub fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        match (self.is_active(), self.last_activity) {
            (true, Some(last)) => now.saturating_duration_since(last) > timeout,
            _ => false,
        }
    }

    fn goto_state(&mut self, new_state: SessionState) {
        info!(from = %self.state, to = %new_state, "Session transition");
        self.state = new_state;
    }

    /// Validate INIT, erase the target region and start receiving.
    ///
    /// On any error the session stays `Idle`.
    pub fn init<F: FlashDevice + ?Sized>(
        &mut self,
        request: &InitRequest,
        limits: &SessionLimits,
        flash: &mut F,
        now: Instant,
    ) -> Result<(), InitError> {
        if self.is_active() {
            return Err(InitError::AlreadyActive);
        }
        if request.size == 0 || request.size > limits.max_image_size {
            return Err(InitError::BadSize {
                size: request.size,
                max: limits.max_image_size,
            });
        }
        if !limits.is_slot(request.address) {
            return Err(InitError::BadAddress(request.address));
        }
        // The erased region must not wrap past the top of the address space.
        let end = request
            .size
            .checked_next_multiple_of(ERASE_BLOCK_SIZE)
            .and_then(|len| request.address.checked_add(len));
        if end.is_none() {
            return Err(InitError::BadAddress(request.address));
        }

        let blocks = request.size.div_ceil(ERASE_BLOCK_SIZE);
        debug!(
            address = %format!("0x{:08X}", request.address),
            blocks,
            "Erasing target slot"
        );
        for block in 0..blocks {
            let address = request.address + block * ERASE_BLOCK_SIZE;
            flash
                .erase(address, ERASE_BLOCK_SIZE)
                .map_err(InitError::Erase)?;
        }

        self.version = request.version;
        self.target_address = request.address;
        self.total_size = request.size;
        self.bytes_written = 0;
        self.expected_sequence = 0;
        self.last_activity = Some(now);
        self.goto_state(SessionState::Receiving);
        info!(
            version = request.version,
            address = %format!("0x{:08X}", request.address),
            size = request.size,
            "Ready for data packets"
        );
        Ok(())
    }

    /// Check and commit one packet; returns the number of bytes programmed.
    ///
    /// Only the bytes still owed by the image are programmed, so pad bytes of
    /// the final packet never reach flash. Any error leaves the offset and the
    /// expected sequence untouched.
    pub fn accept_packet<F: FlashDevice + ?Sized>(
        &mut self,
        packet: &Packet,
        flash: &mut F,
    ) -> Result<u32, PacketError> {
        if !self.is_active() {
            return Err(PacketError::NotActive);
        }
        if packet.seq != self.expected_sequence {
            return Err(PacketError::OutOfSequence {
                expected: self.expected_sequence,
                actual: packet.seq,
            });
        }
        let actual = packet.computed_checksum();
        if actual != packet.checksum {
            return Err(PacketError::Checksum {
                expected: packet.checksum,
                actual,
            });
        }

        let remaining = self.total_size - self.bytes_written;
        let len = remaining.min(PACKET_SIZE as u32);
        if len > 0 {
            let address = self
                .target_address
                .checked_add(self.bytes_written)
                .ok_or(PacketError::Flash(FlashError::OutOfRange {
                    address: self.target_address,
                    len: self.bytes_written,
                }))?;
            flash
                .write(address, &packet.data[..len as usize])
                .map_err(PacketError::Flash)?;
        }

        self.bytes_written += len;
        self.expected_sequence = self.expected_sequence.wrapping_add(1);

        if packet.seq % 64 == 0 || self.bytes_written == self.total_size {
            debug!(
                written = self.bytes_written,
                total = self.total_size,
                "Progress"
            );
        }
        Ok(len)
    }

    /// Promote the received image if it is complete and return to `Idle`.
    pub fn finish(&mut self, registry: &mut VersionRegistry) -> Result<CompletedImage, FinishError> {
        if !self.is_active() {
            return Err(FinishError::NotActive);
        }
        if self.bytes_written != self.total_size {
            return Err(FinishError::Incomplete {
                received: self.bytes_written,
                expected: self.total_size,
            });
        }

        registry.promote(self.version, self.target_address);
        self.goto_state(SessionState::Idle);
        Ok(CompletedImage {
            version: self.version,
            address: self.target_address,
            size: self.total_size,
        })
    }

    /// Drop the active session. Written flash is left uncommitted.
    pub fn abort(&mut self) -> Result<(), AbortError> {
        if !self.is_active() {
            return Err(AbortError::NotActive);
        }
        warn!(
            written = self.bytes_written,
            total = self.total_size,
            "Aborting update"
        );
        self.goto_state(SessionState::Idle);
        Ok(())
    }
}
