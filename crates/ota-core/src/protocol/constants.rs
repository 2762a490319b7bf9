//! Protocol constants for the serial OTA link.
//!
//! Both ends of the link must agree on these values; the host uploader and
//! the device agent in this crate share them.

use std::time::Duration;

// ============================================================================
// Command Codes (Host -> Device)
// ============================================================================

/// Start an update session: `{u32 version, u32 address, u32 size}`.
pub const CMD_INIT: u8 = 0x01;

/// One image packet: `{u16 seq, u8 checksum, u8[16] data}`.
pub const CMD_SEND_PACKET: u8 = 0x02;

/// Commit the received image and promote its slot.
pub const CMD_FINISH: u8 = 0x03;

/// Query the version registry.
pub const CMD_GET_VERSION: u8 = 0x04;

/// Discard the active session.
pub const CMD_ABORT: u8 = 0x05;

// ============================================================================
// Response Codes (Device -> Host)
// ============================================================================

pub const RESP_ACK: u8 = 0x10;
pub const RESP_NACK: u8 = 0x11;
pub const RESP_READY: u8 = 0x12;
pub const RESP_CHECKSUM_ERROR: u8 = 0x13;
/// `{u32 current_version, u32 backup_version, u32 current_address, u32 backup_address}`
pub const RESP_VERSION_INFO: u8 = 0x14;
/// Optional one-byte payload, see the `ERR_*` codes. Bare ERROR means flash write failure.
pub const RESP_ERROR: u8 = 0x15;

// ============================================================================
// ERROR Payload Codes
// ============================================================================

pub const ERR_BAD_LENGTH: u8 = 1;
pub const ERR_ALREADY_ACTIVE: u8 = 2;
pub const ERR_BAD_SIZE: u8 = 3;
pub const ERR_BAD_ADDRESS: u8 = 4;
pub const ERR_ERASE_FAILED: u8 = 5;

// ============================================================================
// Size Constants
// ============================================================================

/// Image bytes carried by one SEND_PACKET.
pub const PACKET_SIZE: usize = 16;

/// SEND_PACKET payload: seq (2) + checksum (1) + data (16).
pub const PACKET_PAYLOAD_LEN: usize = 2 + 1 + PACKET_SIZE;

/// INIT payload: version + address + size.
pub const INIT_PAYLOAD_LEN: usize = 12;

/// VERSION_INFO payload: four u32 values.
pub const VERSION_INFO_LEN: usize = 16;

/// Largest payload a frame may carry. Larger length bytes are treated as desync.
pub const MAX_PAYLOAD_LEN: usize = 250;

/// Flash erase granularity.
pub const ERASE_BLOCK_SIZE: u32 = 4096;

/// Largest image accepted by INIT.
pub const MAX_FILE_SIZE: u32 = 1024 * 1024;

/// Byte used to pad the final packet of an image on the host side.
pub const PAD_BYTE: u8 = 0xFF;

// ============================================================================
// Slot Layout
// ============================================================================

/// Slot A base address.
pub const SLOT_A_ADDRESS: u32 = 0x0020_0000;

/// Slot B base address.
pub const SLOT_B_ADDRESS: u32 = 0x0030_0000;

// ============================================================================
// Timing
// ============================================================================

/// Time allowed for the 2 header bytes to arrive.
pub const HEADER_TIMEOUT: Duration = Duration::from_millis(2000);

/// Time allowed for payload + checksum once a header was accepted.
pub const PAYLOAD_TIMEOUT: Duration = Duration::from_millis(5000);

/// Idle time after which an active session is aborted by the device.
pub const SESSION_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Delay between poll iterations of the agent loop.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Retries the host makes per step before giving up.
pub const HOST_MAX_RETRIES: u32 = 3;

/// Record key of the persisted version registry.
pub const VERSION_RECORD_KEY: &str = "version_info.bin";
