//! Agent configuration.
//!
//! Every field defaults to the protocol constant of the same meaning, so an
//! empty TOML file describes the stock device.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::constants::*;
use crate::protocol::frame::FrameCodec;
use crate::state::machine::SessionLimits;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be non-zero")]
    Zero(&'static str),
    #[error("payload_timeout_ms ({payload}) must exceed header_timeout_ms ({header})")]
    PayloadTimeoutTooShort { header: u64, payload: u64 },
    #[error("slot_a and slot_b must differ (both 0x{0:08X})")]
    SameSlot(u32),
    #[error("Slot address 0x{0:08X} is not aligned to the erase block size")]
    MisalignedSlot(u32),
    #[error("max_image_size {size} exceeds the {limit} bytes available per slot")]
    ImageTooLarge { size: u32, limit: u32 },
    #[error("Slot at 0x{0:08X} runs past the end of the 32-bit address space")]
    SlotOutOfRange(u32),
}

/// Tunables of the device agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Wait for the 2 header bytes of a frame.
    pub header_timeout_ms: u64,
    /// Wait for payload + checksum; must be longer than the header wait.
    pub payload_timeout_ms: u64,
    /// Idle time after which an active session is aborted.
    pub session_timeout_ms: u64,
    /// Pause between poll iterations.
    pub poll_interval_ms: u64,
    /// Largest image INIT accepts.
    pub max_image_size: u32,
    pub slot_a: u32,
    pub slot_b: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            header_timeout_ms: HEADER_TIMEOUT.as_millis() as u64,
            payload_timeout_ms: PAYLOAD_TIMEOUT.as_millis() as u64,
            session_timeout_ms: SESSION_TIMEOUT.as_millis() as u64,
            poll_interval_ms: POLL_INTERVAL.as_millis() as u64,
            max_image_size: MAX_FILE_SIZE,
            slot_a: SLOT_A_ADDRESS,
            slot_b: SLOT_B_ADDRESS,
        }
    }
}

impl AgentConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AgentConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.header_timeout_ms == 0 {
            return Err(ConfigError::Zero("header_timeout_ms"));
        }
        if self.session_timeout_ms == 0 {
            return Err(ConfigError::Zero("session_timeout_ms"));
        }
        if self.max_image_size == 0 {
            return Err(ConfigError::Zero("max_image_size"));
        }
        if self.payload_timeout_ms <= self.header_timeout_ms {
            return Err(ConfigError::PayloadTimeoutTooShort {
                header: self.header_timeout_ms,
                payload: self.payload_timeout_ms,
            });
        }
        if self.slot_a == self.slot_b {
            return Err(ConfigError::SameSlot(self.slot_a));
        }
        for slot in [self.slot_a, self.slot_b] {
            if slot % ERASE_BLOCK_SIZE != 0 {
                return Err(ConfigError::MisalignedSlot(slot));
            }
        }

        // Slots must not overlap, and the 16-bit sequence must not wrap.
        let slot_span = self.slot_a.abs_diff(self.slot_b);
        let sequence_span = (u16::MAX as u32 + 1) * PACKET_SIZE as u32;
        let limit = slot_span.min(sequence_span);
        if self.max_image_size > limit {
            return Err(ConfigError::ImageTooLarge {
                size: self.max_image_size,
                limit,
            });
        }

        let slot_len = self.max_image_size.next_multiple_of(ERASE_BLOCK_SIZE);
        for slot in [self.slot_a, self.slot_b] {
            if slot.checked_add(slot_len).is_none() {
                return Err(ConfigError::SlotOutOfRange(slot));
            }
        }
        Ok(())
    }

    pub fn frame_codec(&self) -> FrameCodec {
        FrameCodec::new(
            Duration::from_millis(self.header_timeout_ms),
            Duration::from_millis(self.payload_timeout_ms),
        )
    }

    pub fn session_limits(&self) -> SessionLimits {
        SessionLimits {
            max_image_size: self.max_image_size,
            slot_a: self.slot_a,
            slot_b: self.slot_b,
        }
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Lowest address the flash device must cover.
    pub fn flash_base(&self) -> u32 {
        self.slot_a.min(self.slot_b)
    }

    /// Bytes from `flash_base` to the end of the upper slot.
    pub fn flash_size(&self) -> u32 {
        self.slot_a
            .abs_diff(self.slot_b)
            .saturating_add(self.max_image_size.next_multiple_of(ERASE_BLOCK_SIZE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AgentConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.frame_codec().header_timeout, HEADER_TIMEOUT);
        assert_eq!(config.frame_codec().payload_timeout, PAYLOAD_TIMEOUT);
        assert_eq!(config.flash_base(), SLOT_A_ADDRESS);
        assert_eq!(config.flash_size(), 2 * MAX_FILE_SIZE);
    }

    #[test]
    fn test_validation_errors() {
        let config = AgentConfig {
            payload_timeout_ms: 2000,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::PayloadTimeoutTooShort { .. })
        ));

        let config = AgentConfig {
            slot_b: SLOT_A_ADDRESS,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::SameSlot(SLOT_A_ADDRESS)));

        let config = AgentConfig {
            max_image_size: MAX_FILE_SIZE + 1,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ImageTooLarge { .. })
        ));

        let config = AgentConfig {
            slot_b: SLOT_B_ADDRESS + 1,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::MisalignedSlot(_))));
    }

    #[test]
    fn test_slot_at_top_of_address_space_rejected() {
        let config = AgentConfig {
            slot_a: 0,
            slot_b: 0xFFFF_F000,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::SlotOutOfRange(0xFFFF_F000))
        );
        assert_eq!(config.flash_size(), u32::MAX);

        let config = AgentConfig {
            slot_a: 0,
            slot_b: 0xFFE0_0000,
            ..Default::default()
        };
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AgentConfig = toml::from_str("session_timeout_ms = 500\n").unwrap();
        assert_eq!(config.session_timeout(), Duration::from_millis(500));
        assert_eq!(config.slot_a, SLOT_A_ADDRESS);
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        let config = AgentConfig {
            header_timeout_ms: 100,
            payload_timeout_ms: 250,
            ..Default::default()
        };
        config.save_to_file(&path).unwrap();
        assert_eq!(AgentConfig::load_from_file(&path).unwrap(), config);

        std::fs::write(&path, "header_timeout_ms = 9000\n").unwrap();
        assert!(AgentConfig::load_from_file(&path).is_err());
    }
}
