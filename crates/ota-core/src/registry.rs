//! Version registry: which slot holds the current image and which the backup.
//!
//! The persisted record is 16 bytes, little-endian, in the same order as the
//! VERSION_INFO payload: current version, backup version, current address,
//! backup address.

use tracing::{debug, info, warn};

use crate::protocol::constants::VERSION_RECORD_KEY;
use crate::protocol::response::VersionInfo;
use crate::storage::{RecordStore, StorageError};

/// Current/backup `{version, slot address}` pairs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VersionRegistry {
    pub current_version: u32,
    pub current_address: u32,
    pub backup_version: u32,
    pub backup_address: u32,
}

impl VersionRegistry {
    pub const RECORD_SIZE: usize = VersionInfo::SIZE;

    /// Load the persisted record.
    ///
    /// A missing record, or one of unexpected size, yields the all-zero
    /// registry. Only a failing store is an error.
    pub fn load<S: RecordStore + ?Sized>(store: &S) -> Result<Self, StorageError> {
        match store.load(VERSION_RECORD_KEY)? {
            Some(bytes) => match Self::from_bytes(&bytes) {
                Some(registry) => {
                    info!(
                        current_version = registry.current_version,
                        current_address = %format!("0x{:08X}", registry.current_address),
                        backup_version = registry.backup_version,
                        backup_address = %format!("0x{:08X}", registry.backup_address),
                        "Version registry loaded"
                    );
                    Ok(registry)
                }
                None => {
                    warn!(len = bytes.len(), "Version record has unexpected size, using defaults");
                    Ok(Self::default())
                }
            },
            None => {
                info!("No version record, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Persist the full record in one save.
    pub fn save<S: RecordStore + ?Sized>(&self, store: &mut S) -> Result<(), StorageError> {
        store.save(VERSION_RECORD_KEY, &self.to_bytes())?;
        debug!("Version registry saved");
        Ok(())
    }

    /// Make `(version, address)` current and demote the previous current to backup.
    ///
    /// Unconditional: promoting the slot that already is current collapses
    /// both entries onto one address. Choosing the other slot is the peer's job.
    pub fn promote(&mut self, version: u32, address: u32) {
        self.backup_version = self.current_version;
        self.backup_address = self.current_address;
        self.current_version = version;
        self.current_address = address;
    }

    pub fn version_info(&self) -> VersionInfo {
        VersionInfo {
            current_version: self.current_version,
            backup_version: self.backup_version,
            current_address: self.current_address,
            backup_address: self.backup_address,
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::RECORD_SIZE] {
        self.version_info().to_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        VersionInfo::from_bytes(bytes).map(|info| Self {
            current_version: info.current_version,
            current_address: info.current_address,
            backup_version: info.backup_version,
            backup_address: info.backup_address,
        })
    }
}
