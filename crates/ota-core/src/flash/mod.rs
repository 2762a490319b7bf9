//! Flash device abstraction.
//!
//! The update session only ever erases whole 4096-byte blocks and programs
//! bytes inside a region it erased first.

pub mod file;
pub mod mem;

pub use file::FileFlash;
pub use mem::MemFlash;

use thiserror::Error;

use crate::protocol::constants::ERASE_BLOCK_SIZE;

#[derive(Error, Debug)]
pub enum FlashError {
    #[error("Address range 0x{address:08X}+{len} outside device")]
    OutOfRange { address: u32, len: u32 },

    #[error("Erase region 0x{address:08X}+{len} not aligned to 4096")]
    Misaligned { address: u32, len: u32 },

    #[error("Erase failed at 0x{address:08X}")]
    EraseFailed { address: u32 },

    #[error("Program failed at 0x{address:08X}")]
    WriteFailed { address: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Erase/program primitives of the flash part.
pub trait FlashDevice: Send {
    /// Erase `len` bytes at `address`; both must be block aligned.
    fn erase(&mut self, address: u32, len: u32) -> Result<(), FlashError>;

    /// Program `data` at `address`.
    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError>;

    /// Read back `len` bytes.
    fn read(&self, address: u32, len: u32) -> Result<Vec<u8>, FlashError>;
}

/// Address window shared by the flash models.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Geometry {
    pub base: u32,
    pub size: u32,
}

impl Geometry {
    /// Offset of `address` into the device, if `[address, address+len)` fits.
    pub fn offset(&self, address: u32, len: u32) -> Result<usize, FlashError> {
        let start = address
            .checked_sub(self.base)
            .ok_or(FlashError::OutOfRange { address, len })?;
        let end = start
            .checked_add(len)
            .ok_or(FlashError::OutOfRange { address, len })?;
        if end > self.size {
            return Err(FlashError::OutOfRange { address, len });
        }
        Ok(start as usize)
    }

    pub fn check_erase(&self, address: u32, len: u32) -> Result<usize, FlashError> {
        if address % ERASE_BLOCK_SIZE != 0 || len % ERASE_BLOCK_SIZE != 0 {
            return Err(FlashError::Misaligned { address, len });
        }
        self.offset(address, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_bounds() {
        let g = Geometry {
            base: 0x1000,
            size: 0x2000,
        };
        assert_eq!(g.offset(0x1000, 0x2000).unwrap(), 0);
        assert_eq!(g.offset(0x1800, 16).unwrap(), 0x800);
        assert!(g.offset(0x0FFF, 1).is_err());
        assert!(g.offset(0x2FFF, 2).is_err());
        assert!(g.offset(u32::MAX, 2).is_err());
        assert!(matches!(
            g.check_erase(0x1001, 4096),
            Err(FlashError::Misaligned { .. })
        ));
    }
}
