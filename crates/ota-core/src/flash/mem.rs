//! RAM-backed NOR flash model.

use tracing::trace;

use super::{FlashDevice, FlashError, Geometry};
use crate::protocol::constants::ERASE_BLOCK_SIZE;

/// In-memory flash: erase sets bytes to 0xFF, programming can only clear bits.
///
/// Faults can be injected to exercise the session's failure paths.
#[derive(Debug)]
pub struct MemFlash {
    geometry: Geometry,
    cells: Vec<u8>,
    /// Erase of the block containing this address fails.
    fail_erase_at: Option<u32>,
    /// Number of upcoming program operations that fail.
    failing_writes: u32,
    erase_count: usize,
    write_log: Vec<(u32, usize)>,
}

impl MemFlash {
    /// Erased device covering `[base, base + size)`.
    pub fn new(base: u32, size: u32) -> Self {
        Self {
            geometry: Geometry { base, size },
            cells: vec![0xFF; size as usize],
            fail_erase_at: None,
            failing_writes: 0,
            erase_count: 0,
            write_log: Vec::new(),
        }
    }

    /// Make the erase of the block containing `address` fail.
    pub fn fail_erase_at(&mut self, address: u32) {
        self.fail_erase_at = Some(address);
    }

    /// Make the next `count` program operations fail.
    pub fn fail_next_writes(&mut self, count: u32) {
        self.failing_writes = count;
    }

    /// Blocks erased so far.
    pub fn erase_count(&self) -> usize {
        self.erase_count
    }

    /// `(address, len)` of every successful program operation.
    pub fn write_log(&self) -> &[(u32, usize)] {
        &self.write_log
    }
}

impl FlashDevice for MemFlash {
    fn erase(&mut self, address: u32, len: u32) -> Result<(), FlashError> {
        let start = self.geometry.check_erase(address, len)?;
        if let Some(bad) = self.fail_erase_at
            && bad >= address
            && bad - address < len
        {
            return Err(FlashError::EraseFailed { address });
        }
        self.cells[start..start + len as usize].fill(0xFF);
        self.erase_count += (len / ERASE_BLOCK_SIZE) as usize;
        trace!(address = %format!("0x{:08X}", address), len, "Erased");
        Ok(())
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        let start = self.geometry.offset(address, data.len() as u32)?;
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            return Err(FlashError::WriteFailed { address });
        }
        for (cell, byte) in self.cells[start..start + data.len()].iter_mut().zip(data) {
            *cell &= byte;
        }
        self.write_log.push((address, data.len()));
        Ok(())
    }

    fn read(&self, address: u32, len: u32) -> Result<Vec<u8>, FlashError> {
        let start = self.geometry.offset(address, len)?;
        Ok(self.cells[start..start + len as usize].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_clears_bits_only() {
        let mut flash = MemFlash::new(0, 8192);
        flash.write(0, &[0x0F]).unwrap();
        flash.write(0, &[0xF1]).unwrap();
        assert_eq!(flash.read(0, 1).unwrap(), vec![0x01]);

        flash.erase(0, 4096).unwrap();
        assert_eq!(flash.read(0, 1).unwrap(), vec![0xFF]);
        assert_eq!(flash.erase_count(), 1);
    }

    #[test]
    fn test_injected_faults() {
        let mut flash = MemFlash::new(0, 8192);
        flash.fail_erase_at(4100);
        assert!(flash.erase(0, 4096).is_ok());
        assert!(matches!(
            flash.erase(4096, 4096),
            Err(FlashError::EraseFailed { address: 4096 })
        ));

        flash.fail_next_writes(1);
        assert!(flash.write(0, &[1]).is_err());
        assert!(flash.write(0, &[1]).is_ok());
        assert_eq!(flash.write_log(), &[(0, 1)]);
    }
}
