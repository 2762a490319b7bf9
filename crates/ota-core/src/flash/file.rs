//! File-backed flash image.
//!
//! Used by the agent simulator so that written slots survive restarts and
//! can be inspected with ordinary tools.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::{debug, info, instrument};

use super::{FlashDevice, FlashError, Geometry};

/// Flash device whose cells live in a file of exactly `size` bytes.
#[derive(Debug)]
pub struct FileFlash {
    geometry: Geometry,
    file: File,
}

impl FileFlash {
    /// Open `path`, creating an erased image if it does not exist yet.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P, base: u32, size: u32) -> Result<Self, FlashError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_ref())?;

        let current = file.metadata()?.len();
        if current < size as u64 {
            info!(current, size, "Extending flash image with erased cells");
            file.seek(SeekFrom::Start(current))?;
            let fill = vec![0xFF; (size as u64 - current) as usize];
            file.write_all(&fill)?;
            file.flush()?;
        }

        Ok(Self {
            geometry: Geometry { base, size },
            file,
        })
    }
}

impl FlashDevice for FileFlash {
    fn erase(&mut self, address: u32, len: u32) -> Result<(), FlashError> {
        let start = self.geometry.check_erase(address, len)?;
        self.file.seek(SeekFrom::Start(start as u64))?;
        self.file.write_all(&vec![0xFF; len as usize])?;
        self.file.flush()?;
        debug!(address = %format!("0x{:08X}", address), len, "Erased");
        Ok(())
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        let start = self.geometry.offset(address, data.len() as u32)?;
        let mut cells = vec![0u8; data.len()];
        self.file.seek(SeekFrom::Start(start as u64))?;
        self.file.read_exact(&mut cells)?;

        // NOR semantics: programming can only clear bits.
        for (cell, byte) in cells.iter_mut().zip(data) {
            *cell &= byte;
        }

        self.file.seek(SeekFrom::Start(start as u64))?;
        self.file.write_all(&cells)?;
        self.file.flush()?;
        Ok(())
    }

    fn read(&self, address: u32, len: u32) -> Result<Vec<u8>, FlashError> {
        let start = self.geometry.offset(address, len)?;
        let mut file = &self.file;
        let mut buf = vec![0u8; len as usize];
        file.seek(SeekFrom::Start(start as u64))?;
        file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_flash_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flash.bin");

        {
            let mut flash = FileFlash::open(&path, 0x1000, 8192).unwrap();
            assert_eq!(flash.read(0x1000, 4).unwrap(), vec![0xFF; 4]);
            flash.write(0x1004, &[1, 2, 3]).unwrap();
        }

        let mut flash = FileFlash::open(&path, 0x1000, 8192).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 8192);
        assert_eq!(flash.read(0x1004, 3).unwrap(), vec![1, 2, 3]);

        flash.erase(0x1000, 4096).unwrap();
        assert_eq!(flash.read(0x1004, 3).unwrap(), vec![0xFF; 3]);
        assert!(flash.write(0x3000, &[0]).is_err());
    }

    #[test]
    fn test_erase_visible_to_other_handle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flash.bin");

        let mut writer = FileFlash::open(&path, 0, 8192).unwrap();
        writer.write(0x1000, &[0x00; 16]).unwrap();
        writer.erase(0x1000, 4096).unwrap();

        let reader = FileFlash::open(&path, 0, 8192).unwrap();
        assert_eq!(reader.read(0x1000, 16).unwrap(), vec![0xFF; 16]);
    }
}
