//! Firmware image on the host side.

use std::path::Path;

use thiserror::Error;

use crate::protocol::command::Packet;
use crate::protocol::constants::{MAX_FILE_SIZE, PACKET_SIZE};

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("Image is empty")]
    Empty,
    #[error("Image is {0} bytes, limit is 1048576")]
    TooLarge(usize),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A firmware binary ready to be cut into packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    data: Vec<u8>,
}

impl FirmwareImage {
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, ImageError> {
        if data.is_empty() {
            return Err(ImageError::Empty);
        }
        if data.len() > MAX_FILE_SIZE as usize {
            return Err(ImageError::TooLarge(data.len()));
        }
        Ok(Self { data })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ImageError> {
        Self::from_bytes(std::fs::read(path)?)
    }

    /// Deterministic image for bench testing.
    ///
    /// Byte `i` is `0xAA` on 256-byte boundaries, `0x55` on the remaining
    /// 128-byte boundaries and `i % 256` otherwise.
    pub fn test_pattern(len: usize) -> Result<Self, ImageError> {
        let data = (0..len)
            .map(|i| match i {
                i if i % 256 == 0 => 0xAA,
                i if i % 128 == 0 => 0x55,
                i => (i % 256) as u8,
            })
            .collect();
        Self::from_bytes(data)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Size as announced in INIT.
    pub fn size(&self) -> u32 {
        self.data.len() as u32
    }

    pub fn packet_count(&self) -> usize {
        self.data.len().div_ceil(PACKET_SIZE)
    }

    /// Packets in sending order; the last one is padded with 0xFF.
    pub fn packets(&self) -> impl Iterator<Item = Packet> + '_ {
        self.data
            .chunks(PACKET_SIZE)
            .enumerate()
            .map(|(seq, chunk)| Packet::from_chunk(seq as u16, chunk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::PAD_BYTE;

    #[test]
    fn test_size_limits() {
        assert!(matches!(
            FirmwareImage::from_bytes(Vec::new()),
            Err(ImageError::Empty)
        ));
        assert!(FirmwareImage::from_bytes(vec![0; MAX_FILE_SIZE as usize]).is_ok());
        assert!(matches!(
            FirmwareImage::from_bytes(vec![0; MAX_FILE_SIZE as usize + 1]),
            Err(ImageError::TooLarge(_))
        ));
    }

    #[test]
    fn test_packets_cover_image() {
        let image = FirmwareImage::test_pattern(40).unwrap();
        let packets: Vec<Packet> = image.packets().collect();
        assert_eq!(packets.len(), 3);
        assert_eq!(image.packet_count(), 3);
        assert_eq!(packets[2].seq, 2);
        assert_eq!(&packets[2].data[..8], &image.as_bytes()[32..]);
        assert_eq!(packets[2].data[8..], [PAD_BYTE; 8]);
        assert!(packets.iter().all(Packet::is_intact));
    }

    #[test]
    fn test_pattern_markers() {
        let image = FirmwareImage::test_pattern(1024).unwrap();
        let data = image.as_bytes();
        assert_eq!(data[0], 0xAA);
        assert_eq!(data[1], 1);
        assert_eq!(data[128], 0x55);
        assert_eq!(data[256], 0xAA);
        assert_eq!(data[384], 0x55);
        assert_eq!(data[511], 0xFF);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fw.bin");
        std::fs::write(&path, [1, 2, 3]).unwrap();
        let image = FirmwareImage::load(&path).unwrap();
        assert_eq!(image.size(), 3);
        assert!(FirmwareImage::load(dir.path().join("missing.bin")).is_err());
    }
}
