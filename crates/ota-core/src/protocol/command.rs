//! Host -> device commands.

use byteorder::{ByteOrder, LittleEndian};
use std::fmt;
use thiserror::Error;

use super::constants::*;
use super::frame::{Frame, xor_checksum};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Bad payload length for command 0x{code:02X}: expected {expected}, got {actual}")]
    BadLength {
        code: u8,
        expected: usize,
        actual: usize,
    },
    #[error("Unknown command code 0x{0:02X}")]
    Unknown(u8),
}

/// INIT parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitRequest {
    pub version: u32,
    pub address: u32,
    pub size: u32,
}

impl InitRequest {
    pub fn to_bytes(&self) -> [u8; INIT_PAYLOAD_LEN] {
        let mut buf = [0u8; INIT_PAYLOAD_LEN];
        LittleEndian::write_u32(&mut buf[0..4], self.version);
        LittleEndian::write_u32(&mut buf[4..8], self.address);
        LittleEndian::write_u32(&mut buf[8..12], self.size);
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CommandError> {
        if data.len() != INIT_PAYLOAD_LEN {
            return Err(CommandError::BadLength {
                code: CMD_INIT,
                expected: INIT_PAYLOAD_LEN,
                actual: data.len(),
            });
        }
        Ok(Self {
            version: LittleEndian::read_u32(&data[0..4]),
            address: LittleEndian::read_u32(&data[4..8]),
            size: LittleEndian::read_u32(&data[8..12]),
        })
    }
}

/// One SEND_PACKET payload.
///
/// `checksum` is the XOR of the 16 data bytes as claimed by the sender;
/// it is carried as received so the device can check it.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Packet {
    pub seq: u16,
    pub checksum: u8,
    pub data: [u8; PACKET_SIZE],
}

impl Packet {
    /// Build a packet from up to 16 image bytes, padding the rest with 0xFF.
    pub fn from_chunk(seq: u16, chunk: &[u8]) -> Self {
        let mut data = [PAD_BYTE; PACKET_SIZE];
        let n = chunk.len().min(PACKET_SIZE);
        data[..n].copy_from_slice(&chunk[..n]);
        Self {
            seq,
            checksum: xor_checksum(&data),
            data,
        }
    }

    /// Checksum computed over the carried data.
    pub fn computed_checksum(&self) -> u8 {
        xor_checksum(&self.data)
    }

    pub fn is_intact(&self) -> bool {
        self.computed_checksum() == self.checksum
    }

    pub fn to_bytes(&self) -> [u8; PACKET_PAYLOAD_LEN] {
        let mut buf = [0u8; PACKET_PAYLOAD_LEN];
        LittleEndian::write_u16(&mut buf[0..2], self.seq);
        buf[2] = self.checksum;
        buf[3..].copy_from_slice(&self.data);
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CommandError> {
        if data.len() != PACKET_PAYLOAD_LEN {
            return Err(CommandError::BadLength {
                code: CMD_SEND_PACKET,
                expected: PACKET_PAYLOAD_LEN,
                actual: data.len(),
            });
        }
        let mut body = [0u8; PACKET_SIZE];
        body.copy_from_slice(&data[3..]);
        Ok(Self {
            seq: LittleEndian::read_u16(&data[0..2]),
            checksum: data[2],
            data: body,
        })
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Packet(seq={}, checksum=0x{:02X}, data={:02X?})",
            self.seq, self.checksum, self.data
        )
    }
}

/// A decoded request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Init(InitRequest),
    SendPacket(Packet),
    Finish,
    GetVersion,
    Abort,
}

impl Command {
    /// Interpret a validated frame.
    ///
    /// Only INIT and SEND_PACKET carry a payload; any payload on the other
    /// commands is ignored.
    pub fn from_frame(frame: &Frame) -> Result<Self, CommandError> {
        match frame.code {
            CMD_INIT => Ok(Command::Init(InitRequest::from_bytes(&frame.payload)?)),
            CMD_SEND_PACKET => Ok(Command::SendPacket(Packet::from_bytes(&frame.payload)?)),
            CMD_FINISH => Ok(Command::Finish),
            CMD_GET_VERSION => Ok(Command::GetVersion),
            CMD_ABORT => Ok(Command::Abort),
            other => Err(CommandError::Unknown(other)),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Command::Init(_) => CMD_INIT,
            Command::SendPacket(_) => CMD_SEND_PACKET,
            Command::Finish => CMD_FINISH,
            Command::GetVersion => CMD_GET_VERSION,
            Command::Abort => CMD_ABORT,
        }
    }

    /// Frame for the wire (host side).
    pub fn to_frame(&self) -> Frame {
        match self {
            Command::Init(req) => Frame::from_array(CMD_INIT, req.to_bytes()),
            Command::SendPacket(packet) => Frame::from_array(CMD_SEND_PACKET, packet.to_bytes()),
            _ => Frame::empty(self.code()),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Init(_) => write!(f, "INIT"),
            Command::SendPacket(_) => write!(f, "SEND_PACKET"),
            Command::Finish => write!(f, "FINISH"),
            Command::GetVersion => write!(f, "GET_VERSION"),
            Command::Abort => write!(f, "ABORT"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_little_endian() {
        let frame = Frame::new(
            CMD_INIT,
            &[5, 0, 0, 0, 0x00, 0x00, 0x20, 0x00, 0x20, 0, 0, 0],
        )
        .unwrap();
        assert_eq!(
            Command::from_frame(&frame).unwrap(),
            Command::Init(InitRequest {
                version: 5,
                address: SLOT_A_ADDRESS,
                size: 32,
            })
        );
    }

    #[test]
    fn test_init_bad_length() {
        let frame = Frame::new(CMD_INIT, &[0u8; 11]).unwrap();
        assert_eq!(
            Command::from_frame(&frame),
            Err(CommandError::BadLength {
                code: CMD_INIT,
                expected: 12,
                actual: 11,
            })
        );
    }

    #[test]
    fn test_packet_layout() {
        let packet = Packet::from_chunk(0x0102, &[0xAB; 16]);
        let bytes = packet.to_bytes();
        assert_eq!(&bytes[0..2], &[0x02, 0x01]);
        assert_eq!(bytes[2], 0x00); // even count of 0xAB cancels out
        assert_eq!(Packet::from_bytes(&bytes).unwrap(), packet);
    }

    #[test]
    fn test_short_chunk_is_padded() {
        let packet = Packet::from_chunk(3, &[0x01]);
        assert_eq!(packet.data[0], 0x01);
        assert!(packet.data[1..].iter().all(|&b| b == PAD_BYTE));
        assert!(packet.is_intact());
    }

    #[test]
    fn test_packet_bad_length() {
        let frame = Frame::new(CMD_SEND_PACKET, &[0u8; 18]).unwrap();
        assert!(matches!(
            Command::from_frame(&frame),
            Err(CommandError::BadLength { code: CMD_SEND_PACKET, .. })
        ));
    }

    #[test]
    fn test_payload_ignored_on_bare_commands() {
        let frame = Frame::new(CMD_FINISH, &[1, 2, 3]).unwrap();
        assert_eq!(Command::from_frame(&frame).unwrap(), Command::Finish);
    }

    #[test]
    fn test_unknown_command() {
        let frame = Frame::empty(0x42);
        assert_eq!(Command::from_frame(&frame), Err(CommandError::Unknown(0x42)));
    }

    #[test]
    fn test_to_frame_codes() {
        assert_eq!(Command::Abort.to_frame().to_bytes(), vec![0x05, 0x00, 0x05]);
        let init = Command::Init(InitRequest {
            version: 1,
            address: SLOT_B_ADDRESS,
            size: 1024,
        });
        assert_eq!(init.to_frame().payload.len(), INIT_PAYLOAD_LEN);
    }
}
