//! Device -> host responses.

use byteorder::{ByteOrder, LittleEndian};
use std::fmt;
use thiserror::Error;

use super::constants::*;
use super::frame::Frame;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResponseError {
    #[error("Unknown response code 0x{0:02X}")]
    UnknownCode(u8),
    #[error("Bad VERSION_INFO payload length: {0}")]
    BadVersionInfo(usize),
    #[error("Unknown ERROR code {0}")]
    UnknownErrorCode(u8),
}

/// Payload codes carried by an ERROR response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    BadLength = ERR_BAD_LENGTH,
    AlreadyActive = ERR_ALREADY_ACTIVE,
    BadSize = ERR_BAD_SIZE,
    BadAddress = ERR_BAD_ADDRESS,
    EraseFailed = ERR_ERASE_FAILED,
}

impl ErrorCode {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn description(self) -> &'static str {
        match self {
            ErrorCode::BadLength => "bad length",
            ErrorCode::AlreadyActive => "update already in progress",
            ErrorCode::BadSize => "invalid image size",
            ErrorCode::BadAddress => "invalid target address",
            ErrorCode::EraseFailed => "flash erase failed",
        }
    }
}

impl TryFrom<u8> for ErrorCode {
    type Error = ResponseError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            ERR_BAD_LENGTH => Ok(ErrorCode::BadLength),
            ERR_ALREADY_ACTIVE => Ok(ErrorCode::AlreadyActive),
            ERR_BAD_SIZE => Ok(ErrorCode::BadSize),
            ERR_BAD_ADDRESS => Ok(ErrorCode::BadAddress),
            ERR_ERASE_FAILED => Ok(ErrorCode::EraseFailed),
            other => Err(ResponseError::UnknownErrorCode(other)),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.as_u8())
    }
}

/// Snapshot of the version registry as sent in VERSION_INFO.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VersionInfo {
    pub current_version: u32,
    pub backup_version: u32,
    pub current_address: u32,
    pub backup_address: u32,
}

impl VersionInfo {
    pub const SIZE: usize = VERSION_INFO_LEN;

    pub fn to_bytes(&self) -> [u8; VERSION_INFO_LEN] {
        let mut buf = [0u8; VERSION_INFO_LEN];
        LittleEndian::write_u32(&mut buf[0..4], self.current_version);
        LittleEndian::write_u32(&mut buf[4..8], self.backup_version);
        LittleEndian::write_u32(&mut buf[8..12], self.current_address);
        LittleEndian::write_u32(&mut buf[12..16], self.backup_address);
        buf
    }

    /// Parse exactly 16 bytes; any other length is `None`.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() != VERSION_INFO_LEN {
            return None;
        }
        Some(Self {
            current_version: LittleEndian::read_u32(&data[0..4]),
            backup_version: LittleEndian::read_u32(&data[4..8]),
            current_address: LittleEndian::read_u32(&data[8..12]),
            backup_address: LittleEndian::read_u32(&data[12..16]),
        })
    }
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "current v{} @ 0x{:08X}, backup v{} @ 0x{:08X}",
            self.current_version, self.current_address, self.backup_version, self.backup_address
        )
    }
}

/// A response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    Ack,
    Nack,
    Ready,
    ChecksumError,
    VersionInfo(VersionInfo),
    /// `None` is the bare ERROR sent for flash write failures and unknown commands.
    Error(Option<ErrorCode>),
}

impl Response {
    pub fn code(&self) -> u8 {
        match self {
            Response::Ack => RESP_ACK,
            Response::Nack => RESP_NACK,
            Response::Ready => RESP_READY,
            Response::ChecksumError => RESP_CHECKSUM_ERROR,
            Response::VersionInfo(_) => RESP_VERSION_INFO,
            Response::Error(_) => RESP_ERROR,
        }
    }

    pub fn to_frame(&self) -> Frame {
        match self {
            Response::VersionInfo(info) => Frame::from_array(RESP_VERSION_INFO, info.to_bytes()),
            Response::Error(Some(code)) => Frame::from_array(RESP_ERROR, [code.as_u8()]),
            _ => Frame::empty(self.code()),
        }
    }

    /// Interpret a response frame (host side).
    pub fn from_frame(frame: &Frame) -> Result<Self, ResponseError> {
        match frame.code {
            RESP_ACK => Ok(Response::Ack),
            RESP_NACK => Ok(Response::Nack),
            RESP_READY => Ok(Response::Ready),
            RESP_CHECKSUM_ERROR => Ok(Response::ChecksumError),
            RESP_VERSION_INFO => VersionInfo::from_bytes(&frame.payload)
                .map(Response::VersionInfo)
                .ok_or(ResponseError::BadVersionInfo(frame.payload.len())),
            RESP_ERROR => match frame.payload.first() {
                Some(&code) => Ok(Response::Error(Some(ErrorCode::try_from(code)?))),
                None => Ok(Response::Error(None)),
            },
            other => Err(ResponseError::UnknownCode(other)),
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Ack => write!(f, "ACK"),
            Response::Nack => write!(f, "NACK"),
            Response::Ready => write!(f, "READY"),
            Response::ChecksumError => write!(f, "CHECKSUM_ERROR"),
            Response::VersionInfo(_) => write!(f, "VERSION_INFO"),
            Response::Error(Some(code)) => write!(f, "ERROR({})", code.as_u8()),
            Response::Error(None) => write!(f, "ERROR"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_info_wire_order() {
        let info = VersionInfo {
            current_version: 5,
            backup_version: 4,
            current_address: SLOT_A_ADDRESS,
            backup_address: SLOT_B_ADDRESS,
        };
        let frame = Response::VersionInfo(info).to_frame();
        assert_eq!(frame.code, RESP_VERSION_INFO);
        assert_eq!(
            &frame.payload[..],
            &[5, 0, 0, 0, 4, 0, 0, 0, 0, 0, 0x20, 0, 0, 0, 0x30, 0]
        );
        assert_eq!(
            Response::from_frame(&frame).unwrap(),
            Response::VersionInfo(info)
        );
    }

    #[test]
    fn test_error_payloads() {
        let coded = Response::Error(Some(ErrorCode::BadAddress)).to_frame();
        assert_eq!(coded.to_bytes(), vec![0x15, 0x01, 0x04, 0x15 ^ 0x01 ^ 0x04]);

        let bare = Response::Error(None).to_frame();
        assert_eq!(bare.to_bytes(), vec![0x15, 0x00, 0x15]);
        assert_eq!(Response::from_frame(&bare).unwrap(), Response::Error(None));
    }

    #[test]
    fn test_unknown_codes_rejected() {
        assert_eq!(
            Response::from_frame(&Frame::empty(0x99)),
            Err(ResponseError::UnknownCode(0x99))
        );
        assert_eq!(
            Response::from_frame(&Frame::from_array(RESP_ERROR, [9])),
            Err(ResponseError::UnknownErrorCode(9))
        );
        assert_eq!(
            Response::from_frame(&Frame::from_array(RESP_VERSION_INFO, [0u8; 4])),
            Err(ResponseError::BadVersionInfo(4))
        );
    }
}
