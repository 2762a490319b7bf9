//! Protocol module - wire format of the OTA link.

pub mod command;
pub mod constants;
pub mod frame;
pub mod response;

pub use command::{Command, CommandError, InitRequest, Packet};
pub use constants::*;
pub use frame::{DecodeOutcome, Frame, FrameCodec, FrameError, Payload, xor_checksum};
pub use response::{ErrorCode, Response, ResponseError, VersionInfo};
