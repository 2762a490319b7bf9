//! Command handlers - dispatch logic for each command code.
//!
//! This module is split into submodules by functionality:
//! - `update`: session lifecycle (INIT, SEND_PACKET, FINISH, ABORT)
//! - `query`: side-effect free queries (GET_VERSION)
//!
//! Every handler returns exactly one `Response`.

mod query;
mod update;

use std::time::Instant;

use tracing::warn;

use crate::events::{LogLevel, OtaEvent, OtaObserver};
use crate::flash::FlashDevice;
use crate::protocol::command::{Command, CommandError};
use crate::protocol::constants::CMD_INIT;
use crate::protocol::frame::Frame;
use crate::protocol::response::{ErrorCode, Response};
use crate::registry::VersionRegistry;
use crate::state::machine::{SessionLimits, UpdateSession};
use crate::storage::RecordStore;

pub(crate) use update::abort_on_timeout;
use query::handle_get_version;
use update::{handle_abort, handle_finish, handle_init, handle_packet};

/// Handler context containing all resources.
pub struct HandlerContext<'a, F: FlashDevice + ?Sized, S: RecordStore + ?Sized, O: OtaObserver + ?Sized>
{
    pub session: &'a mut UpdateSession,
    pub registry: &'a mut VersionRegistry,
    pub flash: &'a mut F,
    pub store: &'a mut S,
    pub observer: &'a O,
    pub limits: &'a SessionLimits,
    /// Time the frame was received.
    pub now: Instant,
}

impl<F: FlashDevice + ?Sized, S: RecordStore + ?Sized, O: OtaObserver + ?Sized>
    HandlerContext<'_, F, S, O>
{
    pub(crate) fn emit(&self, event: OtaEvent) {
        self.observer.on_event(&event);
    }

    pub(crate) fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.emit(OtaEvent::Log {
            level,
            message: message.into(),
        });
    }

    pub(crate) fn reject(&self, command: &str, response: Response) -> Response {
        self.emit(OtaEvent::Rejected {
            command: command.to_string(),
            response: response.to_string(),
        });
        response
    }
}

/// Handle a validated frame: parse the command and dispatch it.
pub fn handle_frame<F, S, O>(frame: &Frame, ctx: &mut HandlerContext<'_, F, S, O>) -> Response
where
    F: FlashDevice + ?Sized,
    S: RecordStore + ?Sized,
    O: OtaObserver + ?Sized,
{
    match Command::from_frame(frame) {
        Ok(command) => handle_command(&command, ctx),
        Err(CommandError::BadLength { code, expected, actual }) => {
            warn!(code = %format!("0x{:02X}", code), expected, actual, "Bad payload length");
            if code == CMD_INIT {
                ctx.reject("INIT", Response::Error(Some(ErrorCode::BadLength)))
            } else {
                ctx.reject("SEND_PACKET", Response::Nack)
            }
        }
        Err(CommandError::Unknown(code)) => {
            warn!(code = %format!("0x{:02X}", code), "Unknown command");
            ctx.log(LogLevel::Warn, format!("Unknown command: 0x{code:02X}"));
            Response::Error(None)
        }
    }
}

/// Handle a command and produce its response.
pub fn handle_command<F, S, O>(command: &Command, ctx: &mut HandlerContext<'_, F, S, O>) -> Response
where
    F: FlashDevice + ?Sized,
    S: RecordStore + ?Sized,
    O: OtaObserver + ?Sized,
{
    match command {
        Command::Init(request) => handle_init(request, ctx),
        Command::SendPacket(packet) => handle_packet(packet, ctx),
        Command::Finish => handle_finish(ctx),
        Command::GetVersion => handle_get_version(ctx),
        Command::Abort => handle_abort(ctx),
    }
}
