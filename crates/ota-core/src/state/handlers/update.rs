//! Session lifecycle handlers (INIT, SEND_PACKET, FINISH, ABORT).

use tracing::{error, info, warn};

use crate::events::{AbortReason, LogLevel, OtaEvent, OtaObserver};
use crate::flash::FlashDevice;
use crate::protocol::command::{InitRequest, Packet};
use crate::protocol::response::Response;
use crate::state::machine::{FinishError, PacketError};
use crate::storage::RecordStore;

use super::HandlerContext;

/// INIT - validate, erase the target slot, start receiving.
pub fn handle_init<F, S, O>(request: &InitRequest, ctx: &mut HandlerContext<'_, F, S, O>) -> Response
where
    F: FlashDevice + ?Sized,
    S: RecordStore + ?Sized,
    O: OtaObserver + ?Sized,
{
    info!(
        version = request.version,
        address = %format!("0x{:08X}", request.address),
        size = request.size,
        "Init update"
    );

    match ctx.session.init(request, ctx.limits, ctx.flash, ctx.now) {
        Ok(()) => {
            ctx.emit(OtaEvent::SessionStarted {
                version: request.version,
                address: request.address,
                size: request.size,
            });
            Response::Ready
        }
        Err(e) => {
            warn!(error = %e, "Init rejected");
            ctx.reject("INIT", Response::Error(Some(e.error_code())))
        }
    }
}

/// SEND_PACKET - commit one in-order, intact packet.
pub fn handle_packet<F, S, O>(packet: &Packet, ctx: &mut HandlerContext<'_, F, S, O>) -> Response
where
    F: FlashDevice + ?Sized,
    S: RecordStore + ?Sized,
    O: OtaObserver + ?Sized,
{
    match ctx.session.accept_packet(packet, ctx.flash) {
        Ok(_) => {
            ctx.emit(OtaEvent::Progress {
                current: ctx.session.bytes_written() as u64,
                total: ctx.session.total_size() as u64,
            });
            Response::Ack
        }
        Err(e) => {
            warn!(error = %e, seq = packet.seq, "Packet rejected");
            let response = match e {
                PacketError::NotActive | PacketError::OutOfSequence { .. } => Response::Nack,
                PacketError::Checksum { .. } => Response::ChecksumError,
                // Bare ERROR: the same packet may be sent again.
                PacketError::Flash(_) => Response::Error(None),
            };
            ctx.reject("SEND_PACKET", response)
        }
    }
}

/// FINISH - promote the completed image and persist the registry.
pub fn handle_finish<F, S, O>(ctx: &mut HandlerContext<'_, F, S, O>) -> Response
where
    F: FlashDevice + ?Sized,
    S: RecordStore + ?Sized,
    O: OtaObserver + ?Sized,
{
    let image = match ctx.session.finish(ctx.registry) {
        Ok(image) => image,
        Err(e) => {
            if let FinishError::Incomplete { .. } = e {
                ctx.log(LogLevel::Warn, e.to_string());
            }
            warn!(error = %e, "Finish rejected");
            return ctx.reject("FINISH", Response::Nack);
        }
    };

    // The promotion stands in memory even if it cannot be persisted.
    if let Err(e) = ctx.registry.save(ctx.store) {
        error!(error = %e, "Failed to save version registry");
        ctx.log(LogLevel::Error, format!("Failed to save version registry: {e}"));
    }

    info!(
        current = %ctx.registry.version_info(),
        "Update completed successfully"
    );
    ctx.emit(OtaEvent::SessionCompleted {
        version: image.version,
        address: image.address,
    });
    Response::Ack
}

/// ABORT - discard the active session.
pub fn handle_abort<F, S, O>(ctx: &mut HandlerContext<'_, F, S, O>) -> Response
where
    F: FlashDevice + ?Sized,
    S: RecordStore + ?Sized,
    O: OtaObserver + ?Sized,
{
    match ctx.session.abort() {
        Ok(()) => {
            ctx.emit(OtaEvent::SessionAborted {
                reason: AbortReason::Requested,
            });
            Response::Ack
        }
        Err(e) => {
            info!(error = %e, "Nothing to abort");
            ctx.reject("ABORT", Response::Nack)
        }
    }
}

/// Abort driven by the inactivity timeout.
///
/// Unlike an ABORT command this sends nothing: responses only ever answer a
/// received frame, so the host never sees an unsolicited ACK.
pub(crate) fn abort_on_timeout<F, S, O>(ctx: &mut HandlerContext<'_, F, S, O>)
where
    F: FlashDevice + ?Sized,
    S: RecordStore + ?Sized,
    O: OtaObserver + ?Sized,
{
    if ctx.session.abort().is_ok() {
        warn!("Update timeout - aborting");
        ctx.emit(OtaEvent::SessionAborted {
            reason: AbortReason::Timeout,
        });
    }
}
