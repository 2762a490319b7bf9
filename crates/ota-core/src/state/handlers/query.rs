//! Query handlers (GET_VERSION).

use tracing::debug;

use crate::events::OtaObserver;
use crate::flash::FlashDevice;
use crate::protocol::response::Response;
use crate::storage::RecordStore;

use super::HandlerContext;

/// GET_VERSION - report the registry; valid in every state.
pub fn handle_get_version<F, S, O>(ctx: &mut HandlerContext<'_, F, S, O>) -> Response
where
    F: FlashDevice + ?Sized,
    S: RecordStore + ?Sized,
    O: OtaObserver + ?Sized,
{
    let info = ctx.registry.version_info();
    debug!(%info, "Version query");
    Response::VersionInfo(info)
}
