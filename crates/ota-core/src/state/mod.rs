//! State machine module.

pub mod handlers;
pub mod machine;

pub use handlers::{HandlerContext, handle_command, handle_frame};
pub use machine::{
    AbortError, CompletedImage, FinishError, InitError, PacketError, SessionLimits, SessionState,
    UpdateSession,
};
