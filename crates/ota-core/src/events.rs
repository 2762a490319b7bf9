//! Event system for UI decoupling.
//!
//! Lets the agent and the host uploader report what happens without tying
//! them to a particular frontend.

use std::fmt;

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Why a session ended without promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// ABORT received from the peer.
    Requested,
    /// No frame within the session timeout.
    Timeout,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Requested => write!(f, "requested"),
            AbortReason::Timeout => write!(f, "inactivity timeout"),
        }
    }
}

/// Events emitted by the agent and the host.
#[derive(Debug, Clone)]
pub enum OtaEvent {
    /// A session started receiving into `address`.
    SessionStarted { version: u32, address: u32, size: u32 },
    /// Transfer progress in bytes.
    Progress { current: u64, total: u64 },
    /// Image committed and its slot promoted.
    SessionCompleted { version: u32, address: u32 },
    /// Session discarded.
    SessionAborted { reason: AbortReason },
    /// Input discarded by the frame codec.
    FrameDropped { reason: String },
    /// A valid command was answered with a rejection.
    Rejected { command: String, response: String },
    /// Log message.
    Log { level: LogLevel, message: String },
}

/// Observer trait for receiving OTA events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait OtaObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &OtaEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl OtaObserver for NullObserver {
    fn on_event(&self, _event: &OtaEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl OtaObserver for TracingObserver {
    fn on_event(&self, event: &OtaEvent) {
        match event {
            OtaEvent::SessionStarted {
                version,
                address,
                size,
            } => {
                tracing::info!(version, address = %format!("0x{:08X}", address), size, "Update started");
            }
            OtaEvent::Progress { current, total } => {
                let pct = if *total > 0 {
                    (*current * 100) / *total
                } else {
                    0
                };
                tracing::debug!(current, total, progress = %format!("{}%", pct), "Progress");
            }
            OtaEvent::SessionCompleted { version, address } => {
                tracing::info!(version, address = %format!("0x{:08X}", address), "Update completed");
            }
            OtaEvent::SessionAborted { reason } => {
                tracing::warn!(reason = %reason, "Update aborted");
            }
            OtaEvent::FrameDropped { reason } => {
                tracing::debug!(reason = %reason, "Frame dropped");
            }
            OtaEvent::Rejected { command, response } => {
                tracing::debug!(command = %command, response = %response, "Command rejected");
            }
            OtaEvent::Log { level, message } => match level {
                LogLevel::Trace => tracing::trace!("{}", message),
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Observer that records every event.
    #[derive(Default)]
    pub struct RecordingObserver {
        events: Mutex<Vec<OtaEvent>>,
    }

    impl RecordingObserver {
        pub fn events(&self) -> Vec<OtaEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl OtaObserver for RecordingObserver {
        fn on_event(&self, event: &OtaEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }
}
