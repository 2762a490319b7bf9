//! OTA-Core: A/B firmware update over a serial byte link.
//!
//! This crate implements both ends of a small request/response protocol for
//! updating a device with two firmware slots: the device-side agent that
//! writes images to flash and keeps a persistent version registry, and the
//! host-side uploader that streams an image to it.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Constants, frame codec, commands and responses
//! - **Transport**: Byte link abstraction (TCP bridge, mock)
//! - **Flash / Storage**: Device collaborators (RAM and file backed)
//! - **Registry**: Persistent current/backup version record
//! - **State**: Update session state machine and command handlers
//! - **Agent**: Device poll loop
//! - **Host**: Uploader
//! - **Events**: Observer pattern for UI decoupling
//!
//! # Example
//!
//! ```no_run
//! use ota_core::{FirmwareImage, HostConfig, OtaHost, TcpTransport};
//!
//! let transport = TcpTransport::connect("127.0.0.1:5555").expect("connect failed");
//! let host = OtaHost::new(transport, HostConfig::default());
//! let image = FirmwareImage::load("firmware.bin").expect("bad image");
//! host.update(&image, 2).expect("update failed");
//! ```

pub mod agent;
pub mod clock;
pub mod config;
pub mod events;
pub mod flash;
pub mod host;
pub mod image;
pub mod protocol;
pub mod registry;
pub mod state;
pub mod storage;
pub mod transport;

// Re-exports for convenience
pub use agent::{AgentError, OtaAgent, PollOutcome};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AgentConfig, ConfigError};
pub use events::{AbortReason, LogLevel, NullObserver, OtaEvent, OtaObserver, TracingObserver};
pub use flash::{FileFlash, FlashDevice, FlashError, MemFlash};
pub use host::{HostConfig, HostError, OtaHost, UpdateReport};
pub use image::{FirmwareImage, ImageError};
pub use protocol::{Command, ErrorCode, Frame, FrameCodec, Response, VersionInfo};
pub use registry::VersionRegistry;
pub use state::{SessionState, UpdateSession};
pub use storage::{FileStore, MemStore, RecordStore, StorageError};
pub use transport::{ByteTransport, MockTransport, TcpTransport, TransportError};
