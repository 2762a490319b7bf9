//! Transport layer module.

pub mod mock;
pub mod tcp;
pub mod traits;

pub use mock::MockTransport;
pub use tcp::TcpTransport;
pub use traits::{ByteTransport, TransportError};
