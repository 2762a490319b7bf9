//! Mock byte transport for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::traits::{ByteTransport, TransportError};

/// In-memory transport for unit testing the codec and the agent loop.
///
/// Clones share the same queues, so a test can keep a handle while the
/// code under test owns another.
#[derive(Clone)]
pub struct MockTransport {
    /// Bytes waiting to be read.
    inbound: Arc<Mutex<VecDeque<u8>>>,
    /// Captured writes.
    write_log: Arc<Mutex<Vec<Vec<u8>>>>,
    /// Whether the peer is "connected".
    connected: Arc<Mutex<bool>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            inbound: Arc::new(Mutex::new(VecDeque::new())),
            write_log: Arc::new(Mutex::new(Vec::new())),
            connected: Arc::new(Mutex::new(true)),
        }
    }

    /// Queue raw bytes to be returned by subsequent reads.
    pub fn push_bytes(&self, bytes: &[u8]) {
        self.inbound.lock().unwrap().extend(bytes.iter().copied());
    }

    /// Number of queued bytes not yet read.
    pub fn pending(&self) -> usize {
        self.inbound.lock().unwrap().len()
    }

    /// Get all captured writes.
    pub fn get_writes(&self) -> Vec<Vec<u8>> {
        self.write_log.lock().unwrap().clone()
    }

    /// Take and clear captured writes.
    pub fn take_writes(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.write_log.lock().unwrap())
    }

    /// Simulate peer disconnect.
    pub fn disconnect(&self) {
        *self.connected.lock().unwrap() = false;
    }

    /// Simulate peer reconnect.
    pub fn reconnect(&self) {
        *self.connected.lock().unwrap() = true;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteTransport for MockTransport {
    fn read_exact(&self, len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        let mut inbound = self.inbound.lock().unwrap();
        // Nothing else can arrive while we hold the queue, so waiting is moot.
        if inbound.len() < len {
            return Err(TransportError::timeout(timeout));
        }
        Ok(inbound.drain(..len).collect())
    }

    fn write(&self, data: &[u8]) -> Result<usize, TransportError> {
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        self.write_log.lock().unwrap().push(data.to_vec());
        Ok(data.len())
    }
}
