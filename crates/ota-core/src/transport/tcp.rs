//! TCP transport for serial-over-TCP bridges.
//!
//! The serial line is usually exposed through a bridge such as ser2net,
//! so both the host uploader and the agent simulator speak plain TCP.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument};

use super::traits::{ByteTransport, TransportError};

/// Longest single blocking read; deadlines are checked between slices.
const READ_SLICE: Duration = Duration::from_millis(20);

struct Inner {
    stream: TcpStream,
    /// Bytes received but not yet handed out by `read_exact`.
    pending: Vec<u8>,
}

/// TCP-backed byte transport.
pub struct TcpTransport {
    inner: Mutex<Inner>,
    peer: Option<SocketAddr>,
}

impl TcpTransport {
    /// Connect to a bridge listening at `addr`.
    #[instrument(level = "info")]
    pub fn connect(addr: &str) -> Result<Self, TransportError> {
        let stream =
            TcpStream::connect(addr).map_err(|e| TransportError::OpenFailed(e.to_string()))?;
        let transport = Self::from_stream(stream)?;
        info!(peer = ?transport.peer, "Connected");
        Ok(transport)
    }

    /// Wrap an already established stream (e.g. one returned by `accept`).
    pub fn from_stream(stream: TcpStream) -> Result<Self, TransportError> {
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr().ok();
        Ok(Self {
            inner: Mutex::new(Inner {
                stream,
                pending: Vec::new(),
            }),
            peer,
        })
    }

    /// Remote address, if known.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, TransportError> {
        self.inner
            .lock()
            .map_err(|_| TransportError::ReadFailed("transport lock poisoned".into()))
    }
}

impl ByteTransport for TcpTransport {
    fn read_exact(&self, len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock()?;
        let Inner { stream, pending } = &mut *guard;
        let mut buf = [0u8; 256];

        loop {
            if pending.len() >= len {
                return Ok(pending.drain(..len).collect());
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(TransportError::timeout(timeout));
            }

            // A zero read timeout is rejected by the OS.
            let slice = (deadline - now).min(READ_SLICE).max(Duration::from_millis(1));
            stream.set_read_timeout(Some(slice))?;

            match stream.read(&mut buf) {
                Ok(0) => return Err(TransportError::Disconnected),
                Ok(n) => {
                    pending.extend_from_slice(&buf[..n]);
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                    ) => {}
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted
                    ) =>
                {
                    return Err(TransportError::Disconnected);
                }
                Err(e) => return Err(TransportError::ReadFailed(e.to_string())),
            }
        }
    }

    #[instrument(skip(self, data), fields(len = data.len()))]
    fn write(&self, data: &[u8]) -> Result<usize, TransportError> {
        let mut guard = self.lock()?;
        guard
            .stream
            .write_all(data)
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
        debug!(bytes_written = data.len(), "Write complete");
        Ok(data.len())
    }

    fn flush(&self) -> Result<(), TransportError> {
        let mut guard = self.lock()?;
        guard
            .stream
            .flush()
            .map_err(|e| TransportError::WriteFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_tcp_read_exact_across_segments() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let client = std::thread::spawn(move || {
            let transport = TcpTransport::connect(&addr).unwrap();
            transport.write(&[1, 2]).unwrap();
            std::thread::sleep(Duration::from_millis(30));
            transport.write(&[3]).unwrap();
            transport.flush().unwrap();
            // Keep the socket open until the server has read everything
            transport.read_exact(1, Duration::from_secs(2)).unwrap()
        });

        let (stream, _) = listener.accept().unwrap();
        let server = TcpTransport::from_stream(stream).unwrap();
        assert_eq!(
            server.read_exact(3, Duration::from_secs(2)).unwrap(),
            vec![1, 2, 3]
        );
        server.write(&[9]).unwrap();
        assert_eq!(client.join().unwrap(), vec![9]);
    }

    #[test]
    fn test_tcp_timeout_keeps_partial_bytes() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let client = TcpTransport::connect(&addr).unwrap();
        let (stream, _) = listener.accept().unwrap();
        let server = TcpTransport::from_stream(stream).unwrap();

        client.write(&[7]).unwrap();
        let err = server
            .read_exact(2, Duration::from_millis(50))
            .unwrap_err();
        assert!(err.is_timeout());

        client.write(&[8]).unwrap();
        assert_eq!(
            server.read_exact(2, Duration::from_secs(2)).unwrap(),
            vec![7, 8]
        );
    }

    #[test]
    fn test_tcp_disconnect_detected() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let client = TcpTransport::connect(&addr).unwrap();
        let (stream, _) = listener.accept().unwrap();
        let server = TcpTransport::from_stream(stream).unwrap();
        drop(client);

        assert!(matches!(
            server.read_exact(1, Duration::from_secs(2)),
            Err(TransportError::Disconnected)
        ));
    }
}
