//! Host-side uploader.
//!
//! Drives one update over a [`ByteTransport`]: query the registry, pick the
//! slot that is not running, stream the image packet by packet and commit.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::events::{LogLevel, OtaEvent, OtaObserver, TracingObserver};
use crate::image::FirmwareImage;
use crate::protocol::command::{Command, InitRequest, Packet};
use crate::protocol::constants::*;
use crate::protocol::frame::{DecodeOutcome, FrameCodec};
use crate::protocol::response::{ErrorCode, Response, ResponseError, VersionInfo};
use crate::transport::{ByteTransport, TransportError};

#[derive(Error, Debug)]
pub enum HostError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("No response to {0}")]
    NoResponse(&'static str),

    #[error("Unexpected response to {command}: {response}")]
    Unexpected {
        command: &'static str,
        response: Response,
    },

    #[error("Device reported unknown error code {0}")]
    UnknownDeviceError(u8),

    #[error("Device refused INIT: {0}")]
    InitRefused(ErrorCode),

    #[error("Packet {seq} rejected by device")]
    PacketRejected { seq: u16 },

    #[error("Packet {seq} not acknowledged after {attempts} attempts")]
    PacketFailed { seq: u16, attempts: u32 },
}

/// Uploader tunables.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Wait for each response frame.
    pub response_timeout: Duration,
    /// Attempts per packet, and responses read while waiting for READY.
    pub max_retries: u32,
    /// Pause before reading again when INIT got no usable answer.
    pub retry_delay: Duration,
    pub slot_a: u32,
    pub slot_b: u32,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(5),
            max_retries: HOST_MAX_RETRIES,
            retry_delay: Duration::from_secs(1),
            slot_a: SLOT_A_ADDRESS,
            slot_b: SLOT_B_ADDRESS,
        }
    }
}

/// Result of a completed update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateReport {
    pub version: u32,
    pub address: u32,
    pub packets: usize,
}

/// OTA uploader bound to one transport.
pub struct OtaHost<T: ByteTransport, O: OtaObserver = TracingObserver> {
    transport: T,
    config: HostConfig,
    codec: FrameCodec,
    observer: Arc<O>,
}

impl<T: ByteTransport> OtaHost<T> {
    pub fn new(transport: T, config: HostConfig) -> Self {
        Self::with_observer(transport, config, Arc::new(TracingObserver))
    }
}

impl<T: ByteTransport, O: OtaObserver> OtaHost<T, O> {
    pub fn with_observer(transport: T, config: HostConfig, observer: Arc<O>) -> Self {
        let codec = FrameCodec::new(config.response_timeout, config.response_timeout);
        Self {
            transport,
            config,
            codec,
            observer,
        }
    }

    fn send(&self, command: &Command) -> Result<(), HostError> {
        debug!(command = %command, "Sending");
        self.codec.send(&self.transport, &command.to_frame())?;
        Ok(())
    }

    /// Read one response. `None` when nothing usable arrived in time.
    ///
    /// An ERROR frame is never treated as noise, whatever code it carries.
    fn read_response(&self) -> Result<Option<Response>, HostError> {
        let frame = match self.codec.decode(&self.transport) {
            Ok(frame) => frame,
            Err(DecodeOutcome::Idle { .. }) => return Ok(None),
            Err(DecodeOutcome::Transport(e)) => return Err(e.into()),
            Err(dropped) => {
                warn!(reason = %dropped, "Discarding response");
                return Ok(None);
            }
        };
        match Response::from_frame(&frame) {
            Ok(response) => {
                debug!(response = %response, "Received");
                Ok(Some(response))
            }
            Err(ResponseError::UnknownErrorCode(code)) => Err(HostError::UnknownDeviceError(code)),
            Err(e) => {
                warn!(error = %e, "Unrecognized response");
                Ok(None)
            }
        }
    }

    fn transact(&self, command: &Command) -> Result<Option<Response>, HostError> {
        self.send(command)?;
        self.read_response()
    }

    /// Query the device's version registry.
    pub fn version_info(&self) -> Result<VersionInfo, HostError> {
        match self.transact(&Command::GetVersion)? {
            Some(Response::VersionInfo(info)) => Ok(info),
            Some(response) => Err(HostError::Unexpected {
                command: "GET_VERSION",
                response,
            }),
            None => Err(HostError::NoResponse("GET_VERSION")),
        }
    }

    /// Slot for the next image: A on a fresh device, otherwise the slot not running.
    pub fn select_target_slot(&self, info: &VersionInfo) -> u32 {
        if info.current_version == 0 {
            self.config.slot_a
        } else if info.current_address == self.config.slot_a {
            self.config.slot_b
        } else {
            self.config.slot_a
        }
    }

    /// Send ABORT; the answer is not waited for.
    pub fn abort(&self) -> Result<(), HostError> {
        self.send(&Command::Abort)
    }

    /// Upload `image` as `version` and commit it.
    #[instrument(skip(self, image), fields(size = image.len()))]
    pub fn update(&self, image: &FirmwareImage, version: u32) -> Result<UpdateReport, HostError> {
        let info = self.version_info()?;
        info!(%info, "Device registry");

        let address = self.select_target_slot(&info);
        info!(
            version,
            address = %format!("0x{:08X}", address),
            "Installing"
        );

        self.start(&InitRequest {
            version,
            address,
            size: image.size(),
        })?;

        let total = image.packet_count();
        for packet in image.packets() {
            if let Err(e) = self.send_packet(&packet) {
                warn!(error = %e, "Transfer failed, aborting session");
                self.abort()?;
                return Err(e);
            }
            let sent = (packet.seq as usize + 1) * PACKET_SIZE;
            self.observer.on_event(&OtaEvent::Progress {
                current: sent.min(image.len()) as u64,
                total: image.len() as u64,
            });
        }
        info!(packets = total, "Data transfer complete, finalizing");

        match self.transact(&Command::Finish)? {
            Some(Response::Ack) => {}
            Some(response) => {
                return Err(HostError::Unexpected {
                    command: "FINISH",
                    response,
                });
            }
            None => return Err(HostError::NoResponse("FINISH")),
        }

        self.observer.on_event(&OtaEvent::SessionCompleted { version, address });
        Ok(UpdateReport {
            version,
            address,
            packets: total,
        })
    }

    /// Send INIT and wait for READY.
    ///
    /// INIT erases the slot, so a slow device gets a few reads before
    /// giving up. INIT itself is sent once.
    fn start(&self, request: &InitRequest) -> Result<(), HostError> {
        self.send(&Command::Init(*request))?;

        for attempt in 1..=self.config.max_retries {
            match self.read_response()? {
                Some(Response::Ready) => {
                    self.observer.on_event(&OtaEvent::SessionStarted {
                        version: request.version,
                        address: request.address,
                        size: request.size,
                    });
                    return Ok(());
                }
                Some(Response::Error(Some(code))) => return Err(HostError::InitRefused(code)),
                Some(response @ (Response::Error(None) | Response::Nack)) => {
                    return Err(HostError::Unexpected {
                        command: "INIT",
                        response,
                    });
                }
                other => {
                    self.observer.on_event(&OtaEvent::Log {
                        level: LogLevel::Warn,
                        message: format!(
                            "No READY ({other:?}), retrying ({attempt}/{})",
                            self.config.max_retries
                        ),
                    });
                    thread::sleep(self.config.retry_delay);
                }
            }
        }
        Err(HostError::NoResponse("INIT"))
    }

    fn send_packet(&self, packet: &Packet) -> Result<(), HostError> {
        let command = Command::SendPacket(*packet);
        for attempt in 1..=self.config.max_retries {
            match self.transact(&command)? {
                Some(Response::Ack) => return Ok(()),
                Some(Response::Nack) => return Err(HostError::PacketRejected { seq: packet.seq }),
                Some(Response::ChecksumError) => {
                    warn!(seq = packet.seq, attempt, "Checksum error, resending");
                }
                other => {
                    warn!(seq = packet.seq, attempt, response = ?other, "No acknowledgement");
                }
            }
        }
        Err(HostError::PacketFailed {
            seq: packet.seq,
            attempts: self.config.max_retries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::testing::RecordingObserver;
    use crate::protocol::frame::Frame;
    use crate::transport::MockTransport;

    fn config() -> HostConfig {
        HostConfig {
            retry_delay: Duration::ZERO,
            ..Default::default()
        }
    }

    fn host() -> (OtaHost<MockTransport, RecordingObserver>, MockTransport) {
        let link = MockTransport::new();
        let host = OtaHost::with_observer(link.clone(), config(), Arc::new(RecordingObserver::default()));
        (host, link)
    }

    fn reply(link: &MockTransport, response: Response) {
        link.push_bytes(&response.to_frame().to_bytes());
    }

    fn fresh_device(link: &MockTransport) {
        reply(link, Response::VersionInfo(VersionInfo::default()));
    }

    fn sent_commands(link: &MockTransport) -> Vec<Command> {
        link.get_writes()
            .iter()
            .map(|bytes| {
                let len = bytes[1] as usize;
                let frame = Frame::new(bytes[0], &bytes[2..2 + len]).unwrap();
                Command::from_frame(&frame).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_slot_selection() {
        let (host, _) = host();
        let mut info = VersionInfo::default();
        assert_eq!(host.select_target_slot(&info), SLOT_A_ADDRESS);

        info.current_version = 3;
        info.current_address = SLOT_A_ADDRESS;
        assert_eq!(host.select_target_slot(&info), SLOT_B_ADDRESS);

        info.current_address = SLOT_B_ADDRESS;
        assert_eq!(host.select_target_slot(&info), SLOT_A_ADDRESS);
    }

    #[test]
    fn test_update_happy_path() {
        let (host, link) = host();
        let image = FirmwareImage::test_pattern(20).unwrap();

        fresh_device(&link);
        reply(&link, Response::Ready);
        reply(&link, Response::Ack);
        reply(&link, Response::Ack);
        reply(&link, Response::Ack);

        let report = host.update(&image, 7).unwrap();
        assert_eq!(
            report,
            UpdateReport {
                version: 7,
                address: SLOT_A_ADDRESS,
                packets: 2
            }
        );

        let packets: Vec<Packet> = image.packets().collect();
        assert_eq!(
            sent_commands(&link),
            vec![
                Command::GetVersion,
                Command::Init(InitRequest {
                    version: 7,
                    address: SLOT_A_ADDRESS,
                    size: 20
                }),
                Command::SendPacket(packets[0]),
                Command::SendPacket(packets[1]),
                Command::Finish,
            ]
        );
    }

    #[test]
    fn test_checksum_error_resends_packet() {
        let (host, link) = host();
        let image = FirmwareImage::test_pattern(16).unwrap();

        fresh_device(&link);
        reply(&link, Response::Ready);
        reply(&link, Response::ChecksumError);
        reply(&link, Response::Ack);
        reply(&link, Response::Ack);

        host.update(&image, 1).unwrap();
        let commands = sent_commands(&link);
        assert_eq!(commands[2], commands[3]);
        assert_eq!(commands.len(), 5);
    }

    #[test]
    fn test_unanswered_packet_aborts() {
        let (host, link) = host();
        let image = FirmwareImage::test_pattern(16).unwrap();

        fresh_device(&link);
        reply(&link, Response::Ready);

        let err = host.update(&image, 1).unwrap_err();
        assert!(matches!(
            err,
            HostError::PacketFailed {
                seq: 0,
                attempts: HOST_MAX_RETRIES
            }
        ));
        let commands = sent_commands(&link);
        assert_eq!(commands.len(), 2 + HOST_MAX_RETRIES as usize + 1);
        assert_eq!(commands.last(), Some(&Command::Abort));
    }

    #[test]
    fn test_nack_aborts_immediately() {
        let (host, link) = host();
        let image = FirmwareImage::test_pattern(32).unwrap();

        fresh_device(&link);
        reply(&link, Response::Ready);
        reply(&link, Response::Nack);

        assert!(matches!(
            host.update(&image, 1),
            Err(HostError::PacketRejected { seq: 0 })
        ));
        let commands = sent_commands(&link);
        assert_eq!(commands.len(), 4);
        assert_eq!(commands[3], Command::Abort);
    }

    #[test]
    fn test_init_refused() {
        let (host, link) = host();
        let image = FirmwareImage::test_pattern(16).unwrap();

        fresh_device(&link);
        reply(&link, Response::Error(Some(ErrorCode::AlreadyActive)));
        assert!(matches!(
            host.update(&image, 1),
            Err(HostError::InitRefused(ErrorCode::AlreadyActive))
        ));
        // Nothing after INIT
        assert_eq!(sent_commands(&link).len(), 2);
    }

    #[test]
    fn test_unknown_error_code_fails_at_once() {
        let link = MockTransport::new();
        let host = OtaHost::with_observer(
            link.clone(),
            HostConfig {
                retry_delay: Duration::from_secs(60),
                ..Default::default()
            },
            Arc::new(RecordingObserver::default()),
        );
        let image = FirmwareImage::test_pattern(16).unwrap();

        fresh_device(&link);
        let frame = Frame::new(RESP_ERROR, &[0x09]).unwrap();
        link.push_bytes(&frame.to_bytes());
        assert!(matches!(
            host.update(&image, 1),
            Err(HostError::UnknownDeviceError(0x09))
        ));
        assert_eq!(sent_commands(&link).len(), 2);
    }

    #[test]
    fn test_init_waits_for_ready() {
        let (host, link) = host();
        let image = FirmwareImage::test_pattern(16).unwrap();

        fresh_device(&link);
        // Stale answer first, READY on the second read
        reply(&link, Response::Ack);
        reply(&link, Response::Ready);
        reply(&link, Response::Ack);
        reply(&link, Response::Ack);
        assert!(host.update(&image, 1).is_ok());
        assert_eq!(sent_commands(&link).len(), 4);
    }

    #[test]
    fn test_init_without_ready_fails() {
        let (host, link) = host();
        let image = FirmwareImage::test_pattern(16).unwrap();
        fresh_device(&link);
        assert!(matches!(
            host.update(&image, 1),
            Err(HostError::NoResponse("INIT"))
        ));
    }

    #[test]
    fn test_finish_rejected() {
        let (host, link) = host();
        let image = FirmwareImage::test_pattern(16).unwrap();

        fresh_device(&link);
        reply(&link, Response::Ready);
        reply(&link, Response::Ack);
        reply(&link, Response::Nack);
        assert!(matches!(
            host.update(&image, 1),
            Err(HostError::Unexpected {
                command: "FINISH",
                response: Response::Nack
            })
        ));
    }

    #[test]
    fn test_version_info_errors() {
        let (host, link) = host();
        assert!(matches!(
            host.version_info(),
            Err(HostError::NoResponse("GET_VERSION"))
        ));

        reply(&link, Response::Ack);
        assert!(matches!(
            host.version_info(),
            Err(HostError::Unexpected { .. })
        ));

        link.disconnect();
        assert!(matches!(
            host.version_info(),
            Err(HostError::Transport(TransportError::Disconnected))
        ));
    }

    #[test]
    fn test_progress_reported() {
        let link = MockTransport::new();
        let observer = Arc::new(RecordingObserver::default());
        let host = OtaHost::with_observer(link.clone(), config(), observer.clone());
        let image = FirmwareImage::test_pattern(20).unwrap();

        fresh_device(&link);
        for response in [Response::Ready, Response::Ack, Response::Ack, Response::Ack] {
            reply(&link, response);
        }
        host.update(&image, 2).unwrap();

        let progress: Vec<(u64, u64)> = observer
            .events()
            .iter()
            .filter_map(|e| match e {
                OtaEvent::Progress { current, total } => Some((*current, *total)),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![(16, 20), (20, 20)]);
    }
}
