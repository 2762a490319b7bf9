//! OTA Agent - the device side poll loop.
//!
//! One agent owns the update session, the version registry and the flash
//! and storage collaborators. Each poll iteration is:
//!
//! 1. abort the session if it has been idle past the session timeout,
//! 2. decode at most one frame,
//! 3. dispatch it and send exactly one response.

use std::sync::Arc;
use std::thread;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{AgentConfig, ConfigError};
use crate::events::{OtaEvent, OtaObserver, TracingObserver};
use crate::flash::FlashDevice;
use crate::protocol::frame::{DecodeOutcome, FrameCodec};
use crate::protocol::response::Response;
use crate::registry::VersionRegistry;
use crate::state::handlers::{HandlerContext, abort_on_timeout, handle_frame};
use crate::state::machine::{SessionLimits, UpdateSession};
use crate::storage::{RecordStore, StorageError};
use crate::transport::{ByteTransport, TransportError};

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Failed to load version registry: {0}")]
    Storage(#[from] StorageError),
}

/// What one poll iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// No input.
    Idle,
    /// Input arrived but did not form a valid frame; nothing was sent.
    Dropped,
    /// A frame was handled and this response sent.
    Responded(Response),
}

/// Device-side OTA engine.
pub struct OtaAgent<F, S, C = SystemClock, O = TracingObserver>
where
    F: FlashDevice,
    S: RecordStore,
    C: Clock,
    O: OtaObserver,
{
    config: AgentConfig,
    codec: FrameCodec,
    limits: SessionLimits,
    session: UpdateSession,
    registry: VersionRegistry,
    flash: F,
    store: S,
    clock: C,
    observer: Arc<O>,
}

impl<F: FlashDevice, S: RecordStore> OtaAgent<F, S> {
    /// Create an agent with the wall clock and the tracing observer.
    pub fn new(config: AgentConfig, flash: F, store: S) -> Result<Self, AgentError> {
        Self::with_parts(config, flash, store, SystemClock, Arc::new(TracingObserver))
    }
}

impl<F, S, C, O> OtaAgent<F, S, C, O>
where
    F: FlashDevice,
    S: RecordStore,
    C: Clock,
    O: OtaObserver,
{
    /// Create an agent, loading the version registry from `store`.
    pub fn with_parts(
        config: AgentConfig,
        flash: F,
        store: S,
        clock: C,
        observer: Arc<O>,
    ) -> Result<Self, AgentError> {
        config.validate()?;
        let registry = VersionRegistry::load(&store)?;
        info!(
            current = %registry.version_info(),
            "OTA agent ready"
        );
        Ok(Self {
            codec: config.frame_codec(),
            limits: config.session_limits(),
            config,
            session: UpdateSession::new(),
            registry,
            flash,
            store,
            clock,
            observer,
        })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn session(&self) -> &UpdateSession {
        &self.session
    }

    pub fn registry(&self) -> &VersionRegistry {
        &self.registry
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn context(&mut self) -> HandlerContext<'_, F, S, O> {
        HandlerContext {
            session: &mut self.session,
            registry: &mut self.registry,
            flash: &mut self.flash,
            store: &mut self.store,
            observer: self.observer.as_ref(),
            limits: &self.limits,
            now: self.clock.now(),
        }
    }

    /// Run one iteration of the loop.
    ///
    /// Only a failing transport is an error; protocol problems are answered
    /// on the wire or dropped silently.
    pub fn poll_once<T: ByteTransport + ?Sized>(
        &mut self,
        transport: &T,
    ) -> Result<PollOutcome, TransportError> {
        if self
            .session
            .is_expired(self.clock.now(), self.config.session_timeout())
        {
            abort_on_timeout(&mut self.context());
        }

        let frame = match self.codec.decode(transport) {
            Ok(frame) => frame,
            Err(DecodeOutcome::Idle { .. }) => return Ok(PollOutcome::Idle),
            Err(DecodeOutcome::Transport(e)) => return Err(e),
            Err(dropped) => {
                self.observer.on_event(&OtaEvent::FrameDropped {
                    reason: dropped.to_string(),
                });
                return Ok(PollOutcome::Dropped);
            }
        };

        let mut ctx = self.context();
        ctx.session.touch(ctx.now);
        let response = handle_frame(&frame, &mut ctx);
        debug!(
            command = %format!("0x{:02X}", frame.code),
            response = %response,
            "Frame handled"
        );

        self.codec.send(transport, &response.to_frame())?;
        Ok(PollOutcome::Responded(response))
    }

    /// Poll until the peer disconnects.
    ///
    /// Transient transport errors are logged and polling continues.
    #[instrument(skip(self, transport))]
    pub fn run<T: ByteTransport + ?Sized>(&mut self, transport: &T) -> Result<(), TransportError> {
        loop {
            match self.poll_once(transport) {
                Ok(_) => {}
                Err(TransportError::Disconnected) => {
                    info!("Peer disconnected");
                    return Ok(());
                }
                Err(e) => {
                    warn!(error = %e, "Transient transport error, retrying...");
                }
            }
            thread::sleep(self.config.poll_interval());
        }
    }
}
