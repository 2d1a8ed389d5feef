//! Per-connection STOMP session handling.
//!
//! A [`StompSession`] sits between one transport connection and the message
//! bus: it assembles transport-level fragments, enforces the frame size
//! limit, decodes inbound chunks, enriches frames with session metadata,
//! and encodes bus messages back onto the transport, including the STOMP
//! lifecycle transitions (CONNECT -> CONNECTED, DISCONNECT, ERROR).

use std::sync::Arc;

use bytes::BytesMut;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, trace};

use crate::bus::{InboundMessage, MessageBus, OutboundMessage};
use crate::config::SessionConfig;
use crate::error::{Error, ProtocolError, Result};
use crate::frame::{self, Command, DecodeOutcome, Frame, StompDecoder, LOGIN, SUBSCRIPTION, USER_NAME};
use crate::principal::{registry_name, LoginPrincipal, Principal};
use crate::registry::UserSessionRegistry;
use crate::transport::{CloseReason, Transport};

/// Lifecycle state of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Transport established, no CONNECT handled yet.
    Open,
    /// CONNECTED has been sent to the peer.
    Connected,
    /// A fatal error occurred; the transport is being torn down.
    Closing,
    /// The transport is gone.
    Closed,
}

/// Inbound decode state, exclusively owned by the connection's processing
/// sequence (inbound payloads for one session arrive strictly in order).
struct Inbound {
    decoder: StompDecoder,
    /// Raw bytes of a frame split across multiple transport messages,
    /// allocated lazily on the first non-final fragment.
    fragments: Option<BytesMut>,
}

/// One STOMP session over one transport connection.
pub struct StompSession {
    id: String,
    max_frame_size: usize,
    transport: Arc<dyn Transport>,
    bus: Arc<dyn MessageBus>,
    registry: Arc<dyn UserSessionRegistry>,
    inbound: Mutex<Inbound>,
    principal: RwLock<Option<Arc<dyn Principal>>>,
    /// User name registered in the session registry, kept for deregistration.
    registered_user: RwLock<Option<String>>,
    state: RwLock<SessionState>,
    /// Serializes transport writes; outbound frames may be produced
    /// concurrently by independent bus dispatch tasks.
    write_lock: Mutex<()>,
}

impl StompSession {
    pub(crate) fn new(
        id: impl Into<String>,
        path: Option<&str>,
        config: &SessionConfig,
        transport: Arc<dyn Transport>,
        bus: Arc<dyn MessageBus>,
        registry: Arc<dyn UserSessionRegistry>,
        principal: Option<Arc<dyn Principal>>,
    ) -> Self {
        Self {
            id: id.into(),
            max_frame_size: config.max_frame_size_for(path),
            transport,
            bus,
            registry,
            inbound: Mutex::new(Inbound {
                decoder: StompDecoder::new(),
                fragments: None,
            }),
            principal: RwLock::new(principal),
            registered_user: RwLock::new(None),
            state: RwLock::new(SessionState::Open),
            write_lock: Mutex::new(()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Effective maximum frame size for this connection.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    /// Handle one raw transport payload from the client.
    ///
    /// Decode errors are reported to the peer as an ERROR frame; fatal
    /// classes additionally close the connection. Nothing but well-formed
    /// frames ever reaches the bus.
    pub async fn on_inbound(&self, payload: &[u8]) {
        if *self.state.read().await == SessionState::Closed {
            return;
        }
        let frame = match self.decode_inbound(payload).await {
            Ok(Some(frame)) => frame,
            Ok(None) => return,
            Err(err) => {
                error!(session = %self.id, %err, "failed to parse transport payload as STOMP frame");
                self.report_error(&err).await;
                return;
            }
        };
        if let Err(err) = self.forward_to_bus(frame).await {
            error!(session = %self.id, %err, "failed to forward frame to message bus");
            self.send_error_frame(&err.to_string()).await;
        }
    }

    /// Handle one message from the bus destined for this session's peer.
    pub async fn on_outbound(&self, message: OutboundMessage) {
        let frame = match self.prepare_outbound(message).await {
            Ok(Some(frame)) => frame,
            Ok(None) => return,
            Err(err) => {
                error!(session = %self.id, %err, "failed to prepare outbound frame");
                self.report_error(&err).await;
                return;
            }
        };

        let is_error_frame = frame.command == Command::Error;
        if let Err(err) = self.write_frame(&frame).await {
            if is_error_frame {
                // The transport is assumed broken; abandon silently.
                trace!(session = %self.id, %err, "dropped ERROR frame on failed transport");
            } else {
                error!(session = %self.id, %err, "failed to send frame");
                self.send_error_frame(&err.to_string()).await;
            }
        } else if frame.command == Command::Connected {
            *self.state.write().await = SessionState::Connected;
        }

        if is_error_frame {
            self.close(CloseReason::ProtocolError).await;
        }
    }

    /// Transport-level disconnect notification. Deregisters the user,
    /// discards any partial frame, and forwards an internal DISCONNECT to
    /// the bus carrying the session id.
    pub async fn on_closed(&self) {
        *self.state.write().await = SessionState::Closed;
        if let Some(user) = self.registered_user.write().await.take() {
            self.registry.unregister(&user, &self.id);
        }
        {
            // Partial frames are never flushed.
            let mut inbound = self.inbound.lock().await;
            inbound.fragments = None;
            inbound.decoder.reset();
        }
        let message = InboundMessage {
            session_id: self.id.clone(),
            user: None,
            frame: Frame::disconnect(),
        };
        if let Err(err) = self.bus.publish(message).await {
            error!(session = %self.id, %err, "failed to publish DISCONNECT for closed session");
        }
    }

    /// Assemble transport fragments and decode. `Ok(None)` means a fragment
    /// was buffered or a heartbeat was consumed.
    async fn decode_inbound(&self, payload: &[u8]) -> Result<Option<Frame>> {
        let mut inbound = self.inbound.lock().await;

        if !ends_with_terminator(payload) {
            debug!(session = %self.id, len = payload.len(), "STOMP frame fragment detected");
            let buffered = inbound.fragments.as_ref().map_or(0, |b| b.len());
            if buffered + payload.len() > self.max_frame_size {
                inbound.fragments = None;
                return Err(self.overflow());
            }
            inbound
                .fragments
                .get_or_insert_with(|| BytesMut::with_capacity(self.max_frame_size))
                .extend_from_slice(payload);
            return Ok(None);
        }

        let outcome = if let Some(mut buffer) = inbound.fragments.take() {
            debug!(session = %self.id, "last STOMP frame fragment detected");
            if buffer.len() + payload.len() > self.max_frame_size {
                return Err(self.overflow());
            }
            buffer.extend_from_slice(payload);
            inbound.decoder.decode(&buffer)
        } else {
            if payload.len() > self.max_frame_size {
                return Err(self.overflow());
            }
            inbound.decoder.decode(payload)
        };

        match outcome {
            Ok(DecodeOutcome::Frame(frame)) => Ok(Some(frame)),
            Ok(DecodeOutcome::Heartbeat) => {
                trace!(session = %self.id, "received heartbeat from client");
                self.transport.heartbeat_received().await;
                Ok(None)
            }
            Ok(DecodeOutcome::Incomplete) => {
                // The payload claimed to be final but no frame came out.
                inbound.decoder.reset();
                Err(ProtocolError::MalformedFrame("not a valid STOMP frame".into()).into())
            }
            Err(err) => {
                inbound.decoder.reset();
                Err(err.into())
            }
        }
    }

    /// Stamp session metadata onto a decoded frame and publish it.
    async fn forward_to_bus(&self, frame: Frame) -> Result<()> {
        trace!(session = %self.id, command = %frame.command, "received frame from client");
        if frame.command == Command::Connect {
            self.attach_principal(&frame).await;
        }
        let user = self
            .principal
            .read()
            .await
            .as_ref()
            .map(|p| registry_name(p.as_ref()).to_string());
        self.bus
            .publish(InboundMessage {
                session_id: self.id.clone(),
                user,
                frame,
            })
            .await
    }

    /// On CONNECT, fall back to a login-header principal when the transport
    /// did not authenticate the session. Read-only afterward.
    async fn attach_principal(&self, connect: &Frame) {
        let mut principal = self.principal.write().await;
        if principal.is_none() {
            if let Some(login) = connect.headers.get(LOGIN) {
                *principal = Some(Arc::new(LoginPrincipal::new(login)));
            }
        }
    }

    async fn prepare_outbound(&self, message: OutboundMessage) -> Result<Option<Frame>> {
        match message {
            OutboundMessage::ConnectAck { connect } => {
                let version = negotiate_version(&connect)?;
                let frame = self.after_connected(Frame::connected(version)).await;
                Ok(Some(frame))
            }
            OutboundMessage::Frame(frame) => {
                if frame.command == Command::Connected {
                    return Ok(Some(self.after_connected(frame).await));
                }
                if frame.command == Command::Message && frame.headers.get(SUBSCRIPTION).is_none() {
                    error!(session = %self.id, "ignoring MESSAGE frame, no subscription header");
                    return Ok(None);
                }
                Ok(Some(frame))
            }
        }
    }

    /// CONNECT side effects: name the authenticated user on the CONNECTED
    /// frame and register the session with the user session registry.
    async fn after_connected(&self, mut frame: Frame) -> Frame {
        if let Some(principal) = self.principal.read().await.clone() {
            frame.headers.push(USER_NAME, principal.name());
            let user = registry_name(principal.as_ref()).to_string();
            self.registry.register(&user, &self.id);
            *self.registered_user.write().await = Some(user);
        }
        frame
    }

    async fn write_frame(&self, frame: &Frame) -> Result<()> {
        debug!(session = %self.id, command = %frame.command, "sending frame");
        let bytes = frame::encode(frame);
        let _guard = self.write_lock.lock().await;
        self.transport.send(&bytes).await
    }

    /// Report a failure to the peer, closing the connection for fatal
    /// protocol errors.
    async fn report_error(&self, err: &Error) {
        self.send_error_frame(&err.to_string()).await;
        if let Error::Protocol(protocol_err) = err {
            if protocol_err.is_fatal() {
                self.close(CloseReason::ProtocolError).await;
            }
        }
    }

    /// Best-effort ERROR frame; write failures are swallowed because the
    /// transport is assumed already broken.
    async fn send_error_frame(&self, description: &str) {
        let bytes = frame::encode(&Frame::error(description));
        let _guard = self.write_lock.lock().await;
        if let Err(err) = self.transport.send(&bytes).await {
            trace!(session = %self.id, %err, "failed to send ERROR frame");
        }
    }

    async fn close(&self, reason: CloseReason) {
        *self.state.write().await = SessionState::Closing;
        if let Err(err) = self.transport.close(reason).await {
            trace!(session = %self.id, %err, "failed to close transport");
        }
    }

    fn overflow(&self) -> Error {
        ProtocolError::BufferOverflow {
            limit: self.max_frame_size,
        }
        .into()
    }
}

/// Whether a transport payload carries the end of a frame: after stripping
/// trailing line terminators it either ends in the NUL terminator or is
/// empty (a heartbeat is nothing but line terminators).
fn ends_with_terminator(payload: &[u8]) -> bool {
    let mut end = payload.len();
    while end > 0 && (payload[end - 1] == b'\n' || payload[end - 1] == b'\r') {
        end -= 1;
    }
    end == 0 || payload[end - 1] == 0
}

/// Pick the STOMP version from a CONNECT frame's `accept-version` set:
/// prefer 1.2, else 1.1; an absent or empty set means a 1.0 client and no
/// version header is emitted.
fn negotiate_version(connect: &Frame) -> std::result::Result<Option<&'static str>, ProtocolError> {
    let versions = connect.accept_versions();
    if versions.contains(&"1.2") {
        Ok(Some("1.2"))
    } else if versions.contains(&"1.1") {
        Ok(Some("1.1"))
    } else if versions.is_empty() {
        Ok(None)
    } else {
        Err(ProtocolError::UnsupportedVersion(versions.join(",")))
    }
}
