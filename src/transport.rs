//! Transport abstraction for the connection layer.
//!
//! Implement this trait to plug in a WebSocket or other bidirectional
//! byte-stream transport. The session uses it for sending and closing;
//! receiving is handled by the transport layer itself, which feeds raw
//! payloads into [`StompProtocolHandler::on_inbound_payload`](crate::handler::StompProtocolHandler::on_inbound_payload).

use crate::Result;
use async_trait::async_trait;

/// Reason a session is being closed, mapped by the transport to its own
/// close status (e.g. a WebSocket close code).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// Normal shutdown.
    Normal,
    /// The peer violated the STOMP protocol.
    ProtocolError,
}

/// Async trait for a single connection's transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send raw bytes over the transport.
    async fn send(&self, data: &[u8]) -> Result<()>;

    /// Close the transport.
    async fn close(&self, reason: CloseReason) -> Result<()>;

    /// Called when a heartbeat arrives on the session, so the transport can
    /// reset any idle timers it owns. Default is a no-op; this core does not
    /// schedule timers itself.
    async fn heartbeat_received(&self) {}
}
