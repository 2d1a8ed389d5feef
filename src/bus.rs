//! Message bus seam.
//!
//! The session forwards enriched client frames to the bus and receives
//! broker frames back through [`StompProtocolHandler::deliver`](crate::handler::StompProtocolHandler::deliver).
//! The bus only ever sees well-formed frames or the synthesized DISCONNECT;
//! decode errors never cross this boundary.

use crate::frame::Frame;
use crate::Result;
use async_trait::async_trait;

/// A client frame enriched with session metadata, as published to the bus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    /// Identifier of the session the frame arrived on.
    pub session_id: String,
    /// Name of the authenticated user, when the session has one.
    pub user: Option<String>,
    pub frame: Frame,
}

/// A message from the bus to be relayed to one session's peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundMessage {
    /// Acknowledges a CONNECT. Carries the original CONNECT frame so the
    /// session can negotiate the STOMP version from its `accept-version`
    /// header.
    ConnectAck { connect: Frame },
    /// A broker frame to encode and write (MESSAGE, RECEIPT, ERROR, ...).
    Frame(Frame),
}

/// Async trait for the internal pub/sub bus.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a decoded, enriched client frame.
    async fn publish(&self, message: InboundMessage) -> Result<()>;
}
