//! # stomp-gateway
//!
//! STOMP frame codec and per-connection subprotocol session handling.
//!
//! The crate sits between a bidirectional byte-stream transport (e.g. a
//! WebSocket) and an internal message bus. It decodes NUL-terminated STOMP
//! frames from transport chunks (including frames fragmented across
//! chunks), enforces frame size limits, distinguishes heartbeats from data
//! frames, enriches decoded frames with session metadata, and encodes bus
//! messages back onto the transport, driving the STOMP lifecycle
//! (CONNECT -> CONNECTED, DISCONNECT, ERROR).
//!
//! Broker concerns (queueing, acknowledgment semantics, transactions) are
//! out of scope; the bus, transport, and user session registry are consumed
//! through the [`MessageBus`], [`Transport`], and [`UserSessionRegistry`]
//! traits.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use stomp_gateway::{
//!     InMemorySessionRegistry, SessionConfig, StompProtocolHandler,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = SessionConfig::new().with_path_max_frame_size("/ws/trading", 64 * 1024);
//!     let handler = Arc::new(StompProtocolHandler::new(
//!         config,
//!         my_bus,                                  // impl MessageBus
//!         Arc::new(InMemorySessionRegistry::new()),
//!     ));
//!     // Transport layer: register connections and feed payloads.
//!     // handler.session_started("session-1", Some("/ws/trading"), transport, None).await;
//!     // handler.on_inbound_payload("session-1", payload).await?;
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod config;
pub mod error;
pub mod frame;
pub mod handler;
pub mod principal;
pub mod registry;
pub mod session;
pub mod transport;
#[cfg(feature = "ws")]
pub mod ws;

pub use bus::{InboundMessage, MessageBus, OutboundMessage};
pub use config::SessionConfig;
pub use error::{Error, ProtocolError, Result};
pub use frame::{encode, Command, DecodeOutcome, Frame, Headers, StompDecoder};
pub use handler::{StompProtocolHandler, SUPPORTED_PROTOCOLS};
pub use principal::{LoginPrincipal, Principal};
pub use registry::{InMemorySessionRegistry, UserSessionRegistry};
pub use session::{SessionState, StompSession};
pub use transport::{CloseReason, Transport};
