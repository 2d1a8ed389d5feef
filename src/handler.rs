//! Shared entry point routing transport and bus callbacks to sessions.
//!
//! One handler serves all connections of an endpoint. It owns the immutable
//! [`SessionConfig`], the bus and registry collaborators, and the map of
//! live sessions keyed by session id.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::bus::{MessageBus, OutboundMessage};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::principal::Principal;
use crate::registry::UserSessionRegistry;
use crate::session::StompSession;
use crate::transport::Transport;

/// WebSocket subprotocol tokens served by this handler.
pub const SUPPORTED_PROTOCOLS: [&str; 3] = ["v10.stomp", "v11.stomp", "v12.stomp"];

/// STOMP subprotocol handler for any number of concurrent connections.
pub struct StompProtocolHandler {
    config: Arc<SessionConfig>,
    bus: Arc<dyn MessageBus>,
    registry: Arc<dyn UserSessionRegistry>,
    sessions: RwLock<HashMap<String, Arc<StompSession>>>,
}

impl StompProtocolHandler {
    pub fn new(
        config: SessionConfig,
        bus: Arc<dyn MessageBus>,
        registry: Arc<dyn UserSessionRegistry>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            bus,
            registry,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Subprotocol tokens to offer during the transport handshake.
    pub fn supported_protocols(&self) -> &'static [&'static str] {
        &SUPPORTED_PROTOCOLS
    }

    /// Register a new connection. `path` is the endpoint path the peer
    /// connected on (used for per-path frame size limits); `principal` is
    /// the identity authenticated by the transport handshake, if any.
    pub async fn session_started(
        &self,
        id: impl Into<String>,
        path: Option<&str>,
        transport: Arc<dyn Transport>,
        principal: Option<Arc<dyn Principal>>,
    ) -> Arc<StompSession> {
        let id = id.into();
        let session = Arc::new(StompSession::new(
            id.clone(),
            path,
            &self.config,
            transport,
            self.bus.clone(),
            self.registry.clone(),
            principal,
        ));
        debug!(session = %id, "STOMP session started");
        self.sessions.write().await.insert(id, session.clone());
        session
    }

    /// Raw payload from the transport for one session.
    pub async fn on_inbound_payload(&self, session_id: &str, payload: &[u8]) -> Result<()> {
        self.session(session_id).await?.on_inbound(payload).await;
        Ok(())
    }

    /// Bus message destined for one session's peer.
    pub async fn deliver(&self, session_id: &str, message: OutboundMessage) -> Result<()> {
        self.session(session_id).await?.on_outbound(message).await;
        Ok(())
    }

    /// Transport-level disconnect: runs the session's close side effects
    /// and drops it from the map.
    pub async fn session_closed(&self, session_id: &str) -> Result<()> {
        let session = self
            .sessions
            .write()
            .await
            .remove(session_id)
            .ok_or_else(|| Error::UnknownSession(session_id.to_string()))?;
        debug!(session = %session_id, "STOMP session closed");
        session.on_closed().await;
        Ok(())
    }

    async fn session(&self, session_id: &str) -> Result<Arc<StompSession>> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| Error::UnknownSession(session_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InboundMessage;
    use crate::frame::Command;
    use crate::registry::InMemorySessionRegistry;
    use crate::transport::CloseReason;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct NullTransport;

    #[async_trait::async_trait]
    impl Transport for NullTransport {
        async fn send(&self, _data: &[u8]) -> Result<()> {
            Ok(())
        }
        async fn close(&self, _reason: CloseReason) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingBus {
        published: StdMutex<Vec<InboundMessage>>,
    }

    #[async_trait::async_trait]
    impl MessageBus for RecordingBus {
        async fn publish(&self, message: InboundMessage) -> Result<()> {
            self.published.lock().unwrap().push(message);
            Ok(())
        }
    }

    fn handler(bus: Arc<RecordingBus>) -> StompProtocolHandler {
        StompProtocolHandler::new(
            SessionConfig::new(),
            bus,
            Arc::new(InMemorySessionRegistry::new()),
        )
    }

    #[tokio::test]
    async fn routes_payloads_by_session_id() {
        let bus = Arc::new(RecordingBus::default());
        let handler = handler(bus.clone());
        handler
            .session_started("s1", None, Arc::new(NullTransport), None)
            .await;
        handler
            .session_started("s2", None, Arc::new(NullTransport), None)
            .await;

        handler
            .on_inbound_payload("s2", b"SEND\nd:1\n\nfor s2\0")
            .await
            .unwrap();

        let published = bus.published.lock().unwrap().clone();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].session_id, "s2");
    }

    #[tokio::test]
    async fn unknown_session_is_an_error() {
        let handler = handler(Arc::new(RecordingBus::default()));
        let err = handler.on_inbound_payload("nope", b"\n").await.unwrap_err();
        assert!(matches!(err, Error::UnknownSession(_)));
    }

    #[tokio::test]
    async fn closed_session_is_removed_and_disconnect_published() {
        let bus = Arc::new(RecordingBus::default());
        let handler = handler(bus.clone());
        handler
            .session_started("s1", None, Arc::new(NullTransport), None)
            .await;

        handler.session_closed("s1").await.unwrap();
        assert!(matches!(
            handler.on_inbound_payload("s1", b"\n").await.unwrap_err(),
            Error::UnknownSession(_)
        ));

        let published = bus.published.lock().unwrap().clone();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].frame.command, Command::Disconnect);
    }

    #[test]
    fn advertises_stomp_subprotocols() {
        assert_eq!(
            SUPPORTED_PROTOCOLS,
            ["v10.stomp", "v11.stomp", "v12.stomp"]
        );
    }
}
