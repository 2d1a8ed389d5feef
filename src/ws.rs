//! WebSocket transport adapter (requires the `ws` feature).
//!
//! Accepts a WebSocket connection, registers it with the protocol handler,
//! and pumps inbound messages into it. Outbound frames go through
//! [`WsTransport`], the send half of the split socket.

use std::sync::Arc;

use futures::sink::SinkExt;
use futures::stream::StreamExt;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;
use uuid::Uuid;

use crate::error::Error;
use crate::handler::StompProtocolHandler;
use crate::transport::{CloseReason, Transport};
use crate::Result;

type WsStream = tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>;

/// Send half of an accepted WebSocket connection.
pub struct WsTransport {
    writer: Mutex<futures::stream::SplitSink<WsStream, Message>>,
}

impl WsTransport {
    pub(crate) fn new(writer: futures::stream::SplitSink<WsStream, Message>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

#[async_trait::async_trait]
impl Transport for WsTransport {
    async fn send(&self, data: &[u8]) -> Result<()> {
        // STOMP is a text protocol, but payload bytes are not required to
        // be valid UTF-8.
        let message = match std::str::from_utf8(data) {
            Ok(text) => Message::Text(text.to_string()),
            Err(_) => Message::Binary(data.to_vec()),
        };
        let mut writer = self.writer.lock().await;
        writer
            .send(message)
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(())
    }

    async fn close(&self, reason: CloseReason) -> Result<()> {
        let code = match reason {
            CloseReason::Normal => CloseCode::Normal,
            CloseReason::ProtocolError => CloseCode::Protocol,
        };
        let mut writer = self.writer.lock().await;
        writer
            .send(Message::Close(Some(CloseFrame {
                code,
                reason: "".into(),
            })))
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(())
    }
}

/// Accept a WebSocket connection and drive its inbound side, feeding
/// payloads to `handler` until the peer disconnects. `path` is the endpoint
/// path the peer connected on, used for per-path frame size limits.
pub async fn serve_connection(
    handler: Arc<StompProtocolHandler>,
    stream: tokio::net::TcpStream,
    path: Option<&str>,
) -> Result<()> {
    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| Error::Transport(e.to_string()))?;
    let (writer, mut reader) = ws.split();

    let session_id = Uuid::new_v4().to_string();
    let transport = Arc::new(WsTransport::new(writer));
    handler
        .session_started(session_id.clone(), path, transport, None)
        .await;

    while let Some(message) = reader.next().await {
        match message {
            Ok(Message::Text(text)) => {
                handler.on_inbound_payload(&session_id, text.as_bytes()).await?;
            }
            Ok(Message::Binary(data)) => {
                handler.on_inbound_payload(&session_id, &data).await?;
            }
            Ok(Message::Close(_)) => break,
            // Ping/pong is answered by tungstenite itself.
            Ok(_) => {}
            Err(err) => {
                debug!(session = %session_id, %err, "websocket read failed");
                break;
            }
        }
    }

    handler.session_closed(&session_id).await
}
