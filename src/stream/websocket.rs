//! Bidirectional WebSocket connector
//!
//! The primary transport: one WebSocket per session id, carrying inbound
//! stream frames and the outbound `send` channel. Built on
//! `tokio-tungstenite`; the socket is split into a read half that
//! forwards text frames and a write half that drains the outbound
//! channel.
//!
//! Handshake failures where the endpoint answers with a plain HTTP
//! response (upgrade rejected) are classified as
//! [`FormStreamError::BidirectionalUnsupported`] so the stream transport
//! can fall back to the unidirectional push stream instead of retrying.

use std::collections::HashMap;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::error::{FormStreamError, Result};
use crate::stream::message::OutboundMessage;
use crate::stream::{Connection, Connector, TransportKind};

/// Connector for the primary bidirectional WebSocket transport
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    /// Service base URL (`http(s)` scheme; converted to `ws(s)`)
    base_url: url::Url,
    /// Static headers attached to the handshake (credentials go here)
    headers: HashMap<String, String>,
}

impl WebSocketConnector {
    /// Construct a connector targeting `base_url`.
    ///
    /// No network I/O is performed at construction time.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The service base address (e.g. `https://host`).
    /// * `headers` - Extra headers for the handshake. Auth tokens go here.
    pub fn new(base_url: url::Url, headers: HashMap<String, String>) -> Self {
        Self { base_url, headers }
    }

    /// The WebSocket endpoint URL for `session_id`.
    ///
    /// `http` maps to `ws`, `https` to `wss`.
    fn endpoint(&self, session_id: &str) -> Result<url::Url> {
        let mut endpoint = self
            .base_url
            .join(&format!("sessions/{}/stream", session_id))
            .map_err(|e| FormStreamError::Config(format!("invalid stream endpoint: {}", e)))?;

        let scheme = match endpoint.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        endpoint
            .set_scheme(scheme)
            .map_err(|()| FormStreamError::Config("cannot set websocket scheme".to_string()))?;

        Ok(endpoint)
    }
}

#[async_trait::async_trait]
impl Connector for WebSocketConnector {
    /// Open one WebSocket connection for `session_id`.
    ///
    /// On success, spawns a read task forwarding inbound text frames and
    /// a write task draining the outbound channel. The frame receiver
    /// closes when the socket drops, which is how the stream transport
    /// detects the loss.
    ///
    /// # Errors
    ///
    /// Returns [`FormStreamError::BidirectionalUnsupported`] when the
    /// handshake is answered with a plain HTTP response or the endpoint
    /// URL cannot carry a WebSocket scheme, and
    /// [`FormStreamError::Transport`] for ordinary connect failures.
    async fn open(&self, session_id: &str) -> Result<Connection> {
        let endpoint = self.endpoint(session_id)?;

        let mut request = endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| FormStreamError::Transport(format!("handshake request: {}", e)))?;
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| FormStreamError::Config(format!("invalid header name: {}", e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| FormStreamError::Config(format!("invalid header value: {}", e)))?;
            let _ = request.headers_mut().insert(name, value);
        }

        let (socket, _response) = connect_async(request).await.map_err(|e| match e {
            // The endpoint answered but refused the upgrade: this runtime
            // or deployment has no bidirectional support for the session.
            WsError::Http(response) => anyhow::anyhow!(FormStreamError::BidirectionalUnsupported(
                format!("upgrade rejected with HTTP {}", response.status())
            )),
            WsError::Url(e) => anyhow::anyhow!(FormStreamError::BidirectionalUnsupported(
                format!("unusable websocket url: {}", e)
            )),
            other => anyhow::anyhow!(FormStreamError::Transport(format!(
                "websocket connect failed: {}",
                other
            ))),
        })?;

        let (mut write, mut read) = socket.split();
        let (frames_tx, frames_rx) = mpsc::unbounded_channel::<String>();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<OutboundMessage>();

        // Read half: forward text frames until the socket drops. Dropping
        // frames_tx closes the receiver, which signals the loss upstream.
        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if frames_tx.send(text).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    // Pings are answered by tungstenite; binary frames are
                    // not part of the envelope contract.
                    Ok(_) => {}
                }
            }
        });

        // Write half: drain the outbound channel until the transport
        // drops its sender, then close the socket politely.
        tokio::spawn(async move {
            while let Some(payload) = outbound_rx.recv().await {
                let text = match serde_json::to_string(&payload) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!("failed to encode outbound payload: {}", e);
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(text)).await {
                    tracing::warn!("websocket send failed: {}", e);
                    break;
                }
            }
            let _ = write.send(Message::Close(None)).await;
        });

        Ok(Connection {
            kind: TransportKind::Bidirectional,
            frames: frames_rx,
            outbound: Some(outbound_tx),
        })
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Bidirectional
    }
}
