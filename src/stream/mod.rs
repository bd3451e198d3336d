//! Session stream transports
//!
//! This module defines the [`Connector`] trait that both transport kinds
//! implement. Concrete implementations live in submodules:
//!
//! - [`websocket::WebSocketConnector`] -- the primary bidirectional
//!   socket, one logical connection per session id.
//! - [`sse::SseConnector`] -- the unidirectional push fallback used when
//!   the runtime cannot open a bidirectional socket. Read-only with
//!   respect to the session stream.
//! - [`fake::FakeConnector`] -- scripted in-process connector used in
//!   tests (cfg(test) only).
//!
//! # Design
//!
//! A connector opens exactly one physical connection per call and hands
//! back a [`Connection`]: a receiver of raw text frames plus an optional
//! outbound sender. Reconnection, backoff, and the capability fallback
//! are the responsibility of [`transport::StreamTransport`], which owns a
//! connector pair and exposes one uniform event stream regardless of
//! which kind is active.

use tokio::sync::mpsc;

use crate::error::Result;
use crate::stream::message::{OutboundMessage, StreamMessage};

pub mod message;
pub mod sse;
pub mod transport;
pub mod websocket;

#[cfg(test)]
pub mod fake;

/// Which kind of physical connection is active
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Socket with an outbound channel
    Bidirectional,
    /// Push stream with no outbound channel (degraded)
    Unidirectional,
}

/// One live physical connection handed back by a [`Connector`]
///
/// The `frames` receiver yields raw text frames in arrival order and
/// closes when the underlying connection drops. `outbound` is `None` for
/// unidirectional connections.
#[derive(Debug)]
pub struct Connection {
    /// The kind of connection that was actually opened
    pub kind: TransportKind,
    /// Inbound raw text frames, one per event
    pub frames: mpsc::UnboundedReceiver<String>,
    /// Outbound payload sender; absent on the degraded fallback
    pub outbound: Option<mpsc::UnboundedSender<OutboundMessage>>,
}

/// Abstraction over one physical connection attempt.
///
/// Implementations exist for WebSocket and SSE. A [`fake::FakeConnector`]
/// is provided for tests.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + std::fmt::Debug {
    /// Attempt to open one connection for `session_id`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::FormStreamError::BidirectionalUnsupported`]
    /// when the runtime cannot open this connection kind at all (a
    /// capability signal, handled by falling back rather than retrying),
    /// or [`crate::error::FormStreamError::Transport`] for ordinary
    /// connect failures, which are retried.
    async fn open(&self, session_id: &str) -> Result<Connection>;

    /// The kind of connection this connector opens.
    fn kind(&self) -> TransportKind;
}

/// Events a [`transport::StreamTransport`] publishes to its consumer
///
/// Delivered strictly in order on a single channel; `Message` events are
/// never reordered, coalesced, or batched.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The connection is open (initial or recovered)
    Opened {
        /// Which transport kind ended up active
        kind: TransportKind,
    },
    /// One decoded stream event
    Message(StreamMessage),
    /// The connection dropped; a reconnect attempt is scheduled
    Recovering {
        /// 1-based attempt number about to be made
        attempt: u32,
        /// The failure that triggered recovery
        error: String,
    },
    /// The transport reached its terminal state
    ///
    /// `terminal_error` is `Some` when the attempt cap was exhausted and
    /// `None` on manual close.
    Closed {
        /// Terminal failure, if the close was not requested
        terminal_error: Option<String>,
    },
}
