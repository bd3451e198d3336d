//! In-process fake connector for stream transport tests
//!
//! This module provides [`FakeConnector`], a scripted [`Connector`] that
//! replaces real network I/O when testing the reconnection state machine.
//!
//! # Usage
//!
//! Build a connector with a script of per-attempt [`FakeOutcome`]s; once
//! the script is exhausted the last outcome repeats. Every successful
//! open delivers a [`FakeConnectionHandle`] on the handle channel, which
//! the test uses to:
//!
//! - Inject inbound frames: `handle.frames_tx.send(frame)`
//! - Simulate a drop: `drop(handle.frames_tx)`
//! - Read what the transport sent: `handle.outbound_rx.recv().await`
//!
//! Open attempts are recorded with their `tokio::time::Instant`, so
//! paused-clock tests can assert backoff spacing.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::error::{FormStreamError, Result};
use crate::stream::message::OutboundMessage;
use crate::stream::{Connection, Connector, TransportKind};

/// What one `open()` call should do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeOutcome {
    /// Fail with an ordinary transport error (retried)
    Fail,
    /// Fail with the capability signal (triggers fallback)
    Unsupported,
    /// Succeed and deliver a [`FakeConnectionHandle`]
    Succeed,
}

/// The test-side handle for one successfully opened fake connection
#[derive(Debug)]
pub struct FakeConnectionHandle {
    /// Inject inbound frames; drop to simulate a connection loss
    pub frames_tx: mpsc::UnboundedSender<String>,
    /// Outbound payloads the transport sent; `None` when unidirectional
    pub outbound_rx: Option<mpsc::UnboundedReceiver<OutboundMessage>>,
}

/// Scripted connector for state-machine tests
#[derive(Debug)]
pub struct FakeConnector {
    kind: TransportKind,
    script: Mutex<VecDeque<FakeOutcome>>,
    last_outcome: FakeOutcome,
    opens: Mutex<Vec<tokio::time::Instant>>,
    handle_tx: mpsc::UnboundedSender<FakeConnectionHandle>,
}

impl FakeConnector {
    /// Build a connector whose open attempts follow `script`; after the
    /// script is exhausted the final outcome repeats indefinitely.
    ///
    /// # Panics
    ///
    /// Panics if `script` is empty.
    pub fn scripted(
        kind: TransportKind,
        script: Vec<FakeOutcome>,
    ) -> (Self, mpsc::UnboundedReceiver<FakeConnectionHandle>) {
        assert!(!script.is_empty(), "FakeConnector needs at least one outcome");
        let last_outcome = *script.last().expect("non-empty script");
        let (handle_tx, handle_rx) = mpsc::unbounded_channel();
        (
            Self {
                kind,
                script: Mutex::new(script.into()),
                last_outcome,
                opens: Mutex::new(Vec::new()),
                handle_tx,
            },
            handle_rx,
        )
    }

    /// A connector whose every attempt fails with a transport error.
    pub fn always_failing(kind: TransportKind) -> Self {
        Self::scripted(kind, vec![FakeOutcome::Fail]).0
    }

    /// A connector whose every attempt reports the capability signal.
    pub fn always_unsupported() -> Self {
        Self::scripted(TransportKind::Bidirectional, vec![FakeOutcome::Unsupported]).0
    }

    /// A connector whose every attempt succeeds.
    pub fn always_succeeding(
        kind: TransportKind,
    ) -> (Self, mpsc::UnboundedReceiver<FakeConnectionHandle>) {
        Self::scripted(kind, vec![FakeOutcome::Succeed])
    }

    /// How many times `open()` was called.
    pub fn open_count(&self) -> usize {
        self.opens.lock().expect("opens lock").len()
    }

    /// The instants at which `open()` was called, in order.
    pub fn open_instants(&self) -> Vec<tokio::time::Instant> {
        self.opens.lock().expect("opens lock").clone()
    }

    fn next_outcome(&self) -> FakeOutcome {
        let mut script = self.script.lock().expect("script lock");
        if script.len() > 1 {
            script.pop_front().expect("non-empty script")
        } else {
            script.front().copied().unwrap_or(self.last_outcome)
        }
    }
}

#[async_trait::async_trait]
impl Connector for FakeConnector {
    async fn open(&self, session_id: &str) -> Result<Connection> {
        self.opens
            .lock()
            .expect("opens lock")
            .push(tokio::time::Instant::now());

        match self.next_outcome() {
            FakeOutcome::Fail => Err(anyhow::anyhow!(FormStreamError::Transport(format!(
                "scripted failure for {}",
                session_id
            )))),
            FakeOutcome::Unsupported => Err(anyhow::anyhow!(
                FormStreamError::BidirectionalUnsupported("scripted capability miss".to_string())
            )),
            FakeOutcome::Succeed => {
                let (frames_tx, frames_rx) = mpsc::unbounded_channel();
                let (outbound, handle_outbound_rx) = match self.kind {
                    TransportKind::Bidirectional => {
                        let (tx, rx) = mpsc::unbounded_channel();
                        (Some(tx), Some(rx))
                    }
                    TransportKind::Unidirectional => (None, None),
                };

                let _ = self.handle_tx.send(FakeConnectionHandle {
                    frames_tx,
                    outbound_rx: handle_outbound_rx,
                });

                Ok(Connection {
                    kind: self.kind,
                    frames: frames_rx,
                    outbound,
                })
            }
        }
    }

    fn kind(&self) -> TransportKind {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A scripted connector replays outcomes and repeats the last one.
    #[tokio::test]
    async fn test_script_replays_and_repeats_last() {
        let (connector, _handles) = FakeConnector::scripted(
            TransportKind::Bidirectional,
            vec![FakeOutcome::Fail, FakeOutcome::Succeed],
        );

        assert!(connector.open("s").await.is_err());
        assert!(connector.open("s").await.is_ok());
        assert!(connector.open("s").await.is_ok());
        assert_eq!(connector.open_count(), 3);
    }

    /// A successful open delivers a handle whose frames reach the
    /// connection receiver.
    #[tokio::test]
    async fn test_succeed_delivers_handle_wired_to_connection() {
        let (connector, mut handles) =
            FakeConnector::always_succeeding(TransportKind::Bidirectional);

        let mut conn = connector.open("s").await.unwrap();
        let handle = handles.recv().await.unwrap();

        handle.frames_tx.send("frame-1".to_string()).unwrap();
        assert_eq!(conn.frames.recv().await.unwrap(), "frame-1");
        assert!(conn.outbound.is_some());
    }

    /// Unidirectional fakes have no outbound half.
    #[tokio::test]
    async fn test_unidirectional_has_no_outbound() {
        let (connector, mut handles) =
            FakeConnector::always_succeeding(TransportKind::Unidirectional);

        let conn = connector.open("s").await.unwrap();
        let handle = handles.recv().await.unwrap();
        assert!(conn.outbound.is_none());
        assert!(handle.outbound_rx.is_none());
    }

    /// The unsupported script yields the capability error variant.
    #[tokio::test]
    async fn test_unsupported_yields_capability_error() {
        let connector = FakeConnector::always_unsupported();
        let err = connector.open("s").await.unwrap_err();
        let err = err.downcast::<FormStreamError>().expect("typed error");
        assert!(matches!(err, FormStreamError::BidirectionalUnsupported(_)));
    }
}
