//! Session orchestration
//!
//! [`SessionOrchestrator`] binds one [`StreamTransport`] to the
//! reconciler for a single session id and turns the raw transport event
//! stream into two consumer-facing channels:
//!
//! - a `tokio::sync::watch` of [`SessionView`] snapshots, replaced
//!   wholesale on every change (never merged in place), and
//! - an ordered channel of [`SessionEvent`]s for the exactly-once
//!   concerns: completion, server-declared errors, and terminal
//!   connection loss.
//!
//! Deactivation is synchronous from the caller's point of view:
//! [`SessionOrchestrator::deactivate`] closes the transport and cancels
//! the event loop before returning, so no state publication or reconnect
//! can happen afterwards.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::api::SessionApi;
use crate::error::{FormStreamError, Result};
use crate::session::reconciler::{reconcile, Signal};
use crate::session::state::{Session, SessionStatus};
use crate::stream::message::OutboundMessage;
use crate::stream::transport::{RetryOptions, StreamTransport, TransportState};
use crate::stream::{Connector, TransportEvent, TransportKind};

/// Default bound on a stuck typing indicator.
pub const DEFAULT_TYPING_TIMEOUT: Duration = Duration::from_secs(10);

/// Default fallback polling cadence.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Tuning for a [`SessionOrchestrator`]
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorOptions {
    /// Reconnection tuning passed through to the transport
    pub retry: RetryOptions,
    /// How long a typing indicator may stay on without a follow-up event
    pub typing_timeout: Duration,
    /// Fallback polling cadence; `None` disables polling
    pub poll_interval: Option<Duration>,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            retry: RetryOptions::default(),
            typing_timeout: DEFAULT_TYPING_TIMEOUT,
            poll_interval: Some(DEFAULT_POLL_INTERVAL),
        }
    }
}

/// Connection health as a UI would render it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionHealth {
    /// The initial open attempt is in flight
    Connecting,
    /// Frames are flowing; `bidirectional` is false on the degraded
    /// fallback
    Connected {
        /// Whether the active connection has an outbound channel
        bidirectional: bool,
    },
    /// The connection dropped; reconnect attempt `attempt` is pending
    Recovering {
        /// 1-based reconnect attempt number
        attempt: u32,
    },
    /// Terminal: reconnects exhausted or the orchestrator was deactivated
    Lost,
}

/// One published snapshot of everything a consumer renders
///
/// Published over `watch`, replaced wholesale each time. Consumers must
/// treat it as immutable.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    /// The current session snapshot
    pub session: Session,
    /// Whether the assistant typing indicator is on
    pub assistant_typing: bool,
    /// Connection health derived from transport events
    pub health: ConnectionHealth,
}

/// Exactly-once side-channel notifications
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The session completed; carries the authoritative final snapshot
    Completed(Session),
    /// The server declared an error for this turn
    ServerError {
        /// User-visible failure description
        message: String,
        /// Machine-readable detail, when provided
        detail: Option<String>,
    },
    /// The transport gave up after exhausting its reconnect attempts
    ConnectionLost {
        /// The terminal failure description
        error: String,
    },
}

/// Owns the stream lifecycle for one active session
///
/// Construct with [`SessionOrchestrator::activate`]; drop or call
/// [`SessionOrchestrator::deactivate`] to tear everything down.
#[derive(Debug)]
pub struct SessionOrchestrator {
    session_id: String,
    transport: Arc<StreamTransport>,
    cancel: CancellationToken,
}

impl SessionOrchestrator {
    /// Activate a session: connect the transport and start the event
    /// loop.
    ///
    /// # Arguments
    ///
    /// * `session_id` - The session to stream.
    /// * `primary` - The bidirectional connector attempted first.
    /// * `fallback` - The unidirectional fallback connector.
    /// * `api` - REST collaborator for the initial snapshot fetch and
    ///   fallback polling; `None` disables both.
    /// * `options` - Orchestrator and transport tuning.
    ///
    /// # Returns
    ///
    /// The orchestrator handle, a `watch` receiver of [`SessionView`]
    /// snapshots, and the ordered [`SessionEvent`] channel.
    pub fn activate(
        session_id: impl Into<String>,
        primary: Arc<dyn Connector>,
        fallback: Arc<dyn Connector>,
        api: Option<Arc<SessionApi>>,
        options: OrchestratorOptions,
    ) -> (
        Self,
        watch::Receiver<SessionView>,
        mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        let session_id = session_id.into();
        let (transport, transport_events) = StreamTransport::new(
            session_id.clone(),
            primary,
            fallback,
            options.retry,
        );
        let transport = Arc::new(transport);

        let initial = SessionView {
            session: Session::new(&session_id),
            assistant_typing: false,
            health: ConnectionHealth::Connecting,
        };
        let (view_tx, view_rx) = watch::channel(initial);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        transport.connect();
        drop(tokio::spawn(run(
            Arc::clone(&transport),
            transport_events,
            api,
            options,
            view_tx,
            events_tx,
            cancel.clone(),
        )));

        (
            Self {
                session_id,
                transport,
                cancel,
            },
            view_rx,
            events_rx,
        )
    }

    /// The session id this orchestrator owns.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Send a visitor message over the stream.
    ///
    /// Fails loudly instead of buffering: callers must route through the
    /// request path (`SessionApi::post_message`) when the stream is
    /// degraded or down.
    ///
    /// # Errors
    ///
    /// Returns [`FormStreamError::SendRejected`] when the transport is
    /// not open, or open on the unidirectional fallback.
    pub fn send_message(&self, content: impl Into<String>) -> Result<()> {
        if self.transport.state() != TransportState::Open {
            return Err(anyhow::anyhow!(FormStreamError::SendRejected(
                "stream is not connected".to_string()
            )));
        }
        if self.transport.active_kind() != Some(TransportKind::Bidirectional) {
            return Err(anyhow::anyhow!(FormStreamError::SendRejected(
                "stream is degraded to the push fallback; use the request path".to_string()
            )));
        }
        self.transport.send(OutboundMessage::Message {
            content: content.into(),
        });
        Ok(())
    }

    /// Current connection state, for callers that gate on it directly.
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Deactivate the session.
    ///
    /// Closes the transport (suppressing any pending reconnect) and stops
    /// the event loop. After this returns no further snapshot or event is
    /// published. Idempotent.
    pub fn deactivate(&self) {
        self.transport.close();
        self.cancel.cancel();
        tracing::debug!(session_id = %self.session_id, "session deactivated");
    }
}

impl Drop for SessionOrchestrator {
    fn drop(&mut self) {
        self.deactivate();
    }
}

/// Sleep until `deadline`, or forever when there is none.
async fn sleep_until_opt(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Await the next tick, or forever when polling is disabled.
async fn tick_opt(interval: Option<&mut tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            let _ = interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// The orchestrator event loop: folds transport events into the view,
/// runs the typing timeout, and polls the request path while degraded.
async fn run(
    // Held so the transport (and its run task) outlives this loop even if
    // the orchestrator handle is dropped mid-event.
    _transport: Arc<StreamTransport>,
    mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    api: Option<Arc<SessionApi>>,
    options: OrchestratorOptions,
    view_tx: watch::Sender<SessionView>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    cancel: CancellationToken,
) {
    let session_id = view_tx.borrow().session.id.clone();
    let mut view = view_tx.borrow().clone();
    let mut typing_deadline: Option<tokio::time::Instant> = None;

    // Initial snapshot load is best-effort: the stream replays state via
    // `complete` / `field_parsed` events if the fetch fails.
    if let Some(api) = api.as_ref() {
        match api.fetch_session(&session_id).await {
            Ok(session) => {
                view.session = session;
                let _ = view_tx.send(view.clone());
            }
            Err(e) => {
                tracing::warn!(session_id = %session_id, "initial session fetch failed: {}", e)
            }
        }
    }

    let mut poll = options
        .poll_interval
        .filter(|_| api.is_some())
        .map(tokio::time::interval);
    if let Some(poll) = poll.as_mut() {
        // The first interval tick fires immediately; skip it.
        let _ = poll.tick().await;
    }

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                view.assistant_typing = false;
                view.health = ConnectionHealth::Lost;
                let _ = view_tx.send(view.clone());
                return;
            }

            () = sleep_until_opt(typing_deadline) => {
                tracing::debug!(session_id = %session_id, "typing indicator timed out");
                typing_deadline = None;
                view.assistant_typing = false;
                let _ = view_tx.send(view.clone());
            }

            () = tick_opt(poll.as_mut()) => {
                // Polling only runs while the session is still open; a
                // tick after completion or abandonment is a no-op.
                if view.session.status != SessionStatus::InProgress {
                    continue;
                }
                let api = api.as_ref().expect("api present when polling");
                match api.fetch_session(&session_id).await {
                    Ok(session) => {
                        if session != view.session {
                            view.session = session;
                            let _ = view_tx.send(view.clone());
                        }
                    }
                    Err(e) => tracing::warn!(
                        session_id = %session_id,
                        "fallback poll failed: {}",
                        e
                    ),
                }
            }

            event = transport_events.recv() => {
                let Some(event) = event else { return };
                match event {
                    TransportEvent::Opened { kind } => {
                        view.health = ConnectionHealth::Connected {
                            bidirectional: kind == TransportKind::Bidirectional,
                        };
                        let _ = view_tx.send(view.clone());
                    }

                    TransportEvent::Message(message) => {
                        let next = reconcile(&view.session, &message, Utc::now());
                        view.session = next.session;
                        match next.signal {
                            Some(Signal::Typing(is_typing)) => {
                                view.assistant_typing = is_typing;
                                typing_deadline = is_typing.then(|| {
                                    tokio::time::Instant::now() + options.typing_timeout
                                });
                            }
                            Some(Signal::Completed) => {
                                view.assistant_typing = false;
                                typing_deadline = None;
                                let _ = events_tx
                                    .send(SessionEvent::Completed(view.session.clone()));
                            }
                            Some(Signal::ServerError { message, detail }) => {
                                view.assistant_typing = false;
                                typing_deadline = None;
                                let _ = events_tx
                                    .send(SessionEvent::ServerError { message, detail });
                            }
                            None => {}
                        }
                        let _ = view_tx.send(view.clone());
                    }

                    TransportEvent::Recovering { attempt, .. } => {
                        view.assistant_typing = false;
                        typing_deadline = None;
                        view.health = ConnectionHealth::Recovering { attempt };
                        let _ = view_tx.send(view.clone());
                    }

                    TransportEvent::Closed { terminal_error } => {
                        view.assistant_typing = false;
                        typing_deadline = None;
                        view.health = ConnectionHealth::Lost;
                        let _ = view_tx.send(view.clone());
                        if let Some(error) = terminal_error {
                            let _ = events_tx.send(SessionEvent::ConnectionLost { error });
                        }
                        // The transport is terminal; polling (when enabled)
                        // is the only remaining source of updates.
                        if poll.is_none() {
                            return;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldValue;
    use crate::stream::fake::{FakeConnectionHandle, FakeConnector};
    use crate::stream::TransportKind;

    fn no_poll_options() -> OrchestratorOptions {
        OrchestratorOptions {
            retry: RetryOptions {
                base_delay: Duration::from_millis(50),
                max_attempts: 2,
            },
            typing_timeout: Duration::from_secs(10),
            poll_interval: None,
        }
    }

    fn activate_bidirectional() -> (
        SessionOrchestrator,
        watch::Receiver<SessionView>,
        mpsc::UnboundedReceiver<SessionEvent>,
        mpsc::UnboundedReceiver<FakeConnectionHandle>,
    ) {
        let (primary, handles) = FakeConnector::always_succeeding(TransportKind::Bidirectional);
        let (orchestrator, views, events) = SessionOrchestrator::activate(
            "sess-1",
            Arc::new(primary),
            Arc::new(FakeConnector::always_failing(TransportKind::Unidirectional)),
            None,
            no_poll_options(),
        );
        (orchestrator, views, events, handles)
    }

    async fn wait_for<F>(views: &mut watch::Receiver<SessionView>, predicate: F) -> SessionView
    where
        F: Fn(&SessionView) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(30), async {
            loop {
                if predicate(&views.borrow()) {
                    return views.borrow().clone();
                }
                views.changed().await.expect("view channel closed");
            }
        })
        .await
        .expect("timed out waiting for view")
    }

    /// Activation connects and publishes a connected health snapshot.
    #[tokio::test]
    async fn test_activate_publishes_connected_view() {
        let (orchestrator, mut views, _events, _handles) = activate_bidirectional();

        let view = wait_for(&mut views, |v| {
            v.health == ConnectionHealth::Connected { bidirectional: true }
        })
        .await;
        assert_eq!(view.session.id, "sess-1");
        assert!(view.session.transcript.is_empty());
        assert!(orchestrator.is_connected());
    }

    /// Stream events flow through the reducer into replaced snapshots.
    #[tokio::test]
    async fn test_events_update_published_snapshot() {
        let (_orchestrator, mut views, _events, mut handles) = activate_bidirectional();
        let handle = handles.recv().await.unwrap();

        handle
            .frames_tx
            .send(r#"{"type":"message","data":{"content":"Hi!","role":"assistant"}}"#.to_string())
            .unwrap();
        handle
            .frames_tx
            .send(
                r#"{"type":"field_parsed","data":{"field_id":"email","field_name":"Email","value":"a@b.com","validated":true}}"#
                    .to_string(),
            )
            .unwrap();

        let view = wait_for(&mut views, |v| {
            v.session.transcript.len() == 1 && v.session.parsed_fields.len() == 1
        })
        .await;
        assert_eq!(view.session.transcript[0].content, "Hi!");
        assert_eq!(
            view.session.parsed_field("email").unwrap().value,
            FieldValue::Text("a@b.com".to_string())
        );
    }

    /// Typing flips the ephemeral flag without touching the session.
    #[tokio::test]
    async fn test_typing_flag_is_ephemeral() {
        let (_orchestrator, mut views, _events, mut handles) = activate_bidirectional();
        let handle = handles.recv().await.unwrap();

        handle
            .frames_tx
            .send(r#"{"type":"typing","data":{"is_typing":true}}"#.to_string())
            .unwrap();
        let view = wait_for(&mut views, |v| v.assistant_typing).await;
        assert!(view.session.transcript.is_empty());

        handle
            .frames_tx
            .send(r#"{"type":"typing","data":{"is_typing":false}}"#.to_string())
            .unwrap();
        let _ = wait_for(&mut views, |v| !v.assistant_typing).await;
    }

    /// A stuck typing indicator clears after the configured timeout.
    #[tokio::test(start_paused = true)]
    async fn test_typing_times_out() {
        let (_orchestrator, mut views, _events, mut handles) = activate_bidirectional();
        let handle = handles.recv().await.unwrap();

        handle
            .frames_tx
            .send(r#"{"type":"typing","data":{"is_typing":true}}"#.to_string())
            .unwrap();
        let _ = wait_for(&mut views, |v| v.assistant_typing).await;

        // No follow-up event; the timeout clears the flag on its own.
        let _ = wait_for(&mut views, |v| !v.assistant_typing).await;
    }

    /// A complete event emits exactly one completion signal with the
    /// final snapshot.
    #[tokio::test]
    async fn test_complete_emits_exactly_one_completion() {
        let (_orchestrator, mut views, mut events, mut handles) = activate_bidirectional();
        let handle = handles.recv().await.unwrap();

        handle
            .frames_tx
            .send(
                r#"{"type":"complete","data":{"session":{"id":"sess-1","status":"completed"}}}"#
                    .to_string(),
            )
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out")
            .expect("event channel closed");
        match event {
            SessionEvent::Completed(session) => {
                assert_eq!(session.status, SessionStatus::Completed)
            }
            other => panic!("expected completion, got {:?}", other),
        }
        let view = wait_for(&mut views, |v| {
            v.session.status == SessionStatus::Completed
        })
        .await;
        assert!(!view.assistant_typing);
        assert!(events.try_recv().is_err(), "duplicate completion signal");
    }

    /// A server error surfaces on the side channel without corrupting
    /// session state.
    #[tokio::test]
    async fn test_server_error_is_side_channel() {
        let (_orchestrator, mut views, mut events, mut handles) = activate_bidirectional();
        let handle = handles.recv().await.unwrap();

        handle
            .frames_tx
            .send(
                r#"{"type":"error","data":{"message":"agent unavailable","error":"upstream_timeout"}}"#
                    .to_string(),
            )
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out")
            .expect("event channel closed");
        assert_eq!(
            event,
            SessionEvent::ServerError {
                message: "agent unavailable".to_string(),
                detail: Some("upstream_timeout".to_string()),
            }
        );
        let view = views.borrow().clone();
        assert_eq!(view.session.status, SessionStatus::InProgress);
    }

    /// `send_message` forwards while open and bidirectional.
    #[tokio::test]
    async fn test_send_message_forwards_when_connected() {
        let (orchestrator, mut views, _events, mut handles) = activate_bidirectional();
        let _ = wait_for(&mut views, |v| {
            matches!(v.health, ConnectionHealth::Connected { .. })
        })
        .await;

        orchestrator.send_message("hello").unwrap();

        let mut handle = handles.recv().await.unwrap();
        let sent = handle.outbound_rx.as_mut().unwrap().recv().await.unwrap();
        assert_eq!(
            sent,
            OutboundMessage::Message {
                content: "hello".to_string()
            }
        );
    }

    /// `send_message` fails loudly on a degraded (unidirectional) stream.
    #[tokio::test]
    async fn test_send_message_rejected_when_degraded() {
        let (fallback, _handles) = FakeConnector::always_succeeding(TransportKind::Unidirectional);
        let (orchestrator, mut views, _events) = SessionOrchestrator::activate(
            "sess-1",
            Arc::new(FakeConnector::always_unsupported()),
            Arc::new(fallback),
            None,
            no_poll_options(),
        );
        let _ = wait_for(&mut views, |v| {
            v.health == ConnectionHealth::Connected { bidirectional: false }
        })
        .await;

        let err = orchestrator.send_message("hello").unwrap_err();
        let err = err.downcast::<FormStreamError>().expect("typed error");
        assert!(matches!(err, FormStreamError::SendRejected(_)));
    }

    /// `send_message` fails loudly after deactivation.
    #[tokio::test]
    async fn test_send_message_rejected_after_deactivate() {
        let (orchestrator, mut views, _events, _handles) = activate_bidirectional();
        let _ = wait_for(&mut views, |v| {
            matches!(v.health, ConnectionHealth::Connected { .. })
        })
        .await;

        orchestrator.deactivate();
        let err = orchestrator.send_message("hello").unwrap_err();
        let err = err.downcast::<FormStreamError>().expect("typed error");
        assert!(matches!(err, FormStreamError::SendRejected(_)));
    }

    /// Reconnect exhaustion surfaces exactly one terminal event and a
    /// `Lost` health snapshot.
    #[tokio::test(start_paused = true)]
    async fn test_exhausted_reconnects_surface_connection_lost() {
        let (_orchestrator, mut views, mut events) = {
            let (orchestrator, views, events) = SessionOrchestrator::activate(
                "sess-1",
                Arc::new(FakeConnector::always_failing(TransportKind::Bidirectional)),
                Arc::new(FakeConnector::always_failing(TransportKind::Unidirectional)),
                None,
                no_poll_options(),
            );
            (orchestrator, views, events)
        };

        let event = tokio::time::timeout(Duration::from_secs(30), events.recv())
            .await
            .expect("timed out")
            .expect("event channel closed");
        match event {
            SessionEvent::ConnectionLost { error } => {
                assert!(error.contains("attempts=2"), "got {}", error)
            }
            other => panic!("expected connection lost, got {:?}", other),
        }
        let _ = wait_for(&mut views, |v| v.health == ConnectionHealth::Lost).await;
    }

    /// Recovery is visible in the health surface and clears typing.
    #[tokio::test(start_paused = true)]
    async fn test_drop_surfaces_recovering_health() {
        let (primary, mut handles) = FakeConnector::always_succeeding(TransportKind::Bidirectional);
        let (_orchestrator, mut views, _events) = SessionOrchestrator::activate(
            "sess-1",
            Arc::new(primary),
            Arc::new(FakeConnector::always_failing(TransportKind::Unidirectional)),
            None,
            no_poll_options(),
        );
        let handle = handles.recv().await.unwrap();
        handle
            .frames_tx
            .send(r#"{"type":"typing","data":{"is_typing":true}}"#.to_string())
            .unwrap();
        let _ = wait_for(&mut views, |v| v.assistant_typing).await;

        drop(handle);

        let view = wait_for(&mut views, |v| {
            matches!(v.health, ConnectionHealth::Recovering { .. })
        })
        .await;
        assert!(!view.assistant_typing);

        // The scripted connector keeps succeeding, so recovery completes.
        let _ = wait_for(&mut views, |v| {
            matches!(v.health, ConnectionHealth::Connected { .. })
        })
        .await;
    }

    /// Deactivation stops publication: no snapshot changes after it.
    #[tokio::test]
    async fn test_deactivate_stops_publication() {
        let (orchestrator, mut views, _events, mut handles) = activate_bidirectional();
        let _ = wait_for(&mut views, |v| {
            matches!(v.health, ConnectionHealth::Connected { .. })
        })
        .await;
        let handle = handles.recv().await.unwrap();

        orchestrator.deactivate();
        let _ = wait_for(&mut views, |v| v.health == ConnectionHealth::Lost).await;
        let before = views.borrow().clone();

        // Frames injected after deactivation must not change the view.
        let _ = handle
            .frames_tx
            .send(r#"{"type":"message","data":{"content":"late","role":"user"}}"#.to_string());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(*views.borrow(), before);
    }
}
