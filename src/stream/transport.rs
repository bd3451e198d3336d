//! Session stream transport with automatic recovery
//!
//! [`StreamTransport`] maintains exactly one logical connection per
//! session id, hiding the transport kind behind one ordered event
//! channel, and recovers automatically from drops with linear backoff.
//!
//! # State machine
//!
//! `Idle -> Connecting -> Open -> Recovering -> ... -> Closed`
//!
//! - `connect()` moves `Idle -> Connecting` and attempts the primary
//!   bidirectional connector. A [`FormStreamError::BidirectionalUnsupported`]
//!   failure switches to the unidirectional fallback permanently for
//!   this session (a capability fallback, not a retry).
//! - An unexpected drop while not manually closed moves to `Recovering`
//!   and schedules attempt `n` after `base_delay * n`, up to
//!   `max_attempts` (5). Exhausting the cap moves to `Closed` and emits
//!   exactly one terminal error.
//! - `close()` sets the manual-close flag first so recovery never
//!   triggers, then tears the connection down.
//!
//! Every `connect()` bumps an epoch counter and scheduled sleeps check it
//! (together with the cancellation token) before acting, so a reconnect
//! scheduled before deactivation can never fire after it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::FormStreamError;
use crate::stream::message::{parse_frame, OutboundMessage};
use crate::stream::{Connection, Connector, TransportEvent, TransportKind};

/// Default delay multiplied by the attempt number between reconnects.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default cap on sequential reconnect attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Reconnection tuning for a [`StreamTransport`]
#[derive(Debug, Clone, Copy)]
pub struct RetryOptions {
    /// Base delay; attempt `n` waits `base_delay * n`
    pub base_delay: Duration,
    /// Maximum sequential reconnect attempts before giving up
    pub max_attempts: u32,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Connection state of a [`StreamTransport`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Constructed, `connect()` not yet called
    Idle,
    /// An open attempt is in flight
    Connecting,
    /// Connected; frames are flowing
    Open,
    /// Dropped; a reconnect attempt is scheduled or in flight
    Recovering {
        /// 1-based reconnect attempt number
        attempt: u32,
    },
    /// Terminal: manual close or exhausted reconnect attempts
    Closed,
}

/// Shared state between the transport handle and its run task.
#[derive(Debug)]
struct Shared {
    session_id: String,
    state: Mutex<TransportState>,
    active_kind: Mutex<Option<TransportKind>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<OutboundMessage>>>,
    manual_close: AtomicBool,
    epoch: AtomicU64,
}

impl Shared {
    fn set_state(&self, next: TransportState) {
        *self.state.lock().expect("state lock") = next;
    }
}

/// One logical session stream with automatic recovery
///
/// Construct with [`StreamTransport::new`], then call
/// [`StreamTransport::connect`] to start the run task. Events arrive on
/// the receiver returned by `new`, strictly in arrival order.
#[derive(Debug)]
pub struct StreamTransport {
    shared: Arc<Shared>,
    primary: Arc<dyn Connector>,
    fallback: Arc<dyn Connector>,
    options: RetryOptions,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    cancel: CancellationToken,
}

impl StreamTransport {
    /// Create a transport for `session_id` in the `Idle` state.
    ///
    /// # Arguments
    ///
    /// * `session_id` - The session whose stream this transport owns.
    /// * `primary` - The bidirectional connector attempted first.
    /// * `fallback` - The unidirectional connector used on a capability
    ///   miss.
    /// * `options` - Reconnection tuning.
    ///
    /// # Returns
    ///
    /// The transport handle and the ordered event receiver.
    pub fn new(
        session_id: impl Into<String>,
        primary: Arc<dyn Connector>,
        fallback: Arc<dyn Connector>,
        options: RetryOptions,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport = Self {
            shared: Arc::new(Shared {
                session_id: session_id.into(),
                state: Mutex::new(TransportState::Idle),
                active_kind: Mutex::new(None),
                outbound: Mutex::new(None),
                manual_close: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
            }),
            primary,
            fallback,
            options,
            events_tx,
            cancel: CancellationToken::new(),
        };
        (transport, events_rx)
    }

    /// Move `Idle -> Connecting` and spawn the run task.
    ///
    /// Calling `connect()` in any other state is a no-op: one session id
    /// owns exactly one live connection, never two.
    pub fn connect(&self) {
        {
            let mut state = self.shared.state.lock().expect("state lock");
            if *state != TransportState::Idle {
                tracing::warn!(
                    session_id = %self.shared.session_id,
                    "connect() ignored: transport is not idle"
                );
                return;
            }
            *state = TransportState::Connecting;
        }
        let _ = self.shared.epoch.fetch_add(1, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let primary = Arc::clone(&self.primary);
        let fallback = Arc::clone(&self.fallback);
        let options = self.options;
        let events_tx = self.events_tx.clone();
        let cancel = self.cancel.clone();

        drop(tokio::spawn(async move {
            run(shared, primary, fallback, options, events_tx, cancel).await;
        }));
    }

    /// Send a payload over the bidirectional channel.
    ///
    /// Only valid while `Open` on a bidirectional connection; in every
    /// other situation this logs a warning and drops the payload. The
    /// unidirectional fallback has no outbound channel; degraded
    /// outbound traffic goes through the separate request path.
    pub fn send(&self, payload: OutboundMessage) {
        if self.state() != TransportState::Open {
            tracing::warn!(
                session_id = %self.shared.session_id,
                "dropping outbound payload: stream is not open"
            );
            return;
        }
        let outbound = self.shared.outbound.lock().expect("outbound lock");
        match outbound.as_ref() {
            Some(tx) => {
                if tx.send(payload).is_err() {
                    tracing::warn!(
                        session_id = %self.shared.session_id,
                        "dropping outbound payload: connection writer is gone"
                    );
                }
            }
            None => tracing::warn!(
                session_id = %self.shared.session_id,
                "dropping outbound payload: transport is degraded (no outbound channel)"
            ),
        }
    }

    /// Manually close the transport.
    ///
    /// Sets the manual-close flag so automatic recovery does not trigger,
    /// cancels any scheduled reconnect, and tears the connection down.
    /// Idempotent.
    pub fn close(&self) {
        self.shared.manual_close.store(true, Ordering::SeqCst);
        let _ = self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        self.cancel.cancel();
        self.shared.set_state(TransportState::Closed);
        *self.shared.outbound.lock().expect("outbound lock") = None;
    }

    /// True iff the state is `Open`, regardless of transport kind.
    pub fn is_connected(&self) -> bool {
        self.state() == TransportState::Open
    }

    /// Current connection state.
    pub fn state(&self) -> TransportState {
        *self.shared.state.lock().expect("state lock")
    }

    /// The kind of the active connection, if any.
    pub fn active_kind(&self) -> Option<TransportKind> {
        *self.shared.active_kind.lock().expect("active_kind lock")
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// The transport run task: owns open/pump/recover until terminal.
async fn run(
    shared: Arc<Shared>,
    primary: Arc<dyn Connector>,
    fallback: Arc<dyn Connector>,
    options: RetryOptions,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    cancel: CancellationToken,
) {
    let epoch = shared.epoch.load(Ordering::SeqCst);
    let mut connector = Arc::clone(&primary);
    let mut fell_back = false;
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            finish(&shared, &events_tx, None);
            return;
        }

        let error = match connector.open(&shared.session_id).await {
            Ok(connection) => {
                attempt = 0;
                match pump(&shared, connection, &events_tx, &cancel).await {
                    PumpEnd::Cancelled => {
                        finish(&shared, &events_tx, None);
                        return;
                    }
                    PumpEnd::Dropped => "connection dropped".to_string(),
                }
            }
            Err(e) => {
                let is_capability_miss = e
                    .downcast_ref::<FormStreamError>()
                    .is_some_and(|e| matches!(e, FormStreamError::BidirectionalUnsupported(_)));
                if is_capability_miss && !fell_back {
                    tracing::info!(
                        session_id = %shared.session_id,
                        "bidirectional transport unavailable, degrading to push stream"
                    );
                    connector = Arc::clone(&fallback);
                    fell_back = true;
                    // Capability fallback, not a retry: no attempt counted.
                    continue;
                }
                e.to_string()
            }
        };

        if shared.manual_close.load(Ordering::SeqCst) || cancel.is_cancelled() {
            finish(&shared, &events_tx, None);
            return;
        }

        attempt += 1;
        if attempt > options.max_attempts {
            tracing::error!(
                session_id = %shared.session_id,
                attempts = options.max_attempts,
                "reconnect attempts exhausted: {}",
                error
            );
            let terminal = FormStreamError::ReconnectExhausted {
                session_id: shared.session_id.clone(),
                attempts: options.max_attempts,
            };
            finish(&shared, &events_tx, Some(terminal.to_string()));
            return;
        }

        metrics::increment_counter!("formstream_reconnect_attempts_total");
        shared.set_state(TransportState::Recovering { attempt });
        let _ = events_tx.send(TransportEvent::Recovering {
            attempt,
            error: error.clone(),
        });
        tracing::debug!(
            session_id = %shared.session_id,
            attempt,
            "scheduling reconnect: {}",
            error
        );

        // Linear backoff: attempt n waits base_delay * n. The epoch check
        // guarantees a sleep scheduled before close() never reconnects.
        let delay = options.base_delay * attempt;
        tokio::select! {
            () = cancel.cancelled() => {
                finish(&shared, &events_tx, None);
                return;
            }
            () = tokio::time::sleep(delay) => {}
        }
        if shared.epoch.load(Ordering::SeqCst) != epoch {
            finish(&shared, &events_tx, None);
            return;
        }
        shared.set_state(TransportState::Connecting);
    }
}

/// Why the frame pump stopped.
enum PumpEnd {
    /// Manual close / deactivation
    Cancelled,
    /// The connection dropped unexpectedly
    Dropped,
}

/// Pump frames from one live connection until it drops or we are told to
/// stop. Malformed frames are logged and dropped without closing the
/// connection.
async fn pump(
    shared: &Shared,
    mut connection: Connection,
    events_tx: &mpsc::UnboundedSender<TransportEvent>,
    cancel: &CancellationToken,
) -> PumpEnd {
    *shared.active_kind.lock().expect("active_kind lock") = Some(connection.kind);
    *shared.outbound.lock().expect("outbound lock") = connection.outbound.take();
    shared.set_state(TransportState::Open);
    let _ = events_tx.send(TransportEvent::Opened {
        kind: connection.kind,
    });
    tracing::debug!(
        session_id = %shared.session_id,
        kind = ?connection.kind,
        "stream open"
    );

    let end = loop {
        tokio::select! {
            () = cancel.cancelled() => break PumpEnd::Cancelled,
            frame = connection.frames.recv() => match frame {
                Some(frame) => match parse_frame(&frame) {
                    Ok(message) => {
                        let _ = events_tx.send(TransportEvent::Message(message));
                    }
                    Err(e) => {
                        metrics::increment_counter!("formstream_frames_dropped_total");
                        tracing::warn!(
                            session_id = %shared.session_id,
                            "dropping malformed stream frame: {}",
                            e
                        );
                    }
                },
                None => break PumpEnd::Dropped,
            }
        }
    };

    *shared.outbound.lock().expect("outbound lock") = None;
    end
}

/// Enter the terminal state and emit the single `Closed` event.
fn finish(
    shared: &Shared,
    events_tx: &mpsc::UnboundedSender<TransportEvent>,
    terminal_error: Option<String>,
) {
    shared.set_state(TransportState::Closed);
    *shared.outbound.lock().expect("outbound lock") = None;
    let _ = events_tx.send(TransportEvent::Closed { terminal_error });
}
