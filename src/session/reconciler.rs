//! Session event reconciliation
//!
//! [`reconcile`] folds one [`StreamMessage`] into an immutable session
//! snapshot and returns the next snapshot plus an optional side-channel
//! [`Signal`]. It is a pure function of its inputs: no I/O, no clocks,
//! no generated ids. The reconciliation instant is an explicit
//! argument, and synthesized message ids derive from it. Calling it
//! twice with identical inputs yields structurally equal outputs.
//!
//! Events must be applied in strict arrival order. `field_parsed` /
//! `validation` pairs are causally ordered by the server; reordering
//! them would resurrect stale validation state.

use chrono::{DateTime, Utc};

use crate::session::state::{ParsedField, Session, SessionMessage};
use crate::stream::message::StreamMessage;

/// Side-channel outcome of one reduction
///
/// Signals never change session state themselves; they tell the
/// orchestrator about ephemeral or exactly-once concerns (the typing
/// indicator, completion, server-declared errors).
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    /// The assistant typing indicator changed
    Typing(bool),
    /// A `complete` event replaced the session wholesale
    Completed,
    /// The server declared an error for this turn
    ServerError {
        /// User-visible failure description
        message: String,
        /// Machine-readable detail, when provided
        detail: Option<String>,
    },
}

/// Result of folding one event into session state
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    /// The next session snapshot
    pub session: Session,
    /// Side-channel signal, if the event carried one
    pub signal: Option<Signal>,
}

/// Fold one stream event into a session snapshot.
///
/// # Arguments
///
/// * `state` - The current snapshot; never mutated.
/// * `event` - The event to apply.
/// * `at` - The reconciliation instant, used as the timestamp (and id
///   seed) for locally synthesized transcript messages.
///
/// # Examples
///
/// ```
/// use chrono::Utc;
/// use formstream::session::reconciler::reconcile;
/// use formstream::session::state::{MessageRole, Session};
/// use formstream::stream::message::StreamMessage;
///
/// let state = Session::new("sess-1");
/// let event = StreamMessage::Message {
///     content: "Hi there!".to_string(),
///     role: MessageRole::Assistant,
/// };
///
/// let next = reconcile(&state, &event, Utc::now());
/// assert_eq!(next.session.transcript.len(), 1);
/// assert!(state.transcript.is_empty());
/// ```
pub fn reconcile(state: &Session, event: &StreamMessage, at: DateTime<Utc>) -> Reconciled {
    match event {
        StreamMessage::Message { content, role } => {
            let mut session = state.clone();
            session.transcript.push(SessionMessage {
                id: synthesize_message_id(at, state.transcript.len()),
                role: *role,
                content: content.clone(),
                timestamp: at,
            });
            Reconciled {
                session,
                signal: None,
            }
        }

        StreamMessage::FieldParsed {
            field_id,
            field_name,
            value,
            validated,
        } => {
            let mut session = state.clone();
            // A validity-declaring event clears any stale error; one that
            // does not declare validity preserves it for the UI.
            let validation_error = if *validated {
                None
            } else {
                session
                    .parsed_fields
                    .get(field_id)
                    .and_then(|prior| prior.validation_error.clone())
            };
            let _ = session.parsed_fields.insert(
                field_id.clone(),
                ParsedField {
                    field_id: field_id.clone(),
                    field_name: field_name.clone(),
                    value: value.clone(),
                    validated: *validated,
                    validation_error,
                },
            );
            Reconciled {
                session,
                signal: None,
            }
        }

        StreamMessage::Validation {
            field_id,
            validated,
            validation_error,
        } => {
            let mut session = state.clone();
            // Unknown ids are tolerated: the paired field_parsed may not
            // have arrived yet and validation alone carries no value.
            if let Some(parsed) = session.parsed_fields.get_mut(field_id) {
                parsed.validated = *validated;
                parsed.validation_error = validation_error.clone();
            }
            Reconciled {
                session,
                signal: None,
            }
        }

        StreamMessage::Typing { is_typing } => Reconciled {
            session: state.clone(),
            signal: Some(Signal::Typing(*is_typing)),
        },

        StreamMessage::Complete { session } => {
            // The server snapshot is authoritative even when the jump is
            // illegal by the local transition table; log it and move on.
            if let Err(e) = state.status.transition_to(session.status) {
                tracing::warn!("server snapshot overrides local status: {}", e);
            }
            Reconciled {
                session: session.clone(),
                signal: Some(Signal::Completed),
            }
        }

        StreamMessage::Error { message, error } => Reconciled {
            session: state.clone(),
            signal: Some(Signal::ServerError {
                message: message.clone(),
                detail: error.clone(),
            }),
        },
    }
}

/// Deterministic id for a locally synthesized transcript message.
fn synthesize_message_id(at: DateTime<Utc>, position: usize) -> String {
    format!("local-{}-{}", at.timestamp_millis(), position)
}
