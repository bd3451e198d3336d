//! Stream wire envelope
//!
//! Both transport kinds deliver the same envelope, one encoded text frame
//! per event: `{"type": ..., "data": ...}` with a per-type `data` shape.
//! Field names on the wire are snake_case (`field_id`, `is_typing`).

use serde::{Deserialize, Serialize};

use crate::error::{FormStreamError, Result};
use crate::schema::FieldValue;
use crate::session::state::{MessageRole, Session};

/// One discrete event delivered over the session stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StreamMessage {
    /// A new transcript message
    Message {
        /// Message text
        content: String,
        /// Author role (assistant or user)
        role: MessageRole,
    },
    /// The server extracted a value for a declared field
    FieldParsed {
        /// Declared field id
        field_id: String,
        /// Display name at extraction time
        field_name: String,
        /// Extracted value
        value: FieldValue,
        /// Server-side validity at extraction time
        validated: bool,
    },
    /// Server-side validation outcome for a previously parsed field
    Validation {
        /// Declared field id
        field_id: String,
        /// Whether the value passed validation
        validated: bool,
        /// Failure reason when invalid
        #[serde(default, skip_serializing_if = "Option::is_none")]
        validation_error: Option<String>,
    },
    /// Assistant typing indicator (ephemeral, never persisted)
    Typing {
        /// Whether the assistant is composing a reply
        is_typing: bool,
    },
    /// Full-session replace with a server-shaped snapshot
    Complete {
        /// The authoritative session snapshot
        session: Session,
    },
    /// Server-declared error, surfaced verbatim to the caller
    Error {
        /// User-visible failure description
        message: String,
        /// Machine-readable detail, when provided
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// Outbound payload for the bidirectional channel
///
/// `send({"type": "message", "content": ...})` is the only outbound
/// operation; the unidirectional fallback has no outbound path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// A visitor message for the current session
    Message {
        /// Message text
        content: String,
    },
}

/// Parse one raw text frame into a [`StreamMessage`].
///
/// # Errors
///
/// Returns [`FormStreamError::Protocol`] when the frame is not a valid
/// envelope. Consumers treat that as log-and-drop: a malformed frame
/// never closes the connection.
pub fn parse_frame(frame: &str) -> Result<StreamMessage> {
    serde_json::from_str::<StreamMessage>(frame)
        .map_err(|e| anyhow::anyhow!(FormStreamError::Protocol(e.to_string())))
}
