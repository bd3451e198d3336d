//! Session state data model
//!
//! One [`Session`] is the aggregate root for a single visitor's live run
//! through an agent's conversational form: the transcript, the latest
//! parsed value per declared field, and the completion status. Session
//! state is only ever mutated by the reconciler; everything else reads
//! snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::FormStreamError;
use crate::schema::FieldValue;

/// Lifecycle status of a session
///
/// Monotonic except for explicit restart: `in_progress -> completed`,
/// `in_progress -> abandoned`, and `(any) -> in_progress` are the only
/// legal transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// The visitor is still answering
    InProgress,
    /// All required fields collected and the session was finalized
    Completed,
    /// The visitor left before completing
    Abandoned,
}

impl SessionStatus {
    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Restart (any status back to `InProgress`) is always allowed;
    /// `Completed` and `Abandoned` never transition into each other.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        match (self, next) {
            (_, SessionStatus::InProgress) => true,
            (SessionStatus::InProgress, _) => true,
            _ => self == next,
        }
    }

    /// Validate moving from `self` to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`FormStreamError::InvalidStatusTransition`] when the
    /// transition is illegal by the table above.
    pub fn transition_to(self, next: SessionStatus) -> Result<SessionStatus, FormStreamError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(FormStreamError::InvalidStatusTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Abandoned => "abandoned",
        };
        write!(f, "{}", s)
    }
}

/// Role of a transcript message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// The agent side of the conversation
    Assistant,
    /// The visitor
    User,
    /// Synthetic system notices
    System,
}

/// One transcript entry
///
/// Ordering is stream-arrival order; the timestamp is informational and
/// never used to reorder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMessage {
    /// Message identifier (server-assigned or synthesized locally)
    pub id: String,
    /// Who authored the message
    pub role: MessageRole,
    /// Message text
    pub content: String,
    /// When the message was reconciled into state
    pub timestamp: DateTime<Utc>,
}

/// The latest extracted value and validation status for one declared field
///
/// Independent of the transcript: several messages may update the same
/// field, and only the most recent value is kept (upsert semantics).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedField {
    /// References a declared `AgentField.id`; unknown ids are tolerated
    pub field_id: String,
    /// Display name captured at extraction time
    pub field_name: String,
    /// Latest known value
    pub value: FieldValue,
    /// Whether the value passed validation
    pub validated: bool,
    /// Validation failure reason, when `validated` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_error: Option<String>,
}

/// Aggregate session state for one visitor interaction
///
/// `parsed_fields` is keyed by field id, which enforces the at-most-one-
/// entry-per-field invariant structurally. A `BTreeMap` keeps snapshots
/// structurally comparable in tests regardless of insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque identifier, immutable once created
    pub id: String,
    /// Lifecycle status
    pub status: SessionStatus,
    /// Ordered transcript, append-only except on full-session replace
    #[serde(default)]
    pub transcript: Vec<SessionMessage>,
    /// Latest parsed value per field id
    #[serde(default)]
    pub parsed_fields: BTreeMap<String, ParsedField>,
}

impl Session {
    /// Create the empty state for a newly-activated session id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: SessionStatus::InProgress,
            transcript: Vec::new(),
            parsed_fields: BTreeMap::new(),
        }
    }

    /// The parsed field for `field_id`, if any.
    pub fn parsed_field(&self, field_id: &str) -> Option<&ParsedField> {
        self.parsed_fields.get(field_id)
    }
}
