//! Agent field schema types
//!
//! The set of [`AgentField`]s declared by an agent is the schema a live
//! session's parsed fields are validated against. The schema is owned by
//! the agent configuration service and consumed read-only here; it does
//! not change for the lifetime of a session.

use serde::{Deserialize, Serialize};

/// The declared kind of an agent field
///
/// Modelled as a closed enum rather than a free-form string so that the
/// validation engine dispatches with one exhaustive `match`: adding a new
/// field kind is a compile error at every dispatch site instead of a
/// silently-ignored default branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldKind {
    /// Free-form text (the default kind)
    Text,
    /// Email address (`local@domain`)
    Email,
    /// Phone number (digits, spaces, `+`, `-`, parentheses)
    Phone,
    /// Numeric value with optional inclusive bounds
    Number,
    /// Calendar date, normalized to ISO-8601
    Date,
    /// Single choice from the declared options
    Select,
    /// Multiple choices from the declared options
    MultiSelect,
    /// Strict boolean
    Checkbox,
    /// File handle or string reference (URL or upload id)
    File,
}

impl Default for FieldKind {
    fn default() -> Self {
        Self::Text
    }
}

/// One selectable option for `select` / `multi-select` fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldOption {
    /// Stored value, compared as a string during validation
    pub value: String,
    /// Human-readable label; falls back to `value` when absent
    #[serde(default)]
    pub label: Option<String>,
}

/// Declared validation constraints for a field
///
/// All constraints are optional; which ones apply depends on the field
/// kind (e.g. `min`/`max` are numeric bounds for `number` fields and
/// length bounds for `text` fields).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationRules {
    /// Additional regex the value must match (email, phone, text)
    #[serde(default)]
    pub regex: Option<String>,
    /// Inclusive lower bound (numeric value or text length)
    #[serde(default)]
    pub min: Option<f64>,
    /// Inclusive upper bound (numeric value or text length)
    #[serde(default)]
    pub max: Option<f64>,
    /// Allowed options for `select` / `multi-select`
    #[serde(default)]
    pub options: Option<Vec<FieldOption>>,
}

/// One declared field of an agent's conversational form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentField {
    /// Stable field identifier, referenced by `ParsedField.field_id`
    pub id: String,
    /// Field kind driving validation dispatch
    #[serde(default, rename = "type")]
    pub kind: FieldKind,
    /// Human-readable label used in validation messages
    pub label: String,
    /// Whether a validated value is required for session completion
    #[serde(default)]
    pub required: bool,
    /// Declared constraints
    #[serde(default)]
    pub validation: ValidationRules,
}

impl AgentField {
    /// Look up a field by id in a schema slice.
    pub fn find<'a>(fields: &'a [AgentField], field_id: &str) -> Option<&'a AgentField> {
        fields.iter().find(|f| f.id == field_id)
    }
}

/// A field value as it appears on the wire and in session state
///
/// One of string, string array, boolean, or number. Untagged so the JSON
/// representation is the bare value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Strict boolean (checkbox fields)
    Bool(bool),
    /// Numeric value (number fields after coercion)
    Number(f64),
    /// Plain string (text, email, phone, date, select, file)
    Text(String),
    /// String array (multi-select fields)
    List(Vec<String>),
}

impl FieldValue {
    /// Whether this value counts as empty for the required-field check.
    ///
    /// Empty strings and empty arrays are empty; `false` and `0` are not
    /// (a checkbox deliberately unticked is still a present value).
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(s) => s.trim().is_empty(),
            Self::List(items) => items.is_empty(),
            Self::Bool(_) | Self::Number(_) => false,
        }
    }

    /// The string content, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => write!(f, "{}", s),
            Self::List(items) => write!(f, "{}", items.join(", ")),
        }
    }
}
