//! Field validation engine
//!
//! Pure functions that decide whether a candidate value is acceptable for
//! one declared [`AgentField`], independent of any session. Verdicts are
//! always data: a failed validation is a [`Verdict`] with an error
//! string, never an `Err`, so the completion gate and the UI can inspect
//! outcomes without exception handling.
//!
//! # Rule order
//!
//! 1. The required check runs first and is kind-agnostic: a required
//!    field with an empty/absent value fails with "<label> is required".
//! 2. Otherwise validation dispatches on [`FieldKind`] with one
//!    exhaustive `match`.
//! 3. The verdict always carries a normalized value (number coercion,
//!    date to ISO-8601) so valid-but-reshaped values are stored
//!    canonically.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::schema::{AgentField, FieldKind, FieldValue};
use crate::session::state::ParsedField;

/// Outcome of validating one `(field, value)` pair
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    /// Whether the value is acceptable
    pub valid: bool,
    /// Failure reason when `valid` is false
    pub error: Option<String>,
    /// The value to store: possibly reshaped (e.g. `"3"` -> `3`)
    pub normalized: FieldValue,
}

impl Verdict {
    fn ok(normalized: FieldValue) -> Self {
        Self {
            valid: true,
            error: None,
            normalized,
        }
    }

    fn fail(error: impl Into<String>, normalized: FieldValue) -> Self {
        Self {
            valid: false,
            error: Some(error.into()),
            normalized,
        }
    }
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email pattern"))
}

fn phone_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9()+\-\s]+$").expect("valid phone pattern"))
}

/// Validate one candidate value against a declared field.
///
/// `value` is `None` when nothing has been extracted for the field yet;
/// this counts as empty for the required check.
///
/// # Arguments
///
/// * `field` - The declared field schema.
/// * `value` - The candidate value, if any.
///
/// # Examples
///
/// ```
/// use formstream::schema::{AgentField, FieldKind, FieldValue, ValidationRules};
/// use formstream::validation::validate;
///
/// let field = AgentField {
///     id: "email".to_string(),
///     kind: FieldKind::Email,
///     label: "Email".to_string(),
///     required: true,
///     validation: ValidationRules::default(),
/// };
///
/// let verdict = validate(&field, Some(&FieldValue::from("a@b.com")));
/// assert!(verdict.valid);
///
/// let verdict = validate(&field, None);
/// assert_eq!(verdict.error.as_deref(), Some("Email is required"));
/// ```
pub fn validate(field: &AgentField, value: Option<&FieldValue>) -> Verdict {
    let original = value.cloned().unwrap_or_else(|| FieldValue::Text(String::new()));
    let empty = value.map_or(true, FieldValue::is_empty);

    // Required check precedes type dispatch and is kind-agnostic.
    if empty {
        if field.required {
            return Verdict::fail(format!("{} is required", field.label), original);
        }
        return Verdict::ok(original);
    }

    match field.kind {
        FieldKind::Email => validate_email(field, &original),
        FieldKind::Phone => validate_phone(field, &original),
        FieldKind::Number => validate_number(field, &original),
        FieldKind::Date => validate_date(field, &original),
        FieldKind::Select => validate_select(field, &original),
        FieldKind::MultiSelect => validate_multi_select(field, &original),
        FieldKind::Checkbox => validate_checkbox(field, &original),
        FieldKind::File => validate_file(field, &original),
        FieldKind::Text => validate_text(field, &original),
    }
}

/// Re-validate every parsed field against its schema.
///
/// Returns a new collection with `validated` / `validation_error` / the
/// stored value refreshed from the engine's verdicts. Entries whose
/// `field_id` has no schema entry are carried through untouched.
///
/// Running this twice on its own output yields no further changes:
/// verdicts are computed from normalized values, and normalization is
/// idempotent.
pub fn validate_all(
    fields: &[AgentField],
    parsed_fields: &BTreeMap<String, ParsedField>,
) -> BTreeMap<String, ParsedField> {
    parsed_fields
        .iter()
        .map(|(id, parsed)| {
            let refreshed = match AgentField::find(fields, id) {
                Some(field) => {
                    let verdict = validate(field, Some(&parsed.value));
                    ParsedField {
                        field_id: parsed.field_id.clone(),
                        field_name: parsed.field_name.clone(),
                        value: verdict.normalized,
                        validated: verdict.valid,
                        validation_error: verdict.error,
                    }
                }
                // Unknown field ids are tolerated but not re-validated.
                None => parsed.clone(),
            };
            (id.clone(), refreshed)
        })
        .collect()
}

/// The single predicate gating submission.
///
/// True iff every `required` field has a parsed entry with
/// `validated == true`. Kept in lock-step with [`validate`] by
/// construction: there is no parallel rule set.
pub fn all_required_collected(
    fields: &[AgentField],
    parsed_fields: &BTreeMap<String, ParsedField>,
) -> bool {
    fields
        .iter()
        .filter(|f| f.required)
        .all(|f| parsed_fields.get(&f.id).is_some_and(|p| p.validated))
}

// ---------------------------------------------------------------------------
// Per-kind rules
// ---------------------------------------------------------------------------

fn validate_email(field: &AgentField, value: &FieldValue) -> Verdict {
    let Some(text) = value.as_text() else {
        return Verdict::fail(
            format!("{} must be a valid email address", field.label),
            value.clone(),
        );
    };
    let text = text.trim();

    if !email_regex().is_match(text) {
        return Verdict::fail(
            format!("{} must be a valid email address", field.label),
            value.clone(),
        );
    }
    if let Some(error) = check_custom_regex(field, text) {
        return Verdict::fail(error, value.clone());
    }

    Verdict::ok(FieldValue::Text(text.to_string()))
}

fn validate_phone(field: &AgentField, value: &FieldValue) -> Verdict {
    let Some(text) = value.as_text() else {
        return Verdict::fail(
            format!("{} must be a valid phone number", field.label),
            value.clone(),
        );
    };
    let text = text.trim();

    if !phone_regex().is_match(text) {
        return Verdict::fail(
            format!("{} must be a valid phone number", field.label),
            value.clone(),
        );
    }
    if let Some(error) = check_custom_regex(field, text) {
        return Verdict::fail(error, value.clone());
    }

    Verdict::ok(FieldValue::Text(text.to_string()))
}

fn validate_number(field: &AgentField, value: &FieldValue) -> Verdict {
    let number = match value {
        FieldValue::Number(n) => Some(*n),
        FieldValue::Text(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    let Some(number) = number.filter(|n| n.is_finite()) else {
        return Verdict::fail(format!("{} must be a number", field.label), value.clone());
    };

    if let Some(min) = field.validation.min {
        if number < min {
            return Verdict::fail(
                format!("{} must be at least {}", field.label, format_bound(min)),
                FieldValue::Number(number),
            );
        }
    }
    if let Some(max) = field.validation.max {
        if number > max {
            return Verdict::fail(
                format!("{} must be at most {}", field.label, format_bound(max)),
                FieldValue::Number(number),
            );
        }
    }

    Verdict::ok(FieldValue::Number(number))
}

fn validate_date(field: &AgentField, value: &FieldValue) -> Verdict {
    let Some(text) = value.as_text() else {
        return Verdict::fail(format!("{} must be a valid date", field.label), value.clone());
    };
    let text = text.trim();

    match parse_date(text) {
        Some(iso) => Verdict::ok(FieldValue::Text(iso)),
        None => Verdict::fail(format!("{} must be a valid date", field.label), value.clone()),
    }
}

fn validate_select(field: &AgentField, value: &FieldValue) -> Verdict {
    let Some(text) = value.as_text() else {
        return Verdict::fail(
            format!("{} must be one of the available options", field.label),
            value.clone(),
        );
    };

    if option_values(field).any(|v| v == text) {
        Verdict::ok(value.clone())
    } else {
        Verdict::fail(
            format!("{} must be one of the available options", field.label),
            value.clone(),
        )
    }
}

fn validate_multi_select(field: &AgentField, value: &FieldValue) -> Verdict {
    let FieldValue::List(items) = value else {
        return Verdict::fail(
            format!("{} must be a list of options", field.label),
            value.clone(),
        );
    };

    // One invalid element invalidates the whole value.
    for item in items {
        if !option_values(field).any(|v| v == item) {
            return Verdict::fail(
                format!("{} contains an invalid option: {}", field.label, item),
                value.clone(),
            );
        }
    }

    Verdict::ok(value.clone())
}

fn validate_checkbox(field: &AgentField, value: &FieldValue) -> Verdict {
    match value {
        FieldValue::Bool(_) => Verdict::ok(value.clone()),
        _ => Verdict::fail(
            format!("{} must be true or false", field.label),
            value.clone(),
        ),
    }
}

fn validate_file(field: &AgentField, value: &FieldValue) -> Verdict {
    match value.as_text() {
        Some(reference) if !reference.trim().is_empty() => Verdict::ok(value.clone()),
        _ => Verdict::fail(
            format!("{} requires a file reference", field.label),
            value.clone(),
        ),
    }
}

fn validate_text(field: &AgentField, value: &FieldValue) -> Verdict {
    let Some(text) = value.as_text() else {
        return Verdict::fail(format!("{} must be text", field.label), value.clone());
    };

    let length = text.chars().count() as f64;
    if let Some(min) = field.validation.min {
        if length < min {
            return Verdict::fail(
                format!(
                    "{} must be at least {} characters",
                    field.label,
                    format_bound(min)
                ),
                value.clone(),
            );
        }
    }
    if let Some(max) = field.validation.max {
        if length > max {
            return Verdict::fail(
                format!(
                    "{} must be at most {} characters",
                    field.label,
                    format_bound(max)
                ),
                value.clone(),
            );
        }
    }
    if let Some(error) = check_custom_regex(field, text) {
        return Verdict::fail(error, value.clone());
    }

    Verdict::ok(value.clone())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Apply the schema's custom regex, if any. Returns a failure message on
/// mismatch. An uncompilable pattern is a schema-authoring bug; it is
/// logged and skipped so it cannot brick a live session.
fn check_custom_regex(field: &AgentField, text: &str) -> Option<String> {
    let pattern = field.validation.regex.as_deref()?;
    match Regex::new(pattern) {
        Ok(re) if re.is_match(text) => None,
        Ok(_) => Some(format!("{} is not in the expected format", field.label)),
        Err(e) => {
            tracing::warn!(
                field_id = %field.id,
                pattern = %pattern,
                "skipping uncompilable validation regex: {}",
                e
            );
            None
        }
    }
}

/// Parse a date string and return its ISO-8601 normalization.
///
/// Accepts RFC 3339, `YYYY-MM-DDTHH:MM:SS`, `YYYY-MM-DD` and `MM/DD/YYYY`.
/// Date-only inputs normalize to `YYYY-MM-DD`; anything with a time
/// component normalizes to RFC 3339. Both forms re-parse through the same
/// branches, so normalization is idempotent.
fn parse_date(text: &str) -> Option<String> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(text) {
        return Some(dt.to_rfc3339());
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.and_utc().to_rfc3339());
    }
    for format in ["%Y-%m-%d", "%m/%d/%Y"] {
        if let Ok(date) = chrono::NaiveDate::parse_from_str(text, format) {
            return Some(date.format("%Y-%m-%d").to_string());
        }
    }
    None
}

fn option_values(field: &AgentField) -> impl Iterator<Item = &str> {
    field
        .validation
        .options
        .iter()
        .flatten()
        .map(|o| o.value.as_str())
}

/// Render a numeric bound without a trailing `.0` for whole numbers.
fn format_bound(bound: f64) -> String {
    if bound.fract() == 0.0 {
        format!("{}", bound as i64)
    } else {
        format!("{}", bound)
    }
}
