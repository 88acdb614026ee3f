use crate::validation::{Context, ValidationResult};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum IdentifierKind {
    String,
    Number,
}

impl IdentifierKind {
    pub(crate) fn name(self) -> &'static str {
        match self {
            IdentifierKind::String => "identifier",
            IdentifierKind::Number => "identifierNumber",
        }
    }

    pub(crate) fn validate(self, value: &Value, context: &Context) -> ValidationResult {
        match (self, value) {
            (IdentifierKind::String, Value::String(_)) | (IdentifierKind::Number, Value::Number(_)) => {
                ValidationResult::success()
            }
            (IdentifierKind::String, _) => {
                ValidationResult::failure(context, value, "value is not a valid identifier, expected a string")
            }
            (IdentifierKind::Number, _) => {
                ValidationResult::failure(context, value, "value is not a valid identifier, expected a number")
            }
        }
    }
}

/// The canonical string form of an identifier or reference key.
///
/// String and numeric identifiers share one index, so `7` and `"7"` name the
/// same node.
pub(crate) fn normalize_identifier(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 => (f as i64).to_string(),
            _ => n.to_string(),
        }),
        _ => None,
    }
}
