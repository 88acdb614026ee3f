use super::Type;
use crate::validation::{Context, ValidationResult};
use serde_json::Value;

/// Stores the identifier of a node of `target`; the node itself is looked up
/// on read (see `Tree::resolve`).
pub(crate) struct ReferenceType {
    pub(crate) target: Type,
}

impl ReferenceType {
    pub(crate) fn validate(&self, value: &Value, context: &Context) -> ValidationResult {
        match value {
            Value::String(_) | Value::Number(_) => ValidationResult::success(),
            _ => ValidationResult::failure(
                context,
                value,
                format!("value is not a valid reference to `{}`, expected a string or number", self.target.name()),
            ),
        }
    }
}
