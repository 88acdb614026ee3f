use super::{Type, TypeKind};
use crate::validation::{Context, ValidationResult};
use serde_json::Value;
use std::sync::Arc;

pub(crate) type Predicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

pub(crate) struct RefinementType {
    pub(crate) inner: Type,
    predicate: Predicate,
    message: String,
}

pub(crate) fn refinement_type(name: String, inner: Type, predicate: Predicate, message: String) -> Type {
    Type::new(
        name,
        TypeKind::Refinement(RefinementType {
            inner,
            predicate,
            message,
        }),
    )
}

impl RefinementType {
    /// The predicate only sees values the inner type accepts.
    pub(crate) fn validate(&self, value: &Value, context: &Context) -> ValidationResult {
        let inner = self.inner.is_valid_snapshot(value, context);
        if inner.is_err() {
            return inner;
        }
        if (self.predicate)(value) {
            ValidationResult::success()
        } else {
            ValidationResult::failure(context, value, self.message.clone())
        }
    }
}
