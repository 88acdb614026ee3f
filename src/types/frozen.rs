use crate::validation::{Context, ValidationResult};
use serde_json::Value;

/// Every JSON value is serializable, so a frozen position accepts anything.
/// The value is kept as one opaque blob and replaced wholesale on change.
pub(crate) fn validate(_value: &Value, _context: &Context) -> ValidationResult {
    ValidationResult::success()
}

#[cfg(test)]
mod tests {
    use crate::types;
    use serde_json::json;

    #[test]
    fn frozen_accepts_any_json() {
        let ty = types::frozen();
        for value in [json!(null), json!(1), json!("s"), json!([1, {"a": []}]), json!({"deep": {"x": 1}})] {
            assert!(ty.is(&value));
        }
    }

    #[test]
    fn frozen_is_stored_as_one_node() {
        let tree = types::frozen().create(&json!({"a": [1, 2]})).unwrap();
        assert!(tree.children(tree.root()).unwrap().is_empty());
        assert_eq!(tree.snapshot(tree.root()).unwrap(), json!({"a": [1, 2]}));
    }
}
