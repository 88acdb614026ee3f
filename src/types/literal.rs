use super::{Type, TypeKind};
use crate::error::{EngineError, EngineResult, value_kind};
use crate::validation::{Context, ValidationResult};
use ordered_float::OrderedFloat;
use serde_json::Value;
use std::fmt;

/// A JSON primitive with total equality, numbers compared by value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Primitive {
    Null,
    Bool(bool),
    Number(OrderedFloat<f64>),
    String(String),
}

impl Primitive {
    /// `None` for arrays and objects.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(Primitive::Null),
            Value::Bool(b) => Some(Primitive::Bool(*b)),
            Value::Number(n) => n.as_f64().map(|f| Primitive::Number(OrderedFloat(f))),
            Value::String(s) => Some(Primitive::String(s.clone())),
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Primitive::Null => Value::Null,
            Primitive::Bool(b) => Value::Bool(*b),
            Primitive::Number(n) => serde_json::Number::from_f64(n.0)
                .map(|number| {
                    if n.0.fract() == 0.0 && n.0.abs() < i64::MAX as f64 {
                        Value::from(n.0 as i64)
                    } else {
                        Value::Number(number)
                    }
                })
                .unwrap_or(Value::Null),
            Primitive::String(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_value())
    }
}

pub(crate) struct LiteralType {
    pub(crate) value: Value,
    pub(crate) primitive: Primitive,
}

impl LiteralType {
    pub(crate) fn describe(&self) -> String {
        self.value.to_string()
    }

    pub(crate) fn validate(&self, value: &Value, context: &Context) -> ValidationResult {
        if Primitive::from_value(value).is_some_and(|candidate| candidate == self.primitive) {
            ValidationResult::success()
        } else {
            ValidationResult::failure(context, value, format!("value is not the literal `{}`", self.value))
        }
    }
}

pub(crate) fn literal_type(value: Value) -> EngineResult<Type> {
    let primitive = Primitive::from_value(&value).ok_or_else(|| {
        EngineError::invariant(format!(
            "literal types must be primitive, got {} `{value}`",
            value_kind(&value)
        ))
    })?;
    Ok(Type::new(value.to_string(), TypeKind::Literal(LiteralType { value, primitive })))
}

pub(crate) fn string_literal(value: String) -> Type {
    let primitive = Primitive::String(value.clone());
    let value = Value::String(value);
    Type::new(value.to_string(), TypeKind::Literal(LiteralType { value, primitive }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types;
    use serde_json::json;

    #[test]
    fn numbers_compare_by_value() {
        let one = types::literal(1).unwrap();
        assert!(one.is(&json!(1)));
        assert!(one.is(&json!(1.0)));
        assert!(!one.is(&json!("1")));
        assert!(!one.is(&json!(true)));
    }

    #[test]
    fn non_primitive_literal_is_an_invariant_violation() {
        let err = types::literal(json!({"a": 1})).unwrap_err();
        assert!(matches!(err, EngineError::Invariant(_)));
        assert!(types::literal(json!([1])).is_err());
    }

    #[test]
    fn failure_message_quotes_the_literal() {
        let ty = types::literal("on").unwrap();
        assert_eq!(ty.describe(), "\"on\"");
        let result = ty.validate(&json!("off"));
        assert!(result.errors()[0].to_string().contains("value is not the literal `\"on\"`"));
    }

    #[test]
    fn primitive_round_trips_integers() {
        assert_eq!(Primitive::from_value(&json!(4)).unwrap().to_value(), json!(4));
        assert_eq!(Primitive::from_value(&json!(4.5)).unwrap().to_value(), json!(4.5));
    }
}
