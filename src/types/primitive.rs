use super::TypeFlag;
use crate::validation::{Context, ValidationResult};
use chrono::{DateTime, Utc};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PrimitiveKind {
    String,
    Number,
    Integer,
    Boolean,
    Null,
    Date,
}

impl PrimitiveKind {
    pub(crate) fn name(self) -> &'static str {
        match self {
            PrimitiveKind::String => "string",
            PrimitiveKind::Number => "number",
            PrimitiveKind::Integer => "integer",
            PrimitiveKind::Boolean => "boolean",
            PrimitiveKind::Null => "null",
            PrimitiveKind::Date => "Date",
        }
    }

    pub(crate) fn flag(self) -> TypeFlag {
        match self {
            PrimitiveKind::String => TypeFlag::String,
            PrimitiveKind::Number => TypeFlag::Number,
            PrimitiveKind::Integer => TypeFlag::Integer,
            PrimitiveKind::Boolean => TypeFlag::Boolean,
            PrimitiveKind::Null => TypeFlag::Null,
            PrimitiveKind::Date => TypeFlag::Date,
        }
    }

    fn expectation(self) -> &'static str {
        match self {
            PrimitiveKind::String => "value is not a string",
            PrimitiveKind::Number => "value is not a number",
            PrimitiveKind::Integer => "value is not an integer",
            PrimitiveKind::Boolean => "value is not a boolean",
            PrimitiveKind::Null => "value is not null",
            PrimitiveKind::Date => "value is not a Date (milliseconds or RFC 3339 string)",
        }
    }

    pub(crate) fn validate(self, value: &Value, context: &Context) -> ValidationResult {
        let ok = match self {
            PrimitiveKind::String => value.is_string(),
            PrimitiveKind::Number => value.is_number(),
            PrimitiveKind::Integer => value.as_f64().is_some_and(|n| n.fract() == 0.0),
            PrimitiveKind::Boolean => value.is_boolean(),
            PrimitiveKind::Null => value.is_null(),
            PrimitiveKind::Date => date_millis(value).is_some(),
        };
        if ok {
            ValidationResult::success()
        } else {
            ValidationResult::failure(context, value, self.expectation())
        }
    }

    /// The stored form of an already validated value.
    pub(crate) fn normalize(self, value: &Value) -> Value {
        match self {
            PrimitiveKind::Date => date_millis(value).map(Value::from).unwrap_or_else(|| value.clone()),
            _ => value.clone(),
        }
    }
}

/// Milliseconds since the epoch for a date snapshot.
pub(crate) fn date_millis(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.timestamp_millis()),
        _ => None,
    }
}

pub(crate) fn millis_to_datetime(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
}
