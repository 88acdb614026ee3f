use super::{Type, TypeKind};
use crate::validation::{Context, ValidationResult};
use serde_json::Value;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// The value an optional property takes when it is missing.
#[derive(Clone)]
pub enum DefaultValue {
    /// A fixed snapshot.
    Value(Value),
    /// Produces a fresh snapshot each time.
    Factory(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl DefaultValue {
    pub fn factory<F>(produce: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        DefaultValue::Factory(Arc::new(produce))
    }

    pub fn produce(&self) -> Value {
        match self {
            DefaultValue::Value(value) => value.clone(),
            DefaultValue::Factory(produce) => produce(),
        }
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Value(value) => f.debug_tuple("Value").field(value).finish(),
            DefaultValue::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}

macro_rules! default_from {
    ($($source:ty),* $(,)?) => {
        $(
            impl From<$source> for DefaultValue {
                fn from(value: $source) -> Self {
                    DefaultValue::Value(Value::from(value))
                }
            }
        )*
    };
}

default_from!(Value, bool, i32, i64, u32, u64, f64, &str, String);

pub(crate) struct OptionalType {
    pub(crate) inner: Type,
    pub(crate) default: DefaultValue,
    pub(crate) null_as_default: bool,
}

pub(crate) fn optional_type(inner: Type, default: DefaultValue, null_as_default: bool) -> Type {
    let name = inner.name().to_owned();
    Type::new(
        name,
        TypeKind::Optional(OptionalType {
            inner,
            default,
            null_as_default,
        }),
    )
}

impl OptionalType {
    /// The value the inner type sees.
    pub(crate) fn substitute<'v>(&self, value: &'v Value) -> Cow<'v, Value> {
        if self.null_as_default && value.is_null() {
            Cow::Owned(self.default.produce())
        } else {
            Cow::Borrowed(value)
        }
    }

    pub(crate) fn validate(&self, value: &Value, context: &Context) -> ValidationResult {
        self.inner.is_valid_snapshot(&self.substitute(value), context)
    }
}

#[cfg(test)]
mod tests {
    use crate::types::{self, DefaultValue};
    use serde_json::json;

    #[test]
    fn explicit_null_only_defaults_when_asked() {
        let strict = types::optional(types::number(), 1);
        let lenient = types::optional_with(types::number(), 1, true);
        assert!(!strict.is(&json!(null)));
        assert!(lenient.is(&json!(null)));
    }

    #[test]
    fn factory_defaults_are_fresh() {
        let counter = std::sync::atomic::AtomicU64::new(0);
        let ty = types::optional(
            types::number(),
            DefaultValue::factory(move || json!(counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst))),
        );
        assert_eq!(ty.default_snapshot(), json!(0));
        assert_eq!(ty.default_snapshot(), json!(1));
    }

    #[test]
    fn maybe_accepts_null() {
        let ty = types::maybe(types::string());
        assert!(ty.is(&json!(null)));
        assert!(ty.is(&json!("x")));
        assert!(!ty.is(&json!(1)));
    }
}
