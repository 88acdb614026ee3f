use super::{Primitive, Type, TypeKind};
use crate::validation::{Context, ValidationResult};
use once_cell::sync::OnceCell;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Picks the member type for a value. `None` means no member applies.
pub type Dispatcher = Arc<dyn Fn(&Value) -> Option<Type> + Send + Sync>;

/// How a union chooses between several members that accept a value.
///
/// Whatever the rule, a value reconciled onto an existing node keeps that
/// node's member when it still validates.
#[derive(Clone, Default)]
pub enum Disambiguation {
    /// The first valid member in declaration order wins.
    #[default]
    Precedence,
    /// Exactly one member may accept a value; more is a validation error.
    Exclusive,
    /// Members are models with a literal property of this name; its value
    /// selects the member.
    Discriminator(String),
    /// A callback selects the member.
    Dispatcher(Dispatcher),
}

impl fmt::Debug for Disambiguation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disambiguation::Precedence => f.write_str("Precedence"),
            Disambiguation::Exclusive => f.write_str("Exclusive"),
            Disambiguation::Discriminator(prop) => f.debug_tuple("Discriminator").field(prop).finish(),
            Disambiguation::Dispatcher(_) => f.write_str("Dispatcher(..)"),
        }
    }
}

pub(crate) struct UnionType {
    pub(crate) types: Vec<Type>,
    pub(crate) disambiguation: Disambiguation,
    discriminants: OnceCell<HashMap<Primitive, usize>>,
}

pub(crate) fn union_type(name: Option<String>, disambiguation: Disambiguation, types: Vec<Type>) -> Type {
    let name = name.unwrap_or_else(|| {
        let names: Vec<&str> = types.iter().map(Type::name).collect();
        format!("({})", names.join(" | "))
    });
    Type::new(
        name,
        TypeKind::Union(UnionType {
            types,
            disambiguation,
            discriminants: OnceCell::new(),
        }),
    )
}

/// The literal value a member declares for `prop`, if any.
fn discriminant_of(member: &Type, prop: &str) -> Option<Primitive> {
    let concrete = member.unwrap_transparent();
    let declared = concrete.as_model()?.properties.get(prop)?;
    let mut ty = declared.clone();
    loop {
        let next = match ty.kind() {
            TypeKind::Literal(literal) => return Some(literal.primitive.clone()),
            TypeKind::Optional(optional) => optional.inner.clone(),
            TypeKind::Refinement(refinement) => refinement.inner.clone(),
            TypeKind::Late(late) => late.resolve()?,
            _ => return None,
        };
        ty = next;
    }
}

impl UnionType {
    pub(crate) fn describe(&self) -> String {
        let members: Vec<String> = self.types.iter().map(Type::describe).collect();
        format!("({})", members.join(" | "))
    }

    fn discriminants(&self, prop: &str) -> &HashMap<Primitive, usize> {
        self.discriminants.get_or_init(|| {
            let mut index = HashMap::new();
            for (position, member) in self.types.iter().enumerate() {
                if let Some(key) = discriminant_of(member, prop) {
                    index.entry(key).or_insert(position);
                }
            }
            index
        })
    }

    fn discriminated(&self, prop: &str, value: &Value) -> Option<&Type> {
        let key = Primitive::from_value(value.get(prop)?)?;
        self.discriminants(prop).get(&key).map(|position| &self.types[*position])
    }

    pub(crate) fn validate(&self, value: &Value, context: &Context) -> ValidationResult {
        match &self.disambiguation {
            Disambiguation::Discriminator(prop) => match self.discriminated(prop, value) {
                Some(member) => member.is_valid_snapshot(value, context),
                None => {
                    let shown = value.get(prop).map(Value::to_string).unwrap_or_else(|| "nothing".to_owned());
                    ValidationResult::failure(
                        context,
                        value,
                        format!("no type is applicable for the union: discriminator `{prop}` is {shown}"),
                    )
                }
            },
            Disambiguation::Dispatcher(dispatch) => match dispatch(value) {
                Some(member) => member.is_valid_snapshot(value, context),
                None => ValidationResult::failure(
                    context,
                    value,
                    "no type is applicable for the union: the dispatcher selected none",
                ),
            },
            Disambiguation::Precedence | Disambiguation::Exclusive => {
                let exclusive = matches!(self.disambiguation, Disambiguation::Exclusive);
                let mut errors = ValidationResult::success();
                let mut applicable: Vec<&Type> = Vec::new();
                for member in &self.types {
                    let result = member.is_valid_snapshot(value, context);
                    if result.is_ok() {
                        applicable.push(member);
                        if !exclusive {
                            return ValidationResult::success();
                        }
                    } else {
                        errors.extend(result);
                    }
                }
                match applicable.len() {
                    0 => {
                        errors.extend(ValidationResult::failure(
                            context,
                            value,
                            "no type is applicable for the union",
                        ));
                        errors
                    }
                    1 => ValidationResult::success(),
                    _ => {
                        let names: Vec<&str> = applicable.iter().map(|member| member.name()).collect();
                        ValidationResult::failure(
                            context,
                            value,
                            format!("multiple types are applicable for the union: {}", names.join(", ")),
                        )
                    }
                }
            }
        }
    }

    /// The member that should own a node for `value`.
    ///
    /// `existing` is the concrete type of the node already at this position.
    pub(crate) fn determine_type(&self, value: &Value, existing: Option<&Type>) -> Option<Type> {
        if let Some(current) = existing {
            let keep = self
                .types
                .iter()
                .find(|member| member.accepts(current) && member.is(value));
            if let Some(member) = keep {
                return Some(member.clone());
            }
        }
        match &self.disambiguation {
            Disambiguation::Precedence => self.types.iter().find(|member| member.is(value)).cloned(),
            Disambiguation::Exclusive => {
                let mut valid = self.types.iter().filter(|member| member.is(value));
                let first = valid.next()?;
                valid.next().is_none().then(|| first.clone())
            }
            Disambiguation::Discriminator(prop) => self.discriminated(prop, value).cloned(),
            Disambiguation::Dispatcher(dispatch) => dispatch(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types;
    use serde_json::json;

    fn shapes() -> (Type, Type) {
        let square = types::model("Square")
            .prop("kind", types::literal("square").unwrap())
            .prop("size", types::number())
            .build()
            .unwrap();
        let circle = types::model("Circle")
            .prop("kind", types::literal("circle").unwrap())
            .prop("radius", types::number())
            .build()
            .unwrap();
        (square, circle)
    }

    #[test]
    fn first_applicable_literal_wins() {
        let ab = types::union(vec![types::literal("a").unwrap(), types::literal("b").unwrap()]);
        assert!(ab.is(&json!("a")));
        let TypeKind::Union(union) = ab.kind() else { unreachable!() };
        let chosen = union.determine_type(&json!("a"), None).unwrap();
        assert_eq!(chosen.name(), "\"a\"");

        let result = ab.validate(&json!("c"));
        let rendered: Vec<String> = result.errors().iter().map(ToString::to_string).collect();
        assert!(rendered.iter().any(|e| e.contains("`\"a\"`")));
        assert!(rendered.iter().any(|e| e.contains("`\"b\"`")));
        assert!(rendered.iter().any(|e| e.contains("no type is applicable")));
    }

    #[test]
    fn exclusive_reports_ambiguity() {
        let loose = types::union_with(Disambiguation::Exclusive, vec![types::number(), types::integer()]);
        assert!(loose.is(&json!(1.5)));
        let result = loose.validate(&json!(2));
        assert!(result.errors()[0].to_string().contains("multiple types are applicable"));
    }

    #[test]
    fn discriminator_selects_member() {
        let (square, circle) = shapes();
        let shape = types::union_with(
            Disambiguation::Discriminator("kind".into()),
            vec![square.clone(), circle.clone()],
        );
        assert!(shape.is(&json!({"kind": "circle", "radius": 2})));
        // only the selected member's errors are reported
        let result = shape.validate(&json!({"kind": "circle", "size": 2}));
        assert!(result.errors().iter().all(|e| e.path() != "/kind"));
        assert!(shape.validate(&json!({"kind": "hexagon"})).errors()[0]
            .to_string()
            .contains("discriminator `kind`"));

        let TypeKind::Union(union) = shape.kind() else { unreachable!() };
        let chosen = union.determine_type(&json!({"kind": "square", "size": 1}), None).unwrap();
        assert!(chosen.same(&square));
    }

    #[test]
    fn dispatcher_selects_member() {
        let (square, circle) = shapes();
        let pick_circle = circle.clone();
        let shape = types::union_with(
            Disambiguation::Dispatcher(Arc::new(move |value: &Value| {
                value.get("radius").map(|_| pick_circle.clone())
            })),
            vec![square, circle],
        );
        assert!(shape.is(&json!({"kind": "circle", "radius": 1})));
        assert!(!shape.is(&json!({"kind": "square", "size": 1})));
    }

    #[test]
    fn existing_member_is_kept_when_still_valid() {
        let loose = types::model("Loose")
            .prop("x", types::optional(types::number(), 0))
            .unknown_properties(types::UnknownProperties::Ignore)
            .build()
            .unwrap();
        let strict = types::model("Strict").prop("x", types::number()).build().unwrap();
        let either = types::union(vec![strict.clone(), loose.clone()]);
        let TypeKind::Union(union) = either.kind() else { unreachable!() };
        let value = json!({"x": 1});
        assert!(union.determine_type(&value, None).unwrap().same(&strict));
        assert!(union.determine_type(&value, Some(&loose)).unwrap().same(&loose));
    }
}
