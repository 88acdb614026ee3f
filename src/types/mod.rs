//! The runtime type system.
//!
//! A [`Type`] is an immutable, shareable descriptor. Every variant answers the
//! same four questions:
//! - is a plain value a valid snapshot of me? (`is_valid_snapshot`, pure)
//! - build the live nodes for a valid snapshot (`instantiate`)
//! - merge a new valid snapshot into an existing node (`reconcile`)
//! - how do I print? (`describe`)
//!
//! Variants form a closed set ([`TypeKind`]); dispatch is an exhaustive match.
//! Types compare by identity: two separately built `string()`-like models are
//! different types even when they describe the same shape.
pub mod decl;

mod array;
mod frozen;
mod identifier;
mod late;
mod literal;
mod map;
mod model;
mod optional;
mod primitive;
mod reference;
mod refinement;
mod union;

pub use literal::Primitive;
pub use model::{ActionFn, ModelBuilder, UnknownProperties};
pub use optional::DefaultValue;
pub use union::{Dispatcher, Disambiguation};

pub(crate) use array::ArrayType;
pub(crate) use identifier::{IdentifierKind, normalize_identifier};
pub(crate) use late::LateType;
pub(crate) use literal::LiteralType;
pub(crate) use map::MapType;
pub(crate) use model::ModelType;
pub(crate) use optional::OptionalType;
pub(crate) use primitive::{PrimitiveKind, millis_to_datetime};
pub(crate) use reference::ReferenceType;
pub(crate) use refinement::RefinementType;
pub(crate) use union::UnionType;

use crate::error::{EngineError, EngineResult};
use crate::tree::{NodeData, NodeId, Storage, Tree};
use crate::validation::{Context, ValidationResult};
use once_cell::sync::Lazy;
use serde_json::Value;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

/// A shareable runtime type descriptor.
#[derive(Clone)]
pub struct Type(Arc<TypeInner>);

pub(crate) struct TypeInner {
    name: String,
    kind: TypeKind,
}

pub(crate) enum TypeKind {
    Primitive(PrimitiveKind),
    Literal(LiteralType),
    Identifier(IdentifierKind),
    Frozen,
    Model(ModelType),
    Array(ArrayType),
    Map(MapType),
    Union(UnionType),
    Optional(OptionalType),
    Reference(ReferenceType),
    Refinement(RefinementType),
    Late(LateType),
}

/// The variant tag of a type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TypeFlag {
    String,
    Number,
    Integer,
    Boolean,
    Null,
    Date,
    Literal,
    Identifier,
    Frozen,
    Model,
    Array,
    Map,
    Union,
    Optional,
    Reference,
    Refinement,
    Late,
}

// ————————————————————————————————————————————————————————————————————————————
// IMPLEMENTATION
// ————————————————————————————————————————————————————————————————————————————

impl Type {
    pub(crate) fn new(name: impl Into<String>, kind: TypeKind) -> Self {
        Type(Arc::new(TypeInner {
            name: name.into(),
            kind,
        }))
    }

    /// The type's name, used in error messages.
    #[inline]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    #[inline]
    pub(crate) fn kind(&self) -> &TypeKind {
        &self.0.kind
    }

    /// The variant tag.
    pub fn flag(&self) -> TypeFlag {
        match self.kind() {
            TypeKind::Primitive(kind) => kind.flag(),
            TypeKind::Literal(_) => TypeFlag::Literal,
            TypeKind::Identifier(_) => TypeFlag::Identifier,
            TypeKind::Frozen => TypeFlag::Frozen,
            TypeKind::Model(_) => TypeFlag::Model,
            TypeKind::Array(_) => TypeFlag::Array,
            TypeKind::Map(_) => TypeFlag::Map,
            TypeKind::Union(_) => TypeFlag::Union,
            TypeKind::Optional(_) => TypeFlag::Optional,
            TypeKind::Reference(_) => TypeFlag::Reference,
            TypeKind::Refinement(_) => TypeFlag::Refinement,
            TypeKind::Late(_) => TypeFlag::Late,
        }
    }

    /// Identity comparison.
    #[inline]
    pub fn same(&self, other: &Type) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Stable textual form of the type.
    pub fn describe(&self) -> String {
        match self.kind() {
            TypeKind::Primitive(kind) => kind.name().to_owned(),
            TypeKind::Literal(literal) => literal.describe(),
            TypeKind::Identifier(kind) => kind.name().to_owned(),
            TypeKind::Frozen => "frozen".to_owned(),
            TypeKind::Model(model) => model.describe(),
            TypeKind::Array(array) => format!("{}[]", array.element.describe()),
            TypeKind::Map(map) => format!("Map<string, {}>", map.value_type.describe()),
            TypeKind::Union(union) => union.describe(),
            TypeKind::Optional(optional) => format!("{}?", optional.inner.describe()),
            TypeKind::Reference(reference) => format!("reference({})", reference.target.name()),
            // named variants print their name so recursive shapes terminate
            TypeKind::Refinement(_) | TypeKind::Late(_) => self.name().to_owned(),
        }
    }

    /// Check `value` against this type, collecting every error.
    ///
    /// `context` is the chain of frames leading to this position; errors found
    /// below it extend the chain with their own subpaths.
    pub fn is_valid_snapshot(&self, value: &Value, context: &Context) -> ValidationResult {
        match self.kind() {
            TypeKind::Primitive(kind) => kind.validate(value, context),
            TypeKind::Literal(literal) => literal.validate(value, context),
            TypeKind::Identifier(kind) => kind.validate(value, context),
            TypeKind::Frozen => frozen::validate(value, context),
            TypeKind::Model(model) => model.validate(self, value, context),
            TypeKind::Array(array) => array.validate(value, context),
            TypeKind::Map(map) => map.validate(value, context),
            TypeKind::Union(union) => union.validate(value, context),
            TypeKind::Optional(optional) => optional.validate(value, context),
            TypeKind::Reference(reference) => reference.validate(value, context),
            TypeKind::Refinement(refinement) => refinement.validate(value, context),
            TypeKind::Late(late) => match late.resolve() {
                Some(inner) => inner.is_valid_snapshot(value, context),
                None => ValidationResult::failure(context, value, late.unresolved_message()),
            },
        }
    }

    /// Validate `value` with this type as the root frame.
    pub fn validate(&self, value: &Value) -> ValidationResult {
        self.is_valid_snapshot(value, &Context::root(self))
    }

    /// True if `value` is a valid snapshot.
    #[inline]
    pub fn is(&self, value: &Value) -> bool {
        self.validate(value).is_ok()
    }

    /// Validate `snapshot` and build a new tree rooted at this type.
    pub fn create(&self, snapshot: &Value) -> EngineResult<Tree> {
        Tree::create_root(self, snapshot, None)
    }

    /// The snapshot used for a model property whose key is missing.
    pub fn default_snapshot(&self) -> Value {
        match self.kind() {
            TypeKind::Optional(optional) => optional.default.produce(),
            TypeKind::Late(late) => late.resolve().map(|t| t.default_snapshot()).unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }

    /// Declared properties, for model types.
    pub fn properties(&self) -> Option<&indexmap::IndexMap<String, Type>> {
        self.as_model().map(|model| &model.properties)
    }

    /// Name of the identifier property, for model types that declare one.
    pub fn identifier_attribute(&self) -> Option<&str> {
        self.as_model().and_then(|model| model.identifier_attribute.as_deref())
    }

    pub(crate) fn as_model(&self) -> Option<&ModelType> {
        match self.kind() {
            TypeKind::Model(model) => Some(model),
            _ => None,
        }
    }

    /// Follow wrappers that never own nodes themselves (late, refinement).
    pub(crate) fn unwrap_transparent(&self) -> Cow<'_, Type> {
        match self.kind() {
            TypeKind::Late(late) => match late.resolve() {
                Some(inner) => Cow::Owned(inner.unwrap_transparent().into_owned()),
                None => Cow::Borrowed(self),
            },
            TypeKind::Refinement(refinement) => Cow::Owned(refinement.inner.unwrap_transparent().into_owned()),
            _ => Cow::Borrowed(self),
        }
    }

    /// True if nodes built by `concrete` may sit at a position declared as `self`.
    pub fn accepts(&self, concrete: &Type) -> bool {
        if self.same(concrete) {
            return true;
        }
        match self.kind() {
            TypeKind::Union(union) => union.types.iter().any(|member| member.accepts(concrete)),
            TypeKind::Optional(optional) => optional.inner.accepts(concrete),
            TypeKind::Refinement(refinement) => refinement.inner.accepts(concrete),
            TypeKind::Late(late) => late.resolve().is_some_and(|inner| inner.accepts(concrete)),
            _ => false,
        }
    }

    /// True if snapshots of this type can carry an identifier.
    pub(crate) fn may_have_identifier(&self) -> bool {
        match self.kind() {
            TypeKind::Model(model) => model.identifier_attribute.is_some(),
            TypeKind::Union(union) => union.types.iter().any(Type::may_have_identifier),
            TypeKind::Optional(optional) => optional.inner.may_have_identifier(),
            TypeKind::Refinement(refinement) => refinement.inner.may_have_identifier(),
            TypeKind::Late(late) => late.resolve().is_some_and(|inner| inner.may_have_identifier()),
            _ => false,
        }
    }

    /// The normalized identifier a snapshot would carry once instantiated.
    pub(crate) fn snapshot_identifier(&self, value: &Value) -> Option<String> {
        match self.kind() {
            TypeKind::Model(model) => {
                let attribute = model.identifier_attribute.as_ref()?;
                value.get(attribute).and_then(normalize_identifier)
            }
            TypeKind::Union(union) => union.determine_type(value, None)?.snapshot_identifier(value),
            TypeKind::Optional(optional) => optional.inner.snapshot_identifier(&optional.substitute(value)),
            TypeKind::Refinement(refinement) => refinement.inner.snapshot_identifier(value),
            TypeKind::Late(late) => late.resolve()?.snapshot_identifier(value),
            _ => None,
        }
    }

    /// Build the node(s) for a snapshot that already passed validation.
    pub(crate) fn instantiate(
        &self,
        tree: &mut Tree,
        parent: Option<NodeId>,
        subpath: &str,
        value: &Value,
    ) -> EngineResult<NodeId> {
        match self.kind() {
            TypeKind::Primitive(kind) => {
                Ok(tree.alloc(self, parent, subpath, Storage::Scalar(kind.normalize(value)), None))
            }
            TypeKind::Literal(_) | TypeKind::Identifier(_) | TypeKind::Frozen => {
                Ok(tree.alloc(self, parent, subpath, Storage::Scalar(value.clone()), None))
            }
            TypeKind::Reference(_) => Ok(tree.alloc(self, parent, subpath, Storage::reference(value.clone()), None)),
            TypeKind::Model(model) => model.instantiate(self, tree, parent, subpath, value),
            TypeKind::Array(array) => array.instantiate(self, tree, parent, subpath, value),
            TypeKind::Map(map) => map.instantiate(self, tree, parent, subpath, value),
            TypeKind::Union(union) => {
                let chosen = union
                    .determine_type(value, None)
                    .ok_or_else(|| EngineError::invariant(format!("no member of `{}` accepts the value", self.name())))?;
                chosen.instantiate(tree, parent, subpath, value)
            }
            TypeKind::Optional(optional) => optional.inner.instantiate(tree, parent, subpath, &optional.substitute(value)),
            TypeKind::Refinement(refinement) => refinement.inner.instantiate(tree, parent, subpath, value),
            TypeKind::Late(late) => late.resolve_or_err()?.instantiate(tree, parent, subpath, value),
        }
    }

    /// Merge `value` into `existing`, returning the node now at that position.
    ///
    /// The returned id equals `existing` unless the value could not be merged
    /// in place (different union member, different identifier), in which case
    /// a fresh node replaced it.
    pub(crate) fn reconcile(&self, tree: &mut Tree, existing: NodeId, value: &Value) -> EngineResult<NodeId> {
        match self.kind() {
            TypeKind::Union(union) => {
                let current = tree.node(existing)?.ty.clone();
                let chosen = union
                    .determine_type(value, Some(&current))
                    .ok_or_else(|| EngineError::invariant(format!("no member of `{}` accepts the value", self.name())))?;
                chosen.reconcile(tree, existing, value)
            }
            TypeKind::Optional(optional) => optional.inner.reconcile(tree, existing, &optional.substitute(value)),
            TypeKind::Refinement(refinement) => refinement.inner.reconcile(tree, existing, value),
            TypeKind::Late(late) => late.resolve_or_err()?.reconcile(tree, existing, value),
            _ => tree.reconcile_concrete(self, existing, value),
        }
    }

    /// True if `node` (built by this concrete type) can absorb `value` without
    /// losing its identity.
    pub(crate) fn can_update_in_place(&self, node: &NodeData, value: &Value) -> bool {
        match self.kind() {
            TypeKind::Model(model) => match &model.identifier_attribute {
                Some(attribute) => value.get(attribute).and_then(normalize_identifier) == node.identifier,
                None => true,
            },
            _ => true,
        }
    }

    /// Merge `value` into a node of this concrete type without replacing it.
    pub(crate) fn update_in_place(&self, tree: &mut Tree, node: NodeId, value: &Value) -> EngineResult<()> {
        match self.kind() {
            TypeKind::Primitive(kind) => tree.update_scalar(node, kind.normalize(value)),
            TypeKind::Literal(_) | TypeKind::Identifier(_) | TypeKind::Frozen => tree.update_scalar(node, value.clone()),
            TypeKind::Reference(_) => tree.update_reference(node, value.clone()),
            TypeKind::Model(model) => model.reconcile(tree, node, value),
            TypeKind::Array(array) => array.reconcile(tree, node, value),
            TypeKind::Map(map) => map.reconcile(tree, node, value),
            TypeKind::Union(_) | TypeKind::Optional(_) | TypeKind::Refinement(_) | TypeKind::Late(_) => Err(
                EngineError::invariant(format!("`{}` does not own nodes and cannot be updated in place", self.name())),
            ),
        }
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Type").field(&self.name()).finish()
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ————————————————————————————————————————————————————————————————————————————
// CONSTRUCTORS
// ————————————————————————————————————————————————————————————————————————————

static STRING: Lazy<Type> = Lazy::new(|| Type::new("string", TypeKind::Primitive(PrimitiveKind::String)));
static NUMBER: Lazy<Type> = Lazy::new(|| Type::new("number", TypeKind::Primitive(PrimitiveKind::Number)));
static INTEGER: Lazy<Type> = Lazy::new(|| Type::new("integer", TypeKind::Primitive(PrimitiveKind::Integer)));
static BOOLEAN: Lazy<Type> = Lazy::new(|| Type::new("boolean", TypeKind::Primitive(PrimitiveKind::Boolean)));
static NULL: Lazy<Type> = Lazy::new(|| Type::new("null", TypeKind::Primitive(PrimitiveKind::Null)));
static DATE: Lazy<Type> = Lazy::new(|| Type::new("Date", TypeKind::Primitive(PrimitiveKind::Date)));
static IDENTIFIER: Lazy<Type> = Lazy::new(|| Type::new("identifier", TypeKind::Identifier(IdentifierKind::String)));
static IDENTIFIER_NUMBER: Lazy<Type> =
    Lazy::new(|| Type::new("identifierNumber", TypeKind::Identifier(IdentifierKind::Number)));
static FROZEN: Lazy<Type> = Lazy::new(|| Type::new("frozen", TypeKind::Frozen));

/// Any string.
pub fn string() -> Type {
    STRING.clone()
}

/// Any number.
pub fn number() -> Type {
    NUMBER.clone()
}

/// A number without fractional part.
pub fn integer() -> Type {
    INTEGER.clone()
}

/// `true` or `false`.
pub fn boolean() -> Type {
    BOOLEAN.clone()
}

/// Exactly `null`.
pub fn null() -> Type {
    NULL.clone()
}

/// A point in time. Snapshots are milliseconds since the epoch; RFC 3339
/// strings are accepted and normalized to milliseconds.
pub fn date() -> Type {
    DATE.clone()
}

/// A string identifier. A model may declare at most one identifier property.
pub fn identifier() -> Type {
    IDENTIFIER.clone()
}

/// A numeric identifier.
pub fn identifier_number() -> Type {
    IDENTIFIER_NUMBER.clone()
}

/// Any JSON value, stored as an opaque, immutable blob.
pub fn frozen() -> Type {
    FROZEN.clone()
}

/// A type matching exactly one primitive value.
///
/// Fails with an invariant violation when `value` is an array or an object.
pub fn literal(value: impl Into<Value>) -> EngineResult<Type> {
    literal::literal_type(value.into())
}

/// A union of string literals.
pub fn enumeration<I, S>(name: impl Into<String>, options: I) -> Type
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let members = options
        .into_iter()
        .map(|option| literal::string_literal(option.into()))
        .collect();
    union::union_type(Some(name.into()), Disambiguation::Precedence, members)
}

/// Start building a model type.
pub fn model(name: impl Into<String>) -> ModelBuilder {
    ModelBuilder::new(name)
}

/// Merge several model types into one.
pub fn compose(name: impl Into<String>, models: &[Type]) -> EngineResult<Type> {
    model::compose(name.into(), models)
}

/// A list of `element`.
pub fn array(element: Type) -> Type {
    Type::new(format!("{}[]", element.name()), TypeKind::Array(ArrayType { element }))
}

/// String-keyed entries of `value_type`.
pub fn map(value_type: Type) -> Type {
    Type::new(format!("Map<string, {}>", value_type.name()), TypeKind::Map(MapType { value_type }))
}

/// Any one of `types`, first valid member wins.
pub fn union(types: Vec<Type>) -> Type {
    union::union_type(None, Disambiguation::Precedence, types)
}

/// Any one of `types`, with an explicit disambiguation rule.
pub fn union_with(disambiguation: Disambiguation, types: Vec<Type>) -> Type {
    union::union_type(None, disambiguation, types)
}

/// `inner`, with `default` used when the property is missing.
pub fn optional(inner: Type, default: impl Into<DefaultValue>) -> Type {
    optional::optional_type(inner, default.into(), false)
}

/// Like [`optional`]; with `null_as_default` an explicit `null` also yields the default.
pub fn optional_with(inner: Type, default: impl Into<DefaultValue>, null_as_default: bool) -> Type {
    optional::optional_type(inner, default.into(), null_as_default)
}

/// `inner` or `null`, defaulting to `null` when missing.
pub fn maybe(inner: Type) -> Type {
    let nullable = union::union_type(
        Some(format!("({} | null)", inner.name())),
        Disambiguation::Precedence,
        vec![null(), inner],
    );
    optional::optional_type(nullable, DefaultValue::Value(Value::Null), false)
}

/// A lookup key resolving to a node of `target` (which must declare an identifier).
pub fn reference(target: Type) -> Type {
    Type::new(format!("reference({})", target.name()), TypeKind::Reference(ReferenceType { target }))
}

/// `inner`, restricted further by `predicate`.
pub fn refinement<P>(name: impl Into<String>, inner: Type, predicate: P, message: impl Into<String>) -> Type
where
    P: Fn(&Value) -> bool + Send + Sync + 'static,
{
    refinement::refinement_type(name.into(), inner, Arc::new(predicate), message.into())
}

/// A string-like `inner` whose values must match `regex`.
pub fn pattern(name: impl Into<String>, inner: Type, regex: regex::Regex) -> Type {
    let message = format!("value does not match /{}/", regex.as_str());
    refinement(
        name,
        inner,
        move |value| value.as_str().is_some_and(|s| regex.is_match(s)),
        message,
    )
}

/// A type produced on first use, for recursive shapes.
pub fn late<F>(name: impl Into<String>, factory: F) -> Type
where
    F: Fn() -> Type + Send + Sync + 'static,
{
    late::late_type(name.into(), Arc::new(move || Some(factory())))
}

/// A late type whose factory may fail to produce a type.
pub fn late_fallible<F>(name: impl Into<String>, factory: F) -> Type
where
    F: Fn() -> Option<Type> + Send + Sync + 'static,
{
    late::late_type(name.into(), Arc::new(factory))
}

// ————————————————————————————————————————————————————————————————————————————
// TESTS
// ————————————————————————————————————————————————————————————————————————————

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtins_are_shared() {
        assert!(string().same(&string()));
        assert!(!string().same(&number()));
        assert_eq!(date().flag(), TypeFlag::Date);
    }

    #[test]
    fn describe_forms() {
        let todo = model("Todo")
            .prop("title", string())
            .prop("done", optional(boolean(), false))
            .build()
            .unwrap();
        assert_eq!(todo.describe(), "{ title: string; done: boolean? }");
        assert_eq!(array(todo.clone()).describe(), "{ title: string; done: boolean? }[]");
        assert_eq!(map(number()).describe(), "Map<string, number>");
        assert_eq!(
            union(vec![literal("a").unwrap(), literal("b").unwrap()]).describe(),
            "(\"a\" | \"b\")"
        );
        assert_eq!(reference(todo).describe(), "reference(Todo)");
    }

    #[test]
    fn accepts_follows_wrappers() {
        let a = model("A").prop("x", number()).build().unwrap();
        let b = model("B").prop("y", number()).build().unwrap();
        let either = maybe(union(vec![a.clone(), b.clone()]));
        assert!(either.accepts(&a));
        assert!(either.accepts(&b));
        assert!(either.accepts(&null()));
        assert!(!either.accepts(&string()));
    }

    #[test]
    fn pattern_refinement() {
        let email = pattern("Email", string(), regex::Regex::new(r"^[^@]+@[^@]+$").unwrap());
        assert!(email.is(&json!("a@b")));
        let result = email.validate(&json!("nope"));
        assert_eq!(result.errors().len(), 1);
        assert!(result.errors()[0].to_string().contains("does not match"));
        // inner type errors come first and stop the predicate
        assert!(email.validate(&json!(3)).errors()[0].to_string().contains("not a string"));
    }

    #[test]
    fn default_snapshot_of_missing_properties() {
        assert_eq!(optional(number(), 4).default_snapshot(), json!(4));
        assert_eq!(maybe(string()).default_snapshot(), Value::Null);
        assert_eq!(string().default_snapshot(), Value::Null);
    }
}
