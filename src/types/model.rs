use super::{Type, TypeKind, normalize_identifier};
use crate::action::ActionContext;
use crate::error::{EngineError, EngineResult};
use crate::tree::{NodeId, Storage, Tree};
use crate::validation::{Context, ValidationError, ValidationResult};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::sync::Arc;

/// An action body. Receives the running call's context and its arguments.
pub type ActionFn = Arc<dyn Fn(&mut ActionContext<'_>, &[Value]) -> EngineResult<Value> + Send + Sync>;

/// What a model does with snapshot keys it does not declare.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownProperties {
    /// Report each unknown key as a validation error.
    #[default]
    Reject,
    /// Accept and drop unknown keys.
    Ignore,
}

pub(crate) struct ModelType {
    pub(crate) properties: IndexMap<String, Type>,
    pub(crate) identifier_attribute: Option<String>,
    pub(crate) unknown: UnknownProperties,
    pub(crate) actions: IndexMap<String, ActionFn>,
}

/// Builder for model types, see [`crate::types::model`].
pub struct ModelBuilder {
    name: String,
    properties: IndexMap<String, Type>,
    actions: IndexMap<String, ActionFn>,
    unknown: UnknownProperties,
}

impl ModelBuilder {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: IndexMap::new(),
            actions: IndexMap::new(),
            unknown: UnknownProperties::default(),
        }
    }

    /// Declare a property. Redeclaring a key replaces its type in place.
    pub fn prop(mut self, key: impl Into<String>, ty: Type) -> Self {
        self.properties.insert(key.into(), ty);
        self
    }

    /// Declare several properties at once.
    pub fn props<I, K>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = (K, Type)>,
        K: Into<String>,
    {
        for (key, ty) in properties {
            self.properties.insert(key.into(), ty);
        }
        self
    }

    /// Register a named action.
    pub fn action<F>(mut self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut ActionContext<'_>, &[Value]) -> EngineResult<Value> + Send + Sync + 'static,
    {
        self.actions.insert(name.into(), Arc::new(body));
        self
    }

    pub fn unknown_properties(mut self, policy: UnknownProperties) -> Self {
        self.unknown = policy;
        self
    }

    /// Finish the model.
    ///
    /// Fails when more than one property is an identifier.
    pub fn build(self) -> EngineResult<Type> {
        let identifiers: Vec<&String> = self
            .properties
            .iter()
            .filter(|(_, ty)| is_identifier_type(ty))
            .map(|(key, _)| key)
            .collect();
        if identifiers.len() > 1 {
            return Err(EngineError::invariant(format!(
                "model `{}` declares more than one identifier: {}",
                self.name,
                identifiers.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(", ")
            )));
        }
        let identifier_attribute = identifiers.first().map(|key| (*key).clone());
        Ok(Type::new(
            self.name,
            TypeKind::Model(ModelType {
                properties: self.properties,
                identifier_attribute,
                unknown: self.unknown,
                actions: self.actions,
            }),
        ))
    }
}

fn is_identifier_type(ty: &Type) -> bool {
    match ty.kind() {
        TypeKind::Identifier(_) => true,
        TypeKind::Refinement(refinement) => is_identifier_type(&refinement.inner),
        _ => false,
    }
}

/// The value a property sees: the snapshot's entry, or the type's default when missing.
pub(crate) fn property_value<'v>(value: &'v Value, key: &str, ty: &Type) -> Cow<'v, Value> {
    match value.get(key) {
        Some(entry) => Cow::Borrowed(entry),
        None => Cow::Owned(ty.default_snapshot()),
    }
}

impl ModelType {
    pub(crate) fn describe(&self) -> String {
        if self.properties.is_empty() {
            return "{}".to_owned();
        }
        let body = self
            .properties
            .iter()
            .map(|(key, ty)| format!("{key}: {}", ty.describe()))
            .collect::<Vec<_>>()
            .join("; ");
        format!("{{ {body} }}")
    }

    #[inline]
    pub(crate) fn action(&self, name: &str) -> Option<&ActionFn> {
        self.actions.get(name)
    }

    pub(crate) fn validate(&self, ty: &Type, value: &Value, context: &Context) -> ValidationResult {
        let Some(object) = value.as_object() else {
            return ValidationResult::failure(context, value, "value is not a plain object");
        };
        let mut result = ValidationResult::success();
        for (key, prop) in &self.properties {
            let entry = property_value(value, key, prop);
            result.extend(prop.is_valid_snapshot(&entry, &context.child(key.as_str(), prop)));
        }
        if self.unknown == UnknownProperties::Reject {
            for (key, entry) in object.iter().filter(|(key, _)| !self.properties.contains_key(*key)) {
                result.push(ValidationError::new(
                    &context.child(key.as_str(), ty),
                    entry,
                    format!("unknown property `{key}`"),
                ));
            }
        }
        result
    }

    pub(crate) fn instantiate(
        &self,
        ty: &Type,
        tree: &mut Tree,
        parent: Option<NodeId>,
        subpath: &str,
        value: &Value,
    ) -> EngineResult<NodeId> {
        let identifier = self
            .identifier_attribute
            .as_ref()
            .and_then(|attribute| value.get(attribute))
            .and_then(normalize_identifier);
        let node = tree.alloc(ty, parent, subpath, Storage::Model(IndexMap::new()), identifier);
        let mut children = IndexMap::with_capacity(self.properties.len());
        for (key, prop) in &self.properties {
            let entry = property_value(value, key, prop);
            let child = tree.instantiate_child(prop, Some(node), key, &entry)?;
            children.insert(key.clone(), child);
        }
        tree.set_storage(node, Storage::Model(children))?;
        Ok(node)
    }

    /// Each property reconciles on its own; the whole value was validated
    /// before the first one is touched.
    pub(crate) fn reconcile(&self, tree: &mut Tree, node: NodeId, value: &Value) -> EngineResult<()> {
        for (key, prop) in &self.properties {
            let entry = property_value(value, key, prop);
            let child = tree.model_child(node, key)?;
            prop.reconcile(tree, child, &entry)?;
        }
        Ok(())
    }
}

pub(crate) fn compose(name: String, models: &[Type]) -> EngineResult<Type> {
    let mut builder = ModelBuilder::new(name);
    for ty in models {
        let model = ty
            .as_model()
            .ok_or_else(|| EngineError::invariant(format!("cannot compose non-model type `{}`", ty.name())))?;
        builder = builder.props(model.properties.iter().map(|(k, t)| (k.clone(), t.clone())));
        for (action, body) in &model.actions {
            builder.actions.insert(action.clone(), body.clone());
        }
    }
    // the composition ignores unknown keys only if every part does
    let lenient = !models.is_empty()
        && models
            .iter()
            .filter_map(Type::as_model)
            .all(|model| model.unknown == UnknownProperties::Ignore);
    if lenient {
        builder.unknown = UnknownProperties::Ignore;
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types;
    use serde_json::json;

    fn todo() -> Type {
        types::model("Todo")
            .prop("id", types::identifier())
            .prop("title", types::string())
            .prop("done", types::optional(types::boolean(), false))
            .build()
            .unwrap()
    }

    #[test]
    fn missing_optional_properties_validate() {
        assert!(todo().is(&json!({"id": "a", "title": "x"})));
    }

    #[test]
    fn every_bad_property_is_reported() {
        let result = todo().validate(&json!({"id": 1, "title": 2, "extra": true}));
        let paths: Vec<String> = result.errors().iter().map(|e| e.path()).collect();
        assert_eq!(paths, vec!["/id", "/title", "/extra"]);
    }

    #[test]
    fn unknown_properties_can_be_ignored() {
        let lenient = types::model("Lenient")
            .prop("a", types::number())
            .unknown_properties(UnknownProperties::Ignore)
            .build()
            .unwrap();
        assert!(lenient.is(&json!({"a": 1, "b": 2})));
    }

    #[test]
    fn non_objects_are_rejected() {
        let result = todo().validate(&json!([1]));
        assert!(result.errors()[0].to_string().contains("not a plain object"));
    }

    #[test]
    fn at_most_one_identifier() {
        let err = types::model("Twice")
            .prop("a", types::identifier())
            .prop("b", types::identifier_number())
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("more than one identifier"));
        assert_eq!(todo().identifier_attribute(), Some("id"));
    }

    #[test]
    fn compose_merges_properties() {
        let named = types::model("Named").prop("name", types::string()).build().unwrap();
        let aged = types::model("Aged").prop("age", types::number()).build().unwrap();
        let person = types::compose("Person", &[named, aged]).unwrap();
        assert_eq!(person.describe(), "{ name: string; age: number }");
        assert!(person.is(&json!({"name": "a", "age": 3})));
        assert!(types::compose("Bad", &[types::string()]).is_err());
    }
}
