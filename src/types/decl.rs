//! Declarative type descriptions.
//!
//! A [`TypeLibrary`] is a JSON document of named [`TypeDecl`]s. Declarations
//! refer to each other by name (`{"kind": "ref", "name": "Node"}`), which
//! compiles to a late type, so recursive shapes work. Closures cannot be
//! written down: refinements are limited to `pattern`, models carry no
//! actions.

use super::{Disambiguation, Type, UnknownProperties};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TypeDecl {
    String,
    Number,
    Integer,
    Boolean,
    Null,
    Date,
    Identifier,
    IdentifierNumber,
    Frozen,
    Literal { value: Value },                        // a primitive
    Enumeration { name: String, options: Vec<String> },
    Model {
        name: String,
        #[serde(default)]
        properties: IndexMap<String, TypeDecl>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unknown_properties: Option<UnknownProperties>, // falls back to the config
    },
    Compose { name: String, models: Vec<TypeDecl> },
    Array { of: Box<TypeDecl> },
    Map { of: Box<TypeDecl> },
    Union {
        types: Vec<TypeDecl>,
        #[serde(default)]
        exclusive: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        discriminator: Option<String>,
    },
    Optional {
        of: Box<TypeDecl>,
        #[serde(default)]
        default: Value,
        #[serde(default)]
        null_as_default: bool,
    },
    Maybe { of: Box<TypeDecl> },
    Reference { to: Box<TypeDecl> },
    Pattern { name: String, of: Box<TypeDecl>, regex: String },
    Ref { name: String },                            // another declaration of the library
}

/// Named declarations, in file order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeLibrary {
    #[serde(default)]
    pub types: IndexMap<String, TypeDecl>,
}

/// The compiled form of a [`TypeLibrary`].
#[derive(Debug, Clone, Default)]
pub struct CompiledLibrary {
    types: IndexMap<String, Type>,
}

impl CompiledLibrary {
    pub fn get(&self, name: &str) -> Option<&Type> {
        self.types.get(name)
    }

    /// Like [`CompiledLibrary::get`], failing with the list of known names.
    pub fn require(&self, name: &str) -> EngineResult<&Type> {
        self.types.get(name).ok_or_else(|| {
            EngineError::invariant(format!(
                "unknown type `{name}`, the library declares: {}",
                self.types.keys().map(String::as_str).collect::<Vec<_>>().join(", ")
            ))
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }
}

type Registry = Arc<OnceCell<IndexMap<String, Type>>>;

struct Compiler<'a> {
    lates: &'a IndexMap<String, Type>,
    unknown: UnknownProperties,
}

impl Compiler<'_> {
    fn compile(&self, decl: &TypeDecl) -> EngineResult<Type> {
        Ok(match decl {
            TypeDecl::String => super::string(),
            TypeDecl::Number => super::number(),
            TypeDecl::Integer => super::integer(),
            TypeDecl::Boolean => super::boolean(),
            TypeDecl::Null => super::null(),
            TypeDecl::Date => super::date(),
            TypeDecl::Identifier => super::identifier(),
            TypeDecl::IdentifierNumber => super::identifier_number(),
            TypeDecl::Frozen => super::frozen(),
            TypeDecl::Literal { value } => super::literal(value.clone())?,
            TypeDecl::Enumeration { name, options } => super::enumeration(name.clone(), options.iter().cloned()),
            TypeDecl::Model {
                name,
                properties,
                unknown_properties,
            } => {
                let mut builder = super::model(name.clone()).unknown_properties(unknown_properties.unwrap_or(self.unknown));
                for (key, property) in properties {
                    builder = builder.prop(key.clone(), self.compile(property)?);
                }
                builder.build()?
            }
            TypeDecl::Compose { name, models } => {
                let models = models.iter().map(|model| self.compile(model)).collect::<EngineResult<Vec<_>>>()?;
                super::compose(name.clone(), &models)?
            }
            TypeDecl::Array { of } => super::array(self.compile(of)?),
            TypeDecl::Map { of } => super::map(self.compile(of)?),
            TypeDecl::Union {
                types,
                exclusive,
                discriminator,
            } => {
                let members = types.iter().map(|member| self.compile(member)).collect::<EngineResult<Vec<_>>>()?;
                let disambiguation = match (discriminator, exclusive) {
                    (Some(prop), _) => Disambiguation::Discriminator(prop.clone()),
                    (None, true) => Disambiguation::Exclusive,
                    (None, false) => Disambiguation::Precedence,
                };
                super::union_with(disambiguation, members)
            }
            TypeDecl::Optional {
                of,
                default,
                null_as_default,
            } => super::optional_with(self.compile(of)?, default.clone(), *null_as_default),
            TypeDecl::Maybe { of } => super::maybe(self.compile(of)?),
            TypeDecl::Reference { to } => super::reference(self.compile(to)?),
            TypeDecl::Pattern { name, of, regex } => {
                let regex = regex::Regex::new(regex)
                    .map_err(|error| EngineError::invariant(format!("bad pattern for `{name}`: {error}")))?;
                super::pattern(name.clone(), self.compile(of)?, regex)
            }
            TypeDecl::Ref { name } => self
                .lates
                .get(name)
                .cloned()
                .ok_or_else(|| EngineError::invariant(format!("reference to undeclared type `{name}`")))?,
        })
    }
}

impl TypeLibrary {
    /// Load from a JSON file.
    pub fn load(path: &Path) -> EngineResult<Self> {
        let bytes = std::fs::read(path)?;
        crate::path_de::from_slice(&bytes)
    }

    /// Compile every declaration. `ref`s become late types that resolve to
    /// the compiled declaration of that name.
    pub fn compile(&self, config: &EngineConfig) -> EngineResult<CompiledLibrary> {
        // Recursive libraries form reference cycles and live as long as the process.
        let registry: Registry = Arc::new(OnceCell::new());
        let lates: IndexMap<String, Type> = self
            .types
            .keys()
            .map(|name| {
                let registry = registry.clone();
                let key = name.clone();
                let late = super::late_fallible(name.clone(), move || registry.get()?.get(&key).cloned());
                (name.clone(), late)
            })
            .collect();

        let compiler = Compiler {
            lates: &lates,
            unknown: config.unknown_properties,
        };
        let mut types = IndexMap::with_capacity(self.types.len());
        for (name, decl) in &self.types {
            let ty = compiler
                .compile(decl)
                .map_err(|error| EngineError::invariant(format!("in type `{name}`: {error}")))?;
            types.insert(name.clone(), ty);
        }
        let _ = registry.set(types.clone());
        Ok(CompiledLibrary { types })
    }
}

impl TypeDecl {
    /// Compile a standalone declaration (no `ref`s allowed).
    pub fn compile(&self, config: &EngineConfig) -> EngineResult<Type> {
        Compiler {
            lates: &IndexMap::new(),
            unknown: config.unknown_properties,
        }
        .compile(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn library() -> TypeLibrary {
        crate::path_de::from_value(json!({
            "types": {
                "Node": {
                    "kind": "model",
                    "name": "Node",
                    "properties": {
                        "id": {"kind": "identifier"},
                        "children": {"kind": "optional", "of": {"kind": "array", "of": {"kind": "ref", "name": "Node"}}, "default": []},
                        "next": {"kind": "maybe", "of": {"kind": "reference", "to": {"kind": "ref", "name": "Node"}}}
                    }
                },
                "Color": {"kind": "enumeration", "name": "Color", "options": ["red", "green"]},
                "Slug": {"kind": "pattern", "name": "Slug", "of": {"kind": "string"}, "regex": "^[a-z-]+$"}
            }
        }))
        .unwrap()
    }

    #[test]
    fn recursive_library() {
        let compiled = library().compile(&EngineConfig::default()).unwrap();
        let node = compiled.require("Node").unwrap();
        assert!(node.is(&json!({"id": "a", "children": [{"id": "b", "children": []}], "next": "b"})));
        assert!(!node.is(&json!({"id": "a", "children": [{"children": []}]})));
        assert!(!node.is(&json!({"id": "a", "extra": 1})));

        let tree = node.create(&json!({"id": "a", "children": [{"id": "b"}], "next": "b"})).unwrap();
        let next = tree.resolve_path(tree.root(), "next").unwrap();
        let b = tree.resolve_path(tree.root(), "children/0").unwrap();
        assert_eq!(tree.resolve(next).unwrap(), b);
    }

    #[test]
    fn ignore_policy_from_config() {
        let config = EngineConfig {
            unknown_properties: UnknownProperties::Ignore,
            ..EngineConfig::default()
        };
        let compiled = library().compile(&config).unwrap();
        assert!(compiled.require("Node").unwrap().is(&json!({"id": "a", "extra": 1})));
    }

    #[test]
    fn leaf_declarations() {
        let compiled = library().compile(&EngineConfig::default()).unwrap();
        assert!(compiled.require("Color").unwrap().is(&json!("red")));
        assert!(!compiled.require("Color").unwrap().is(&json!("blue")));
        assert!(compiled.require("Slug").unwrap().is(&json!("a-b")));
        assert!(!compiled.require("Slug").unwrap().is(&json!("A B")));
        assert!(compiled.require("Nope").is_err());
    }

    #[test]
    fn undeclared_ref_is_reported() {
        let library: TypeLibrary = crate::path_de::from_value(json!({
            "types": {"A": {"kind": "array", "of": {"kind": "ref", "name": "B"}}}
        }))
        .unwrap();
        let err = library.compile(&EngineConfig::default()).unwrap_err();
        assert!(err.to_string().contains("undeclared type `B`"), "{err}");
    }

    #[test]
    fn bad_kind_reports_its_path() {
        let err = crate::path_de::from_value::<TypeLibrary>(json!({
            "types": {"A": {"kind": "array", "of": {"kind": "strnig"}}}
        }))
        .unwrap_err();
        let EngineError::Decode { path, .. } = &err else {
            panic!("unexpected error {err}");
        };
        assert!(path.starts_with("types.A"), "{path}");
    }

    #[test]
    fn missing_library_file_is_an_io_error() {
        let missing = std::env::temp_dir().join("json-state-tree-missing-types.json");
        let err = TypeLibrary::load(&missing).unwrap_err();
        assert!(matches!(err, EngineError::Io(_)), "{err}");
    }
}
