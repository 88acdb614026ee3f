//! Engine configuration.
//!
//! [`EngineConfig`] is the serializable part (loaded by the CLI from a JSON
//! file); [`TreeOptions`] adds the runtime collaborators a tree is built with.

use crate::environment::Environment;
use crate::error::EngineResult;
use crate::observable::ReactiveSubstrate;
use crate::types::UnknownProperties;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Serializable engine settings. Every field has a default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct EngineConfig {
    /// Reject fine-grained mutations made outside of an action.
    pub protected: bool,
    /// Policy for models compiled from declarations that do not set their own.
    pub unknown_properties: UnknownProperties,
    /// Roll back a whole patch batch when one patch fails.
    pub atomic_patches: bool,
}

impl EngineConfig {
    /// Load from a JSON file, reporting the path of a bad field.
    pub fn load(path: &Path) -> EngineResult<Self> {
        let source = std::fs::read_to_string(path)?;
        crate::path_de::from_str(&source)
    }
}

/// How a tree is built.
#[derive(Default)]
pub struct TreeOptions {
    /// Shared with every node of the tree, see [`crate::Tree::env`].
    pub environment: Option<Environment>,
    pub protected: bool,
    pub atomic_patches: bool,
    /// Backing store for scalar values. Defaults to [`crate::MemorySubstrate`].
    pub substrate: Option<Box<dyn ReactiveSubstrate>>,
}

impl TreeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn protected(mut self, protected: bool) -> Self {
        self.protected = protected;
        self
    }

    pub fn atomic_patches(mut self, atomic: bool) -> Self {
        self.atomic_patches = atomic;
        self
    }

    pub fn substrate(mut self, substrate: Box<dyn ReactiveSubstrate>) -> Self {
        self.substrate = Some(substrate);
        self
    }
}

impl From<&EngineConfig> for TreeOptions {
    fn from(config: &EngineConfig) -> Self {
        TreeOptions {
            protected: config.protected,
            atomic_patches: config.atomic_patches,
            ..TreeOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"protected": true}"#).unwrap();
        assert!(config.protected);
        assert!(!config.atomic_patches);
        assert_eq!(config.unknown_properties, UnknownProperties::Reject);

        let config: EngineConfig = serde_json::from_str(r#"{"unknown_properties": "ignore"}"#).unwrap();
        assert_eq!(config.unknown_properties, UnknownProperties::Ignore);
    }

    #[test]
    fn options_follow_config() {
        let options = TreeOptions::from(&EngineConfig {
            protected: true,
            atomic_patches: true,
            ..EngineConfig::default()
        });
        assert!(options.protected && options.atomic_patches);
        assert!(options.environment.is_none());
    }

    #[test]
    fn unreadable_files_are_io_errors() {
        let missing = std::env::temp_dir().join("json-state-tree-missing-config.json");
        let err = EngineConfig::load(&missing).unwrap_err();
        let crate::EngineError::Io(inner) = &err else {
            panic!("unexpected error {err}");
        };
        assert_eq!(inner.kind(), std::io::ErrorKind::NotFound);
    }
}
