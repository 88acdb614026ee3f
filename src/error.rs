//! Error types for engine operations.

use crate::tree::{LifecycleState, NodeId};
use crate::validation::ValidationFailure;
use thiserror::Error;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while validating, mutating or reading a tree.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A value does not satisfy the declared type. Carries every offending path.
    #[error(transparent)]
    Validation(#[from] ValidationFailure),

    /// An operation was attempted on a node that is dead or being detached.
    #[error("cannot {operation} node {node}: the node is {state}")]
    Lifecycle {
        /// The attempted operation.
        operation: &'static str,
        /// The node the operation targeted.
        node: NodeId,
        /// The state the node was found in.
        state: LifecycleState,
    },

    /// A reference key could not be resolved to exactly one live node.
    #[error("failed to resolve reference `{identifier}` to type `{target}` at `{path}`: {reason}")]
    ReferenceResolution {
        /// The normalized identifier that was looked up.
        identifier: String,
        /// Name of the referenced type.
        target: String,
        /// Path of the reference node.
        path: String,
        /// Why resolution failed.
        reason: String,
    },

    /// Programmer error: the engine was asked to do something its contract forbids.
    #[error("invariant violation: {0}")]
    Invariant(String),

    /// A path (from a patch, an action call or a lookup) does not address a node.
    #[error("invalid path `{path}`: {reason}")]
    InvalidPath {
        /// The offending path.
        path: String,
        /// Why it could not be used.
        reason: String,
    },

    /// A fine-grained mutation was attempted on a protected tree outside an action.
    #[error("cannot modify `{path}`: the tree is protected and no action is running")]
    Protected {
        /// Path of the node that would have been modified.
        path: String,
    },

    /// The model type of the target node has no action with this name.
    #[error("type `{ty}` has no action named `{name}`")]
    UnknownAction {
        /// The requested action name.
        name: String,
        /// Name of the node's type.
        ty: String,
    },

    /// An action body failed with a domain error.
    #[error("action `{name}` failed: {message}")]
    Action {
        /// The action name.
        name: String,
        /// The failure message.
        message: String,
    },

    /// A JSON document is not well-formed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A declaration, config or patch file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A declaration or patch file could not be decoded.
    #[error("at JSON path {path} → {message}")]
    Decode {
        /// Path of the offending field.
        path: String,
        /// What the decoder said.
        message: String,
    },
}

impl EngineError {
    /// Create an invariant violation.
    #[inline]
    pub fn invariant(message: impl Into<String>) -> Self {
        EngineError::Invariant(message.into())
    }

    /// Create an invalid path error.
    #[inline]
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a domain failure for use inside action bodies.
    #[inline]
    pub fn action(name: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Action {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Returns the validation failure if this is a validation error.
    pub fn as_validation(&self) -> Option<&ValidationFailure> {
        match self {
            EngineError::Validation(failure) => Some(failure),
            _ => None,
        }
    }

    /// Returns true if this error was caused by a dead or detaching node.
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, EngineError::Lifecycle { .. })
    }
}

/// Get the JSON kind name of a value, used in messages.
#[inline]
pub fn value_kind(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
