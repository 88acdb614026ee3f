use super::NodeId;
use crate::observable::{BoxHandle, Subscription};
use crate::types::Type;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::Cell;
use std::fmt;

/// Where a node is in its life.
///
/// `Creating -> Alive -> (Detaching ->) Dead`. A detached node may go back to
/// `Alive` by being attached again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Under construction, not visible to listeners yet.
    Creating,
    /// Attached, readable and mutable.
    Alive,
    /// Removed from its parent and waiting to be attached elsewhere.
    /// Readable, not mutable.
    Detaching,
    /// Disposed. Every access fails.
    Dead,
}

impl LifecycleState {
    #[inline]
    pub fn is_readable(self) -> bool {
        matches!(self, LifecycleState::Alive | LifecycleState::Detaching)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LifecycleState::Creating => "creating",
            LifecycleState::Alive => "alive",
            LifecycleState::Detaching => "detaching",
            LifecycleState::Dead => "dead",
        })
    }
}

/// Last successful resolution of a reference.
#[derive(Clone, Copy, Debug)]
pub(crate) struct CachedTarget {
    pub(crate) version: u64,
    pub(crate) target: NodeId,
}

pub(crate) enum Storage {
    Scalar(Value),
    Reference {
        key: Value,
        cache: Cell<Option<CachedTarget>>,
    },
    Model(IndexMap<String, NodeId>),
    Array(Vec<NodeId>),
    Map(IndexMap<String, NodeId>),
}

impl Storage {
    #[inline]
    pub(crate) fn reference(key: Value) -> Self {
        Storage::Reference {
            key,
            cache: Cell::new(None),
        }
    }

    pub(crate) fn children(&self) -> Vec<NodeId> {
        match self {
            Storage::Scalar(_) | Storage::Reference { .. } => Vec::new(),
            Storage::Model(children) | Storage::Map(children) => children.values().copied().collect(),
            Storage::Array(items) => items.clone(),
        }
    }

    /// Arrays and maps are identifier scopes for their descendants.
    #[inline]
    pub(crate) fn is_collection(&self) -> bool {
        matches!(self, Storage::Array(_) | Storage::Map(_))
    }

    pub(crate) fn scalar(&self) -> Option<&Value> {
        match self {
            Storage::Scalar(value) => Some(value),
            Storage::Reference { key, .. } => Some(key),
            _ => None,
        }
    }
}

pub(crate) struct NodeData {
    /// The concrete type that built the node.
    pub(crate) ty: Type,
    /// The type declared at the node's position (may be a union or optional
    /// wrapping `ty`).
    pub(crate) declared: Type,
    pub(crate) parent: Option<NodeId>,
    pub(crate) subpath: String,
    pub(crate) state: LifecycleState,
    pub(crate) storage: Storage,
    pub(crate) identifier: Option<String>,
    /// The scope whose index holds this node's identifier.
    pub(crate) registered_in: Option<NodeId>,
    pub(crate) observable: Option<BoxHandle>,
    pub(crate) subscription: Option<Subscription>,
}
