//! The live node tree.
//!
//! A [`Tree`] owns every node in a generational arena and hands out
//! [`NodeId`] handles. Parent links and children lists are ids, never owning
//! pointers; references between nodes are identifier keys resolved on read.
//!
//! Structural primitives here (allocate, finalize, replace, insert, remove,
//! move) each perform one mutation and emit exactly one patch for it after it
//! took effect. The validated public operations built on them live in
//! `mutate.rs`.

mod arena;
mod events;
mod identifiers;
mod mutate;
mod node;

pub use arena::NodeId;
pub use events::ListenerId;
pub use mutate::ApplyOutcome;
pub use node::LifecycleState;

pub(crate) use events::Listener;
pub(crate) use identifiers::IdentifierIndex;
pub(crate) use node::{CachedTarget, NodeData, Storage};

use crate::action::{FlowState, RunningCall};
use crate::config::TreeOptions;
use crate::environment::Environment;
use crate::error::{EngineError, EngineResult};
use crate::observable::{BoxHandle, ExternalChanges, MemorySubstrate, ReactiveSubstrate};
use crate::patch::Patch;
use crate::path::Path;
use crate::recorder::ActiveRecorder;
use crate::types::{Type, TypeFlag, millis_to_datetime};
use crate::validation::{Context, ContextEntry};
use arena::Arena;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::any::Any;
use tracing::debug;

/// A tree of typed nodes plus everything observing it.
pub struct Tree {
    arena: Arena<NodeData>,
    root: NodeId,
    environment: Option<Environment>,
    pub(crate) protected: bool,
    pub(crate) atomic_patches: bool,
    substrate: Box<dyn ReactiveSubstrate>,
    external: ExternalChanges,
    pub(crate) scopes: IndexMap<NodeId, IdentifierIndex>,
    pub(crate) identifier_version: u64,
    pub(crate) listeners: Vec<Listener>,
    pub(crate) next_listener: u64,
    pub(crate) recorders: IndexMap<u64, ActiveRecorder>,
    pub(crate) next_recorder: u64,
    pub(crate) calls: Vec<RunningCall>,
    pub(crate) flows: IndexMap<u64, FlowState>,
    pub(crate) next_call: u64,
    pub(crate) depth: usize,
    pub(crate) system_depth: usize,
    pub(crate) atomic_frames: Vec<Vec<(NodeId, Patch)>>,
}

impl Tree {
    fn empty(options: TreeOptions) -> Self {
        Tree {
            arena: Arena::default(),
            root: NodeId::PLACEHOLDER,
            environment: options.environment,
            protected: options.protected,
            atomic_patches: options.atomic_patches,
            substrate: options
                .substrate
                .unwrap_or_else(|| Box::new(MemorySubstrate::new())),
            external: ExternalChanges::default(),
            scopes: IndexMap::new(),
            identifier_version: 0,
            listeners: Vec::new(),
            next_listener: 0,
            recorders: IndexMap::new(),
            next_recorder: 0,
            calls: Vec::new(),
            flows: IndexMap::new(),
            next_call: 1,
            depth: 0,
            system_depth: 0,
            atomic_frames: Vec::new(),
        }
    }

    /// Validate `snapshot` against `ty` and build a tree from it.
    pub fn create_root(ty: &Type, snapshot: &Value, environment: Option<Environment>) -> EngineResult<Tree> {
        Tree::with_options(
            ty,
            snapshot,
            TreeOptions {
                environment,
                ..TreeOptions::default()
            },
        )
    }

    /// Like [`Tree::create_root`] with explicit options.
    pub fn with_options(ty: &Type, snapshot: &Value, options: TreeOptions) -> EngineResult<Tree> {
        ty.validate(snapshot).into_result(ty, snapshot)?;
        let mut tree = Tree::empty(options);
        tree.root = tree.build(ty, None, "", snapshot)?;
        debug!(ty = ty.name(), nodes = tree.arena.len(), "tree created");
        Ok(tree)
    }

    /// A new, independent tree with the snapshot of `node`.
    pub fn clone_subtree(&self, node: NodeId) -> EngineResult<Tree> {
        let declared = self.ensure_readable(node, "clone")?.declared.clone();
        let snapshot = self.snapshot(node)?;
        Tree::with_options(
            &declared,
            &snapshot,
            TreeOptions {
                environment: self.environment.clone(),
                protected: self.protected,
                atomic_patches: self.atomic_patches,
                substrate: None,
            },
        )
    }

    // ————————————————————————————————————————————————————————————————————————
    // READS
    // ————————————————————————————————————————————————————————————————————————

    /// The root node.
    #[inline]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of nodes currently held, attached or detached.
    #[inline]
    pub fn node_count(&self) -> usize {
        self.arena.len()
    }

    /// Lifecycle state. Destroyed (or unknown) ids report `Dead`.
    pub fn state(&self, node: NodeId) -> LifecycleState {
        self.arena
            .get(node)
            .map(|data| data.state)
            .unwrap_or(LifecycleState::Dead)
    }

    #[inline]
    pub fn is_alive(&self, node: NodeId) -> bool {
        self.state(node) == LifecycleState::Alive
    }

    /// The concrete type that built the node.
    pub fn type_of(&self, node: NodeId) -> EngineResult<Type> {
        Ok(self.ensure_readable(node, "read the type of")?.ty.clone())
    }

    /// The type declared at the node's position.
    pub fn declared_type(&self, node: NodeId) -> EngineResult<Type> {
        Ok(self.ensure_readable(node, "read the type of")?.declared.clone())
    }

    pub fn parent(&self, node: NodeId) -> EngineResult<Option<NodeId>> {
        Ok(self.ensure_readable(node, "read the parent of")?.parent)
    }

    /// The topmost ancestor (the node itself for roots and detached nodes).
    pub fn root_of(&self, node: NodeId) -> EngineResult<NodeId> {
        let mut current = node;
        while let Some(parent) = self.ensure_readable(current, "read the root of")?.parent {
            current = parent;
        }
        Ok(current)
    }

    pub fn subpath(&self, node: NodeId) -> EngineResult<&str> {
        Ok(&self.ensure_readable(node, "read the subpath of")?.subpath)
    }

    /// Path from the node's root.
    pub fn path(&self, node: NodeId) -> EngineResult<Path> {
        let mut segments = Vec::new();
        let mut current = node;
        loop {
            let data = self.node(current)?;
            match data.parent {
                Some(parent) => {
                    segments.push(data.subpath.clone());
                    current = parent;
                }
                None => break,
            }
        }
        segments.reverse();
        Ok(Path::from_segments(segments))
    }

    pub(crate) fn path_string(&self, node: NodeId) -> String {
        self.path(node).map(|path| path.to_string()).unwrap_or_default()
    }

    /// Direct children in storage order.
    pub fn children(&self, node: NodeId) -> EngineResult<Vec<NodeId>> {
        Ok(self.ensure_readable(node, "read the children of")?.storage.children())
    }

    /// The child under `key` (property name, array index or map key).
    pub fn child(&self, node: NodeId, key: &str) -> EngineResult<Option<NodeId>> {
        Ok(match &self.ensure_readable(node, "read a child of")?.storage {
            Storage::Model(children) | Storage::Map(children) => children.get(key).copied(),
            Storage::Array(items) => key.parse::<usize>().ok().and_then(|index| items.get(index).copied()),
            Storage::Scalar(_) | Storage::Reference { .. } => None,
        })
    }

    /// The plain-data form of the subtree.
    pub fn snapshot(&self, node: NodeId) -> EngineResult<Value> {
        self.ensure_readable(node, "take a snapshot of")?;
        self.snapshot_of(node)
    }

    pub(crate) fn snapshot_of(&self, node: NodeId) -> EngineResult<Value> {
        Ok(match &self.node(node)?.storage {
            Storage::Scalar(value) => value.clone(),
            Storage::Reference { key, .. } => key.clone(),
            Storage::Model(children) | Storage::Map(children) => {
                let mut object = Map::with_capacity(children.len());
                for (key, child) in children {
                    object.insert(key.clone(), self.snapshot_of(*child)?);
                }
                Value::Object(object)
            }
            Storage::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.snapshot_of(*item))
                    .collect::<EngineResult<Vec<_>>>()?,
            ),
        })
    }

    /// The stored value of a scalar node (a reference yields its key).
    pub fn value(&self, node: NodeId) -> EngineResult<&Value> {
        let data = self.ensure_readable(node, "read the value of")?;
        data.storage.scalar().ok_or_else(|| {
            EngineError::invariant(format!(
                "node at `{}` of type `{}` is not a scalar",
                self.path_string(node),
                data.ty.name()
            ))
        })
    }

    /// The value of a date node.
    pub fn date(&self, node: NodeId) -> EngineResult<DateTime<Utc>> {
        let data = self.ensure_readable(node, "read the value of")?;
        if data.ty.flag() != TypeFlag::Date {
            return Err(EngineError::invariant(format!(
                "node at `{}` of type `{}` is not a date",
                self.path_string(node),
                data.ty.name()
            )));
        }
        self.value(node)?
            .as_i64()
            .and_then(millis_to_datetime)
            .ok_or_else(|| EngineError::invariant("date node holds an out of range timestamp"))
    }

    /// The node's normalized identifier, if its model declares one.
    pub fn identifier(&self, node: NodeId) -> EngineResult<Option<&str>> {
        Ok(self.ensure_readable(node, "read the identifier of")?.identifier.as_deref())
    }

    /// Follow child keys from `base`, without `.` or `..`.
    pub(crate) fn descend(&self, base: NodeId, segments: &[String], full_path: &str) -> EngineResult<NodeId> {
        let mut current = base;
        for segment in segments {
            current = self
                .child(current, segment)?
                .ok_or_else(|| EngineError::invalid_path(full_path, format!("no child `{segment}`")))?;
        }
        Ok(current)
    }

    /// Walk a path from `from`.
    ///
    /// A leading `/` starts at the root of `from`; `.` stays, `..` goes up.
    pub fn resolve_path(&self, from: NodeId, path: &str) -> EngineResult<NodeId> {
        let mut current = if path.starts_with('/') { self.root_of(from)? } else { from };
        self.ensure_readable(current, "resolve a path from")?;
        for segment in crate::path::split_path(path) {
            current = match segment.as_str() {
                "." => current,
                ".." => self
                    .node(current)?
                    .parent
                    .ok_or_else(|| EngineError::invalid_path(path, "`..` above the root"))?,
                key => self
                    .child(current, key)?
                    .ok_or_else(|| EngineError::invalid_path(path, format!("no child `{key}`")))?,
            };
        }
        Ok(current)
    }

    /// The tree's environment as `T`.
    pub fn env<T: Any>(&self, node: NodeId) -> EngineResult<Option<&T>> {
        self.ensure_readable(node, "read the environment of")?;
        Ok(self.environment.as_ref().and_then(Environment::get::<T>))
    }

    /// The substrate box mirroring a scalar node.
    pub fn observable(&self, node: NodeId) -> EngineResult<Option<BoxHandle>> {
        Ok(self.ensure_readable(node, "observe")?.observable)
    }

    pub fn substrate(&self) -> &dyn ReactiveSubstrate {
        self.substrate.as_ref()
    }

    pub fn substrate_mut(&mut self) -> &mut dyn ReactiveSubstrate {
        self.substrate.as_mut()
    }

    /// Nodes whose boxes were written through the substrate since the last
    /// [`Tree::sync_external_changes`], oldest first.
    pub fn pending_external(&self) -> Vec<NodeId> {
        self.external.pending()
    }

    /// Write a box on behalf of the engine, without marking its node.
    pub(crate) fn write_box(&mut self, handle: BoxHandle, value: Value) {
        let substrate = &mut self.substrate;
        self.external.muted(|| substrate.set(handle, value));
    }

    pub(crate) fn forget_external(&self, node: NodeId) {
        self.external.forget(node);
    }

    /// True when the tree rejects fine-grained mutations outside actions.
    #[inline]
    pub fn is_protected(&self) -> bool {
        self.protected
    }

    pub fn set_protected(&mut self, protected: bool) {
        self.protected = protected;
    }

    // ————————————————————————————————————————————————————————————————————————
    // ACCESS CHECKS
    // ————————————————————————————————————————————————————————————————————————

    pub(crate) fn node(&self, node: NodeId) -> EngineResult<&NodeData> {
        self.arena.get(node).ok_or(EngineError::Lifecycle {
            operation: "access",
            node,
            state: LifecycleState::Dead,
        })
    }

    pub(crate) fn node_mut(&mut self, node: NodeId) -> EngineResult<&mut NodeData> {
        self.arena.get_mut(node).ok_or(EngineError::Lifecycle {
            operation: "access",
            node,
            state: LifecycleState::Dead,
        })
    }

    pub(crate) fn ensure_readable(&self, node: NodeId, operation: &'static str) -> EngineResult<&NodeData> {
        let data = self.arena.get(node).ok_or(EngineError::Lifecycle {
            operation,
            node,
            state: LifecycleState::Dead,
        })?;
        if !data.state.is_readable() {
            return Err(EngineError::Lifecycle {
                operation,
                node,
                state: data.state,
            });
        }
        Ok(data)
    }

    pub(crate) fn ensure_mutable(&self, node: NodeId, operation: &'static str) -> EngineResult<&NodeData> {
        let data = self.ensure_readable(node, operation)?;
        if data.state != LifecycleState::Alive {
            return Err(EngineError::Lifecycle {
                operation,
                node,
                state: data.state,
            });
        }
        Ok(data)
    }

    /// Mutable, and either unprotected or inside an action.
    pub(crate) fn ensure_writable(&self, node: NodeId, operation: &'static str) -> EngineResult<()> {
        self.ensure_mutable(node, operation)?;
        if self.protected && self.calls.is_empty() && self.system_depth == 0 {
            return Err(EngineError::Protected {
                path: self.path_string(node),
            });
        }
        Ok(())
    }

    /// The validation frames leading from the root to `node`.
    pub(crate) fn context_for(&self, node: NodeId) -> EngineResult<Context> {
        let mut entries = Vec::new();
        let mut current = Some(node);
        while let Some(id) = current {
            let data = self.node(id)?;
            entries.push(ContextEntry {
                path: if data.parent.is_some() { data.subpath.clone() } else { String::new() },
                ty: data.declared.clone(),
            });
            current = data.parent;
        }
        entries.reverse();
        Ok(Context::from_entries(entries))
    }

    /// Validate `value` for the position `node` occupies.
    pub(crate) fn validate_at(&self, node: NodeId, value: &Value) -> EngineResult<()> {
        let declared = self.node(node)?.declared.clone();
        let context = self.context_for(node)?;
        declared
            .is_valid_snapshot(value, &context)
            .into_result(&declared, value)?;
        Ok(())
    }

    /// Pre-order list of the subtree's nodes.
    pub(crate) fn subtree(&self, node: NodeId) -> EngineResult<Vec<NodeId>> {
        let mut out = Vec::new();
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            out.push(id);
            let children = self.node(id)?.storage.children();
            stack.extend(children.into_iter().rev());
        }
        Ok(out)
    }

    pub(crate) fn set_subtree_state(&mut self, node: NodeId, state: LifecycleState) -> EngineResult<()> {
        for id in self.subtree(node)? {
            self.node_mut(id)?.state = state;
        }
        Ok(())
    }

    // ————————————————————————————————————————————————————————————————————————
    // CONSTRUCTION
    // ————————————————————————————————————————————————————————————————————————

    /// Allocate one node in `Creating` state.
    pub(crate) fn alloc(
        &mut self,
        ty: &Type,
        parent: Option<NodeId>,
        subpath: &str,
        storage: Storage,
        identifier: Option<String>,
    ) -> NodeId {
        let initial = storage.scalar().cloned();
        let id = self.arena.insert(NodeData {
            ty: ty.clone(),
            declared: ty.clone(),
            parent,
            subpath: subpath.to_owned(),
            state: LifecycleState::Creating,
            storage,
            identifier,
            registered_in: None,
            observable: None,
            subscription: None,
        });
        if let Some(initial) = initial {
            let handle = self.substrate.make_observable(initial);
            let subscription = self.substrate.observe(handle, self.external.listener(id));
            if let Some(data) = self.arena.get_mut(id) {
                data.observable = Some(handle);
                data.subscription = Some(subscription);
            }
        }
        id
    }

    pub(crate) fn set_storage(&mut self, node: NodeId, storage: Storage) -> EngineResult<()> {
        self.node_mut(node)?.storage = storage;
        Ok(())
    }

    /// Instantiate a validated value for a position declared as `declared`.
    /// The new nodes stay in `Creating` state.
    pub(crate) fn instantiate_child(
        &mut self,
        declared: &Type,
        parent: Option<NodeId>,
        subpath: &str,
        value: &Value,
    ) -> EngineResult<NodeId> {
        let node = declared.instantiate(self, parent, subpath, value)?;
        self.node_mut(node)?.declared = declared.clone();
        Ok(node)
    }

    /// Instantiate and finalize.
    pub(crate) fn build(
        &mut self,
        declared: &Type,
        parent: Option<NodeId>,
        subpath: &str,
        value: &Value,
    ) -> EngineResult<NodeId> {
        let node = self.instantiate_child(declared, parent, subpath, value)?;
        self.finalize(node)?;
        Ok(node)
    }

    /// Promote a freshly built subtree to `Alive` and register its identifiers.
    pub(crate) fn finalize(&mut self, node: NodeId) -> EngineResult<()> {
        for id in self.subtree(node)? {
            self.node_mut(id)?.state = LifecycleState::Alive;
            self.register_identifier(id)?;
        }
        Ok(())
    }

    /// Dispose a subtree, children first. Emits nothing; observers of the
    /// disposed nodes are dropped when the operation ends.
    pub(crate) fn destroy_subtree(&mut self, node: NodeId) -> EngineResult<()> {
        let mut nodes = self.subtree(node)?;
        nodes.reverse();
        for id in nodes {
            self.unregister_identifier(id)?;
            self.scopes.shift_remove(&id);
            self.external.forget(id);
            let Some(data) = self.arena.remove(id) else {
                continue;
            };
            if let Some(subscription) = data.subscription {
                self.substrate.unobserve(subscription);
            }
            if let Some(handle) = data.observable {
                self.substrate.dispose(handle);
            }
        }
        self.identifier_version += 1;
        Ok(())
    }

    // ————————————————————————————————————————————————————————————————————————
    // STRUCTURAL PRIMITIVES
    // ————————————————————————————————————————————————————————————————————————

    /// Reconcile against a concrete type: merge in place when the node was
    /// built by the same type and keeps its identity, else replace it.
    pub(crate) fn reconcile_concrete(&mut self, concrete: &Type, existing: NodeId, value: &Value) -> EngineResult<NodeId> {
        let data = self.ensure_mutable(existing, "reconcile")?;
        if data.ty.same(concrete) && concrete.can_update_in_place(data, value) {
            concrete.update_in_place(self, existing, value)?;
            Ok(existing)
        } else {
            self.replace_node(existing, concrete, value)
        }
    }

    /// Swap `existing` for a node freshly built from `value`.
    pub(crate) fn replace_node(&mut self, existing: NodeId, concrete: &Type, value: &Value) -> EngineResult<NodeId> {
        let data = self.node(existing)?;
        let parent = data.parent;
        let subpath = data.subpath.clone();
        let declared = data.declared.clone();
        let previous_type = data.ty.name().to_owned();
        let old_snapshot = self.snapshot_of(existing)?;

        self.destroy_subtree(existing)?;
        let node = concrete.instantiate(self, parent, &subpath, value)?;
        self.node_mut(node)?.declared = declared;
        match parent {
            Some(parent) => self.replace_child_slot(parent, &subpath, existing, node)?,
            None if self.root == existing => self.root = node,
            None => {}
        }
        self.finalize(node)?;
        self.rebind_observers(existing, node);
        debug!(
            path = %self.path_string(node),
            from = previous_type,
            to = concrete.name(),
            "node replaced"
        );

        let path = self.path(node)?.to_string();
        let new_snapshot = self.snapshot_of(node)?;
        self.emit(node, Patch::replace(path, new_snapshot, old_snapshot));
        Ok(node)
    }

    fn replace_child_slot(&mut self, parent: NodeId, subpath: &str, old: NodeId, new: NodeId) -> EngineResult<()> {
        match &mut self.node_mut(parent)?.storage {
            Storage::Model(children) | Storage::Map(children) => {
                if let Some(slot) = children.get_mut(subpath) {
                    *slot = new;
                }
            }
            Storage::Array(items) => {
                if let Some(slot) = items.iter_mut().find(|item| **item == old) {
                    *slot = new;
                }
            }
            Storage::Scalar(_) | Storage::Reference { .. } => {
                return Err(EngineError::invariant("scalar nodes have no children"));
            }
        }
        Ok(())
    }

    /// Overwrite a scalar value.
    pub(crate) fn update_scalar(&mut self, node: NodeId, value: Value) -> EngineResult<()> {
        let data = self.node_mut(node)?;
        let Storage::Scalar(current) = &mut data.storage else {
            return Err(EngineError::invariant("update_scalar on a composite node"));
        };
        if *current == value {
            return Ok(());
        }
        let old = std::mem::replace(current, value.clone());
        let handle = data.observable;
        if let Some(handle) = handle {
            self.write_box(handle, value.clone());
        }
        let path = self.path(node)?.to_string();
        self.emit(node, Patch::replace(path, value, old));
        Ok(())
    }

    /// Point a reference at another key.
    pub(crate) fn update_reference(&mut self, node: NodeId, key: Value) -> EngineResult<()> {
        let data = self.node_mut(node)?;
        let Storage::Reference { key: current, cache } = &mut data.storage else {
            return Err(EngineError::invariant("update_reference on a non-reference node"));
        };
        if *current == key {
            return Ok(());
        }
        let old = std::mem::replace(current, key.clone());
        cache.set(None);
        let handle = data.observable;
        if let Some(handle) = handle {
            self.write_box(handle, key.clone());
        }
        let path = self.path(node)?.to_string();
        self.emit(node, Patch::replace(path, key, old));
        Ok(())
    }

    pub(crate) fn model_child(&self, model: NodeId, key: &str) -> EngineResult<NodeId> {
        match &self.node(model)?.storage {
            Storage::Model(children) => children.get(key).copied().ok_or_else(|| {
                EngineError::invalid_path(
                    Path::from(self.path_string(model).as_str()).key(key).to_string(),
                    "no such property",
                )
            }),
            _ => Err(EngineError::invariant(format!(
                "node at `{}` is not a model",
                self.path_string(model)
            ))),
        }
    }

    pub(crate) fn array_items(&self, array: NodeId) -> EngineResult<Vec<NodeId>> {
        match &self.node(array)?.storage {
            Storage::Array(items) => Ok(items.clone()),
            _ => Err(EngineError::invariant(format!(
                "node at `{}` is not an array",
                self.path_string(array)
            ))),
        }
    }

    fn array_storage_mut(&mut self, array: NodeId) -> EngineResult<&mut Vec<NodeId>> {
        match &mut self.node_mut(array)?.storage {
            Storage::Array(items) => Ok(items),
            _ => Err(EngineError::invariant("node is not an array")),
        }
    }

    /// Rewrite item subpaths to their current indexes.
    fn renumber(&mut self, array: NodeId) -> EngineResult<()> {
        for (index, item) in self.array_items(array)?.into_iter().enumerate() {
            let subpath = index.to_string();
            let data = self.node_mut(item)?;
            if data.subpath != subpath {
                data.subpath = subpath;
            }
        }
        Ok(())
    }

    /// Remove and dispose the item at `index`, returning its last snapshot.
    pub(crate) fn array_remove_at(&mut self, array: NodeId, index: usize) -> EngineResult<Value> {
        let item = self.take_array_item(array, index)?;
        let old = self.snapshot_of(item)?;
        self.destroy_subtree(item)?;
        let path = self.path(array)?.index(index).to_string();
        self.emit(array, Patch::remove(path, old.clone()));
        Ok(old)
    }

    fn take_array_item(&mut self, array: NodeId, index: usize) -> EngineResult<NodeId> {
        let items = self.array_storage_mut(array)?;
        if index >= items.len() {
            let len = items.len();
            return Err(EngineError::invalid_path(
                self.path(array)?.index(index).to_string(),
                format!("index {index} out of bounds for length {len}"),
            ));
        }
        let item = items.remove(index);
        self.renumber(array)?;
        Ok(item)
    }

    /// Build a node for `value` and insert it at `index`.
    pub(crate) fn array_insert_value(
        &mut self,
        array: NodeId,
        index: usize,
        element: &Type,
        value: &Value,
    ) -> EngineResult<NodeId> {
        let item = self.instantiate_child(element, Some(array), &index.to_string(), value)?;
        self.put_array_item(array, index, item)?;
        self.finalize(item)?;
        let path = self.path(item)?.to_string();
        let snapshot = self.snapshot_of(item)?;
        self.emit(array, Patch::add(path, snapshot));
        Ok(item)
    }

    fn put_array_item(&mut self, array: NodeId, index: usize, item: NodeId) -> EngineResult<()> {
        let items = self.array_storage_mut(array)?;
        if index > items.len() {
            let len = items.len();
            return Err(EngineError::invalid_path(
                self.path(array)?.index(index).to_string(),
                format!("index {index} out of bounds for length {len}"),
            ));
        }
        items.insert(index, item);
        self.node_mut(item)?.parent = Some(array);
        self.renumber(array)
    }

    /// Move an item without disposing it: a remove patch at `from` followed
    /// by an add patch at `to`.
    pub(crate) fn array_move(&mut self, array: NodeId, from: usize, to: usize) -> EngineResult<()> {
        let item = self.take_array_item(array, from)?;
        let snapshot = self.snapshot_of(item)?;
        self.set_subtree_state(item, LifecycleState::Detaching)?;
        let from_path = self.path(array)?.index(from).to_string();
        self.emit(array, Patch::remove(from_path, snapshot.clone()));

        self.put_array_item(array, to, item)?;
        self.set_subtree_state(item, LifecycleState::Alive)?;
        let to_path = self.path(item)?.to_string();
        self.emit(array, Patch::add(to_path, snapshot));
        Ok(())
    }

    pub(crate) fn map_child(&self, map: NodeId, key: &str) -> EngineResult<Option<NodeId>> {
        match &self.node(map)?.storage {
            Storage::Map(entries) => Ok(entries.get(key).copied()),
            _ => Err(EngineError::invariant(format!(
                "node at `{}` is not a map",
                self.path_string(map)
            ))),
        }
    }

    pub(crate) fn map_entries(&self, map: NodeId) -> EngineResult<Vec<(String, NodeId)>> {
        match &self.node(map)?.storage {
            Storage::Map(entries) => Ok(entries.iter().map(|(k, v)| (k.clone(), *v)).collect()),
            _ => Err(EngineError::invariant(format!(
                "node at `{}` is not a map",
                self.path_string(map)
            ))),
        }
    }

    fn map_storage_mut(&mut self, map: NodeId) -> EngineResult<&mut IndexMap<String, NodeId>> {
        match &mut self.node_mut(map)?.storage {
            Storage::Map(entries) => Ok(entries),
            _ => Err(EngineError::invariant("node is not a map")),
        }
    }

    /// Remove and dispose the entry under `key`.
    pub(crate) fn map_remove_key(&mut self, map: NodeId, key: &str) -> EngineResult<Option<Value>> {
        let Some(entry) = self.map_storage_mut(map)?.shift_remove(key) else {
            return Ok(None);
        };
        let old = self.snapshot_of(entry)?;
        self.destroy_subtree(entry)?;
        let path = self.path(map)?.key(key).to_string();
        self.emit(map, Patch::remove(path, old.clone()));
        Ok(Some(old))
    }

    /// Build a node for `value` and add it under `key`.
    pub(crate) fn map_insert_value(&mut self, map: NodeId, key: &str, ty: &Type, value: &Value) -> EngineResult<NodeId> {
        let entry = self.instantiate_child(ty, Some(map), key, value)?;
        self.map_storage_mut(map)?.insert(key.to_owned(), entry);
        self.finalize(entry)?;
        let path = self.path(entry)?.to_string();
        let snapshot = self.snapshot_of(entry)?;
        self.emit(map, Patch::add(path, snapshot));
        Ok(entry)
    }

    /// Attach an existing detached node under `key` of `map`.
    pub(crate) fn put_map_entry(&mut self, map: NodeId, key: &str, entry: NodeId) -> EngineResult<()> {
        self.map_storage_mut(map)?.insert(key.to_owned(), entry);
        let data = self.node_mut(entry)?;
        data.parent = Some(map);
        data.subpath = key.to_owned();
        Ok(())
    }

    /// Attach an existing detached node at `index` of `array`.
    pub(crate) fn put_array_entry(&mut self, array: NodeId, index: usize, item: NodeId) -> EngineResult<()> {
        self.put_array_item(array, index, item)
    }

    /// Unlink an array item without disposing it.
    pub(crate) fn take_array_entry(&mut self, array: NodeId, index: usize) -> EngineResult<NodeId> {
        self.take_array_item(array, index)
    }

    /// Unlink a map entry without disposing it.
    pub(crate) fn take_map_entry(&mut self, map: NodeId, key: &str) -> EngineResult<Option<NodeId>> {
        Ok(self.map_storage_mut(map)?.shift_remove(key))
    }

    /// Put `node` into a model slot, returning the previous occupant.
    pub(crate) fn swap_model_child(&mut self, model: NodeId, key: &str, node: NodeId) -> EngineResult<NodeId> {
        let previous = match &mut self.node_mut(model)?.storage {
            Storage::Model(children) => children.get_mut(key).map(|slot| std::mem::replace(slot, node)),
            _ => None,
        };
        previous.ok_or_else(|| EngineError::invalid_path(self.path_string(model), format!("no property `{key}`")))
    }
}

impl std::fmt::Debug for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tree")
            .field("root", &self.root)
            .field("nodes", &self.arena.len())
            .field("protected", &self.protected)
            .finish_non_exhaustive()
    }
}
