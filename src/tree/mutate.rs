//! Validated mutations.
//!
//! Every operation here checks the target's lifecycle state, validates the
//! prospective value before touching anything, then runs the structural
//! primitives inside one operation. A rejected value leaves the tree as it
//! was.

use super::{LifecycleState, NodeId, Storage, Tree};
use crate::error::{EngineError, EngineResult};
use crate::patch::{Patch, PatchOp};
use crate::types::{Type, TypeKind, normalize_identifier};
use serde_json::Value;
use tracing::{debug, warn};

/// Result of [`Tree::apply_snapshot`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// The node now at the position (the same node unless it was replaced).
    pub node: NodeId,
    /// True when the snapshot could not be merged into the existing node.
    pub identity_changed: bool,
}

enum ContainerKind {
    Model,
    Array,
    Map,
    Scalar,
}

impl Tree {
    /// Run `op` with protection lifted (snapshot and patch application,
    /// rollback).
    pub(crate) fn system<T>(&mut self, op: impl FnOnce(&mut Tree) -> EngineResult<T>) -> EngineResult<T> {
        self.system_depth += 1;
        let result = self.run_operation(op);
        self.system_depth -= 1;
        result
    }

    /// Run `op`; if it fails, undo every patch it emitted, newest first.
    ///
    /// A rollback that cannot be completed leaves the tree inconsistent and
    /// is reported as an invariant violation instead of the original error.
    pub(crate) fn atomic<T>(&mut self, op: impl FnOnce(&mut Tree) -> EngineResult<T>) -> EngineResult<T> {
        self.atomic_frames.push(Vec::new());
        let result = self.run_operation(op);
        let frame = self.atomic_frames.pop().unwrap_or_default();
        let cause = match result {
            Ok(value) => return Ok(value),
            Err(cause) => cause,
        };
        if !frame.is_empty() {
            debug!(patches = frame.len(), "rolling back");
            self.system(|tree| tree.roll_back(frame)).map_err(|error| {
                EngineError::invariant(format!("rollback after `{cause}` failed: {error}"))
            })?;
        }
        Err(cause)
    }

    /// Apply the inverse of each patch, newest first. Keeps going past a
    /// failing patch and returns the first failure.
    fn roll_back(&mut self, frame: Vec<(NodeId, Patch)>) -> EngineResult<()> {
        let mut first_error = None;
        for (root, patch) in frame.into_iter().rev() {
            if let Err(error) = self.apply_patch_unchecked(root, &patch.inverse()) {
                warn!(path = %patch.path, %error, "rollback patch failed");
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn container_kind(&self, node: NodeId) -> EngineResult<ContainerKind> {
        Ok(match &self.node(node)?.storage {
            Storage::Model(_) => ContainerKind::Model,
            Storage::Array(_) => ContainerKind::Array,
            Storage::Map(_) => ContainerKind::Map,
            Storage::Scalar(_) | Storage::Reference { .. } => ContainerKind::Scalar,
        })
    }

    pub(crate) fn array_element(&self, array: NodeId) -> EngineResult<Type> {
        match self.node(array)?.ty.kind() {
            TypeKind::Array(array) => Ok(array.element.clone()),
            _ => Err(EngineError::invariant(format!(
                "node at `{}` is not an array",
                self.path_string(array)
            ))),
        }
    }

    pub(crate) fn map_value_type(&self, map: NodeId) -> EngineResult<Type> {
        match self.node(map)?.ty.kind() {
            TypeKind::Map(map) => Ok(map.value_type.clone()),
            _ => Err(EngineError::invariant(format!(
                "node at `{}` is not a map",
                self.path_string(map)
            ))),
        }
    }

    /// An identifier property may not change value.
    fn guard_identifier(&self, node: NodeId, value: &Value) -> EngineResult<()> {
        let data = self.node(node)?;
        let Some(parent) = data.parent else {
            return Ok(());
        };
        let owner = self.node(parent)?;
        if owner.ty.identifier_attribute() == Some(data.subpath.as_str())
            && normalize_identifier(value) != owner.identifier
        {
            return Err(EngineError::invariant(format!(
                "identifier `{}` of the node at `{}` cannot be changed",
                owner.identifier.as_deref().unwrap_or_default(),
                self.path_string(parent)
            )));
        }
        Ok(())
    }

    /// Validate and reconcile a value into the position of `target`.
    fn replace_at(&mut self, target: NodeId, value: &Value) -> EngineResult<NodeId> {
        self.ensure_mutable(target, "replace")?;
        self.guard_identifier(target, value)?;
        self.validate_at(target, value)?;
        let declared = self.node(target)?.declared.clone();
        declared.reconcile(self, target, value)
    }

    // ————————————————————————————————————————————————————————————————————————
    // SNAPSHOTS AND PATCHES
    // ————————————————————————————————————————————————————————————————————————

    /// Reconcile `snapshot` into `node`.
    ///
    /// Identity is kept wherever the types allow; `identity_changed` reports
    /// when `node` itself had to be replaced.
    pub fn apply_snapshot(&mut self, node: NodeId, snapshot: &Value) -> EngineResult<ApplyOutcome> {
        self.ensure_mutable(node, "apply a snapshot to")?;
        self.validate_at(node, snapshot)?;
        let is_root = self.node(node)?.parent.is_none();
        let declared = self.node(node)?.declared.clone();
        let new = self.system(|tree| declared.reconcile(tree, node, snapshot))?;
        let identity_changed = new != node;
        if identity_changed && is_root {
            warn!(old = %node, new = %new, "root node identity changed while applying a snapshot");
        }
        Ok(ApplyOutcome {
            node: new,
            identity_changed,
        })
    }

    /// Apply one patch with paths relative to `node`.
    pub fn apply_patch(&mut self, node: NodeId, patch: &Patch) -> EngineResult<()> {
        self.ensure_mutable(node, "apply a patch to")?;
        self.system(|tree| tree.apply_patch_unchecked(node, patch))
    }

    /// Apply patches in order. Rolls back on failure when the tree was built
    /// with `atomic_patches`.
    pub fn apply_patches(&mut self, node: NodeId, patches: &[Patch]) -> EngineResult<()> {
        if self.atomic_patches {
            return self.apply_patches_atomic(node, patches);
        }
        self.ensure_mutable(node, "apply patches to")?;
        self.system(|tree| {
            for patch in patches {
                tree.apply_patch_unchecked(node, patch)?;
            }
            Ok(())
        })
    }

    /// Apply patches in order; on failure undo the ones already applied.
    pub fn apply_patches_atomic(&mut self, node: NodeId, patches: &[Patch]) -> EngineResult<()> {
        self.ensure_mutable(node, "apply patches to")?;
        self.atomic(|tree| {
            tree.system(|tree| {
                for patch in patches {
                    tree.apply_patch_unchecked(node, patch)?;
                }
                Ok(())
            })
        })
    }

    /// Same as [`Tree::apply_patches`]; named for replaying a recording.
    pub fn replay_patches(&mut self, node: NodeId, patches: &[Patch]) -> EngineResult<()> {
        self.apply_patches(node, patches)
    }

    pub(crate) fn apply_patch_unchecked(&mut self, base: NodeId, patch: &Patch) -> EngineResult<()> {
        let path = patch.parsed_path();
        let value = || {
            patch
                .value
                .as_ref()
                .ok_or_else(|| EngineError::invalid_path(&patch.path, "patch carries no value"))
        };
        if patch.op == PatchOp::Replace {
            let target = self.descend(base, path.segments(), &patch.path)?;
            self.replace_at(target, value()?)?;
            return Ok(());
        }

        let (Some(parent_path), Some(key)) = (path.parent(), path.last()) else {
            return Err(EngineError::invalid_path(&patch.path, "the root cannot be added or removed"));
        };
        let parent = self.descend(base, parent_path.segments(), &patch.path)?;
        let index = |len: usize| -> EngineResult<usize> {
            if key == "-" {
                return Ok(len);
            }
            key.parse::<usize>()
                .map_err(|_| EngineError::invalid_path(&patch.path, format!("`{key}` is not an array index")))
        };
        match (patch.op, self.container_kind(parent)?) {
            (PatchOp::Add, ContainerKind::Array) => {
                let at = index(self.array_items(parent)?.len())?;
                self.insert_item_unchecked(parent, at, value()?)?;
            }
            (PatchOp::Add, ContainerKind::Map) => {
                self.map_set_unchecked(parent, key, value()?)?;
            }
            (PatchOp::Add, ContainerKind::Model) => {
                let child = self.model_child(parent, key)?;
                self.replace_at(child, value()?)?;
            }
            (PatchOp::Remove, ContainerKind::Array) => {
                let at = index(self.array_items(parent)?.len())?;
                self.remove_item_unchecked(parent, at)?;
            }
            (PatchOp::Remove, ContainerKind::Map) => {
                if self.map_child(parent, key)?.is_none() {
                    return Err(EngineError::invalid_path(&patch.path, "no such map entry"));
                }
                self.map_delete_unchecked(parent, key)?;
            }
            (PatchOp::Remove, ContainerKind::Model) => {
                return Err(EngineError::invalid_path(&patch.path, "model properties cannot be removed"));
            }
            (_, ContainerKind::Scalar) => {
                return Err(EngineError::invalid_path(&patch.path, "scalar nodes have no children"));
            }
            (PatchOp::Replace, _) => unreachable!("handled above"),
        }
        Ok(())
    }

    // ————————————————————————————————————————————————————————————————————————
    // MODELS
    // ————————————————————————————————————————————————————————————————————————

    /// Set one property of a model. Identifier properties cannot change.
    pub fn set_property(&mut self, model: NodeId, key: &str, value: &Value) -> EngineResult<NodeId> {
        self.ensure_writable(model, "set a property of")?;
        let child = self.model_child(model, key)?;
        self.run_operation(|tree| tree.replace_at(child, value))
    }

    // ————————————————————————————————————————————————————————————————————————
    // ARRAYS
    // ————————————————————————————————————————————————————————————————————————

    /// Validate `array` as it would look after `edit`.
    fn validate_array_edit(&self, array: NodeId, edit: impl FnOnce(&mut Vec<Value>)) -> EngineResult<()> {
        let mut items = match self.snapshot_of(array)? {
            Value::Array(items) => items,
            _ => return Err(EngineError::invariant("array node with a non-array snapshot")),
        };
        edit(&mut items);
        self.validate_at(array, &Value::Array(items))
    }

    fn out_of_bounds(&self, array: NodeId, index: usize, len: usize) -> EngineError {
        EngineError::invalid_path(
            self.path(array)
                .map(|path| path.index(index).to_string())
                .unwrap_or_default(),
            format!("index {index} out of bounds for length {len}"),
        )
    }

    /// Replace the item at `index`; identity is kept when the types allow.
    pub fn set_item(&mut self, array: NodeId, index: usize, value: &Value) -> EngineResult<NodeId> {
        self.ensure_writable(array, "set an item of")?;
        let items = self.array_items(array)?;
        let Some(item) = items.get(index).copied() else {
            return Err(self.out_of_bounds(array, index, items.len()));
        };
        self.validate_array_edit(array, |items| items[index] = value.clone())?;
        self.run_operation(|tree| {
            let declared = tree.node(item)?.declared.clone();
            declared.reconcile(tree, item, value)
        })
    }

    /// Insert a new item at `index` (`index == len` appends).
    pub fn insert_item(&mut self, array: NodeId, index: usize, value: &Value) -> EngineResult<NodeId> {
        self.ensure_writable(array, "insert into")?;
        self.run_operation(|tree| tree.insert_item_unchecked(array, index, value))
    }

    fn insert_item_unchecked(&mut self, array: NodeId, index: usize, value: &Value) -> EngineResult<NodeId> {
        self.ensure_mutable(array, "insert into")?;
        let len = self.array_items(array)?.len();
        if index > len {
            return Err(self.out_of_bounds(array, index, len));
        }
        self.validate_array_edit(array, |items| items.insert(index, value.clone()))?;
        let element = self.array_element(array)?;
        self.array_insert_value(array, index, &element, value)
    }

    /// Append a new item.
    pub fn push_item(&mut self, array: NodeId, value: &Value) -> EngineResult<NodeId> {
        let len = self.array_items(array)?.len();
        self.insert_item(array, len, value)
    }

    /// Remove and dispose the item at `index`, returning its snapshot.
    pub fn remove_item(&mut self, array: NodeId, index: usize) -> EngineResult<Value> {
        self.ensure_writable(array, "remove from")?;
        self.run_operation(|tree| tree.remove_item_unchecked(array, index))
    }

    fn remove_item_unchecked(&mut self, array: NodeId, index: usize) -> EngineResult<Value> {
        self.ensure_mutable(array, "remove from")?;
        let len = self.array_items(array)?.len();
        if index >= len {
            return Err(self.out_of_bounds(array, index, len));
        }
        self.validate_array_edit(array, |items| {
            items.remove(index);
        })?;
        self.array_remove_at(array, index)
    }

    /// Move an item to another index, keeping its identity.
    pub fn move_item(&mut self, array: NodeId, from: usize, to: usize) -> EngineResult<()> {
        self.ensure_writable(array, "move an item of")?;
        let len = self.array_items(array)?.len();
        if from >= len {
            return Err(self.out_of_bounds(array, from, len));
        }
        if to >= len {
            return Err(self.out_of_bounds(array, to, len));
        }
        if from == to {
            return Ok(());
        }
        self.validate_array_edit(array, |items| {
            let item = items.remove(from);
            items.insert(to, item);
        })?;
        self.run_operation(|tree| tree.array_move(array, from, to))
    }

    // ————————————————————————————————————————————————————————————————————————
    // MAPS
    // ————————————————————————————————————————————————————————————————————————

    fn validate_map_edit(&self, map: NodeId, edit: impl FnOnce(&mut serde_json::Map<String, Value>)) -> EngineResult<()> {
        let mut entries = match self.snapshot_of(map)? {
            Value::Object(entries) => entries,
            _ => return Err(EngineError::invariant("map node with a non-object snapshot")),
        };
        edit(&mut entries);
        self.validate_at(map, &Value::Object(entries))
    }

    /// Set the entry under `key`, merging into an existing entry when possible.
    pub fn map_set(&mut self, map: NodeId, key: &str, value: &Value) -> EngineResult<NodeId> {
        self.ensure_writable(map, "set an entry of")?;
        self.run_operation(|tree| tree.map_set_unchecked(map, key, value))
    }

    fn map_set_unchecked(&mut self, map: NodeId, key: &str, value: &Value) -> EngineResult<NodeId> {
        self.ensure_mutable(map, "set an entry of")?;
        self.validate_map_edit(map, |entries| {
            entries.insert(key.to_owned(), value.clone());
        })?;
        match self.map_child(map, key)? {
            Some(entry) => {
                let declared = self.node(entry)?.declared.clone();
                declared.reconcile(self, entry, value)
            }
            None => {
                let value_type = self.map_value_type(map)?;
                self.map_insert_value(map, key, &value_type, value)
            }
        }
    }

    /// Add a value to a keyed map under its own identifier.
    pub fn map_put(&mut self, map: NodeId, value: &Value) -> EngineResult<NodeId> {
        let value_type = self.map_value_type(map)?;
        let key = value_type.snapshot_identifier(value).ok_or_else(|| {
            EngineError::invariant(format!(
                "map_put needs a value carrying an identifier, `{}` has none",
                value_type.name()
            ))
        })?;
        self.map_set(map, &key, value)
    }

    /// Remove and dispose the entry under `key`, returning its snapshot.
    pub fn map_delete(&mut self, map: NodeId, key: &str) -> EngineResult<Option<Value>> {
        self.ensure_writable(map, "delete from")?;
        self.run_operation(|tree| tree.map_delete_unchecked(map, key))
    }

    fn map_delete_unchecked(&mut self, map: NodeId, key: &str) -> EngineResult<Option<Value>> {
        self.ensure_mutable(map, "delete from")?;
        if self.map_child(map, key)?.is_none() {
            return Ok(None);
        }
        self.validate_map_edit(map, |entries| {
            entries.shift_remove(key);
        })?;
        self.map_remove_key(map, key)
    }

    // ————————————————————————————————————————————————————————————————————————
    // REFERENCES
    // ————————————————————————————————————————————————————————————————————————

    /// Point a reference node at `target`.
    pub fn set_reference(&mut self, reference: NodeId, target: NodeId) -> EngineResult<()> {
        self.ensure_writable(reference, "retarget")?;
        let TypeKind::Reference(reference_type) = self.node(reference)?.ty.kind() else {
            return Err(EngineError::invariant(format!(
                "node at `{}` is not a reference",
                self.path_string(reference)
            )));
        };
        let target_data = self.ensure_readable(target, "reference")?;
        if !reference_type.target.accepts(&target_data.ty) {
            return Err(EngineError::invariant(format!(
                "a reference to `{}` cannot point at a `{}`",
                reference_type.target.name(),
                target_data.ty.name()
            )));
        }
        let Some(attribute) = target_data.ty.identifier_attribute().map(str::to_owned) else {
            return Err(EngineError::invariant(format!(
                "type `{}` declares no identifier",
                target_data.ty.name()
            )));
        };
        let key = self.snapshot_of(self.model_child(target, &attribute)?)?;
        self.validate_at(reference, &key)?;
        self.run_operation(|tree| tree.update_reference(reference, key))
    }

    // ————————————————————————————————————————————————————————————————————————
    // LIFECYCLE
    // ————————————————————————————————————————————————————————————————————————

    /// Take `node` out of its parent. Array items and map entries are
    /// removed; a model property is reset to its type's default.
    fn unlink(&mut self, node: NodeId, parent: NodeId) -> EngineResult<()> {
        let subpath = self.node(node)?.subpath.clone();
        let path = self.path(node)?.to_string();
        let old = self.snapshot_of(node)?;
        match self.container_kind(parent)? {
            ContainerKind::Array => {
                let index = subpath
                    .parse::<usize>()
                    .map_err(|_| EngineError::invariant("array item with a non-numeric subpath"))?;
                self.validate_array_edit(parent, |items| {
                    items.remove(index);
                })?;
                self.take_array_entry(parent, index)?;
                self.emit(parent, Patch::remove(path, old));
            }
            ContainerKind::Map => {
                self.validate_map_edit(parent, |entries| {
                    entries.shift_remove(&subpath);
                })?;
                self.take_map_entry(parent, &subpath)?;
                self.emit(parent, Patch::remove(path, old));
            }
            ContainerKind::Model => {
                let declared = self.node(node)?.declared.clone();
                let default = declared.default_snapshot();
                self.validate_at(node, &default)?;
                let fresh = self.instantiate_child(&declared, Some(parent), &subpath, &default)?;
                self.swap_model_child(parent, &subpath, fresh)?;
                self.finalize(fresh)?;
                let snapshot = self.snapshot_of(fresh)?;
                self.emit(parent, Patch::replace(path, snapshot, old));
            }
            ContainerKind::Scalar => {
                return Err(EngineError::invariant("scalar nodes have no children"));
            }
        }
        let data = self.node_mut(node)?;
        data.parent = None;
        data.subpath = String::new();
        Ok(())
    }

    /// Remove `node` from its parent without disposing it.
    ///
    /// The node becomes the root of its own subtree in `Detaching` state:
    /// readable, not mutable, until it is attached again.
    pub fn detach(&mut self, node: NodeId) -> EngineResult<()> {
        self.ensure_writable(node, "detach")?;
        let Some(parent) = self.node(node)?.parent else {
            return Err(EngineError::invariant("a root node cannot be detached"));
        };
        self.run_operation(|tree| {
            tree.unlink(node, parent)?;
            tree.set_subtree_state(node, LifecycleState::Detaching)?;
            tree.reregister_subtree(node)
        })?;
        debug!(%node, "node detached");
        Ok(())
    }

    fn ensure_attachable(&self, container: NodeId, node: NodeId, element: &Type) -> EngineResult<()> {
        let data = self.ensure_readable(node, "attach")?;
        if data.state != LifecycleState::Detaching || data.parent.is_some() {
            return Err(EngineError::Lifecycle {
                operation: "attach",
                node,
                state: data.state,
            });
        }
        if self.root_unchecked(container) == node {
            return Err(EngineError::invariant("a node cannot be attached inside itself"));
        }
        if !element.accepts(&data.ty) {
            return Err(EngineError::invariant(format!(
                "a `{}` cannot be attached where `{}` is expected",
                data.ty.name(),
                element.name()
            )));
        }
        Ok(())
    }

    fn revive(&mut self, container: NodeId, node: NodeId, declared: Type) -> EngineResult<()> {
        self.node_mut(node)?.declared = declared;
        self.set_subtree_state(node, LifecycleState::Alive)?;
        self.reregister_subtree(node)?;
        let path = self.path(node)?.to_string();
        let snapshot = self.snapshot_of(node)?;
        self.emit(container, Patch::add(path, snapshot));
        Ok(())
    }

    /// Insert a detached node into `array` at `index`.
    pub fn attach_item(&mut self, array: NodeId, index: usize, node: NodeId) -> EngineResult<()> {
        self.ensure_writable(array, "attach to")?;
        let element = self.array_element(array)?;
        self.ensure_attachable(array, node, &element)?;
        let len = self.array_items(array)?.len();
        if index > len {
            return Err(self.out_of_bounds(array, index, len));
        }
        let snapshot = self.snapshot_of(node)?;
        self.validate_array_edit(array, |items| items.insert(index, snapshot))?;
        self.run_operation(|tree| {
            tree.put_array_entry(array, index, node)?;
            tree.revive(array, node, element)
        })
    }

    /// Add a detached node to `map` under `key`.
    pub fn attach_entry(&mut self, map: NodeId, key: &str, node: NodeId) -> EngineResult<()> {
        self.ensure_writable(map, "attach to")?;
        let value_type = self.map_value_type(map)?;
        self.ensure_attachable(map, node, &value_type)?;
        if self.map_child(map, key)?.is_some() {
            return Err(EngineError::invalid_path(
                self.path(map)?.key(key).to_string(),
                "an entry with this key already exists",
            ));
        }
        let snapshot = self.snapshot_of(node)?;
        self.validate_map_edit(map, |entries| {
            entries.insert(key.to_owned(), snapshot);
        })?;
        self.run_operation(|tree| {
            tree.put_map_entry(map, key, node)?;
            tree.revive(map, node, value_type)
        })
    }

    /// Remove `node` from its parent (if any) and dispose its subtree.
    pub fn destroy(&mut self, node: NodeId) -> EngineResult<()> {
        let data = self.ensure_readable(node, "destroy")?;
        let parent = data.parent;
        if parent.is_some() {
            self.ensure_writable(node, "destroy")?;
        }
        self.run_operation(|tree| {
            if let Some(parent) = parent {
                tree.unlink(node, parent)?;
            }
            tree.destroy_subtree(node)
        })?;
        debug!(%node, "node destroyed");
        Ok(())
    }

    /// Pull an in-place change made through the substrate back into the tree.
    ///
    /// Returns false when the box still holds the node's value. An invalid
    /// external value is reverted in the box and reported.
    pub fn sync_external(&mut self, node: NodeId) -> EngineResult<bool> {
        self.forget_external(node);
        let data = self.ensure_mutable(node, "sync")?;
        let Some(handle) = data.observable else {
            return Err(EngineError::invariant(format!(
                "node at `{}` is not backed by an observable box",
                self.path_string(node)
            )));
        };
        let current = data
            .storage
            .scalar()
            .cloned()
            .ok_or_else(|| EngineError::invariant("observable box on a composite node"))?;
        let Some(external) = self.substrate().get(handle) else {
            return Err(EngineError::invariant("observable box was disposed"));
        };
        if external == current {
            return Ok(false);
        }
        let checked = self
            .ensure_writable(node, "sync")
            .and_then(|_| self.guard_identifier(node, &external))
            .and_then(|_| self.validate_at(node, &external));
        if let Err(error) = checked {
            self.write_box(handle, current);
            return Err(error);
        }
        self.run_operation(|tree| {
            let declared = tree.node(node)?.declared.clone();
            declared.reconcile(tree, node, &external)
        })?;
        Ok(true)
    }

    /// Reconcile every node whose box was written from outside, in write
    /// order, as one operation. Returns the nodes that changed.
    ///
    /// A rejected write is reverted in its box and the remaining nodes are
    /// still synced; the first error is returned afterwards.
    pub fn sync_external_changes(&mut self) -> EngineResult<Vec<NodeId>> {
        let pending = self.external.take();
        if pending.is_empty() {
            return Ok(Vec::new());
        }
        debug!(nodes = pending.len(), "syncing external box writes");
        let mut first_error = None;
        let changed = self.run_operation(|tree| {
            let mut changed = Vec::new();
            for node in pending {
                if !tree.is_alive(node) {
                    continue;
                }
                match tree.sync_external(node) {
                    Ok(true) => changed.push(node),
                    Ok(false) => {}
                    Err(error) => {
                        warn!(%error, "external write rejected");
                        first_error.get_or_insert(error);
                    }
                }
            }
            Ok(changed)
        })?;
        match first_error {
            Some(error) => Err(error),
            None => Ok(changed),
        }
    }
}
