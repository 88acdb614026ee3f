//! Identifier scopes and reference resolution.
//!
//! A model node carrying an identifier is registered in the index of its
//! scope: the nearest ancestor array or map, or the topmost ancestor when
//! there is none. Each scope owns its index; no two scopes share one.
//!
//! Lookups start at the asking node and widen one ancestor at a time. At each
//! level every scope inside that ancestor's subtree is searched; the first
//! level that yields a match decides.

use super::{CachedTarget, NodeId, Storage, Tree};
use crate::error::{EngineError, EngineResult};
use crate::types::{Type, TypeKind, normalize_identifier};
use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Default)]
pub(crate) struct IdentifierIndex {
    entries: IndexMap<String, Vec<NodeId>>,
}

impl IdentifierIndex {
    fn insert(&mut self, identifier: &str, node: NodeId) {
        let nodes = self.entries.entry(identifier.to_owned()).or_default();
        if !nodes.contains(&node) {
            nodes.push(node);
        }
    }

    fn remove(&mut self, identifier: &str, node: NodeId) {
        if let Some(nodes) = self.entries.get_mut(identifier) {
            nodes.retain(|candidate| *candidate != node);
            if nodes.is_empty() {
                self.entries.shift_remove(identifier);
            }
        }
    }

    fn get(&self, identifier: &str) -> &[NodeId] {
        self.entries.get(identifier).map(Vec::as_slice).unwrap_or_default()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }
}

impl Tree {
    /// The scope a node's identifier belongs to.
    pub(crate) fn scope_of(&self, node: NodeId) -> EngineResult<NodeId> {
        let mut current = node;
        while let Some(parent) = self.node(current)?.parent {
            if self.node(parent)?.storage.is_collection() {
                return Ok(parent);
            }
            current = parent;
        }
        Ok(current)
    }

    pub(crate) fn register_identifier(&mut self, node: NodeId) -> EngineResult<()> {
        let Some(identifier) = self.node(node)?.identifier.clone() else {
            return Ok(());
        };
        let scope = self.scope_of(node)?;
        self.scopes.entry(scope).or_default().insert(&identifier, node);
        self.node_mut(node)?.registered_in = Some(scope);
        self.identifier_version += 1;
        Ok(())
    }

    pub(crate) fn unregister_identifier(&mut self, node: NodeId) -> EngineResult<()> {
        let data = self.node_mut(node)?;
        let Some(scope) = data.registered_in.take() else {
            return Ok(());
        };
        let Some(identifier) = data.identifier.clone() else {
            return Ok(());
        };
        if let Some(index) = self.scopes.get_mut(&scope) {
            index.remove(&identifier, node);
            if index.len() == 0 {
                self.scopes.shift_remove(&scope);
            }
        }
        self.identifier_version += 1;
        Ok(())
    }

    /// Move every registration in the subtree to the scopes it now belongs to.
    pub(crate) fn reregister_subtree(&mut self, node: NodeId) -> EngineResult<()> {
        let nodes = self.subtree(node)?;
        for id in &nodes {
            self.unregister_identifier(*id)?;
        }
        for id in &nodes {
            self.register_identifier(*id)?;
        }
        Ok(())
    }

    fn is_ancestor_or_self(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.arena.get(id).and_then(|data| data.parent);
        }
        false
    }

    /// Find the live node of `target` identified by `key`, searching outwards
    /// from `from`.
    pub fn resolve_reference(&self, from: NodeId, target: &Type, key: &Value) -> EngineResult<NodeId> {
        self.ensure_readable(from, "resolve a reference from")?;
        let identifier = normalize_identifier(key).ok_or_else(|| EngineError::ReferenceResolution {
            identifier: key.to_string(),
            target: target.name().to_owned(),
            path: self.path_string(from),
            reason: "the key is not a string or a number".to_owned(),
        })?;
        self.resolve_identifier(from, target, &identifier)
    }

    pub(crate) fn resolve_identifier(&self, from: NodeId, target: &Type, identifier: &str) -> EngineResult<NodeId> {
        let failure = |reason: String| EngineError::ReferenceResolution {
            identifier: identifier.to_owned(),
            target: target.name().to_owned(),
            path: self.path_string(from),
            reason,
        };
        if !target.may_have_identifier() {
            return Err(failure(format!("type `{}` declares no identifier", target.name())));
        }

        let mut level = Some(from);
        while let Some(ancestor) = level {
            let mut matches: Vec<NodeId> = Vec::new();
            for (scope, index) in &self.scopes {
                if !self.is_ancestor_or_self(ancestor, *scope) {
                    continue;
                }
                for candidate in index.get(identifier) {
                    let accepted = self
                        .arena
                        .get(*candidate)
                        .is_some_and(|data| data.state.is_readable() && target.accepts(&data.ty));
                    if accepted && !matches.contains(candidate) {
                        matches.push(*candidate);
                    }
                }
            }
            match matches.len() {
                0 => level = self.node(ancestor)?.parent,
                1 => return Ok(matches[0]),
                n => {
                    return Err(failure(format!(
                        "the identifier is ambiguous, {n} nodes of that type carry it"
                    )));
                }
            }
        }
        Err(failure("no node with this identifier exists in any enclosing scope".to_owned()))
    }

    /// Follow a reference node to the node it points at.
    ///
    /// The result is cached until any identifier index changes.
    pub fn resolve(&self, reference: NodeId) -> EngineResult<NodeId> {
        let data = self.ensure_readable(reference, "resolve")?;
        let Storage::Reference { key, cache } = &data.storage else {
            return Err(EngineError::invariant(format!(
                "node at `{}` is a `{}`, not a reference",
                self.path_string(reference),
                data.ty.name()
            )));
        };
        if let Some(cached) = cache.get() {
            let live = self
                .arena
                .get(cached.target)
                .is_some_and(|target| target.state.is_readable());
            if cached.version == self.identifier_version && live {
                return Ok(cached.target);
            }
        }
        let TypeKind::Reference(reference_type) = data.ty.kind() else {
            return Err(EngineError::invariant("reference storage on a non-reference type"));
        };
        let target = self.resolve_reference(reference, &reference_type.target, key)?;
        debug!(%reference, %target, "reference resolved");
        cache.set(Some(CachedTarget {
            version: self.identifier_version,
            target,
        }));
        Ok(target)
    }
}
