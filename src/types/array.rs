use super::Type;
use crate::error::EngineResult;
use crate::tree::{NodeId, Storage, Tree};
use crate::validation::{Context, ValidationError, ValidationResult};
use std::collections::{HashMap, HashSet};
use serde_json::Value;
use tracing::debug;

pub(crate) struct ArrayType {
    pub(crate) element: Type,
}

impl ArrayType {
    pub(crate) fn validate(&self, value: &Value, context: &Context) -> ValidationResult {
        let Some(items) = value.as_array() else {
            return ValidationResult::failure(context, value, "value is not an array");
        };
        let mut result: ValidationResult = items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                self.element
                    .is_valid_snapshot(item, &context.child(index.to_string(), &self.element))
            })
            .collect();
        if self.element.may_have_identifier() {
            let mut seen: HashMap<String, usize> = HashMap::new();
            for (index, item) in items.iter().enumerate() {
                let Some(identifier) = self.element.snapshot_identifier(item) else {
                    continue;
                };
                if let Some(first) = seen.get(&identifier) {
                    result.push(ValidationError::new(
                        &context.child(index.to_string(), &self.element),
                        item,
                        format!("duplicate identifier `{identifier}`, first used at index {first}"),
                    ));
                } else {
                    seen.insert(identifier, index);
                }
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
        let node = tree.alloc(ty, parent, subpath, Storage::Array(Vec::new()), None);
        let mut children = Vec::new();
        for (index, item) in value.as_array().into_iter().flatten().enumerate() {
            children.push(tree.instantiate_child(&self.element, Some(node), &index.to_string(), item)?);
        }
        tree.set_storage(node, Storage::Array(children))?;
        Ok(node)
    }

    pub(crate) fn reconcile(&self, tree: &mut Tree, node: NodeId, value: &Value) -> EngineResult<()> {
        let items: &[Value] = value.as_array().map(Vec::as_slice).unwrap_or_default();
        if self.element.may_have_identifier() {
            self.reconcile_keyed(tree, node, items)
        } else {
            self.reconcile_positional(tree, node, items)
        }
    }

    /// Index `i` merges into child `i`; extra items are appended and missing
    /// ones removed from the end.
    fn reconcile_positional(&self, tree: &mut Tree, node: NodeId, items: &[Value]) -> EngineResult<()> {
        let old = tree.array_items(node)?;
        let common = old.len().min(items.len());
        for (child, item) in old.iter().zip(items).take(common) {
            self.element.reconcile(tree, *child, item)?;
        }
        for index in (items.len()..old.len()).rev() {
            tree.array_remove_at(node, index)?;
        }
        for (index, item) in items.iter().enumerate().skip(common) {
            tree.array_insert_value(node, index, &self.element, item)?;
        }
        Ok(())
    }

    /// Children are matched by identifier, so a reordered snapshot moves the
    /// existing nodes instead of rebuilding them.
    fn reconcile_keyed(&self, tree: &mut Tree, node: NodeId, items: &[Value]) -> EngineResult<()> {
        let old = tree.array_items(node)?;
        let mut by_identifier: HashMap<String, NodeId> = HashMap::new();
        for child in &old {
            if let Some(identifier) = tree.node(*child)?.identifier.clone() {
                by_identifier.entry(identifier).or_insert(*child);
            }
        }

        let mut targets: Vec<Option<NodeId>> = items
            .iter()
            .map(|item| {
                self.element
                    .snapshot_identifier(item)
                    .and_then(|identifier| by_identifier.remove(&identifier))
            })
            .collect();
        let claimed: HashSet<NodeId> = targets.iter().flatten().copied().collect();

        for index in (0..old.len()).rev() {
            if !claimed.contains(&old[index]) {
                tree.array_remove_at(node, index)?;
            }
        }

        for (target, item) in targets.iter_mut().zip(items) {
            if let Some(child) = target {
                *child = self.element.reconcile(tree, *child, item)?;
            }
        }

        let mut moved = 0usize;
        for (index, (target, item)) in targets.iter().zip(items).enumerate() {
            match target {
                Some(child) => {
                    let current = tree.array_items(node)?;
                    let from = current
                        .iter()
                        .position(|candidate| candidate == child)
                        .unwrap_or(index);
                    if from != index {
                        tree.array_move(node, from, index)?;
                        moved += 1;
                    }
                }
                None => {
                    tree.array_insert_value(node, index, &self.element, item)?;
                }
            }
        }
        if moved > 0 {
            debug!(?node, moved, "keyed array reordered");
        }
        Ok(())
    }
}
