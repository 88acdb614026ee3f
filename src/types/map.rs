use super::Type;
use crate::error::EngineResult;
use crate::tree::{NodeId, Storage, Tree};
use crate::validation::{Context, ValidationError, ValidationResult};
use indexmap::IndexMap;
use serde_json::Value;

pub(crate) struct MapType {
    pub(crate) value_type: Type,
}

impl MapType {
    pub(crate) fn validate(&self, value: &Value, context: &Context) -> ValidationResult {
        let Some(object) = value.as_object() else {
            return ValidationResult::failure(context, value, "value is not a plain object");
        };
        let keyed = self.value_type.may_have_identifier();
        let mut result = ValidationResult::success();
        for (key, entry) in object {
            let entry_context = context.child(key.as_str(), &self.value_type);
            let entry_result = self.value_type.is_valid_snapshot(entry, &entry_context);
            let valid = entry_result.is_ok();
            result.extend(entry_result);
            if !keyed || !valid {
                continue;
            }
            if let Some(identifier) = self.value_type.snapshot_identifier(entry) {
                if identifier != *key {
                    result.push(ValidationError::new(
                        &entry_context,
                        entry,
                        format!("map key `{key}` does not match the entry's identifier `{identifier}`"),
                    ));
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
        let node = tree.alloc(ty, parent, subpath, Storage::Map(IndexMap::new()), None);
        let mut entries = IndexMap::new();
        for (key, entry) in value.as_object().into_iter().flatten() {
            let child = tree.instantiate_child(&self.value_type, Some(node), key, entry)?;
            entries.insert(key.clone(), child);
        }
        tree.set_storage(node, Storage::Map(entries))?;
        Ok(node)
    }

    /// Absent keys are removed first, then every key of the snapshot is
    /// merged or added in snapshot order.
    pub(crate) fn reconcile(&self, tree: &mut Tree, node: NodeId, value: &Value) -> EngineResult<()> {
        let Some(object) = value.as_object() else {
            return Ok(());
        };
        for (key, _) in tree.map_entries(node)? {
            if !object.contains_key(&key) {
                tree.map_remove_key(node, &key)?;
            }
        }
        for (key, entry) in object {
            match tree.map_child(node, key)? {
                Some(child) => {
                    self.value_type.reconcile(tree, child, entry)?;
                }
                None => {
                    tree.map_insert_value(node, key, &self.value_type, entry)?;
                }
            }
        }
        Ok(())
    }
}
