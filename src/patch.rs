//! Structural patches.
//!
//! Every mutation of a tree is described by exactly one patch, emitted right
//! after the mutation took effect. Patches carry the previous value so that the
//! inverse patch can be derived without looking at the tree again.

use crate::path::{Path, split_path};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// The kind of structural change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    /// The value at `path` was replaced (or reconciled) with `value`.
    Replace,
    /// `value` was inserted at `path` (array index or map key).
    Add,
    /// The value at `path` was removed.
    Remove,
}

/// A single addressable mutation: `{op, path, value?, oldValue?}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patch {
    /// What happened.
    pub op: PatchOp,
    /// Root-relative, slash-delimited position of the change.
    pub path: String,
    /// The new value (absent for `remove`).
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// The previous value (absent for `add`).
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
}

// A field that is present but `null` must stay `Some(Value::Null)`.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl Patch {
    /// Create a replace patch.
    #[inline]
    pub fn replace(path: impl Into<String>, value: Value, old_value: Value) -> Self {
        Patch {
            op: PatchOp::Replace,
            path: path.into(),
            value: Some(value),
            old_value: Some(old_value),
        }
    }

    /// Create an add patch.
    #[inline]
    pub fn add(path: impl Into<String>, value: Value) -> Self {
        Patch {
            op: PatchOp::Add,
            path: path.into(),
            value: Some(value),
            old_value: None,
        }
    }

    /// Create a remove patch.
    #[inline]
    pub fn remove(path: impl Into<String>, old_value: Value) -> Self {
        Patch {
            op: PatchOp::Remove,
            path: path.into(),
            value: None,
            old_value: Some(old_value),
        }
    }

    /// The patch that undoes this one.
    pub fn inverse(&self) -> Patch {
        match self.op {
            PatchOp::Replace => Patch {
                op: PatchOp::Replace,
                path: self.path.clone(),
                value: self.old_value.clone(),
                old_value: self.value.clone(),
            },
            PatchOp::Add => Patch {
                op: PatchOp::Remove,
                path: self.path.clone(),
                value: None,
                old_value: self.value.clone(),
            },
            PatchOp::Remove => Patch {
                op: PatchOp::Add,
                path: self.path.clone(),
                value: self.old_value.clone(),
                old_value: None,
            },
        }
    }

    /// Drop the previous value, leaving the plain `{op, path, value?}` form.
    pub fn without_old_value(&self) -> Patch {
        Patch {
            old_value: None,
            ..self.clone()
        }
    }

    /// The parsed path.
    #[inline]
    pub fn parsed_path(&self) -> Path {
        Path::from_segments(split_path(&self.path))
    }

    /// Re-express this patch relative to `prefix`; `None` if it lies outside.
    pub fn relative_to(&self, prefix: &Path) -> Option<Patch> {
        let relative = self.parsed_path().strip_prefix(prefix)?;
        Some(Patch {
            path: relative.to_string(),
            ..self.clone()
        })
    }
}
