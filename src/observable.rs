//! Boundary to a reactive observation substrate.
//!
//! Every scalar node is mirrored into a box of the substrate, and the tree
//! observes each box it creates. The engine writes the box after each change
//! it makes; a consumer that writes a box itself marks the node as changed
//! externally, and `Tree::sync_external_changes` validates and records those
//! changes like any other mutation.

use crate::tree::NodeId;
use indexmap::IndexSet;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Handle to one observable box.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BoxHandle(pub u64);

/// Handle to one box observation, returned by [`ReactiveSubstrate::observe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Subscription(pub u64);

/// Called with the new content each time a box is written.
pub type BoxListener = Box<dyn FnMut(&Value)>;

/// The operations the engine needs from an observation substrate.
pub trait ReactiveSubstrate {
    /// Create a box holding `initial`.
    fn make_observable(&mut self, initial: Value) -> BoxHandle;

    /// Current content of a box.
    fn get(&self, handle: BoxHandle) -> Option<Value>;

    /// Overwrite a box, notifying its observers.
    fn set(&mut self, handle: BoxHandle, value: Value);

    /// Call `listener` after every write to `handle`.
    fn observe(&mut self, handle: BoxHandle, listener: BoxListener) -> Subscription;

    /// Stop an observation. Unknown subscriptions are ignored.
    fn unobserve(&mut self, subscription: Subscription);

    /// Release a box. Its handle must not be used again.
    fn dispose(&mut self, handle: BoxHandle);
}

/// In-memory substrate that notifies observers synchronously on `set`.
#[derive(Default)]
pub struct MemorySubstrate {
    boxes: HashMap<u64, Value>,
    observers: Vec<(Subscription, BoxHandle, BoxListener)>,
    next: u64,
}

impl MemorySubstrate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live boxes.
    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }
}

impl fmt::Debug for MemorySubstrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySubstrate")
            .field("boxes", &self.boxes.len())
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl ReactiveSubstrate for MemorySubstrate {
    fn make_observable(&mut self, initial: Value) -> BoxHandle {
        let handle = BoxHandle(self.next_id());
        self.boxes.insert(handle.0, initial);
        handle
    }

    fn get(&self, handle: BoxHandle) -> Option<Value> {
        self.boxes.get(&handle.0).cloned()
    }

    fn set(&mut self, handle: BoxHandle, value: Value) {
        let Some(slot) = self.boxes.get_mut(&handle.0) else {
            return;
        };
        *slot = value.clone();
        for (_, observed, listener) in &mut self.observers {
            if *observed == handle {
                listener(&value);
            }
        }
    }

    fn observe(&mut self, handle: BoxHandle, listener: BoxListener) -> Subscription {
        let subscription = Subscription(self.next_id());
        self.observers.push((subscription, handle, listener));
        subscription
    }

    fn unobserve(&mut self, subscription: Subscription) {
        self.observers.retain(|(id, _, _)| *id != subscription);
    }

    fn dispose(&mut self, handle: BoxHandle) {
        self.boxes.remove(&handle.0);
        self.observers.retain(|(_, observed, _)| *observed != handle);
    }
}

/// Nodes whose boxes were written from outside the engine, in write order.
#[derive(Clone, Default)]
pub(crate) struct ExternalChanges {
    pending: Rc<RefCell<IndexSet<NodeId>>>,
    muted: Rc<Cell<bool>>,
}

impl ExternalChanges {
    /// The observer the tree installs on the box of `node`.
    pub(crate) fn listener(&self, node: NodeId) -> BoxListener {
        let changes = self.clone();
        Box::new(move |_| {
            if !changes.muted.get() {
                changes.pending.borrow_mut().insert(node);
            }
        })
    }

    /// Run `write` without marking anything; used for the engine's own writes.
    pub(crate) fn muted<T>(&self, write: impl FnOnce() -> T) -> T {
        let previous = self.muted.replace(true);
        let result = write();
        self.muted.set(previous);
        result
    }

    pub(crate) fn pending(&self) -> Vec<NodeId> {
        self.pending.borrow().iter().copied().collect()
    }

    pub(crate) fn take(&self) -> Vec<NodeId> {
        self.pending.borrow_mut().drain(..).collect()
    }

    pub(crate) fn forget(&self, node: NodeId) {
        self.pending.borrow_mut().shift_remove(&node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn boxes_live_until_disposed() {
        let mut substrate = MemorySubstrate::new();
        let a = substrate.make_observable(json!(1));
        let b = substrate.make_observable(json!("x"));
        assert_ne!(a, b);
        substrate.set(a, json!(2));
        assert_eq!(substrate.get(a), Some(json!(2)));
        substrate.dispose(a);
        assert_eq!(substrate.get(a), None);
        // writes to a disposed box are dropped
        substrate.set(a, json!(3));
        assert_eq!(substrate.len(), 1);
    }

    #[test]
    fn observers_see_writes_until_unobserved() {
        let mut substrate = MemorySubstrate::new();
        let a = substrate.make_observable(json!(1));
        let b = substrate.make_observable(json!(1));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let subscription = substrate.observe(a, Box::new(move |value| sink.borrow_mut().push(value.clone())));

        substrate.set(a, json!(2));
        substrate.set(b, json!(5));
        substrate.unobserve(subscription);
        substrate.set(a, json!(3));

        assert_eq!(*seen.borrow(), vec![json!(2)]);
    }

    #[test]
    fn muted_writes_are_not_marked() {
        let changes = ExternalChanges::default();
        let node = NodeId::PLACEHOLDER;
        let mut listener = changes.listener(node);
        changes.muted(|| listener(&json!(1)));
        assert!(changes.pending().is_empty());
        listener(&json!(2));
        listener(&json!(3));
        assert_eq!(changes.take(), vec![node]);
        assert!(changes.pending().is_empty());
    }
}
