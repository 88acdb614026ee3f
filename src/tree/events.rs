//! Patch emission and listeners.

use super::{NodeId, Tree};
use crate::action::ActionEvent;
use crate::error::EngineResult;
use crate::patch::Patch;
use crate::path::Path;
use serde_json::Value;
use tracing::trace;

/// Handle returned by the `on_*` registrations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub(crate) enum Callback {
    Patch(Box<dyn FnMut(&Patch, &Patch)>),
    Snapshot {
        callback: Box<dyn FnMut(&Value)>,
        dirty: bool,
    },
    Action(Box<dyn FnMut(&ActionEvent)>),
}

pub(crate) struct Listener {
    pub(crate) id: ListenerId,
    pub(crate) node: NodeId,
    pub(crate) callback: Callback,
}

impl Tree {
    fn listen(&mut self, node: NodeId, callback: Callback) -> EngineResult<ListenerId> {
        self.ensure_readable(node, "listen to")?;
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push(Listener { id, node, callback });
        Ok(id)
    }

    /// Call `listener` with every patch (and its inverse) emitted inside the
    /// subtree of `node`, with paths relative to `node`.
    pub fn on_patch<F>(&mut self, node: NodeId, listener: F) -> EngineResult<ListenerId>
    where
        F: FnMut(&Patch, &Patch) + 'static,
    {
        self.listen(node, Callback::Patch(Box::new(listener)))
    }

    /// Call `listener` with the new snapshot of `node` once per outermost
    /// operation that changed it.
    pub fn on_snapshot<F>(&mut self, node: NodeId, listener: F) -> EngineResult<ListenerId>
    where
        F: FnMut(&Value) + 'static,
    {
        self.listen(
            node,
            Callback::Snapshot {
                callback: Box::new(listener),
                dirty: false,
            },
        )
    }

    /// Call `listener` with every action event targeting the subtree of `node`.
    pub fn on_action<F>(&mut self, node: NodeId, listener: F) -> EngineResult<ListenerId>
    where
        F: FnMut(&ActionEvent) + 'static,
    {
        self.listen(node, Callback::Action(Box::new(listener)))
    }

    /// Remove a listener. Returns false if it was already gone.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|listener| listener.id != id);
        self.listeners.len() != before
    }

    /// Run `op` as one operation: snapshot listeners fire once when the
    /// outermost operation ends, whether it succeeded or not.
    pub(crate) fn run_operation<T>(&mut self, op: impl FnOnce(&mut Tree) -> EngineResult<T>) -> EngineResult<T> {
        self.depth += 1;
        let result = op(self);
        self.depth -= 1;
        if self.depth == 0 {
            self.prune_listeners();
            self.flush_snapshot_listeners();
        }
        result
    }

    /// Topmost ancestor without lifecycle checks.
    pub(crate) fn root_unchecked(&self, node: NodeId) -> NodeId {
        let mut current = node;
        while let Some(parent) = self.arena.get(current).and_then(|data| data.parent) {
            current = parent;
        }
        current
    }

    /// Path of an observed node, if it is readable and lives under `root`.
    pub(crate) fn observed_prefix(&self, node: NodeId, root: NodeId) -> Option<Path> {
        let data = self.arena.get(node)?;
        if !data.state.is_readable() || self.root_unchecked(node) != root {
            return None;
        }
        self.path(node).ok()
    }

    /// Publish a patch describing a mutation that already took effect.
    pub(crate) fn emit(&mut self, origin: NodeId, patch: Patch) {
        let root = self.root_unchecked(origin);
        trace!(op = ?patch.op, path = %patch.path, "patch");
        let inverse = patch.inverse();
        let tag = self.calls.last().map(|call| call.tag());

        for frame in &mut self.atomic_frames {
            frame.push((root, patch.clone()));
        }

        let recorders: Vec<(u64, Path)> = self
            .recorders
            .iter()
            .filter_map(|(id, recorder)| self.observed_prefix(recorder.node, root).map(|prefix| (*id, prefix)))
            .collect();
        for (id, prefix) in recorders {
            if let (Some(relative), Some(relative_inverse), Some(recorder)) = (
                patch.relative_to(&prefix),
                inverse.relative_to(&prefix),
                self.recorders.get_mut(&id),
            ) {
                recorder.recording.push_patch(relative, relative_inverse, tag);
            }
        }

        let patch_path = patch.parsed_path();
        let targets: Vec<(usize, Path)> = self
            .listeners
            .iter()
            .enumerate()
            .filter_map(|(index, listener)| self.observed_prefix(listener.node, root).map(|prefix| (index, prefix)))
            .collect();
        for (index, prefix) in targets {
            match &mut self.listeners[index].callback {
                Callback::Patch(callback) => {
                    if let (Some(relative), Some(relative_inverse)) =
                        (patch.relative_to(&prefix), inverse.relative_to(&prefix))
                    {
                        callback(&relative, &relative_inverse);
                    }
                }
                Callback::Snapshot { dirty, .. } => {
                    if prefix.is_prefix_of(&patch_path) || patch_path.is_prefix_of(&prefix) {
                        *dirty = true;
                    }
                }
                Callback::Action(_) => {}
            }
        }
    }

    /// Deliver an action event to listeners and recorders above `target`.
    pub(crate) fn notify_action(&mut self, target: NodeId, event: ActionEvent) {
        let root = self.root_unchecked(target);
        let Ok(target_path) = self.path(target) else {
            return;
        };

        let recorders: Vec<(u64, Path)> = self
            .recorders
            .iter()
            .filter_map(|(id, recorder)| self.observed_prefix(recorder.node, root).map(|prefix| (*id, prefix)))
            .filter(|(_, prefix)| prefix.is_prefix_of(&target_path))
            .collect();
        for (id, prefix) in recorders {
            if let Some(recorder) = self.recorders.get_mut(&id) {
                recorder.recording.push_action(event.relative_to(&prefix));
            }
        }

        let targets: Vec<(usize, Path)> = self
            .listeners
            .iter()
            .enumerate()
            .filter(|(_, listener)| matches!(listener.callback, Callback::Action(_)))
            .filter_map(|(index, listener)| self.observed_prefix(listener.node, root).map(|prefix| (index, prefix)))
            .filter(|(_, prefix)| prefix.is_prefix_of(&target_path))
            .collect();
        for (index, prefix) in targets {
            if let Callback::Action(callback) = &mut self.listeners[index].callback {
                callback(&event.relative_to(&prefix));
            }
        }
    }

    /// Observers of a replaced node follow its replacement.
    pub(crate) fn rebind_observers(&mut self, old: NodeId, new: NodeId) {
        for listener in self.listeners.iter_mut().filter(|listener| listener.node == old) {
            listener.node = new;
        }
        for recorder in self.recorders.values_mut().filter(|recorder| recorder.node == old) {
            recorder.node = new;
        }
    }

    fn prune_listeners(&mut self) {
        let arena = &self.arena;
        self.listeners.retain(|listener| arena.contains(listener.node));
    }

    fn flush_snapshot_listeners(&mut self) {
        let mut pending: Vec<(usize, Value)> = Vec::new();
        for (index, listener) in self.listeners.iter().enumerate() {
            if let Callback::Snapshot { dirty: true, .. } = listener.callback {
                if let Ok(snapshot) = self.snapshot(listener.node) {
                    pending.push((index, snapshot));
                }
            }
        }
        for listener in &mut self.listeners {
            if let Callback::Snapshot { dirty, .. } = &mut listener.callback {
                *dirty = false;
            }
        }
        for (index, snapshot) in pending {
            if let Callback::Snapshot { callback, .. } = &mut self.listeners[index].callback {
                callback(&snapshot);
            }
        }
    }
}
