//! Patch and action recording.
//!
//! A recorder observes one node and keeps the interleaved log of patches and
//! action events emitted inside its subtree, with paths relative to it.

use crate::action::{ActionCall, ActionEvent, ActionTag};
use crate::error::EngineResult;
use crate::patch::Patch;
use crate::tree::{NodeId, Tree};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Handle returned by [`Tree::start_recording`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RecorderId(u64);

pub(crate) struct ActiveRecorder {
    pub(crate) node: NodeId,
    pub(crate) recording: Recording,
}

/// A patch together with its inverse and the call it was emitted under.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedPatch {
    pub patch: Patch,
    pub inverse: Patch,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionTag>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordedEvent {
    Patch(RecordedPatch),
    Action(ActionEvent),
}

/// Patches emitted by one top-level action (or outside any action).
#[derive(Clone, Debug, PartialEq)]
pub struct PatchGroup {
    /// The top-level call id; `None` for patches emitted outside actions.
    pub root_id: Option<u64>,
    pub patches: Vec<Patch>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    events: Vec<RecordedEvent>,
}

impl Recording {
    pub(crate) fn push_patch(&mut self, patch: Patch, inverse: Patch, action: Option<ActionTag>) {
        self.events
            .push(RecordedEvent::Patch(RecordedPatch { patch, inverse, action }));
    }

    pub(crate) fn push_action(&mut self, event: ActionEvent) {
        self.events.push(RecordedEvent::Action(event));
    }

    /// The full log in emission order.
    #[inline]
    pub fn events(&self) -> &[RecordedEvent] {
        &self.events
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    fn recorded_patches(&self) -> impl Iterator<Item = &RecordedPatch> {
        self.events.iter().filter_map(|event| match event {
            RecordedEvent::Patch(patch) => Some(patch),
            RecordedEvent::Action(_) => None,
        })
    }

    /// Patches in emission order.
    pub fn patches(&self) -> Vec<Patch> {
        self.recorded_patches().map(|recorded| recorded.patch.clone()).collect()
    }

    /// Inverse patches in emission order. Undo applies them back to front.
    pub fn inverse_patches(&self) -> Vec<Patch> {
        self.recorded_patches().map(|recorded| recorded.inverse.clone()).collect()
    }

    /// Top-level action calls, ready for [`Tree::apply_action`].
    pub fn actions(&self) -> Vec<ActionCall> {
        self.events
            .iter()
            .filter_map(|event| match event {
                RecordedEvent::Action(ActionEvent::Call(call)) if call.is_top_level() => Some(call.clone()),
                _ => None,
            })
            .collect()
    }

    /// Consecutive patches grouped by the top-level call that emitted them.
    pub fn groups(&self) -> Vec<PatchGroup> {
        let mut groups: Vec<PatchGroup> = Vec::new();
        for recorded in self.recorded_patches() {
            let root_id = recorded.action.map(|tag| tag.root_id);
            match groups.last_mut() {
                Some(group) if group.root_id == root_id => group.patches.push(recorded.patch.clone()),
                _ => groups.push(PatchGroup {
                    root_id,
                    patches: vec![recorded.patch.clone()],
                }),
            }
        }
        groups
    }
}

impl Tree {
    /// Start recording everything emitted inside the subtree of `node`.
    pub fn start_recording(&mut self, node: NodeId) -> EngineResult<RecorderId> {
        self.ensure_readable(node, "record")?;
        let id = self.next_recorder;
        self.next_recorder += 1;
        self.recorders.insert(
            id,
            ActiveRecorder {
                node,
                recording: Recording::default(),
            },
        );
        debug!(recorder = id, %node, "recording started");
        Ok(RecorderId(id))
    }

    /// Stop a recorder and hand back what it recorded.
    pub fn stop_recording(&mut self, id: RecorderId) -> Option<Recording> {
        self.recorders.shift_remove(&id.0).map(|recorder| recorder.recording)
    }

    pub fn recording(&self, id: RecorderId) -> Option<&Recording> {
        self.recorders.get(&id.0).map(|recorder| &recorder.recording)
    }

    /// Hand back what was recorded so far and keep recording into an empty log.
    pub fn take_recording(&mut self, id: RecorderId) -> Option<Recording> {
        self.recorders
            .get_mut(&id.0)
            .map(|recorder| std::mem::take(&mut recorder.recording))
    }

    /// Revert a recording made on `node` by applying its inverse patches in
    /// reverse order.
    pub fn undo(&mut self, node: NodeId, recording: &Recording) -> EngineResult<()> {
        let mut inverses = recording.inverse_patches();
        inverses.reverse();
        self.apply_patches(node, &inverses)
    }
}
