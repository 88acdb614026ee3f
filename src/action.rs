//! Actions, flows and the events they emit.
//!
//! An action is a named closure registered on a model type. Calling it runs
//! the closure as one operation with the tree unprotected; nested calls are
//! tracked on a stack so every patch can be tagged with the call that caused
//! it. A flow is an action whose body is split into phases the caller drives
//! one at a time (`spawn_flow`, then `resume_flow` per phase, then
//! `finish_flow`, `fail_flow` or `abandon_flow`).

use crate::error::{EngineError, EngineResult};
use crate::path::{Path, split_path};
use crate::tree::{NodeId, Tree};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::ops::{Deref, DerefMut};
use tracing::debug;

/// The call a patch was emitted under.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionTag {
    pub call_id: u64,
    pub root_id: u64,
    /// 0 for a plain action; the resume count for a flow.
    pub phase: u32,
}

/// A serializable action invocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionCall {
    pub name: String,
    /// Path of the target node, relative to the observer.
    pub path: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<u64>,
    #[serde(default)]
    pub root_id: u64,
}

impl ActionCall {
    /// A call record for replay; ids are assigned when it runs.
    pub fn new(name: impl Into<String>, path: impl Into<String>, args: Vec<Value>) -> Self {
        ActionCall {
            name: name.into(),
            path: path.into(),
            args,
            id: 0,
            parent_id: None,
            root_id: 0,
        }
    }

    #[inline]
    pub fn is_top_level(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// How a call or flow ended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionCompletion {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionEvent {
    Call(ActionCall),
    FlowSpawn(ActionCall),
    FlowResume { id: u64, phase: u32 },
    /// The flow suspended; everything it did in the phase has been emitted.
    FlowYield { id: u64, phase: u32 },
    Complete(ActionCompletion),
    FlowAbandon { id: u64, phase: u32 },
}

impl ActionEvent {
    /// Re-express the target path relative to `prefix`.
    pub fn relative_to(&self, prefix: &Path) -> ActionEvent {
        match self {
            ActionEvent::Call(call) => ActionEvent::Call(relative_call(call, prefix)),
            ActionEvent::FlowSpawn(call) => ActionEvent::FlowSpawn(relative_call(call, prefix)),
            other => other.clone(),
        }
    }

    /// The id of the call or flow the event belongs to.
    pub fn id(&self) -> u64 {
        match self {
            ActionEvent::Call(call) | ActionEvent::FlowSpawn(call) => call.id,
            ActionEvent::Complete(completion) => completion.id,
            ActionEvent::FlowResume { id, .. } | ActionEvent::FlowYield { id, .. } | ActionEvent::FlowAbandon { id, .. } => {
                *id
            }
        }
    }
}

fn relative_call(call: &ActionCall, prefix: &Path) -> ActionCall {
    let path = Path::from(call.path.as_str())
        .strip_prefix(prefix)
        .map(|path| path.to_string())
        .unwrap_or_else(|| call.path.clone());
    ActionCall { path, ..call.clone() }
}

/// One entry of the running-call stack.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RunningCall {
    pub(crate) id: u64,
    pub(crate) root_id: u64,
    pub(crate) phase: u32,
    pub(crate) node: NodeId,
}

impl RunningCall {
    #[inline]
    pub(crate) fn tag(&self) -> ActionTag {
        ActionTag {
            call_id: self.id,
            root_id: self.root_id,
            phase: self.phase,
        }
    }
}

/// A flow between phases.
#[derive(Clone, Debug)]
pub(crate) struct FlowState {
    pub(crate) call: ActionCall,
    pub(crate) node: NodeId,
    pub(crate) phase: u32,
}

/// What an action body sees: the tree plus the node it was called on.
pub struct ActionContext<'t> {
    tree: &'t mut Tree,
    node: NodeId,
    call_id: u64,
}

impl ActionContext<'_> {
    /// The node the action was called on.
    #[inline]
    pub fn node(&self) -> NodeId {
        self.node
    }

    #[inline]
    pub fn call_id(&self) -> u64 {
        self.call_id
    }

    /// Set a property of the action's own node.
    pub fn set(&mut self, key: &str, value: Value) -> EngineResult<NodeId> {
        let node = self.node;
        self.tree.set_property(node, key, &value)
    }

    /// Snapshot of a property of the action's own node.
    pub fn get(&self, key: &str) -> EngineResult<Value> {
        let child = self.tree.model_child(self.node, key)?;
        self.tree.snapshot(child)
    }

    /// Call another action on the same node.
    pub fn call(&mut self, name: &str, args: &[Value]) -> EngineResult<Value> {
        let node = self.node;
        self.tree.call_action(node, name, args)
    }
}

impl Deref for ActionContext<'_> {
    type Target = Tree;

    fn deref(&self) -> &Tree {
        self.tree
    }
}

impl DerefMut for ActionContext<'_> {
    fn deref_mut(&mut self) -> &mut Tree {
        self.tree
    }
}

fn completion(id: u64, result: &EngineResult<Value>) -> ActionEvent {
    ActionEvent::Complete(match result {
        Ok(value) => ActionCompletion {
            id,
            result: Some(value.clone()),
            error: None,
        },
        Err(error) => ActionCompletion {
            id,
            result: None,
            error: Some(error.to_string()),
        },
    })
}

impl Tree {
    fn new_call(&mut self, node: NodeId, name: &str, args: &[Value]) -> ActionCall {
        let id = self.next_call;
        self.next_call += 1;
        let parent = self.calls.last();
        ActionCall {
            name: name.to_owned(),
            path: self.path_string(node),
            args: args.to_vec(),
            id,
            parent_id: parent.map(|call| call.id),
            root_id: parent.map_or(id, |call| call.root_id),
        }
    }

    /// Invoke the action `name` registered on the type of `node`.
    pub fn call_action(&mut self, node: NodeId, name: &str, args: &[Value]) -> EngineResult<Value> {
        let data = self.ensure_mutable(node, "call an action on")?;
        let body = data
            .ty
            .as_model()
            .and_then(|model| model.action(name))
            .cloned()
            .ok_or_else(|| EngineError::UnknownAction {
                name: name.to_owned(),
                ty: data.ty.name().to_owned(),
            })?;

        let call = self.new_call(node, name, args);
        let id = call.id;
        debug!(action = name, id, path = %call.path, "action call");
        self.calls.push(RunningCall {
            id,
            root_id: call.root_id,
            phase: 0,
            node,
        });
        self.notify_action(node, ActionEvent::Call(call));
        let result = self.run_operation(|tree| {
            let mut context = ActionContext {
                tree,
                node,
                call_id: id,
            };
            body(&mut context, args)
        });
        self.calls.pop();
        self.notify_action(node, completion(id, &result));
        result
    }

    /// Like [`Tree::call_action`], but a failing action leaves no trace in
    /// the tree: its patches are reverted.
    pub fn call_action_atomic(&mut self, node: NodeId, name: &str, args: &[Value]) -> EngineResult<Value> {
        self.atomic(|tree| tree.call_action(node, name, args))
    }

    /// Replay a recorded call against `target` (its path is relative to it).
    pub fn apply_action(&mut self, target: NodeId, call: &ActionCall) -> EngineResult<Value> {
        self.ensure_readable(target, "apply an action to")?;
        let node = self.descend(target, &split_path(&call.path), &call.path)?;
        self.call_action(node, &call.name, &call.args)
    }

    /// Start a flow on `node`. Nothing runs until [`Tree::resume_flow`].
    pub fn spawn_flow(&mut self, node: NodeId, name: &str, args: &[Value]) -> EngineResult<u64> {
        self.ensure_mutable(node, "spawn a flow on")?;
        let call = self.new_call(node, name, args);
        let id = call.id;
        debug!(flow = name, id, "flow spawned");
        self.notify_action(node, ActionEvent::FlowSpawn(call.clone()));
        self.flows.insert(id, FlowState { call, node, phase: 0 });
        Ok(id)
    }

    fn flow(&self, id: u64) -> EngineResult<&FlowState> {
        self.flows
            .get(&id)
            .ok_or_else(|| EngineError::invariant(format!("no running flow with id {id}")))
    }

    /// Run one synchronous phase of a flow. A failing phase fails the flow.
    pub fn resume_flow<F>(&mut self, id: u64, step: F) -> EngineResult<Value>
    where
        F: FnOnce(&mut ActionContext<'_>) -> EngineResult<Value>,
    {
        let flow = self.flow(id)?;
        let node = flow.node;
        let root_id = flow.call.root_id;
        let phase = flow.phase + 1;
        self.ensure_mutable(node, "resume a flow on")?;
        if let Some(flow) = self.flows.get_mut(&id) {
            flow.phase = phase;
        }

        self.notify_action(node, ActionEvent::FlowResume { id, phase });
        self.calls.push(RunningCall {
            id,
            root_id,
            phase,
            node,
        });
        let result = self.run_operation(|tree| {
            let mut context = ActionContext {
                tree,
                node,
                call_id: id,
            };
            step(&mut context)
        });
        self.calls.pop();
        self.notify_action(node, ActionEvent::FlowYield { id, phase });

        if let Err(error) = &result {
            self.fail_flow(id, error.to_string())?;
        }
        result
    }

    /// Complete a flow with its result.
    pub fn finish_flow(&mut self, id: u64, result: Value) -> EngineResult<()> {
        let flow = self.take_flow(id)?;
        debug!(id, phases = flow.phase, "flow finished");
        self.notify_action(flow.node, completion(id, &Ok(result)));
        Ok(())
    }

    /// Complete a flow with an error. Its patches stay applied.
    pub fn fail_flow(&mut self, id: u64, error: impl Into<String>) -> EngineResult<()> {
        let flow = self.take_flow(id)?;
        let error = error.into();
        debug!(id, %error, "flow failed");
        self.notify_action(
            flow.node,
            ActionEvent::Complete(ActionCompletion {
                id,
                result: None,
                error: Some(error),
            }),
        );
        Ok(())
    }

    /// Drop a flow that will never resume.
    pub fn abandon_flow(&mut self, id: u64) -> EngineResult<()> {
        let flow = self.take_flow(id)?;
        debug!(id, "flow abandoned");
        self.notify_action(flow.node, ActionEvent::FlowAbandon { id, phase: flow.phase });
        Ok(())
    }

    /// Ids of flows that are spawned and not yet completed.
    pub fn running_flows(&self) -> Vec<u64> {
        self.flows.keys().copied().collect()
    }

    fn take_flow(&mut self, id: u64) -> EngineResult<FlowState> {
        self.flows
            .shift_remove(&id)
            .ok_or_else(|| EngineError::invariant(format!("no running flow with id {id}")))
    }
}
