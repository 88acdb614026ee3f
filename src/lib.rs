//! Typed, observable JSON state trees.
//!
//! Declare the shape of your state with [`types`], instantiate a snapshot into
//! a [`Tree`] of live nodes, then mutate it through validated operations,
//! patches or actions. Every change is described by a [`Patch`] and can be
//! observed, recorded, replayed and undone.

pub mod action;
pub mod config;
pub mod environment;
pub mod error;
pub mod observable;
pub mod patch;
pub mod path;
pub mod path_de;
pub mod recorder;
pub mod tree;
pub mod types;
pub mod validation;

pub use action::{ActionCall, ActionContext, ActionEvent};
pub use config::{EngineConfig, TreeOptions};
pub use environment::Environment;
pub use error::{EngineError, EngineResult};
pub use observable::{BoxHandle, BoxListener, MemorySubstrate, ReactiveSubstrate, Subscription};
pub use patch::{Patch, PatchOp};
pub use path::Path;
pub use recorder::{RecorderId, Recording};
pub use tree::{ApplyOutcome, LifecycleState, ListenerId, NodeId, Tree};
pub use types::Type;
pub use validation::{ValidationError, ValidationFailure};
