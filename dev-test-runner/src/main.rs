//! Fixture-driven scenarios.
//!
//! Each fixture declares a type library, an initial snapshot, a list of
//! mutation steps and the expected final snapshot. Besides the final state,
//! every scenario checks that replaying the recorded patches on a fresh tree
//! reaches the same state and that undoing them restores the initial one.
//!
//! Usage: `dev-test-runner [FIXTURE_DIR] [NAME_REGEX]`
use anyhow::{Context, Result, anyhow, bail};
use colored::Colorize;
use json_state_tree::types::decl::TypeLibrary;
use json_state_tree::{EngineConfig, NodeId, Patch, Tree, TreeOptions};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Deserialize)]
struct Scenario {
    #[serde(default)]
    description: String,
    #[serde(default)]
    config: EngineConfig,
    library: TypeLibrary,
    root: String,
    initial: Value,
    steps: Vec<Step>,
    expected: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Step {
    ApplySnapshot { path: String, value: Value },
    ApplyPatches { patches: Vec<Patch> },
    Set { path: String, key: String, value: Value },
    SetItem { path: String, index: usize, value: Value },
    Insert { path: String, index: usize, value: Value },
    Push { path: String, value: Value },
    Remove { path: String, index: usize },
    Move { path: String, from: usize, to: usize },
    MapSet { path: String, key: String, value: Value },
    MapDelete { path: String, key: String },
    Destroy { path: String },
    /// The inner step must fail with a message matching `error` and change nothing.
    Fails { step: Box<Step>, error: String },
    /// The reference at `path` must resolve to the node at `target`.
    Resolves { path: String, target: String },
}

// ————————————————————————————————————————————————————————————————————————————
// IMPLEMENTATION
// ————————————————————————————————————————————————————————————————————————————

// Node ids differ between runs; fixtures never spell them out.
static NODE_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"#\d+\.\d+").unwrap());

fn node(tree: &Tree, path: &str) -> Result<NodeId> {
    Ok(tree.resolve_path(tree.root(), path)?)
}

impl Step {
    fn run(&self, tree: &mut Tree) -> Result<()> {
        match self {
            Step::ApplySnapshot { path, value } => {
                tree.apply_snapshot(node(tree, path)?, value)?;
            }
            Step::ApplyPatches { patches } => {
                let root = tree.root();
                tree.apply_patches(root, patches)?;
            }
            Step::Set { path, key, value } => {
                tree.set_property(node(tree, path)?, key, value)?;
            }
            Step::SetItem { path, index, value } => {
                tree.set_item(node(tree, path)?, *index, value)?;
            }
            Step::Insert { path, index, value } => {
                tree.insert_item(node(tree, path)?, *index, value)?;
            }
            Step::Push { path, value } => {
                tree.push_item(node(tree, path)?, value)?;
            }
            Step::Remove { path, index } => {
                tree.remove_item(node(tree, path)?, *index)?;
            }
            Step::Move { path, from, to } => {
                tree.move_item(node(tree, path)?, *from, *to)?;
            }
            Step::MapSet { path, key, value } => {
                tree.map_set(node(tree, path)?, key, value)?;
            }
            Step::MapDelete { path, key } => {
                tree.map_delete(node(tree, path)?, key)?;
            }
            Step::Destroy { path } => {
                tree.destroy(node(tree, path)?)?;
            }
            Step::Fails { step, error } => {
                let pattern = Regex::new(error).with_context(|| format!("bad error pattern {error:?}"))?;
                let before = tree.snapshot(tree.root())?;
                match step.run(tree) {
                    Ok(()) => bail!("expected {step:?} to fail"),
                    Err(err) => {
                        let message = NODE_ID.replace_all(&format!("{err:#}"), "#node").into_owned();
                        if !pattern.is_match(&message) {
                            bail!("error {message:?} does not match /{error}/");
                        }
                    }
                }
                if tree.snapshot(tree.root())? != before {
                    bail!("failed step {step:?} changed the tree");
                }
            }
            Step::Resolves { path, target } => {
                let resolved = tree.resolve(node(tree, path)?)?;
                let expected = node(tree, target)?;
                if resolved != expected {
                    bail!("{path} resolved to {}, expected {target}", tree.path(resolved)?);
                }
            }
        }
        Ok(())
    }
}

impl Scenario {
    fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        let de = &mut serde_json::Deserializer::from_str(&source);
        serde_path_to_error::deserialize(de).map_err(|err| anyhow!("at {}: {}", err.path(), err.inner()))
    }

    fn run(&self) -> Result<()> {
        let library = self.library.compile(&self.config)?;
        let ty = library.require(&self.root)?;
        let mut tree = Tree::with_options(ty, &self.initial, TreeOptions::from(&self.config))?;
        let recorder = tree.start_recording(tree.root())?;

        for (index, step) in self.steps.iter().enumerate() {
            step.run(&mut tree).with_context(|| format!("step {index}"))?;
        }
        let actual = tree.snapshot(tree.root())?;
        if actual != self.expected {
            bail!(
                "final snapshot differs\n  expected: {}\n  actual:   {}",
                self.expected,
                actual
            );
        }

        let recording = tree.stop_recording(recorder).ok_or_else(|| anyhow!("recorder vanished"))?;
        let mut replay = Tree::with_options(ty, &self.initial, TreeOptions::from(&self.config))?;
        let replay_root = replay.root();
        replay
            .apply_patches(replay_root, &recording.patches())
            .context("replaying recorded patches")?;
        let replayed = replay.snapshot(replay.root())?;
        if replayed != self.expected {
            bail!("patch replay differs\n  expected: {}\n  actual:   {}", self.expected, replayed);
        }

        let root = tree.root();
        tree.undo(root, &recording).context("undoing recorded patches")?;
        let undone = tree.snapshot(tree.root())?;
        if undone != self.initial {
            bail!("undo differs\n  expected: {}\n  actual:   {}", self.initial, undone);
        }
        Ok(())
    }
}

// ————————————————————————————————————————————————————————————————————————————
// ENTRY
// ————————————————————————————————————————————————————————————————————————————

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let dir = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/fixtures")));
    let filter = args.next().map(|pattern| Regex::new(&pattern)).transpose()?;

    let mut fixtures: Vec<PathBuf> = std::fs::read_dir(&dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .filter(|path| {
            let name = path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
            filter.as_ref().is_none_or(|filter| filter.is_match(&name))
        })
        .collect();
    fixtures.sort();

    let mut failed = 0;
    for path in &fixtures {
        let name = path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
        let result = Scenario::load(path).and_then(|scenario| {
            scenario.run().map(|()| scenario.description)
        });
        match result {
            Ok(description) => println!("{} {name} {}", "ok".green(), description.dimmed()),
            Err(error) => {
                failed += 1;
                println!("{} {name}\n    {error:#}", "FAILED".red().bold());
            }
        }
    }
    println!("{} passed, {failed} failed", fixtures.len() - failed);
    if failed > 0 {
        bail!("{failed} scenario(s) failed");
    }
    Ok(())
}
