//! CLI: validate | diff | replay | describe against a declared type library.
use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use json_state_tree::types::decl::{CompiledLibrary, TypeLibrary};
use json_state_tree::{EngineConfig, Patch, Tree, TreeOptions, Type};
use rayon::prelude::*;
use serde_json::Value;
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

/// validate, diff and replay JSON snapshots against declared state-tree types
#[derive(Parser, Debug)]
pub struct CommandLineInterface {
    /// engine settings (JSON file, see `EngineConfig`)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// validate documents against a type
    Validate(ValidateCmd),
    /// instantiate `--from`, apply `--to`, print the patches
    Diff(DiffCmd),
    /// apply a patch file to a snapshot and print the result
    Replay(ReplayCmd),
    /// print type descriptions
    Describe(DescribeCmd),
}

#[derive(Args, Debug, Clone)]
struct TypeSettings {
    /// type library (JSON file of named declarations)
    #[arg(long, short)]
    types: PathBuf,

    /// name of the root type in the library
    #[arg(long = "type", short = 'T')]
    type_name: String,
}

#[derive(Args, Debug, Clone)]
struct InputSettings {
    /// treat input as newline-delimited JSON (NDJSON)
    #[arg(long, default_value_t = false)]
    ndjson: bool,

    /// JSON Pointer to select a subnode in each document (e.g. /data/items/0/payload)
    #[arg(long)]
    json_pointer: Option<String>,

    /// JQ pre-process filter for each document.
    #[arg(long)]
    jq_expr: Option<String>,

    /// One or more inputs. May be literal paths or quoted glob patterns
    #[arg(long, short, num_args = 1.., required = true)]
    input: Vec<String>,
}

#[derive(clap::Parser, Debug)]
struct ValidateCmd {
    #[command(flatten)]
    type_settings: TypeSettings,

    #[command(flatten)]
    input_settings: InputSettings,

    /// only print failures
    #[arg(long, short)]
    quiet: bool,
}

#[derive(clap::Parser, Debug)]
struct DiffCmd {
    #[command(flatten)]
    type_settings: TypeSettings,

    /// starting snapshot
    #[arg(long)]
    from: PathBuf,

    /// target snapshot
    #[arg(long)]
    to: PathBuf,

    /// include `oldValue` in the printed patches
    #[arg(long)]
    old_values: bool,

    /// output .json file (stdout if omitted)
    #[arg(short, long)]
    out: Option<PathBuf>,
}

#[derive(clap::Parser, Debug)]
struct ReplayCmd {
    #[command(flatten)]
    type_settings: TypeSettings,

    /// starting snapshot
    #[arg(long)]
    snapshot: PathBuf,

    /// JSON array of patches
    #[arg(long)]
    patches: PathBuf,

    /// roll back every patch when one fails
    #[arg(long)]
    atomic: bool,

    /// output .json file (stdout if omitted)
    #[arg(short, long)]
    out: Option<PathBuf>,
}

#[derive(clap::Parser, Debug)]
struct DescribeCmd {
    /// type library (JSON file of named declarations)
    #[arg(long, short)]
    types: PathBuf,

    /// only this type (all when omitted)
    #[arg(long = "type", short = 'T')]
    type_name: Option<String>,
}

struct Document {
    source: String,
    value: Value,
}

// ————————————————————————————————————————————————————————————————————————————
// IMPLEMENTATION
// ————————————————————————————————————————————————————————————————————————————

impl TypeSettings {
    fn load(&self, config: &EngineConfig) -> Result<Type> {
        let library = load_library(&self.types, config)?;
        Ok(library.require(&self.type_name)?.clone())
    }
}

impl InputSettings {
    fn load_documents(&self) -> Result<Vec<Document>> {
        let source_paths = resolve_file_path_patterns(&self.input)
            .map_err(|error| anyhow!("failed to resolve input file paths: {error}"))?;
        let mut documents = Vec::new();
        for source_path in source_paths {
            let source_path_str = source_path.to_string_lossy().to_string();
            let source = std::fs::read_to_string(&source_path)
                .with_context(|| format!("failed to read source file {source_path_str}"))?;
            let values = if self.ndjson {
                source
                    .lines()
                    .enumerate()
                    .filter(|(_, line)| !line.trim().is_empty())
                    .map(|(index, line)| {
                        serde_json::from_str::<Value>(line)
                            .map(|value| (format!("{source_path_str}:{}", index + 1), value))
                            .with_context(|| format!("failed to parse line {} of {source_path_str}", index + 1))
                    })
                    .collect::<Result<Vec<_>>>()?
            } else {
                let value = serde_json::from_str::<Value>(&source)
                    .with_context(|| format!("failed to parse JSON source file {source_path_str}"))?;
                vec![(source_path_str.clone(), value)]
            };
            for (source, value) in values {
                self.preprocess(source, value, &mut documents)?;
            }
        }
        Ok(documents)
    }

    fn preprocess(&self, source: String, value: Value, out: &mut Vec<Document>) -> Result<()> {
        let values = match self.jq_expr.as_ref() {
            None => vec![value],
            Some(jq_expr) => crate::jq_exec::run_jaq(jq_expr, &value)
                .with_context(|| format!("failed to apply jq expression to {source}"))?,
        };
        let many = values.len() > 1;
        for (index, value) in values.into_iter().enumerate() {
            let source = if many { format!("{source}#{index}") } else { source.clone() };
            let value = match self.json_pointer.as_deref() {
                None => value,
                Some(pointer) => value
                    .pointer(pointer)
                    .cloned()
                    .ok_or_else(|| anyhow!("{source}: JSON pointer {pointer} selects nothing"))?,
            };
            out.push(Document { source, value });
        }
        Ok(())
    }
}

impl CommandLineInterface {
    pub fn load() -> Self {
        Self::parse()
    }

    /// Returns false when the command ran but found problems.
    pub fn run(&self) -> Result<bool> {
        let config = match self.config.as_deref() {
            Some(path) => EngineConfig::load(path).with_context(|| format!("failed to load config {}", path.display()))?,
            None => EngineConfig::default(),
        };
        match &self.cmd {
            Command::Validate(target) => target.run(&config),
            Command::Diff(target) => target.run(&config),
            Command::Replay(target) => target.run(&config),
            Command::Describe(target) => target.run(&config),
        }
    }
}

impl ValidateCmd {
    fn run(&self, config: &EngineConfig) -> Result<bool> {
        let ty = self.type_settings.load(config)?;
        let documents = self.input_settings.load_documents()?;
        let results: Vec<_> = documents
            .par_iter()
            .map(|document| (document, ty.validate(&document.value)))
            .collect();

        let mut failed = 0usize;
        for (document, result) in &results {
            if result.is_ok() {
                if !self.quiet {
                    println!("{} {}", "✔".green(), document.source);
                }
                continue;
            }
            failed += 1;
            println!("{} {}", "✘".red().bold(), document.source.bold());
            for error in result.errors() {
                let message = error.message.as_deref().unwrap_or("invalid value");
                let path = error.path();
                let path = if path.is_empty() { "/".to_owned() } else { path };
                println!("    {} {} {}", path.yellow(), "→".dimmed(), message);
            }
        }
        let summary = format!("{} of {} documents valid", results.len() - failed, results.len());
        if failed == 0 {
            eprintln!("{}", summary.green());
        } else {
            eprintln!("{}", summary.red());
        }
        Ok(failed == 0)
    }
}

impl DiffCmd {
    fn run(&self, config: &EngineConfig) -> Result<bool> {
        let ty = self.type_settings.load(config)?;
        let from = read_json(&self.from)?;
        let to = read_json(&self.to)?;

        let mut tree = Tree::with_options(&ty, &from, TreeOptions::from(config))
            .with_context(|| format!("{} is not a valid `{}`", self.from.display(), ty.name()))?;
        let root = tree.root();
        let patches = Rc::new(RefCell::new(Vec::<Patch>::new()));
        let sink = patches.clone();
        tree.on_patch(root, move |patch, _| sink.borrow_mut().push(patch.clone()))?;

        let outcome = tree
            .apply_snapshot(root, &to)
            .with_context(|| format!("{} is not a valid `{}`", self.to.display(), ty.name()))?;
        if outcome.identity_changed {
            eprintln!("{}", "note: the root node was replaced".yellow());
        }

        let patches: Vec<Patch> = patches
            .borrow()
            .iter()
            .map(|patch| if self.old_values { patch.clone() } else { patch.without_old_value() })
            .collect();
        write_output(self.out.as_deref(), &serde_json::to_string_pretty(&patches)?)?;
        Ok(true)
    }
}

impl ReplayCmd {
    fn run(&self, config: &EngineConfig) -> Result<bool> {
        let ty = self.type_settings.load(config)?;
        let snapshot = read_json(&self.snapshot)?;
        let source = std::fs::read_to_string(&self.patches)
            .with_context(|| format!("failed to read {}", self.patches.display()))?;
        let patches: Vec<Patch> = json_state_tree::path_de::from_str(&source)
            .with_context(|| format!("failed to parse patches in {}", self.patches.display()))?;

        let options = TreeOptions::from(config).atomic_patches(self.atomic || config.atomic_patches);
        let mut tree = Tree::with_options(&ty, &snapshot, options)
            .with_context(|| format!("{} is not a valid `{}`", self.snapshot.display(), ty.name()))?;
        let root = tree.root();
        tree.apply_patches(root, &patches)
            .context("failed to apply patches")?;
        let result = tree.snapshot(tree.root())?;
        write_output(self.out.as_deref(), &serde_json::to_string_pretty(&result)?)?;
        Ok(true)
    }
}

impl DescribeCmd {
    fn run(&self, config: &EngineConfig) -> Result<bool> {
        let library = load_library(&self.types, config)?;
        let names: Vec<String> = match &self.type_name {
            Some(name) => vec![name.clone()],
            None => library.names().map(str::to_owned).collect(),
        };
        for name in names {
            let ty = library.require(&name)?;
            println!("{} = {}", name.bold(), ty.describe());
        }
        Ok(true)
    }
}

// ————————————————————————————————————————————————————————————————————————————
// INTERNAL HELPERS
// ————————————————————————————————————————————————————————————————————————————

fn load_library(path: &Path, config: &EngineConfig) -> Result<CompiledLibrary> {
    let library = TypeLibrary::load(path).with_context(|| format!("failed to load type library {}", path.display()))?;
    Ok(library.compile(config)?)
}

fn read_json(path: &Path) -> Result<Value> {
    let source = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&source).with_context(|| format!("failed to parse JSON file {}", path.display()))
}

fn write_output(out: Option<&Path>, contents: &str) -> Result<()> {
    match out {
        Some(out) => {
            if let Some(parent) = out.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(out, contents).with_context(|| format!("failed to write {}", out.display()))
        }
        None => {
            println!("{contents}");
            Ok(())
        }
    }
}

fn resolve_file_path_patterns<I>(patterns: I) -> Result<Vec<PathBuf>>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    fn has_glob_chars(s: &str) -> bool {
        // Minimal glob detection for the `glob` crate syntax.
        s.bytes().any(|b| matches!(b, b'*' | b'?' | b'['))
    }

    let mut out = Vec::<PathBuf>::new();

    for raw in patterns {
        let pattern = raw.as_ref();

        if has_glob_chars(pattern) {
            let mut matched_any = false;
            for entry in glob::glob(pattern)? {
                out.push(entry?);
                matched_any = true;
            }
            if !matched_any {
                bail!("glob pattern matched no files: {pattern}");
            }
        } else {
            out.push(PathBuf::from(pattern));
        }
    }

    Ok(out)
}
