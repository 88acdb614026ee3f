//! Validation context and results.
//!
//! A validation pass descends through the type tree carrying a [`Context`]: the
//! ordered `(subpath, type)` frames from the validated root to the current
//! position. Failures are collected, never thrown, so unions and collections
//! can aggregate the errors of every branch.

use crate::path::join_segments;
use crate::types::Type;
use serde_json::Value;
use std::fmt;

/// One frame of a validation context.
#[derive(Clone, Debug)]
pub struct ContextEntry {
    /// The subpath under the previous frame (`""` for the root frame).
    pub path: String,
    /// The type that governs this position.
    pub ty: Type,
}

/// The chain of frames from the validated root to the current position.
#[derive(Clone, Debug, Default)]
pub struct Context {
    entries: Vec<ContextEntry>,
}

impl Context {
    /// A context holding just the root frame.
    pub fn root(ty: &Type) -> Self {
        Self {
            entries: vec![ContextEntry {
                path: String::new(),
                ty: ty.clone(),
            }],
        }
    }

    /// Build a context from explicit frames.
    pub fn from_entries(entries: Vec<ContextEntry>) -> Self {
        Self { entries }
    }

    /// Extend the context by one frame.
    pub fn child(&self, subpath: impl Into<String>, ty: &Type) -> Self {
        let mut entries = Vec::with_capacity(self.entries.len() + 1);
        entries.extend(self.entries.iter().cloned());
        entries.push(ContextEntry {
            path: subpath.into(),
            ty: ty.clone(),
        });
        Self { entries }
    }

    /// The frames, root first.
    #[inline]
    pub fn entries(&self) -> &[ContextEntry] {
        &self.entries
    }

    /// The slash-delimited path of the current position.
    pub fn path(&self) -> String {
        join_segments(
            self.entries
                .iter()
                .map(|entry| entry.path.as_str())
                .filter(|path| !path.is_empty()),
        )
    }

    /// The type of the innermost frame.
    #[inline]
    pub fn leaf_type(&self) -> Option<&Type> {
        self.entries.last().map(|entry| &entry.ty)
    }
}

/// A single validation failure.
#[derive(Clone, Debug)]
pub struct ValidationError {
    /// Where the failure happened.
    pub context: Context,
    /// The offending value.
    pub value: Value,
    /// What was wrong with it.
    pub message: Option<String>,
}

impl ValidationError {
    /// Create an error for `value` at `context`.
    pub fn new(context: &Context, value: &Value, message: impl Into<String>) -> Self {
        Self {
            context: context.clone(),
            value: value.clone(),
            message: Some(message.into()),
        }
    }

    /// The path of the offending value.
    #[inline]
    pub fn path(&self) -> String {
        self.context.path()
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at path \"{}\" value `{}` is not assignable", self.path(), self.value)?;
        if let Some(ty) = self.context.leaf_type() {
            write!(f, " to type: `{}`", ty.name())?;
        }
        if let Some(message) = &self.message {
            write!(f, " ({message})")?;
        }
        Ok(())
    }
}

/// Outcome of a validation pass: success, or every error found.
#[derive(Clone, Debug, Default)]
#[must_use]
pub struct ValidationResult {
    errors: Vec<ValidationError>,
}

impl ValidationResult {
    /// A successful result.
    #[inline]
    pub fn success() -> Self {
        Self { errors: Vec::new() }
    }

    /// A result holding one error.
    pub fn failure(context: &Context, value: &Value, message: impl Into<String>) -> Self {
        Self {
            errors: vec![ValidationError::new(context, value, message)],
        }
    }

    /// True when no error was found.
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// True when at least one error was found.
    #[inline]
    pub fn is_err(&self) -> bool {
        !self.errors.is_empty()
    }

    /// The collected errors, in discovery order.
    #[inline]
    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    /// Consume into the collected errors.
    #[inline]
    pub fn into_errors(self) -> Vec<ValidationError> {
        self.errors
    }

    /// Append one error.
    #[inline]
    pub fn push(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    /// Append every error of `other`.
    #[inline]
    pub fn extend(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
    }

    /// Turn into a `Result`, naming the type the value was checked against.
    pub fn into_result(self, ty: &Type, value: &Value) -> Result<(), ValidationFailure> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationFailure {
                type_name: ty.name().to_owned(),
                value: value.clone(),
                errors: self.errors,
            })
        }
    }
}

impl FromIterator<ValidationResult> for ValidationResult {
    fn from_iter<I: IntoIterator<Item = ValidationResult>>(iter: I) -> Self {
        let mut out = ValidationResult::success();
        for result in iter {
            out.extend(result);
        }
        out
    }
}

/// A rejected value, listing every offending path.
#[derive(Clone, Debug)]
pub struct ValidationFailure {
    /// Name of the type the value was checked against.
    pub type_name: String,
    /// The rejected value.
    pub value: Value,
    /// Every error found, never empty.
    pub errors: Vec<ValidationError>,
}

impl ValidationFailure {
    /// Paths of all offending values, in discovery order.
    pub fn paths(&self) -> Vec<String> {
        self.errors.iter().map(ValidationError::path).collect()
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut shown = self.value.to_string();
        if shown.chars().count() > 80 {
            shown = shown.chars().take(77).collect::<String>() + "...";
        }
        write!(f, "error while converting `{shown}` to `{}`:", self.type_name)?;
        for error in &self.errors {
            write!(f, "\n\n    {error}.")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationFailure {}
