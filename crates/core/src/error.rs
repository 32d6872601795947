//! Error types shared across vsync crates.

use std::fmt;

use thiserror::Error;

/// Failure to address a node inside a document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("path {path}: segment {segment:?} is not a sequence index")]
    BadIndex { path: String, segment: String },
    #[error("path {path}: index {index} out of bounds")]
    OutOfBounds { path: String, index: usize },
    #[error("path {path}: cannot descend into a scalar")]
    NotAContainer { path: String },
}

/// A document could not be used as a resource.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    #[error("resource must be a JSON/YAML object")]
    NotAnObject,
    #[error("resource missing {0}")]
    MissingField(&'static str),
}

/// The reverse resolver has no mapping for a physical name (yet).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("could not translate {name} physical resource name to virtual resource name (field {path:?})")]
pub struct NameResolutionError {
    pub name: String,
    pub path: String,
}

/// Failure reported by a patch interpreter while applying rules.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error(transparent)]
    NameResolution(#[from] NameResolutionError),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("rule {index}: {message}")]
    Rule { index: usize, message: String },
}

impl PatchError {
    pub fn rule(index: usize, message: impl Into<String>) -> Self {
        PatchError::Rule { index, message: message.into() }
    }
}

/// Coarse classification of storage failures. `Invalid` marks writes the
/// target rejected as structurally invalid, which is usually a timing race.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageErrorKind {
    Invalid,
    Conflict,
    AlreadyExists,
    NotFound,
    Other,
}

impl fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StorageErrorKind::Invalid => "invalid",
            StorageErrorKind::Conflict => "conflict",
            StorageErrorKind::AlreadyExists => "already exists",
            StorageErrorKind::NotFound => "not found",
            StorageErrorKind::Other => "error",
        };
        f.write_str(s)
    }
}

/// Error returned by a [`crate::StorageClient`].
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct StorageError {
    kind: StorageErrorKind,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl StorageError {
    pub fn new(kind: StorageErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), source: None }
    }

    pub fn invalid(message: impl Into<String>) -> Self { Self::new(StorageErrorKind::Invalid, message) }
    pub fn conflict(message: impl Into<String>) -> Self { Self::new(StorageErrorKind::Conflict, message) }
    pub fn not_found(message: impl Into<String>) -> Self { Self::new(StorageErrorKind::NotFound, message) }
    pub fn other(message: impl Into<String>) -> Self { Self::new(StorageErrorKind::Other, message) }

    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> StorageErrorKind { self.kind }
    pub fn message(&self) -> &str { &self.message }

    /// True for validation-class rejections (transient inconsistency of the target).
    pub fn is_invalid(&self) -> bool { self.kind == StorageErrorKind::Invalid }
}
