//! vsync core types: resource documents, field paths, minimal structural diffs
//! and the collaborator traits the syncer is wired against.

#![forbid(unsafe_code)]

pub mod diff;
pub mod error;
pub mod path;
pub mod resource;
pub mod traits;

pub use diff::{diff, encode_patch, PatchOp};
pub use error::{NameResolutionError, PatchError, PathError, ResourceError, StorageError, StorageErrorKind};
pub use path::FieldPath;
pub use resource::{ObjectRef, Resource};
pub use traits::{EventSink, NameCache, NameResolver, PatchInterpreter, PatchRule, Selector, StorageClient};

use serde::{Deserialize, Serialize};

/// Annotation on a physical object naming its virtual counterpart.
pub const OBJECT_NAME_ANNOTATION: &str = "vsync.io/object-name";
/// Annotation on a physical object naming the namespace of its virtual counterpart.
pub const OBJECT_NAMESPACE_ANNOTATION: &str = "vsync.io/object-namespace";
/// Label marking physical objects owned by a vsync instance (value: instance suffix).
pub const MANAGED_BY_LABEL: &str = "vsync.io/managed-by";

/// What a mutate→diff→patch pass ended up writing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    #[default]
    NoChange,
    BodyUpdated,
    StatusUpdated,
    BodyAndStatusUpdated,
}

impl ChangeKind {
    pub fn from_flags(body: bool, status: bool) -> Self {
        match (body, status) {
            (false, false) => ChangeKind::NoChange,
            (true, false) => ChangeKind::BodyUpdated,
            (false, true) => ChangeKind::StatusUpdated,
            (true, true) => ChangeKind::BodyAndStatusUpdated,
        }
    }

    pub fn body_updated(self) -> bool {
        matches!(self, ChangeKind::BodyUpdated | ChangeKind::BodyAndStatusUpdated)
    }

    pub fn status_updated(self) -> bool {
        matches!(self, ChangeKind::StatusUpdated | ChangeKind::BodyAndStatusUpdated)
    }

    pub fn is_change(self) -> bool { self != ChangeKind::NoChange }
}

pub mod prelude {
    pub use super::{
        ChangeKind, EventSink, FieldPath, NameCache, NameResolutionError, NameResolver, ObjectRef, PatchError,
        PatchInterpreter, PatchOp, PatchRule, Resource, Selector, StorageClient, StorageError, StorageErrorKind,
    };
}
