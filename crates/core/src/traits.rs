//! Collaborator seams: everything the syncer talks to but does not own.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{NameResolutionError, PatchError, StorageError};
use crate::resource::Resource;

/// Translates a name referenced at `path` into the opposite domain.
pub trait NameResolver: Send + Sync {
    fn translate_name(&self, name: &str, path: &str) -> Result<String, NameResolutionError>;
}

/// Read-only view of the externally maintained physical→virtual name mapping.
pub trait NameCache: Send + Sync {
    /// `None` means the mapping has not been observed (yet).
    fn resolve(&self, physical_name: &str, path: &str) -> Option<String>;
}

/// One transformation rule. Opaque to vsync: only the interpreter reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatchRule(pub Value);

/// Applies rules onto `target`, reading from `source`, calling `resolver` for
/// every rule that rewrites a reference. Must be idempotent once `target`
/// satisfies the rules.
pub trait PatchInterpreter: Send + Sync {
    fn apply(
        &self,
        target: &mut Resource,
        source: &Resource,
        rules: &[PatchRule],
        resolver: &dyn NameResolver,
    ) -> Result<(), PatchError>;
}

/// Storage of one side (virtual or physical). Patches are RFC 6902 documents.
/// Dropping a returned future aborts the write.
#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn create(&self, obj: &Resource) -> Result<(), StorageError>;
    async fn patch(&self, obj: &Resource, patch: &[u8]) -> Result<(), StorageError>;
    async fn patch_status(&self, obj: &Resource, patch: &[u8]) -> Result<(), StorageError>;
    async fn delete(&self, obj: &Resource) -> Result<(), StorageError>;
}

/// Label predicate deciding which virtual resources are in scope.
pub trait Selector: Send + Sync {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool;
}

/// Fire-and-forget warning events attached to a resource.
pub trait EventSink: Send + Sync {
    fn record_warning(&self, obj: &Resource, reason: &str, message: &str);
}
