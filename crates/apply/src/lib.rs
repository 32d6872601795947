//! vsync apply: mutate a resource, diff it against its pre-mutation snapshot
//! and persist minimal JSON patches, with the status sub-document written
//! separately from the body.

#![forbid(unsafe_code)]

use std::fmt;

use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use thiserror::Error;
use tracing::debug;
use vsync_core::{
    diff, encode_patch, ChangeKind, NameResolutionError, ObjectRef, PatchError, PatchOp, Resource, StorageClient,
    StorageError,
};

/// Which of the two writes failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Write {
    Body,
    Status,
}

impl fmt::Display for Write {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Write::Body => "body",
            Write::Status => "status",
        })
    }
}

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("failed to apply declared patches to {target}: {source}")]
    Mutate {
        target: ObjectRef,
        #[source]
        source: PatchError,
    },
    #[error("failed to encode {write} patch for {target}: {source}")]
    Encode {
        target: ObjectRef,
        write: Write,
        partial: ChangeKind,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write {write} of {target}: {source}")]
    Persist {
        target: ObjectRef,
        write: Write,
        partial: ChangeKind,
        #[source]
        source: StorageError,
    },
}

impl ApplyError {
    /// Change that was persisted before the failure.
    pub fn partial(&self) -> ChangeKind {
        match self {
            ApplyError::Mutate { .. } => ChangeKind::NoChange,
            ApplyError::Encode { partial, .. } | ApplyError::Persist { partial, .. } => *partial,
        }
    }

    pub fn target(&self) -> &ObjectRef {
        match self {
            ApplyError::Mutate { target, .. } | ApplyError::Encode { target, .. } | ApplyError::Persist { target, .. } => {
                target
            }
        }
    }

    /// The storage rejected a write as structurally invalid.
    pub fn is_invalid(&self) -> bool { matches!(self, ApplyError::Persist { source, .. } if source.is_invalid()) }

    pub fn name_resolution(&self) -> Option<&NameResolutionError> {
        match self {
            ApplyError::Mutate { source: PatchError::NameResolution(e), .. } => Some(e),
            _ => None,
        }
    }
}

/// Patches needed to go from a before-image to an after-image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatchPlan {
    /// Ops against the body (status excluded when it is a subresource).
    pub body: Vec<PatchOp>,
    /// Ops for the status write: full before-image vs. after-body with the new
    /// status attached. Empty unless status is a subresource and it changed.
    pub status: Vec<PatchOp>,
}

impl PatchPlan {
    pub fn is_empty(&self) -> bool { self.body.is_empty() && self.status.is_empty() }
}

fn split_status(v: &Json, status_is_subresource: bool) -> (Json, Option<Json>) {
    let status = v.get("status").cloned();
    let mut body = v.clone();
    if status_is_subresource {
        if let Some(obj) = body.as_object_mut() { obj.remove("status"); }
    }
    (body, status)
}

/// Compute the body and status patches between two full documents.
pub fn plan(before: &Json, after: &Json, status_is_subresource: bool) -> PatchPlan {
    let (before_body, before_status) = split_status(before, status_is_subresource);
    let (after_body, after_status) = split_status(after, status_is_subresource);

    let body = if before_body != after_body { diff(&before_body, &after_body) } else { Vec::new() };

    let status_changed = (before_status.is_some() || after_status.is_some()) && before_status != after_status;
    let status = if status_is_subresource && status_changed {
        let mut composed = after_body;
        if let (Some(obj), Some(st)) = (composed.as_object_mut(), after_status) {
            obj.insert("status".into(), st);
        }
        diff(before, &composed)
    } else {
        Vec::new()
    };
    PatchPlan { body, status }
}

/// Snapshot `obj`, run `mutate` on it, then persist the minimal body patch and
/// (independently) the status patch through `client`.
///
/// Nothing is written when `mutate` fails. On a write failure the error reports
/// the change already persisted (see [`ApplyError::partial`]); a body write that
/// landed before a failed or cancelled status write is left for the next pass.
pub async fn apply_and_persist<C, F>(
    client: &C,
    obj: &mut Resource,
    status_is_subresource: bool,
    mutate: F,
) -> Result<ChangeKind, ApplyError>
where
    C: StorageClient + ?Sized,
    F: FnOnce(&mut Resource) -> Result<(), PatchError>,
{
    let started = std::time::Instant::now();
    let before = obj.as_value().clone();

    if let Err(source) = mutate(obj) {
        return Err(ApplyError::Mutate { target: obj.object_ref(), source });
    }

    let target = obj.object_ref();
    let plan = plan(&before, obj.as_value(), status_is_subresource);
    let mut body_updated = false;

    if !plan.body.is_empty() {
        let bytes = encode_patch(&plan.body).map_err(|source| ApplyError::Encode {
            target: target.clone(),
            write: Write::Body,
            partial: ChangeKind::NoChange,
            source,
        })?;
        debug!(obj = %target, ops = plan.body.len(), summary = ?DiffSummary::of(&plan.body), "patching body");
        client.patch(obj, &bytes).await.map_err(|source| ApplyError::Persist {
            target: target.clone(),
            write: Write::Body,
            partial: ChangeKind::NoChange,
            source,
        })?;
        counter!("vsync_body_patch_total", 1u64);
        body_updated = true;
    }

    let mut status_updated = false;
    if !plan.status.is_empty() {
        let partial = ChangeKind::from_flags(body_updated, false);
        let bytes = encode_patch(&plan.status).map_err(|source| ApplyError::Encode {
            target: target.clone(),
            write: Write::Status,
            partial,
            source,
        })?;
        debug!(obj = %target, ops = plan.status.len(), "patching status");
        client.patch_status(obj, &bytes).await.map_err(|source| ApplyError::Persist {
            target: target.clone(),
            write: Write::Status,
            partial,
            source,
        })?;
        counter!("vsync_status_patch_total", 1u64);
        status_updated = true;
    }

    histogram!("vsync_apply_latency_ms", started.elapsed().as_secs_f64() * 1000.0);
    Ok(ChangeKind::from_flags(body_updated, status_updated))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub adds: usize,
    pub updates: usize,
    pub removes: usize,
}

impl DiffSummary {
    pub fn of(ops: &[PatchOp]) -> Self {
        let mut s = DiffSummary::default();
        for op in ops {
            match op {
                PatchOp::Add { .. } => s.adds += 1,
                PatchOp::Replace { .. } => s.updates += 1,
                PatchOp::Remove { .. } => s.removes += 1,
            }
        }
        s
    }
}

/// Drop server-populated metadata that should never drive a diff.
pub fn strip_noisy(mut v: Json) -> Json {
    if let Some(meta) = v.get_mut("metadata").and_then(Json::as_object_mut) {
        meta.remove("managedFields");
        meta.remove("resourceVersion");
        meta.remove("generation");
        meta.remove("creationTimestamp");
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plan_splits_body_and_status() {
        let before = json!({"kind": "W", "spec": {"a": 1}, "status": {"phase": "Pending"}});
        let after = json!({"kind": "W", "spec": {"a": 2}, "status": {"phase": "Ready"}});
        let p = plan(&before, &after, true);
        assert_eq!(p.body, vec![PatchOp::Replace { path: "/spec/a".into(), value: json!(2) }]);
        assert!(p.status.iter().any(|op| op.touches("/status")));
        assert!(p.body.iter().all(|op| !op.touches("/status")));
    }

    #[test]
    fn plan_without_subresource_keeps_status_in_body() {
        let before = json!({"kind": "W", "status": {"phase": "Pending"}});
        let after = json!({"kind": "W", "status": {"phase": "Ready"}});
        let p = plan(&before, &after, false);
        assert_eq!(p.body, vec![PatchOp::Replace { path: "/status/phase".into(), value: json!("Ready") }]);
        assert!(p.status.is_empty());
    }

    #[test]
    fn plan_handles_status_appearing_and_vanishing() {
        let bare = json!({"kind": "W"});
        let with = json!({"kind": "W", "status": {"ok": true}});
        let appear = plan(&bare, &with, true);
        assert!(appear.body.is_empty());
        assert_eq!(appear.status, vec![PatchOp::Add { path: "/status".into(), value: json!({"ok": true}) }]);
        let vanish = plan(&with, &bare, true);
        assert!(vanish.body.is_empty());
        assert_eq!(vanish.status, vec![PatchOp::Remove { path: "/status".into() }]);
        assert!(plan(&with, &with, true).is_empty());
    }

    #[test]
    fn summary_counts_ops() {
        let ops = diff(&json!({"a": 1, "b": {"x": 1}, "c": [1, 2, 3]}), &json!({"a": 2, "b": {"x": 1, "y": 2}, "c": [1, 9], "d": true}));
        let s = DiffSummary::of(&ops);
        assert_eq!(s, DiffSummary { adds: 2, updates: 2, removes: 1 });
    }

    #[test]
    fn strip_noisy_prunes_server_fields() {
        let v = json!({
            "metadata": {
                "name": "x",
                "managedFields": [{"foo": "bar"}],
                "resourceVersion": "123",
                "generation": 5,
                "creationTimestamp": "2020-01-01T00:00:00Z"
            },
            "status": {"obs": true}
        });
        let pruned = strip_noisy(v);
        assert_eq!(pruned["metadata"], json!({"name": "x"}));
        assert_eq!(pruned["status"], json!({"obs": true}));
    }
}
