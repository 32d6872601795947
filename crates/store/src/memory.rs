//! In-memory [`StorageClient`]: applies JSON patches to stored documents and
//! keeps a journal of every write. Failures can be injected per verb.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;
use vsync_core::{ObjectRef, PatchOp, Resource, StorageClient, StorageError, StorageErrorKind};

type Key = (String, String);

fn key_of(obj: &Resource) -> Key { (obj.namespace().unwrap_or("").to_string(), obj.name().to_string()) }

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> { m.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Create,
    Patch,
    PatchStatus,
    Delete,
}

/// One successful write, with the decoded patch where applicable.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteRecord {
    Create { target: ObjectRef },
    Patch { target: ObjectRef, ops: Vec<PatchOp> },
    PatchStatus { target: ObjectRef, ops: Vec<PatchOp> },
    Delete { target: ObjectRef },
}

impl WriteRecord {
    pub fn verb(&self) -> Verb {
        match self {
            WriteRecord::Create { .. } => Verb::Create,
            WriteRecord::Patch { .. } => Verb::Patch,
            WriteRecord::PatchStatus { .. } => Verb::PatchStatus,
            WriteRecord::Delete { .. } => Verb::Delete,
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    objects: Mutex<BTreeMap<Key, Value>>,
    journal: Mutex<Vec<WriteRecord>>,
    faults: Mutex<VecDeque<(Verb, StorageErrorKind, String)>>,
}

impl MemoryStorage {
    pub fn new() -> Self { Self::default() }

    /// Seed an object without journaling.
    pub fn insert(&self, obj: Resource) { lock(&self.objects).insert(key_of(&obj), obj.into_value()); }

    pub fn get(&self, namespace: Option<&str>, name: &str) -> Option<Resource> {
        let key = (namespace.unwrap_or("").to_string(), name.to_string());
        lock(&self.objects).get(&key).cloned().and_then(|v| Resource::from_value(v).ok())
    }

    pub fn len(&self) -> usize { lock(&self.objects).len() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn journal(&self) -> Vec<WriteRecord> { lock(&self.journal).clone() }
    pub fn clear_journal(&self) { lock(&self.journal).clear(); }

    /// Fail the next `verb` call with an error of `kind`. Queued faults fire in order.
    pub fn fail_next(&self, verb: Verb, kind: StorageErrorKind, message: impl Into<String>) {
        lock(&self.faults).push_back((verb, kind, message.into()));
    }

    fn take_fault(&self, verb: Verb) -> Option<StorageError> {
        let mut faults = lock(&self.faults);
        let idx = faults.iter().position(|(v, _, _)| *v == verb)?;
        faults.remove(idx).map(|(_, kind, msg)| StorageError::new(kind, msg))
    }

    fn record(&self, rec: WriteRecord) { lock(&self.journal).push(rec); }

    fn apply_ops(&self, obj: &Resource, raw_ops: Vec<Value>) -> Result<(), StorageError> {
        let patch: json_patch::Patch = serde_json::from_value(Value::Array(raw_ops))
            .map_err(|e| StorageError::invalid(format!("malformed patch: {e}")).with_source(e))?;
        let mut objects = lock(&self.objects);
        let stored = objects
            .get_mut(&key_of(obj))
            .ok_or_else(|| StorageError::not_found(format!("{} not found", obj.object_ref())))?;
        let mut next = stored.clone();
        json_patch::patch(&mut next, &patch).map_err(|e| StorageError::invalid(e.to_string()).with_source(e))?;
        Resource::from_value(next.clone()).map_err(|e| StorageError::invalid(e.to_string()))?;
        *stored = next;
        Ok(())
    }
}

fn decode(patch: &[u8]) -> Result<Vec<Value>, StorageError> {
    serde_json::from_slice(patch).map_err(|e| StorageError::invalid(format!("malformed patch: {e}")).with_source(e))
}

fn typed(raw: &[Value]) -> Vec<PatchOp> {
    raw.iter().filter_map(|v| serde_json::from_value(v.clone()).ok()).collect()
}

fn is_status_op(op: &Value) -> bool {
    op.get("path").and_then(Value::as_str).map(|p| p == "/status" || p.starts_with("/status/")).unwrap_or(false)
}

#[async_trait]
impl StorageClient for MemoryStorage {
    async fn create(&self, obj: &Resource) -> Result<(), StorageError> {
        if let Some(e) = self.take_fault(Verb::Create) { return Err(e); }
        let key = key_of(obj);
        {
            let mut objects = lock(&self.objects);
            if objects.contains_key(&key) {
                return Err(StorageError::new(StorageErrorKind::AlreadyExists, format!("{} already exists", obj.object_ref())));
            }
            objects.insert(key, obj.as_value().clone());
        }
        debug!(target_obj = %obj.object_ref(), "memory create");
        self.record(WriteRecord::Create { target: obj.object_ref() });
        Ok(())
    }

    async fn patch(&self, obj: &Resource, patch: &[u8]) -> Result<(), StorageError> {
        if let Some(e) = self.take_fault(Verb::Patch) { return Err(e); }
        let raw = decode(patch)?;
        let ops = typed(&raw);
        self.apply_ops(obj, raw)?;
        self.record(WriteRecord::Patch { target: obj.object_ref(), ops });
        Ok(())
    }

    /// Like a status subresource endpoint: only operations on `/status` are
    /// applied, everything else in the patch is ignored.
    async fn patch_status(&self, obj: &Resource, patch: &[u8]) -> Result<(), StorageError> {
        if let Some(e) = self.take_fault(Verb::PatchStatus) { return Err(e); }
        let raw: Vec<Value> = decode(patch)?.into_iter().filter(is_status_op).collect();
        let ops = typed(&raw);
        self.apply_ops(obj, raw)?;
        self.record(WriteRecord::PatchStatus { target: obj.object_ref(), ops });
        Ok(())
    }

    async fn delete(&self, obj: &Resource) -> Result<(), StorageError> {
        if let Some(e) = self.take_fault(Verb::Delete) { return Err(e); }
        if lock(&self.objects).remove(&key_of(obj)).is_none() {
            return Err(StorageError::not_found(format!("{} not found", obj.object_ref())));
        }
        self.record(WriteRecord::Delete { target: obj.object_ref() });
        Ok(())
    }
}
