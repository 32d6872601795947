//! Minimal structural diff between two documents, emitted as RFC 6902
//! operations.
//!
//! Maps are compared key by key (order-insensitive), sequences position by
//! position (order-sensitive). Only paths whose values actually differ are
//! touched: an unchanged sibling never shows up in the output.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::path::escape_segment;

/// One patch record: `{op, path, value}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    Add { path: String, value: Value },
    Remove { path: String },
    Replace { path: String, value: Value },
}

impl PatchOp {
    pub fn path(&self) -> &str {
        match self {
            PatchOp::Add { path, .. } | PatchOp::Remove { path } | PatchOp::Replace { path, .. } => path,
        }
    }

    /// True when this op touches `pointer` itself or anything beneath it.
    pub fn touches(&self, pointer: &str) -> bool {
        let p = self.path();
        p == pointer || (p.starts_with(pointer) && p[pointer.len()..].starts_with('/'))
    }
}

/// Compute the ops turning `before` into `after`. Empty when equal.
pub fn diff(before: &Value, after: &Value) -> Vec<PatchOp> {
    let mut ops = Vec::new();
    walk(&mut ops, String::new(), before, after);
    ops
}

/// Serialise ops as a JSON patch document.
pub fn encode_patch(ops: &[PatchOp]) -> Result<Vec<u8>, serde_json::Error> { serde_json::to_vec(ops) }

fn walk(ops: &mut Vec<PatchOp>, ptr: String, a: &Value, b: &Value) {
    if a == b { return; }
    match (a, b) {
        (Value::Object(ao), Value::Object(bo)) => {
            for (k, av) in ao.iter() {
                let child = format!("{}/{}", ptr, escape_segment(k));
                match bo.get(k) {
                    Some(bv) => walk(ops, child, av, bv),
                    None => ops.push(PatchOp::Remove { path: child }),
                }
            }
            for (k, bv) in bo.iter() {
                if !ao.contains_key(k) {
                    ops.push(PatchOp::Add { path: format!("{}/{}", ptr, escape_segment(k)), value: bv.clone() });
                }
            }
        }
        (Value::Array(aa), Value::Array(bb)) => {
            let common = aa.len().min(bb.len());
            for i in 0..common {
                walk(ops, format!("{}/{}", ptr, i), &aa[i], &bb[i]);
            }
            // Appends in ascending order, truncation from the tail so indices stay valid.
            for (i, bv) in bb.iter().enumerate().skip(common) {
                ops.push(PatchOp::Add { path: format!("{}/{}", ptr, i), value: bv.clone() });
            }
            for i in (common..aa.len()).rev() {
                ops.push(PatchOp::Remove { path: format!("{}/{}", ptr, i) });
            }
        }
        _ => ops.push(PatchOp::Replace { path: ptr, value: b.clone() }),
    }
}
