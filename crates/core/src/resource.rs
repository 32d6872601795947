//! Resource documents: an object tree with kind/apiVersion identity, metadata
//! and an optional `status` sub-document.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{PathError, ResourceError};
use crate::path::FieldPath;

/// Identity of a resource for logs and error messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// A structured resource document. Always a map at the root with string
/// `apiVersion` and `kind` fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Resource(Value);

impl Resource {
    pub fn new(api_version: &str, kind: &str) -> Self {
        let mut map = Map::new();
        map.insert("apiVersion".into(), Value::String(api_version.to_string()));
        map.insert("kind".into(), Value::String(kind.to_string()));
        map.insert("metadata".into(), Value::Object(Map::new()));
        Self(Value::Object(map))
    }

    pub fn from_value(v: Value) -> Result<Self, ResourceError> {
        let map = v.as_object().ok_or(ResourceError::NotAnObject)?;
        match map.get("kind").and_then(Value::as_str) {
            Some(k) if !k.is_empty() => {}
            _ => return Err(ResourceError::MissingField("kind")),
        }
        if map.get("apiVersion").and_then(Value::as_str).is_none() {
            return Err(ResourceError::MissingField("apiVersion"));
        }
        Ok(Self(v))
    }

    pub fn as_value(&self) -> &Value { &self.0 }
    pub fn into_value(self) -> Value { self.0 }

    fn str_at(&self, key: &str) -> &str { self.0.get(key).and_then(Value::as_str).unwrap_or("") }

    fn meta_str(&self, key: &str) -> Option<&str> {
        self.0.get("metadata").and_then(|m| m.get(key)).and_then(Value::as_str)
    }

    pub fn kind(&self) -> &str { self.str_at("kind") }
    pub fn api_version(&self) -> &str { self.str_at("apiVersion") }
    pub fn name(&self) -> &str { self.meta_str("name").unwrap_or("") }
    pub fn namespace(&self) -> Option<&str> { self.meta_str("namespace").filter(|s| !s.is_empty()) }
    pub fn uid(&self) -> Option<&str> { self.meta_str("uid") }
    pub fn resource_version(&self) -> Option<&str> { self.meta_str("resourceVersion") }

    pub fn set_name(&mut self, name: &str) { self.set_meta("name", Value::String(name.to_string())); }

    pub fn set_namespace(&mut self, namespace: &str) {
        self.set_meta("namespace", Value::String(namespace.to_string()));
    }

    pub fn labels(&self) -> BTreeMap<String, String> { self.string_map("labels") }
    pub fn annotations(&self) -> BTreeMap<String, String> { self.string_map("annotations") }

    pub fn set_labels(&mut self, labels: BTreeMap<String, String>) { self.set_string_map("labels", labels); }

    pub fn set_annotations(&mut self, annotations: BTreeMap<String, String>) {
        self.set_string_map("annotations", annotations);
    }

    pub fn status(&self) -> Option<&Value> { self.0.get("status") }

    pub fn take_status(&mut self) -> Option<Value> { self.map_mut().remove("status") }

    /// Replace (or with `None`, drop) the status sub-document.
    pub fn set_status(&mut self, status: Option<Value>) {
        match status {
            Some(s) => {
                self.map_mut().insert("status".into(), s);
            }
            None => {
                self.map_mut().remove("status");
            }
        }
    }

    pub fn get(&self, path: &FieldPath) -> Option<&Value> { path.get(&self.0) }

    /// Path-addressed write. The root cannot be replaced through this method.
    pub fn set(&mut self, path: &FieldPath, value: Value) -> Result<(), PathError> {
        if path.is_root() {
            return Err(PathError::NotAContainer { path: String::new() });
        }
        path.set(&mut self.0, value)
    }

    pub fn remove(&mut self, path: &FieldPath) -> Option<Value> { path.remove(&mut self.0) }

    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef {
            kind: self.kind().to_string(),
            namespace: self.namespace().map(str::to_string),
            name: self.name().to_string(),
        }
    }

    fn map_mut(&mut self) -> &mut Map<String, Value> {
        if !self.0.is_object() { self.0 = Value::Object(Map::new()); }
        match &mut self.0 {
            Value::Object(map) => map,
            _ => unreachable!("resource root is always an object"),
        }
    }

    fn metadata_mut(&mut self) -> &mut Map<String, Value> {
        let meta = self.map_mut().entry("metadata").or_insert_with(|| Value::Object(Map::new()));
        if !meta.is_object() { *meta = Value::Object(Map::new()); }
        match meta {
            Value::Object(map) => map,
            _ => unreachable!("metadata was just normalised to an object"),
        }
    }

    fn set_meta(&mut self, key: &str, value: Value) { self.metadata_mut().insert(key.to_string(), value); }

    fn string_map(&self, key: &str) -> BTreeMap<String, String> {
        self.0
            .get("metadata")
            .and_then(|m| m.get(key))
            .and_then(Value::as_object)
            .map(|m| m.iter().filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string()))).collect())
            .unwrap_or_default()
    }

    fn set_string_map(&mut self, key: &str, values: BTreeMap<String, String>) {
        let meta = self.metadata_mut();
        if values.is_empty() {
            meta.remove(key);
            return;
        }
        let map: Map<String, Value> = values.into_iter().map(|(k, v)| (k, Value::String(v))).collect();
        meta.insert(key.to_string(), Value::Object(map));
    }
}

impl TryFrom<Value> for Resource {
    type Error = ResourceError;
    fn try_from(v: Value) -> Result<Self, Self::Error> { Resource::from_value(v) }
}

impl From<Resource> for Value {
    fn from(r: Resource) -> Self { r.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn widget() -> Resource {
        Resource::from_value(json!({
            "apiVersion": "example.com/v1",
            "kind": "Widget",
            "metadata": {"name": "a", "namespace": "ns", "labels": {"env": "prod"}},
            "spec": {"size": 3},
            "status": {"phase": "Ready"}
        }))
        .unwrap()
    }

    #[test]
    fn identity_accessors() {
        let w = widget();
        assert_eq!(w.kind(), "Widget");
        assert_eq!(w.api_version(), "example.com/v1");
        assert_eq!(w.name(), "a");
        assert_eq!(w.namespace(), Some("ns"));
        assert_eq!(w.labels().get("env").map(String::as_str), Some("prod"));
        assert_eq!(w.object_ref().to_string(), "Widget ns/a");
    }

    #[test]
    fn rejects_non_resources() {
        assert_eq!(Resource::from_value(json!([1, 2])), Err(ResourceError::NotAnObject));
        assert_eq!(Resource::from_value(json!({"apiVersion": "v1"})), Err(ResourceError::MissingField("kind")));
        assert_eq!(Resource::from_value(json!({"kind": "Pod"})), Err(ResourceError::MissingField("apiVersion")));
        let parsed: Result<Resource, _> = serde_json::from_value(json!({"kind": ""}));
        assert!(parsed.is_err());
    }

    #[test]
    fn status_take_and_set() {
        let mut w = widget();
        let st = w.take_status();
        assert_eq!(st, Some(json!({"phase": "Ready"})));
        assert!(w.status().is_none());
        w.set_status(Some(json!({"phase": "Pending"})));
        assert_eq!(w.get(&FieldPath::parse("status.phase")), Some(&json!("Pending")));
        w.set_status(None);
        assert!(w.as_value().get("status").is_none());
    }

    #[test]
    fn metadata_maps_roundtrip() {
        let mut r = Resource::new("v1", "ConfigMap");
        r.set_name("cm");
        let mut ann = BTreeMap::new();
        ann.insert("a".to_string(), "1".to_string());
        r.set_annotations(ann.clone());
        assert_eq!(r.annotations(), ann);
        r.set_labels(BTreeMap::new());
        assert!(r.as_value()["metadata"].get("labels").is_none());
        assert_eq!(r.namespace(), None);
    }
}
