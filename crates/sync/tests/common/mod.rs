#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use vsync_core::{EventSink, FieldPath, NameResolver, PatchError, PatchInterpreter, PatchRule, Resource};
use vsync_store::{MemoryStorage, NameCacheStore};
use vsync_sync::{FromVirtualCluster, FromVirtualSyncer, NamespacedTranslator, SelectorConfig, SyncContext};

pub const SUFFIX: &str = "vc";
pub const HOST_NS: &str = "host";

/// Two rule shapes:
/// `{"op": "copy", "path": "spec"}` copies (or clears) a field from the source;
/// `{"op": "rewriteName", "path": "spec.ref"}` runs the field through the resolver.
pub struct RuleInterpreter;

impl PatchInterpreter for RuleInterpreter {
    fn apply(
        &self,
        target: &mut Resource,
        source: &Resource,
        rules: &[PatchRule],
        resolver: &dyn NameResolver,
    ) -> Result<(), PatchError> {
        for (index, rule) in rules.iter().enumerate() {
            let op = rule.0.get("op").and_then(Value::as_str).unwrap_or("");
            let raw_path = rule.0.get("path").and_then(Value::as_str).unwrap_or("");
            let path = FieldPath::parse(raw_path);
            match op {
                "copy" => match source.get(&path) {
                    Some(v) => target.set(&path, v.clone())?,
                    None => {
                        target.remove(&path);
                    }
                },
                "rewriteName" => {
                    if let Some(name) = target.get(&path).and_then(Value::as_str).map(str::to_string) {
                        let translated = resolver.translate_name(&name, raw_path)?;
                        target.set(&path, Value::String(translated))?;
                    }
                }
                other => return Err(PatchError::rule(index, format!("unknown op {other:?}"))),
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingEvents {
    pub events: Mutex<Vec<(String, String, String)>>,
}

impl RecordingEvents {
    pub fn taken(&self) -> Vec<(String, String, String)> { self.events.lock().unwrap().clone() }
}

impl EventSink for RecordingEvents {
    fn record_warning(&self, obj: &Resource, reason: &str, message: &str) {
        self.events.lock().unwrap().push((obj.name().to_string(), reason.to_string(), message.to_string()));
    }
}

pub fn mapping() -> FromVirtualCluster {
    let mut m = FromVirtualCluster::new("Widget", "example.com/v1");
    m.selector = Some(SelectorConfig { label_selector: [("env".to_string(), "prod".to_string())].into() });
    m.patches = vec![
        PatchRule(json!({"op": "copy", "path": "spec"})),
        PatchRule(json!({"op": "rewriteName", "path": "spec.ref"})),
    ];
    m.reverse_patches = vec![
        PatchRule(json!({"op": "copy", "path": "status"})),
        PatchRule(json!({"op": "rewriteName", "path": "status.owner"})),
    ];
    m
}

pub fn syncer() -> FromVirtualSyncer {
    FromVirtualSyncer::new(mapping(), Arc::new(NamespacedTranslator::new(SUFFIX, HOST_NS)), Arc::new(RuleInterpreter))
}

pub fn virtual_widget(name: &str, env: &str, spec: Value) -> Resource {
    Resource::from_value(json!({
        "apiVersion": "example.com/v1",
        "kind": "Widget",
        "metadata": {"name": name, "namespace": "ns", "labels": {"env": env}},
        "spec": spec
    }))
    .unwrap()
}

/// Both sides of a cluster pair plus the shared collaborators.
#[derive(Default)]
pub struct Harness {
    pub physical: MemoryStorage,
    pub virtual_side: MemoryStorage,
    pub names: NameCacheStore,
    pub events: RecordingEvents,
}

impl Harness {
    pub fn new() -> Self { Self::default() }

    /// Context borrowing the harness and the given name cache view.
    pub fn ctx<'a>(&'a self, cache: &'a vsync_store::NameCacheHandle) -> SyncContext<'a> {
        SyncContext {
            physical_client: &self.physical,
            virtual_client: &self.virtual_side,
            name_cache: cache,
            events: &self.events,
        }
    }

    pub fn virtual_obj(&self, name: &str) -> Resource { self.virtual_side.get(Some("ns"), name).unwrap() }

    pub fn physical_obj(&self, name: &str) -> Option<Resource> {
        self.physical.get(Some(HOST_NS), &vsync_sync::physical_name(name, "ns", SUFFIX))
    }

    pub fn set_physical_status(&self, name: &str, status: Value) {
        let mut p = self.physical_obj(name).unwrap();
        p.set_status(Some(status));
        self.physical.insert(p);
    }
}
