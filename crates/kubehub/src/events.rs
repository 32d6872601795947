use std::sync::{Arc, Mutex};

use k8s_openapi::api::core::v1::ObjectReference;
use kube::{
    runtime::events::{Event, EventType, Recorder, Reporter},
    Client,
};
use metrics::counter;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use vsync_core::{EventSink, Resource};

/// [`EventSink`] that publishes Kubernetes events against the affected object.
///
/// Publishing happens on a spawned task; without a Tokio runtime the event is
/// only logged. [`KubeEvents::flush`] waits for everything spawned so far.
#[derive(Clone)]
pub struct KubeEvents {
    client: Client,
    reporter: Reporter,
    pending: Pending,
}

impl KubeEvents {
    pub fn new(client: Client, controller: impl Into<String>, instance: Option<String>) -> Self {
        Self { client, reporter: Reporter { controller: controller.into(), instance }, pending: Pending::default() }
    }

    /// Wait for every publication spawned so far.
    pub async fn flush(&self) { self.pending.drain().await }
}

/// Handles of in-flight publications.
#[derive(Clone, Default)]
pub(crate) struct Pending(Arc<Mutex<Vec<JoinHandle<()>>>>);

impl Pending {
    pub(crate) fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.0.lock().unwrap_or_else(|p| p.into_inner());
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    pub(crate) async fn drain(&self) {
        let tasks = std::mem::take(&mut *self.0.lock().unwrap_or_else(|p| p.into_inner()));
        for t in tasks {
            if let Err(e) = t.await {
                warn!(error = %e, "event task failed");
            }
        }
    }
}

pub(crate) fn object_reference(obj: &Resource) -> ObjectReference {
    ObjectReference {
        api_version: Some(obj.api_version().to_string()),
        kind: Some(obj.kind().to_string()),
        name: Some(obj.name().to_string()),
        namespace: obj.namespace().map(str::to_string),
        uid: obj.uid().map(str::to_string),
        resource_version: obj.resource_version().map(str::to_string),
        ..Default::default()
    }
}

impl EventSink for KubeEvents {
    fn record_warning(&self, obj: &Resource, reason: &str, message: &str) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(obj = %obj.object_ref(), reason, message, "no runtime; event not published");
            return;
        };
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone(), object_reference(obj));
        let event = Event {
            type_: EventType::Warning,
            reason: reason.to_string(),
            note: Some(message.to_string()),
            action: "Sync".to_string(),
            secondary: None,
        };
        let target = obj.object_ref();
        let task = handle.spawn(async move {
            match recorder.publish(event).await {
                Ok(()) => debug!(obj = %target, "event published"),
                Err(e) => {
                    counter!("vsync_event_publish_err_total", 1u64);
                    warn!(obj = %target, error = %e, "failed to publish event");
                }
            }
        });
        self.pending.track(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reference_carries_identity() {
        let obj = Resource::from_value(json!({
            "apiVersion": "example.com/v1",
            "kind": "Widget",
            "metadata": {"name": "a", "namespace": "ns", "uid": "u-1", "resourceVersion": "12"}
        }))
        .unwrap();
        let r = object_reference(&obj);
        assert_eq!(r.kind.as_deref(), Some("Widget"));
        assert_eq!(r.namespace.as_deref(), Some("ns"));
        assert_eq!(r.uid.as_deref(), Some("u-1"));
        assert_eq!(r.resource_version.as_deref(), Some("12"));
        assert!(r.field_path.is_none());
    }

    #[tokio::test]
    async fn drain_waits_for_tracked_tasks() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let pending = Pending::default();
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let done = done.clone();
            pending.track(tokio::spawn(async move {
                tokio::task::yield_now().await;
                done.fetch_add(1, Ordering::SeqCst);
            }));
        }
        pending.drain().await;
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert!(pending.0.lock().unwrap().is_empty());
        pending.drain().await;
    }
}
