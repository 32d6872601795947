//! vsync kubehub: discovery-backed storage client and event recorder for a
//! real cluster.

#![forbid(unsafe_code)]

mod events;

use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use kube::{
    api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams},
    core::{ApiResource, DynamicObject, GroupVersionKind, TypeMeta},
    discovery::{Discovery, Scope},
    Client,
};
use metrics::counter;
use rustc_hash::FxHashMap;
use tracing::{debug, info};
use vsync_core::{Resource, StorageClient, StorageError, StorageErrorKind};

pub use events::KubeEvents;

/// Client from the ambient kubeconfig or in-cluster environment.
pub async fn client() -> Result<Client> { Client::try_default().await.context("building kube client") }

/// `v1/Kind` or `group/v1/Kind`.
pub fn parse_gvk_key(key: &str) -> Result<GroupVersionKind> {
    let parts: Vec<_> = key.split('/').collect();
    match parts.as_slice() {
        [version, kind] => Ok(gvk("", version, kind)),
        [group, version, kind] => Ok(gvk(group, version, kind)),
        _ => Err(anyhow!("invalid gvk key: {} (expect v1/Kind or group/v1/Kind)", key)),
    }
}

/// Split an `apiVersion` into `(group, version)`; the core group is empty.
pub fn split_api_version(api_version: &str) -> (&str, &str) {
    match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    }
}

pub fn gvk_of(obj: &Resource) -> GroupVersionKind {
    let (group, version) = split_api_version(obj.api_version());
    gvk(group, version, obj.kind())
}

fn gvk(group: &str, version: &str, kind: &str) -> GroupVersionKind {
    GroupVersionKind { group: group.to_string(), version: version.to_string(), kind: kind.to_string() }
}

async fn find_api_resource(client: Client, gvk: &GroupVersionKind) -> Result<(ApiResource, bool)> {
    let discovery = Discovery::new(client).run().await?;
    for group in discovery.groups() {
        for (ar, caps) in group.recommended_resources() {
            if ar.group == gvk.group && ar.version == gvk.version && ar.kind == gvk.kind {
                let namespaced = matches!(caps.scope, Scope::Namespaced);
                return Ok((ar.clone(), namespaced));
            }
        }
    }
    Err(anyhow!("GVK not found: {}/{}/{}", gvk.group, gvk.version, gvk.kind))
}

/// Storage kind for an API error response.
pub fn kind_for(code: u16, reason: &str) -> StorageErrorKind {
    match (code, reason) {
        (422, _) | (_, "Invalid") => StorageErrorKind::Invalid,
        (_, "AlreadyExists") => StorageErrorKind::AlreadyExists,
        (409, _) | (_, "Conflict") => StorageErrorKind::Conflict,
        (404, _) | (_, "NotFound") => StorageErrorKind::NotFound,
        _ => StorageErrorKind::Other,
    }
}

pub fn storage_error(e: kube::Error) -> StorageError {
    let (kind, message) = match &e {
        kube::Error::Api(resp) => (kind_for(resp.code, &resp.reason), resp.message.clone()),
        other => (StorageErrorKind::Other, other.to_string()),
    };
    StorageError::new(kind, message).with_source(e)
}

/// [`StorageClient`] over `Api<DynamicObject>`, resolving each kind through
/// discovery once.
pub struct KubeStorage {
    client: Client,
    field_manager: String,
    resources: Mutex<FxHashMap<String, (ApiResource, bool)>>,
}

impl KubeStorage {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self { client, field_manager: field_manager.into(), resources: Mutex::new(FxHashMap::default()) }
    }

    async fn api(&self, gvk: &GroupVersionKind, namespace: Option<&str>) -> Result<Api<DynamicObject>, StorageError> {
        let key = format!("{}/{}/{}", gvk.group, gvk.version, gvk.kind);
        let cached = self.resources.lock().unwrap_or_else(|p| p.into_inner()).get(&key).cloned();
        let (ar, namespaced) = match cached {
            Some(hit) => hit,
            None => {
                let found = find_api_resource(self.client.clone(), gvk)
                    .await
                    .map_err(|e| StorageError::other(format!("resolving {key}: {e:#}")))?;
                debug!(gvk = %key, namespaced = found.1, "discovered api resource");
                self.resources.lock().unwrap_or_else(|p| p.into_inner()).insert(key.clone(), found.clone());
                found
            }
        };
        Ok(match (namespaced, namespace) {
            (true, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &ar),
            (true, None) => return Err(StorageError::invalid(format!("{key} is namespaced but no namespace was given"))),
            (false, _) => Api::all_with(self.client.clone(), &ar),
        })
    }

    async fn api_for(&self, obj: &Resource) -> Result<Api<DynamicObject>, StorageError> {
        self.api(&gvk_of(obj), obj.namespace()).await
    }

    /// Fetch one object; `None` when it does not exist.
    pub async fn get(&self, gvk: &GroupVersionKind, namespace: Option<&str>, name: &str) -> Result<Option<Resource>, StorageError> {
        let api = self.api(gvk, namespace).await?;
        match api.get_opt(name).await.map_err(storage_error)? {
            Some(obj) => to_resource(obj, gvk).map(Some),
            None => Ok(None),
        }
    }

    /// List objects of one kind, optionally filtered by a label selector
    /// (`k=v,...`).
    pub async fn list(&self, gvk: &GroupVersionKind, namespace: Option<&str>, labels: Option<&str>) -> Result<Vec<Resource>, StorageError> {
        let api = self.api(gvk, namespace).await?;
        let mut lp = ListParams::default();
        if let Some(sel) = labels {
            lp = lp.labels(sel);
        }
        let list = api.list(&lp).await.map_err(storage_error)?;
        list.items.into_iter().map(|o| to_resource(o, gvk)).collect()
    }

    fn params(&self) -> PatchParams {
        PatchParams { field_manager: Some(self.field_manager.clone()), ..Default::default() }
    }
}

/// List items come back without type information; fill it in from the kind
/// that was asked for.
fn to_resource(mut obj: DynamicObject, gvk: &GroupVersionKind) -> Result<Resource, StorageError> {
    if obj.types.is_none() {
        let api_version = if gvk.group.is_empty() { gvk.version.clone() } else { format!("{}/{}", gvk.group, gvk.version) };
        obj.types = Some(TypeMeta { api_version, kind: gvk.kind.clone() });
    }
    let mut raw = serde_json::to_value(&obj).map_err(|e| StorageError::other(e.to_string()).with_source(e))?;
    if let Some(meta) = raw.get_mut("metadata").and_then(serde_json::Value::as_object_mut) {
        meta.remove("managedFields");
    }
    Resource::from_value(raw).map_err(|e| StorageError::other(format!("unexpected object shape: {e}")))
}

fn decode(patch: &[u8]) -> Result<json_patch::Patch, StorageError> {
    serde_json::from_slice(patch).map_err(|e| StorageError::invalid(format!("malformed patch: {e}")).with_source(e))
}

fn failed<'a>(verb: &'static str, obj: &'a Resource) -> impl FnOnce(kube::Error) -> StorageError + 'a {
    move |e| {
        counter!("vsync_kube_request_err_total", 1u64);
        let err = storage_error(e);
        debug!(verb, obj = %obj.object_ref(), kind = %err.kind(), error = %err, "kube request failed");
        err
    }
}

#[async_trait]
impl StorageClient for KubeStorage {
    async fn create(&self, obj: &Resource) -> Result<(), StorageError> {
        let api = self.api_for(obj).await?;
        let body: DynamicObject = serde_json::from_value(obj.as_value().clone())
            .map_err(|e| StorageError::invalid(format!("not a kube object: {e}")).with_source(e))?;
        let pp = PostParams { field_manager: Some(self.field_manager.clone()), ..Default::default() };
        api.create(&pp, &body).await.map_err(failed("create", obj))?;
        info!(obj = %obj.object_ref(), "created");
        Ok(())
    }

    async fn patch(&self, obj: &Resource, patch: &[u8]) -> Result<(), StorageError> {
        let api = self.api_for(obj).await?;
        let p = decode(patch)?;
        api.patch(obj.name(), &self.params(), &Patch::Json::<()>(p)).await.map_err(failed("patch", obj))?;
        Ok(())
    }

    async fn patch_status(&self, obj: &Resource, patch: &[u8]) -> Result<(), StorageError> {
        let api = self.api_for(obj).await?;
        let p = decode(patch)?;
        api.patch_status(obj.name(), &self.params(), &Patch::Json::<()>(p))
            .await
            .map_err(failed("patch_status", obj))?;
        Ok(())
    }

    async fn delete(&self, obj: &Resource) -> Result<(), StorageError> {
        let api = self.api_for(obj).await?;
        api.delete(obj.name(), &DeleteParams::default()).await.map_err(failed("delete", obj))?;
        info!(obj = %obj.object_ref(), "deleted");
        Ok(())
    }
}
