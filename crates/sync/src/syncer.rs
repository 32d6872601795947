//! From-virtual syncer: keeps a physical copy in step with each in-scope
//! virtual object.
//!
//! Per pass at most one side is written. When the forward rules change the
//! physical object, that write triggers another pass in which the reverse
//! rules see the settled physical state; feeding values back in the same pass
//! risks a patch loop.

use std::fmt;
use std::sync::Arc;

use metrics::counter;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use vsync_apply::{apply_and_persist, ApplyError};
use vsync_core::{
    ChangeKind, EventSink, NameCache, ObjectRef, PatchError, PatchInterpreter, Resource, Selector, StorageClient,
    StorageError,
};

use crate::config::FromVirtualCluster;
use crate::names::{PhysicalToVirtual, VirtualToPhysical};
use crate::selector::LabelSelector;
use crate::translator::MetadataTranslator;

/// Collaborators for one reconciliation call.
#[derive(Clone, Copy)]
pub struct SyncContext<'a> {
    pub physical_client: &'a dyn StorageClient,
    pub virtual_client: &'a dyn StorageClient,
    pub name_cache: &'a dyn NameCache,
    pub events: &'a dyn EventSink,
}

/// Where a virtual/physical pair stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PairState {
    NotCreated,
    Created,
    OutOfScope,
}

/// Outcome of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncAction {
    /// Nothing to do (out of scope, or both sides converged).
    Noop,
    Created,
    Deleted,
    PhysicalPatched(ChangeKind),
    VirtualPatched(ChangeKind),
    /// Transient condition; run the whole pass again later.
    Requeue,
}

impl SyncAction {
    pub fn requeue(&self) -> bool { matches!(self, SyncAction::Requeue) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Physical,
    Virtual,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Physical => "physical",
            Side::Virtual => "virtual",
        })
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to apply declared patches to {target}: {source}")]
    Patch {
        target: ObjectRef,
        #[source]
        source: PatchError,
    },
    #[error("error syncing {target} to physical side: {source}")]
    Create {
        target: ObjectRef,
        #[source]
        source: StorageError,
    },
    #[error("error deleting physical {target}: {source}")]
    Delete {
        target: ObjectRef,
        #[source]
        source: StorageError,
    },
    #[error("failed to patch {side} {}: {source}", .source.target())]
    Apply {
        side: Side,
        #[source]
        source: ApplyError,
    },
}

pub struct FromVirtualSyncer {
    mapping: FromVirtualCluster,
    selector: Option<LabelSelector>,
    translator: Arc<dyn MetadataTranslator>,
    interpreter: Arc<dyn PatchInterpreter>,
    status_is_subresource: bool,
}

impl FromVirtualSyncer {
    pub fn new(
        mapping: FromVirtualCluster,
        translator: Arc<dyn MetadataTranslator>,
        interpreter: Arc<dyn PatchInterpreter>,
    ) -> Self {
        let selector = mapping.label_selector();
        Self { mapping, selector, translator, interpreter, status_is_subresource: true }
    }

    // TODO: ask discovery for a status subresource per kind instead of assuming one.
    pub fn with_status_subresource(mut self, on: bool) -> Self {
        self.status_is_subresource = on;
        self
    }

    pub fn name(&self) -> String { format!("{}-from-virtual-syncer", self.mapping.kind) }

    pub fn mapping(&self) -> &FromVirtualCluster { &self.mapping }

    /// Whether the virtual object is in scope. No selector means everything is.
    pub fn matches(&self, virtual_obj: &Resource) -> bool {
        self.selector.as_ref().map_or(true, |s| s.matches(&virtual_obj.labels()))
    }

    pub fn pair_state(&self, virtual_obj: &Resource, physical: Option<&Resource>) -> PairState {
        match physical {
            None => PairState::NotCreated,
            Some(_) if !self.matches(virtual_obj) => PairState::OutOfScope,
            Some(_) => PairState::Created,
        }
    }

    /// Route to [`Self::sync_down`] or [`Self::sync`] depending on whether the
    /// physical counterpart exists.
    pub async fn dispatch(
        &self,
        ctx: &SyncContext<'_>,
        virtual_obj: &Resource,
        physical: Option<&Resource>,
    ) -> Result<SyncAction, SyncError> {
        match physical {
            None => self.sync_down(ctx, virtual_obj).await,
            Some(p) => self.sync(ctx, p, virtual_obj).await,
        }
    }

    /// Create the physical counterpart of an in-scope virtual object.
    pub async fn sync_down(&self, ctx: &SyncContext<'_>, virtual_obj: &Resource) -> Result<SyncAction, SyncError> {
        if !self.matches(virtual_obj) {
            debug!(obj = %virtual_obj.object_ref(), "virtual object out of scope; skipping create");
            return Ok(SyncAction::Noop);
        }

        let mut physical = self.translator.translate_metadata(virtual_obj);
        let resolver = self.forward_resolver(virtual_obj);
        self.interpreter
            .apply(&mut physical, virtual_obj, &self.mapping.patches, &resolver)
            .map_err(|source| SyncError::Patch { target: physical.object_ref(), source })?;

        info!(kind = %self.mapping.kind, namespace = ?physical.namespace(), name = %physical.name(), "create physical");
        if let Err(e) = ctx.physical_client.create(&physical).await {
            warn!(obj = %virtual_obj.object_ref(), error = %e, "error syncing to physical side");
            ctx.events.record_warning(virtual_obj, "SyncError", &format!("Error syncing to physical side: {e}"));
            counter!("vsync_sync_err_total", 1u64);
            return Err(SyncError::Create { target: physical.object_ref(), source: e });
        }
        counter!("vsync_create_total", 1u64);
        Ok(SyncAction::Created)
    }

    /// Reconcile an existing pair: delete when out of scope, else forward
    /// patches, else reverse patches.
    pub async fn sync(
        &self,
        ctx: &SyncContext<'_>,
        physical: &Resource,
        virtual_obj: &Resource,
    ) -> Result<SyncAction, SyncError> {
        if !self.matches(virtual_obj) {
            info!(kind = %self.mapping.kind, namespace = ?physical.namespace(), name = %physical.name(), "delete physical, because it is not used anymore");
            if let Err(e) = ctx.physical_client.delete(physical).await {
                warn!(obj = %physical.object_ref(), error = %e, "error deleting physical");
                counter!("vsync_sync_err_total", 1u64);
                return Err(SyncError::Delete { target: physical.object_ref(), source: e });
            }
            counter!("vsync_delete_total", 1u64);
            return Ok(SyncAction::Deleted);
        }

        let mut updated_physical = physical.clone();
        let forward = self.forward_resolver(virtual_obj);
        let patched = apply_and_persist(ctx.physical_client, &mut updated_physical, self.status_is_subresource, |target| {
            self.interpreter.apply(target, virtual_obj, &self.mapping.patches, &forward)
        })
        .await;
        match patched {
            Ok(change) if change.is_change() => {
                debug!(obj = %physical.object_ref(), ?change, "physical patched; reverse patches wait for the next pass");
                return Ok(SyncAction::PhysicalPatched(change));
            }
            Ok(_) => {}
            Err(e) => return self.recover(Side::Physical, e),
        }

        let mut updated_virtual = virtual_obj.clone();
        let reverse = PhysicalToVirtual::new(ctx.name_cache);
        let patched = apply_and_persist(ctx.virtual_client, &mut updated_virtual, self.status_is_subresource, |target| {
            self.interpreter.apply(target, physical, &self.mapping.reverse_patches, &reverse)
        })
        .await;
        match patched {
            Ok(ChangeKind::NoChange) => {
                debug!(obj = %virtual_obj.object_ref(), "pair in sync");
                Ok(SyncAction::Noop)
            }
            Ok(change) => Ok(SyncAction::VirtualPatched(change)),
            Err(e) => self.recover(Side::Virtual, e),
        }
    }

    fn forward_resolver(&self, virtual_obj: &Resource) -> VirtualToPhysical {
        VirtualToPhysical::new(virtual_obj.namespace().unwrap_or_default(), self.translator.suffix())
    }

    /// Only invalid writes are retried here; an unresolved reverse name fails
    /// the pass like any other error.
    fn recover(&self, side: Side, e: ApplyError) -> Result<SyncAction, SyncError> {
        if e.is_invalid() {
            warn!(
                %side,
                partial = ?e.partial(),
                error = %e,
                "this could indicate a timing issue with no significant impact, or a bug; report it if the resource never reaches the expected state"
            );
            counter!("vsync_requeue_total", 1u64);
            return Ok(SyncAction::Requeue);
        }
        if let Some(missing) = e.name_resolution() {
            debug!(%side, name = %missing.name, path = %missing.path, "name not in cache");
        }
        counter!("vsync_sync_err_total", 1u64);
        Err(SyncError::Apply { side, source: e })
    }
}
