//! The generic syncer contract and the driver that dispatches on which side exists

use crate::context::SyncContext;
use crate::error::Result;
use serde_json::Value;
use std::fmt;
use tracing::{debug, info};
use vkube_core::{GroupVersionKind, Resource, ResourceKey, VkubeError};

/// Result of a successful synchronization pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Created,
    Updated,
    Deleted,
    Unchanged,
    /// Nothing to do, with the reason
    Skipped { reason: String },
}

impl SyncOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }

    /// Whether the pass wrote to either cluster
    pub fn is_write(&self) -> bool {
        matches!(self, Self::Created | Self::Updated | Self::Deleted)
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Updated => write!(f, "updated"),
            Self::Deleted => write!(f, "deleted"),
            Self::Unchanged => write!(f, "unchanged"),
            Self::Skipped { reason } => write!(f, "skipped ({})", reason),
        }
    }
}

/// Which side of a pair currently exists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Existence {
    VirtualOnly,
    PhysicalOnly,
    Both,
    Neither,
}

impl Existence {
    pub fn of<T>(virtual_obj: Option<&T>, physical_obj: Option<&T>) -> Self {
        match (virtual_obj.is_some(), physical_obj.is_some()) {
            (true, false) => Self::VirtualOnly,
            (false, true) => Self::PhysicalOnly,
            (true, true) => Self::Both,
            (false, false) => Self::Neither,
        }
    }
}

/// A unit of work: the key of an object that may need synchronizing
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SyncRequest {
    /// Key of an object in the virtual cluster
    Virtual(ResourceKey),
    /// Key of an object in the physical cluster
    Physical(ResourceKey),
}

impl SyncRequest {
    pub fn key(&self) -> &ResourceKey {
        match self {
            Self::Virtual(key) | Self::Physical(key) => key,
        }
    }
}

impl fmt::Display for SyncRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Virtual(key) => write!(f, "virtual {}", key),
            Self::Physical(key) => write!(f, "physical {}", key),
        }
    }
}

/// Per-kind reconciler between a virtual object and its physical peer
///
/// Implementors provide identity mapping and translation; the default
/// `sync_down`, `sync_up` and `sync` bodies cover kinds that only flow from
/// virtual to physical.
pub trait Syncer: Send + Sync + 'static {
    type Object: Resource;

    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Register the field indexes this syncer looks objects up by
    fn register_indices(&self, _ctx: &SyncContext) -> Result<()> {
        Ok(())
    }

    /// Key of the physical peer of a virtual object
    fn physical_key(&self, ctx: &SyncContext, virtual_obj: &Self::Object) -> Result<ResourceKey>;

    /// Key of the virtual peer of a physical object, if it has one
    fn virtual_key(&self, ctx: &SyncContext, physical_obj: &Self::Object) -> Option<ResourceKey>;

    /// Build the physical object for a virtual object
    fn translate(&self, ctx: &SyncContext, virtual_obj: &Self::Object) -> Result<Self::Object>;

    /// Apply the virtual object's current state onto a copy of its physical peer
    fn translate_update(
        &self,
        ctx: &SyncContext,
        physical_obj: &mut Self::Object,
        virtual_obj: &Self::Object,
    ) -> Result<()>;

    /// Only the virtual object exists
    fn sync_down(&self, ctx: &SyncContext, virtual_obj: &Self::Object) -> Result<SyncOutcome> {
        if virtual_obj.is_being_deleted() {
            debug!(syncer = self.name(), "Virtual {} is being deleted", virtual_obj.name());
            return Ok(SyncOutcome::skipped("virtual object is being deleted"));
        }

        let physical_obj = self.translate(ctx, virtual_obj)?;
        let key = object_key(&physical_obj)?;
        info!(
            syncer = self.name(),
            "Creating physical {} because virtual {} has no peer",
            key,
            object_key(virtual_obj)?
        );
        ctx.physical_client()?.create(physical_obj)?;
        Ok(SyncOutcome::Created)
    }

    /// Only the physical object exists
    fn sync_up(&self, ctx: &SyncContext, physical_obj: &Self::Object) -> Result<SyncOutcome> {
        if !ctx.translator().is_managed(physical_obj.metadata()) {
            return Ok(SyncOutcome::skipped("physical object is not managed"));
        }
        if physical_obj.is_being_deleted() {
            return Ok(SyncOutcome::skipped("physical object is already being deleted"));
        }

        let key = object_key(physical_obj)?;
        info!(
            syncer = self.name(),
            "Deleting physical {} because its virtual object is gone", key
        );
        delete_ignoring_not_found(ctx.physical_client()?, physical_obj)
    }

    /// Both objects exist
    fn sync(
        &self,
        ctx: &SyncContext,
        physical_obj: &Self::Object,
        virtual_obj: &Self::Object,
    ) -> Result<SyncOutcome> {
        if virtual_obj.is_being_deleted() {
            if physical_obj.is_being_deleted() {
                return Ok(SyncOutcome::skipped("physical object is already being deleted"));
            }
            info!(
                syncer = self.name(),
                "Deleting physical {} because virtual {} is being deleted",
                object_key(physical_obj)?,
                object_key(virtual_obj)?
            );
            return delete_ignoring_not_found(ctx.physical_client()?, physical_obj);
        }

        let mut updated = physical_obj.clone();
        self.translate_update(ctx, &mut updated, virtual_obj)?;
        if &updated == physical_obj {
            debug!(syncer = self.name(), "Physical {} is up to date", physical_obj.name());
            return Ok(SyncOutcome::Unchanged);
        }

        info!(
            syncer = self.name(),
            "Updating physical {} because virtual {} changed",
            object_key(physical_obj)?,
            object_key(virtual_obj)?
        );
        ctx.physical_client()?.update(updated)?;
        Ok(SyncOutcome::Updated)
    }
}

/// Read both sides of the pair named by `request` and run the matching syncer step
pub fn reconcile<S: Syncer + ?Sized>(
    syncer: &S,
    ctx: &SyncContext,
    request: &SyncRequest,
) -> Result<SyncOutcome> {
    let (virtual_obj, physical_obj) = match request {
        SyncRequest::Virtual(key) => {
            let Some(virtual_obj) = ctx.virtual_client()?.try_get::<S::Object>(key)? else {
                debug!(syncer = syncer.name(), "Virtual {} is gone", key);
                return Ok(SyncOutcome::skipped("virtual object is gone"));
            };
            let physical_key = syncer.physical_key(ctx, &virtual_obj)?;
            let physical_obj = ctx.physical_client()?.try_get::<S::Object>(&physical_key)?;
            if let Some(physical_obj) = &physical_obj {
                if syncer.virtual_key(ctx, physical_obj).as_ref() != Some(key) {
                    return Ok(name_collision(syncer, &physical_key));
                }
            }
            (Some(virtual_obj), physical_obj)
        }
        SyncRequest::Physical(key) => {
            let Some(physical_obj) = ctx.physical_client()?.try_get::<S::Object>(key)? else {
                debug!(syncer = syncer.name(), "Physical {} is gone", key);
                return Ok(SyncOutcome::skipped("physical object is gone"));
            };
            let virtual_obj = match syncer.virtual_key(ctx, &physical_obj) {
                Some(virtual_key) => ctx.virtual_client()?.try_get::<S::Object>(&virtual_key)?,
                None => None,
            };
            if let Some(virtual_obj) = &virtual_obj {
                if &syncer.physical_key(ctx, virtual_obj)? != key {
                    return Ok(name_collision(syncer, key));
                }
            }
            (virtual_obj, Some(physical_obj))
        }
    };

    let existence = Existence::of(virtual_obj.as_ref(), physical_obj.as_ref());
    let outcome = match (virtual_obj, physical_obj) {
        (Some(virtual_obj), None) => syncer.sync_down(ctx, &virtual_obj)?,
        (None, Some(physical_obj)) => syncer.sync_up(ctx, &physical_obj)?,
        (Some(virtual_obj), Some(physical_obj)) => syncer.sync(ctx, &physical_obj, &virtual_obj)?,
        (None, None) => SyncOutcome::Unchanged,
    };

    debug!(
        syncer = syncer.name(),
        ?existence,
        "Reconciled {}: {}", request, outcome
    );
    Ok(outcome)
}

fn name_collision<S: Syncer + ?Sized>(syncer: &S, physical_key: &ResourceKey) -> SyncOutcome {
    debug!(
        syncer = syncer.name(),
        "Physical {} belongs to a different virtual object", physical_key
    );
    SyncOutcome::skipped("physical object belongs to a different virtual object")
}

/// Type-erased syncer, as driven by the controller
pub trait Reconciler: Send + Sync {
    fn syncer_name(&self) -> &'static str;

    /// Kind this reconciler synchronizes
    fn gvk(&self) -> GroupVersionKind;

    /// One-time setup before the first pass
    fn setup(&self, ctx: &SyncContext) -> Result<()>;

    fn reconcile(&self, ctx: &SyncContext, request: &SyncRequest) -> Result<SyncOutcome>;

    /// Physical key of a virtual object given as JSON, e.g. the last state
    /// carried by a deletion event
    fn physical_key_of(&self, ctx: &SyncContext, virtual_obj: &Value) -> Option<ResourceKey>;

    /// Virtual key of a physical object given as JSON
    fn virtual_key_of(&self, ctx: &SyncContext, physical_obj: &Value) -> Option<ResourceKey>;
}

impl<S: Syncer> Reconciler for S {
    fn syncer_name(&self) -> &'static str {
        Syncer::name(self)
    }

    fn gvk(&self) -> GroupVersionKind {
        S::Object::gvk()
    }

    fn setup(&self, ctx: &SyncContext) -> Result<()> {
        Syncer::register_indices(self, ctx)
    }

    fn reconcile(&self, ctx: &SyncContext, request: &SyncRequest) -> Result<SyncOutcome> {
        reconcile(self, ctx, request)
    }

    fn physical_key_of(&self, ctx: &SyncContext, virtual_obj: &Value) -> Option<ResourceKey> {
        let object: S::Object = serde_json::from_value(virtual_obj.clone()).ok()?;
        self.physical_key(ctx, &object).ok()
    }

    fn virtual_key_of(&self, ctx: &SyncContext, physical_obj: &Value) -> Option<ResourceKey> {
        let object: S::Object = serde_json::from_value(physical_obj.clone()).ok()?;
        self.virtual_key(ctx, &object)
    }
}

/// Key of an object, as a cluster error when it has no name
pub(crate) fn object_key<T: Resource>(object: &T) -> Result<ResourceKey> {
    object.resource_key().map_err(|e| {
        VkubeError::invalid_resource(
            e.to_string(),
            "Set metadata.name, and metadata.namespace for namespaced kinds",
        )
        .into()
    })
}

/// Delete `object` at the version it was read, treating NotFound as done
pub(crate) fn delete_ignoring_not_found<T: Resource>(
    cluster: &vkube_store::Cluster,
    object: &T,
) -> Result<SyncOutcome> {
    let key = object_key(object)?;
    match cluster.delete::<T>(&key, object.resource_version().as_ref()) {
        Ok(()) => Ok(SyncOutcome::Deleted),
        Err(e) if e.is_not_found() => {
            debug!("{} was already deleted", key);
            Ok(SyncOutcome::Unchanged)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_existence() {
        assert_eq!(Existence::of(Some(&1), None), Existence::VirtualOnly);
        assert_eq!(Existence::of(None, Some(&1)), Existence::PhysicalOnly);
        assert_eq!(Existence::of(Some(&1), Some(&2)), Existence::Both);
        assert_eq!(Existence::of::<i32>(None, None), Existence::Neither);
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(SyncOutcome::Created.to_string(), "created");
        assert_eq!(
            SyncOutcome::skipped("physical object is not managed").to_string(),
            "skipped (physical object is not managed)"
        );
        assert!(SyncOutcome::Deleted.is_write());
        assert!(!SyncOutcome::Unchanged.is_write());
    }

    #[test]
    fn test_request_key() {
        let key = ResourceKey::cluster_scoped(GroupVersionKind::persistent_volume(), "pv-1");
        let request = SyncRequest::Physical(key.clone());
        assert_eq!(request.key(), &key);
        assert_eq!(request.to_string(), "physical v1/PersistentVolume/pv-1");
    }
}
