//! PersistentVolume synchronization
//!
//! Volumes flow both ways. A volume created in the virtual cluster is created
//! on the host under a cluster-scoped physical name ("forward"). A volume the
//! host provisions for a tenant claim is mirrored into the virtual cluster
//! under its own name ("backward"), carrying the host volume's name in an
//! annotation. Capacity and status are owned by the host.

use crate::context::SyncContext;
use crate::error::{Result, SyncError};
use crate::syncer::{delete_ignoring_not_found, object_key, SyncOutcome, Syncer};
use crate::translate::{reset_object_metadata, HOST_CLUSTER_PERSISTENT_VOLUME_ANNOTATION};
use k8s_openapi::api::core::v1::{ObjectReference, PersistentVolume, PersistentVolumeClaim};
use std::fmt;
use tracing::{debug, info, warn};
use vkube_core::{capacity_equal, GroupVersionKind, Resource, ResourceKey};
use vkube_store::Cluster;

/// Virtual PersistentVolumeClaims indexed by their physical name
pub const INDEX_BY_PHYSICAL_NAME: &str = "vkube.io/physical-name";

/// Lifecycle phase of a volume, ordered along its normal progression
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum VolumePhase {
    Pending,
    Available,
    Bound,
    Released,
    Failed,
}

impl VolumePhase {
    pub fn parse(phase: &str) -> Option<Self> {
        match phase {
            "Pending" => Some(Self::Pending),
            "Available" => Some(Self::Available),
            "Bound" => Some(Self::Bound),
            "Released" => Some(Self::Released),
            "Failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Phase reported in a volume's status
    pub fn of(pv: &PersistentVolume) -> Option<Self> {
        pv.status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .and_then(Self::parse)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Available => "Available",
            Self::Bound => "Bound",
            Self::Released => "Released",
            Self::Failed => "Failed",
        }
    }
}

impl fmt::Display for VolumePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What happens to a volume once its claim is released
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReclaimPolicy {
    #[default]
    Retain,
    Delete,
    /// Deprecated upstream; handled like Retain
    Recycle,
}

impl ReclaimPolicy {
    pub fn of(pv: &PersistentVolume) -> Self {
        match pv
            .spec
            .as_ref()
            .and_then(|s| s.persistent_volume_reclaim_policy.as_deref())
        {
            Some("Delete") => Self::Delete,
            Some("Recycle") => Self::Recycle,
            _ => Self::Retain,
        }
    }

    /// Whether a released volume is deleted
    pub fn deletes_volume(&self) -> bool {
        matches!(self, Self::Delete)
    }
}

/// Whether a host volume should have a virtual peer
#[derive(Debug, Clone, PartialEq)]
pub enum Eligibility {
    /// Mirror it; `claim` is the virtual claim it is bound to, if any
    Eligible {
        claim: Option<Box<PersistentVolumeClaim>>,
    },
    NotEligible { reason: &'static str },
}

/// Register the claim index volume eligibility is decided by
pub fn register_indices(ctx: &SyncContext) -> Result<()> {
    let translator = ctx.translator().clone();
    ctx.virtual_client()?
        .register_index::<PersistentVolumeClaim, _>(INDEX_BY_PHYSICAL_NAME, move |claim| {
            if claim.name().is_empty() {
                return Vec::new();
            }
            vec![translator.physical_name(claim.name(), claim.namespace())]
        })?;
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct PersistentVolumeSyncer;

impl PersistentVolumeSyncer {
    pub fn new() -> Self {
        Self
    }

    /// Decide whether a host volume belongs to this virtual cluster
    pub fn should_sync(
        &self,
        ctx: &SyncContext,
        physical_pv: &PersistentVolume,
    ) -> Result<Eligibility> {
        let translator = ctx.translator();
        let managed = translator.is_managed(&physical_pv.metadata);
        let unmanaged = |reason| {
            if managed {
                Eligibility::Eligible { claim: None }
            } else {
                Eligibility::NotEligible { reason }
            }
        };

        let Some(claim_ref) = claim_ref(physical_pv) else {
            return Ok(unmanaged("volume has no claim"));
        };
        let claim_name = claim_ref.name.as_deref().unwrap_or_default();
        let mut claims = if claim_name.is_empty() {
            Vec::new()
        } else {
            ctx.virtual_client()?
                .get_by_index::<PersistentVolumeClaim>(INDEX_BY_PHYSICAL_NAME, claim_name)?
        };
        if claims.len() > 1 {
            return Err(SyncError::ambiguous_index(
                INDEX_BY_PHYSICAL_NAME,
                claim_name,
                claims.len(),
            ));
        }
        let Some(claim) = claims.pop() else {
            return Ok(unmanaged("claim has no virtual counterpart"));
        };
        if claim_ref.namespace.as_deref() != Some(translator.target_namespace()) {
            return Ok(Eligibility::NotEligible {
                reason: "claim is outside the target namespace",
            });
        }

        Ok(Eligibility::Eligible {
            claim: Some(Box::new(claim)),
        })
    }

    /// Whether a host volume is the peer of a virtual volume
    ///
    /// A managed volume must carry the physical name derived from the virtual
    /// volume. Any other volume must be bound to a claim in the target
    /// namespace that is the physical claim of the virtual volume's claim.
    pub fn is_peer(
        &self,
        ctx: &SyncContext,
        physical_pv: &PersistentVolume,
        virtual_pv: &PersistentVolume,
    ) -> bool {
        let translator = ctx.translator();
        if translator.is_managed(&physical_pv.metadata) {
            let expected = translator.physical_name_cluster_scoped(virtual_pv.name());
            return physical_pv.name() == expected;
        }

        let (Some(physical_ref), Some(virtual_ref)) =
            (claim_ref(physical_pv), claim_ref(virtual_pv))
        else {
            return false;
        };
        if physical_ref.namespace.as_deref() != Some(translator.target_namespace()) {
            return false;
        }
        let name = virtual_ref.name.as_deref().unwrap_or_default();
        let namespace = virtual_ref.namespace.as_deref().unwrap_or_default();
        if name.is_empty() {
            return false;
        }
        physical_ref.name.as_deref() == Some(translator.physical_name(name, namespace).as_str())
    }

    /// Build the virtual mirror of a host volume
    pub fn translate_backwards(
        &self,
        physical_pv: &PersistentVolume,
        claim: Option<&PersistentVolumeClaim>,
    ) -> PersistentVolume {
        let mut virtual_pv = physical_pv.clone();
        reset_object_metadata(&mut virtual_pv.metadata);
        virtual_pv
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(
                HOST_CLUSTER_PERSISTENT_VOLUME_ANNOTATION.to_string(),
                physical_pv.name().to_string(),
            );

        let released = is_released(physical_pv);
        if let (Some(spec), Some(claim)) = (virtual_pv.spec.as_mut(), claim) {
            if let Some(claim_ref) = spec.claim_ref.as_mut() {
                point_at_claim(claim_ref, claim, released);
            }
            if let Some(class) = storage_class(claim) {
                spec.storage_class_name = Some(class);
            }
        }
        // Status is written separately through the status subresource
        virtual_pv.status = None;
        virtual_pv
    }

    /// Bring a backward volume's metadata and spec in line with the host volume
    ///
    /// Capacity and the claim reference keep their current value when they
    /// are semantically equal, so a convergent pair compares equal.
    pub fn translate_update_backwards(
        &self,
        virtual_pv: &mut PersistentVolume,
        physical_pv: &PersistentVolume,
        claim: Option<&PersistentVolumeClaim>,
    ) {
        let mut spec = physical_pv.spec.clone().unwrap_or_default();
        if let Some(claim) = claim {
            if let Some(claim_ref) = spec.claim_ref.as_mut() {
                point_at_claim(claim_ref, claim, is_released(physical_pv));
            }
            if let Some(class) = storage_class(claim) {
                spec.storage_class_name = Some(class);
            }
        }

        if let Some(current) = virtual_pv.spec.as_ref() {
            if claim_refs_match(current.claim_ref.as_ref(), spec.claim_ref.as_ref()) {
                spec.claim_ref = current.claim_ref.clone();
            }
            if capacity_equal(current.capacity.as_ref(), spec.capacity.as_ref()) {
                spec.capacity = current.capacity.clone();
            }
        }
        virtual_pv.spec = Some(spec);

        let mut annotations = physical_pv.metadata.annotations.clone().unwrap_or_default();
        annotations.insert(
            HOST_CLUSTER_PERSISTENT_VOLUME_ANNOTATION.to_string(),
            physical_pv.name().to_string(),
        );
        virtual_pv.metadata.annotations = Some(annotations);
        virtual_pv.metadata.labels = physical_pv.metadata.labels.clone();
    }

    /// Translate a virtual claim reference into the physical claim's identity
    fn translate_claim_ref(
        &self,
        ctx: &SyncContext,
        virtual_pv: &PersistentVolume,
    ) -> Result<Option<ObjectReference>> {
        let Some(claim_ref) = claim_ref(virtual_pv) else {
            return Ok(None);
        };
        let name = claim_ref
            .name
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| SyncError::invalid_claim_ref(virtual_pv.name(), "claimRef.name is empty"))?;
        let namespace = claim_ref
            .namespace
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                SyncError::invalid_claim_ref(virtual_pv.name(), "claimRef.namespace is empty")
            })?;

        let translator = ctx.translator();
        let physical_name = translator.physical_name(name, namespace);
        let key = ResourceKey::new(
            GroupVersionKind::persistent_volume_claim(),
            translator.target_namespace(),
            &physical_name,
        );
        let physical_claim = ctx
            .physical_client()?
            .try_get::<PersistentVolumeClaim>(&key)?;

        Ok(Some(ObjectReference {
            name: Some(physical_name),
            namespace: Some(translator.target_namespace().to_string()),
            uid: physical_claim.as_ref().and_then(|c| c.metadata.uid.clone()),
            resource_version: physical_claim
                .as_ref()
                .and_then(|c| c.metadata.resource_version.clone()),
            ..claim_ref.clone()
        }))
    }

    /// Copy the host status onto the virtual volume when they differ
    fn sync_status(
        &self,
        ctx: &SyncContext,
        physical_pv: &PersistentVolume,
        virtual_pv: &PersistentVolume,
    ) -> Result<SyncOutcome> {
        if virtual_pv.status == physical_pv.status {
            return Ok(SyncOutcome::Unchanged);
        }

        if let (Some(virtual_phase), Some(physical_phase)) =
            (VolumePhase::of(virtual_pv), VolumePhase::of(physical_pv))
        {
            if physical_phase < virtual_phase {
                warn!(
                    "Host volume {} went back from {} to {}, copying it to virtual volume {}",
                    physical_pv.name(),
                    virtual_phase,
                    physical_phase,
                    virtual_pv.name()
                );
            }
        }

        info!(
            "Updating status of virtual volume {} from host volume {}",
            virtual_pv.name(),
            physical_pv.name()
        );
        let mut updated = virtual_pv.clone();
        updated.status = physical_pv.status.clone();
        ctx.virtual_client()?.update_status(updated)?;
        Ok(SyncOutcome::Updated)
    }

    /// Delete a released volume on both sides together with its claims
    fn reclaim(
        &self,
        ctx: &SyncContext,
        physical_pv: &PersistentVolume,
        virtual_pv: &PersistentVolume,
    ) -> Result<SyncOutcome> {
        info!(
            "Deleting volume {} (host {}) and its claims: released with reclaim policy Delete",
            virtual_pv.name(),
            physical_pv.name()
        );
        delete_ignoring_not_found(ctx.physical_client()?, physical_pv)?;
        delete_ignoring_not_found(ctx.virtual_client()?, virtual_pv)?;
        if let Some(claim_ref) = claim_ref(physical_pv) {
            if claim_ref.namespace.as_deref() == Some(ctx.translator().target_namespace()) {
                delete_claim(ctx.physical_client()?, claim_ref)?;
            } else {
                warn!(
                    "Keeping claim {:?} of host volume {}: it is outside namespace {}",
                    claim_ref.name,
                    physical_pv.name(),
                    ctx.translator().target_namespace()
                );
            }
        }
        if let Some(claim_ref) = claim_ref(virtual_pv) {
            delete_claim(ctx.virtual_client()?, claim_ref)?;
        }
        Ok(SyncOutcome::Deleted)
    }

    /// Pair created on the virtual side: spec flows down, capacity and status flow up
    fn sync_forward(
        &self,
        ctx: &SyncContext,
        physical_pv: &PersistentVolume,
        virtual_pv: &PersistentVolume,
    ) -> Result<SyncOutcome> {
        let mut outcome = SyncOutcome::Unchanged;

        let mut updated_physical = physical_pv.clone();
        self.translate_update(ctx, &mut updated_physical, virtual_pv)?;
        if &updated_physical != physical_pv {
            info!(
                "Updating host volume {} because virtual volume {} changed",
                physical_pv.name(),
                virtual_pv.name()
            );
            ctx.physical_client()?.update(updated_physical)?;
            outcome = SyncOutcome::Updated;
        }

        let physical_capacity = physical_pv.spec.as_ref().and_then(|s| s.capacity.as_ref());
        let virtual_capacity = virtual_pv.spec.as_ref().and_then(|s| s.capacity.as_ref());
        let mut current_virtual = virtual_pv.clone();
        if !capacity_equal(virtual_capacity, physical_capacity) {
            info!(
                "Updating capacity of virtual volume {} from host volume {}",
                virtual_pv.name(),
                physical_pv.name()
            );
            current_virtual
                .spec
                .get_or_insert_with(Default::default)
                .capacity = physical_capacity.cloned();
            current_virtual = ctx.virtual_client()?.update(current_virtual)?;
            outcome = SyncOutcome::Updated;
        }

        if self.sync_status(ctx, physical_pv, &current_virtual)?.is_write() {
            outcome = SyncOutcome::Updated;
        }
        Ok(outcome)
    }

    /// Pair mirrored from the host: everything flows up
    fn sync_backward(
        &self,
        ctx: &SyncContext,
        physical_pv: &PersistentVolume,
        virtual_pv: &PersistentVolume,
    ) -> Result<SyncOutcome> {
        let claim = match self.should_sync(ctx, physical_pv)? {
            Eligibility::NotEligible { reason } => {
                info!(
                    "Deleting virtual volume {} because host volume {} is no longer mirrored: {}",
                    virtual_pv.name(),
                    physical_pv.name(),
                    reason
                );
                return delete_ignoring_not_found(ctx.virtual_client()?, virtual_pv);
            }
            Eligibility::Eligible { claim } => claim,
        };

        let mut updated = virtual_pv.clone();
        self.translate_update_backwards(&mut updated, physical_pv, claim.as_deref());

        let mut outcome = SyncOutcome::Unchanged;
        let current = if &updated != virtual_pv {
            info!(
                "Updating virtual volume {} because host volume {} changed",
                virtual_pv.name(),
                physical_pv.name()
            );
            outcome = SyncOutcome::Updated;
            ctx.virtual_client()?.update(updated)?
        } else {
            updated
        };

        if self.sync_status(ctx, physical_pv, &current)?.is_write() {
            outcome = SyncOutcome::Updated;
        }
        Ok(outcome)
    }
}

impl Syncer for PersistentVolumeSyncer {
    type Object = PersistentVolume;

    fn name(&self) -> &'static str {
        "persistentvolume"
    }

    fn register_indices(&self, ctx: &SyncContext) -> Result<()> {
        register_indices(ctx)
    }

    fn physical_key(&self, ctx: &SyncContext, virtual_pv: &PersistentVolume) -> Result<ResourceKey> {
        let name = match virtual_pv.annotation(HOST_CLUSTER_PERSISTENT_VOLUME_ANNOTATION) {
            Some(host_name) => host_name.to_string(),
            None => ctx
                .translator()
                .physical_name_cluster_scoped(virtual_pv.name()),
        };
        Ok(ResourceKey::cluster_scoped(
            GroupVersionKind::persistent_volume(),
            name,
        ))
    }

    fn virtual_key(&self, ctx: &SyncContext, physical_pv: &PersistentVolume) -> Option<ResourceKey> {
        let name = match ctx.translator().origin(&physical_pv.metadata) {
            Some((_, name)) => name,
            None => physical_pv.name().to_string(),
        };
        Some(ResourceKey::cluster_scoped(
            GroupVersionKind::persistent_volume(),
            name,
        ))
    }

    fn translate(&self, ctx: &SyncContext, virtual_pv: &PersistentVolume) -> Result<PersistentVolume> {
        let translator = ctx.translator();
        let metadata = translator.host_metadata(
            &virtual_pv.metadata,
            translator.physical_name_cluster_scoped(virtual_pv.name()),
            None,
        );
        let mut spec = virtual_pv.spec.clone().unwrap_or_default();
        spec.claim_ref = self.translate_claim_ref(ctx, virtual_pv)?;

        Ok(PersistentVolume {
            metadata,
            spec: Some(spec),
            status: None,
        })
    }

    fn translate_update(
        &self,
        ctx: &SyncContext,
        physical_pv: &mut PersistentVolume,
        virtual_pv: &PersistentVolume,
    ) -> Result<()> {
        let translator = ctx.translator();
        physical_pv.metadata.labels = Some(
            translator.host_labels(&virtual_pv.metadata, Some(&physical_pv.metadata)),
        );
        physical_pv.metadata.annotations = Some(
            translator.host_annotations(&virtual_pv.metadata, Some(&physical_pv.metadata)),
        );

        let current = physical_pv.spec.clone().unwrap_or_default();
        let mut spec = virtual_pv.spec.clone().unwrap_or_default();
        spec.claim_ref = self.translate_claim_ref(ctx, virtual_pv)?;
        // A released volume stays bound to the claim it was released from
        if is_released(physical_pv)
            || claim_refs_match(current.claim_ref.as_ref(), spec.claim_ref.as_ref())
        {
            spec.claim_ref = current.claim_ref;
        }
        // The host owns capacity
        spec.capacity = current.capacity;
        physical_pv.spec = Some(spec);
        Ok(())
    }

    fn sync_down(&self, ctx: &SyncContext, virtual_pv: &PersistentVolume) -> Result<SyncOutcome> {
        if virtual_pv.is_being_deleted() {
            info!(
                "Deleting virtual volume {} because it is being deleted and has no host volume",
                virtual_pv.name()
            );
            return force_delete(ctx.virtual_client()?, virtual_pv);
        }
        if is_backward(virtual_pv) {
            info!(
                "Deleting virtual volume {} because its host volume is gone",
                virtual_pv.name()
            );
            return force_delete(ctx.virtual_client()?, virtual_pv);
        }
        if VolumePhase::of(virtual_pv) == Some(VolumePhase::Released)
            && ReclaimPolicy::of(virtual_pv).deletes_volume()
        {
            info!(
                "Deleting virtual volume {} because it is released with reclaim policy Delete",
                virtual_pv.name()
            );
            return delete_ignoring_not_found(ctx.virtual_client()?, virtual_pv);
        }

        let physical_pv = self.translate(ctx, virtual_pv)?;
        info!(
            "Creating host volume {} for virtual volume {}",
            physical_pv.name(),
            virtual_pv.name()
        );
        ctx.physical_client()?.create(physical_pv)?;
        Ok(SyncOutcome::Created)
    }

    fn sync_up(&self, ctx: &SyncContext, physical_pv: &PersistentVolume) -> Result<SyncOutcome> {
        if physical_pv.is_being_deleted() {
            debug!("Host volume {} is being deleted", physical_pv.name());
            return Ok(SyncOutcome::skipped("host volume is being deleted"));
        }

        if ctx.translator().is_managed(&physical_pv.metadata) {
            if ReclaimPolicy::of(physical_pv).deletes_volume() {
                info!(
                    "Deleting host volume {} because its virtual volume is gone",
                    physical_pv.name()
                );
                return delete_ignoring_not_found(ctx.physical_client()?, physical_pv);
            }
            debug!(
                "Retaining host volume {} although its virtual volume is gone",
                physical_pv.name()
            );
            return Ok(SyncOutcome::skipped("virtual volume is gone, host volume is retained"));
        }

        let claim = match self.should_sync(ctx, physical_pv)? {
            Eligibility::NotEligible { reason } => {
                debug!("Not mirroring host volume {}: {}", physical_pv.name(), reason);
                return Ok(SyncOutcome::skipped(reason));
            }
            Eligibility::Eligible { claim } => claim,
        };

        let virtual_pv = self.translate_backwards(physical_pv, claim.as_deref());
        info!(
            "Creating virtual volume {} for host volume {}",
            virtual_pv.name(),
            physical_pv.name()
        );
        let created = ctx.virtual_client()?.create(virtual_pv)?;
        self.sync_status(ctx, physical_pv, &created)?;
        Ok(SyncOutcome::Created)
    }

    fn sync(
        &self,
        ctx: &SyncContext,
        physical_pv: &PersistentVolume,
        virtual_pv: &PersistentVolume,
    ) -> Result<SyncOutcome> {
        if !self.is_peer(ctx, physical_pv, virtual_pv) {
            info!(
                "Deleting virtual volume {} because host volume {} does not belong to it",
                virtual_pv.name(),
                physical_pv.name()
            );
            return force_delete(ctx.virtual_client()?, virtual_pv);
        }
        if virtual_pv.is_being_deleted() {
            if physical_pv.is_being_deleted() {
                return Ok(SyncOutcome::skipped("host volume is already being deleted"));
            }
            info!(
                "Deleting host volume {} because virtual volume {} is being deleted",
                physical_pv.name(),
                virtual_pv.name()
            );
            return delete_ignoring_not_found(ctx.physical_client()?, physical_pv);
        }
        if physical_pv.is_being_deleted() {
            debug!("Host volume {} is being deleted", physical_pv.name());
            return Ok(SyncOutcome::skipped("host volume is being deleted"));
        }

        if VolumePhase::of(physical_pv) == Some(VolumePhase::Released) {
            if ReclaimPolicy::of(physical_pv).deletes_volume() {
                return self.reclaim(ctx, physical_pv, virtual_pv);
            }
            if !ctx.translator().is_managed(&physical_pv.metadata) {
                // The claim is gone, only status is mirrored
                return self.sync_status(ctx, physical_pv, virtual_pv);
            }
        }

        if ctx.translator().is_managed(&physical_pv.metadata) {
            self.sync_forward(ctx, physical_pv, virtual_pv)
        } else {
            self.sync_backward(ctx, physical_pv, virtual_pv)
        }
    }
}

fn claim_ref(pv: &PersistentVolume) -> Option<&ObjectReference> {
    pv.spec.as_ref().and_then(|s| s.claim_ref.as_ref())
}

fn storage_class(claim: &PersistentVolumeClaim) -> Option<String> {
    claim
        .spec
        .as_ref()
        .and_then(|s| s.storage_class_name.clone())
}

/// Whether a virtual volume mirrors a host volume
fn is_backward(virtual_pv: &PersistentVolume) -> bool {
    virtual_pv
        .annotation(HOST_CLUSTER_PERSISTENT_VOLUME_ANNOTATION)
        .is_some()
}

/// Whether a volume has left its claim
fn is_released(pv: &PersistentVolume) -> bool {
    VolumePhase::of(pv).is_some_and(|phase| phase >= VolumePhase::Released)
}

/// Point a claim reference at a virtual claim; a released reference keeps
/// the uid of the claim it was bound to
fn point_at_claim(claim_ref: &mut ObjectReference, claim: &PersistentVolumeClaim, released: bool) {
    claim_ref.name = claim.metadata.name.clone();
    claim_ref.namespace = claim.metadata.namespace.clone();
    if !released {
        claim_ref.uid = claim.metadata.uid.clone();
        claim_ref.resource_version = claim.metadata.resource_version.clone();
    }
}

/// Claim references are equal when they differ at most in resourceVersion
fn claim_refs_match(a: Option<&ObjectReference>, b: Option<&ObjectReference>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => {
            let strip = |r: &ObjectReference| ObjectReference {
                resource_version: None,
                ..r.clone()
            };
            strip(a) == strip(b)
        }
        (None, None) => true,
        _ => false,
    }
}

/// Delete the claim a reference points at, if it is still that claim
fn delete_claim(cluster: &Cluster, claim_ref: &ObjectReference) -> Result<()> {
    let (Some(name), Some(namespace)) = (claim_ref.name.as_deref(), claim_ref.namespace.as_deref())
    else {
        return Ok(());
    };
    let key = ResourceKey::new(GroupVersionKind::persistent_volume_claim(), namespace, name);
    let Some(claim) = cluster.try_get::<PersistentVolumeClaim>(&key)? else {
        return Ok(());
    };
    if let Some(uid) = claim_ref.uid.as_deref() {
        if claim.metadata.uid.as_deref() != Some(uid) {
            debug!("Claim {} was recreated since it was bound, keeping it", key);
            return Ok(());
        }
    }

    info!(cluster = cluster.name(), "Deleting claim {} of reclaimed volume", key);
    delete_ignoring_not_found(cluster, &claim)?;
    Ok(())
}

/// Delete a virtual volume, clearing finalizers nothing in the virtual cluster would clear
fn force_delete(cluster: &Cluster, pv: &PersistentVolume) -> Result<SyncOutcome> {
    if !pv.has_finalizers() {
        return delete_ignoring_not_found(cluster, pv);
    }

    let mut cleared = pv.clone();
    cleared.metadata.finalizers = None;
    let cleared = match cluster.update(cleared) {
        Ok(updated) => updated,
        Err(e) if e.is_not_found() => return Ok(SyncOutcome::Unchanged),
        Err(e) => return Err(e.into()),
    };
    if pv.is_being_deleted() {
        // Clearing the last finalizer removed it
        debug!("Virtual volume {} removed", object_key(pv)?);
        return Ok(SyncOutcome::Deleted);
    }
    delete_ignoring_not_found(cluster, &cleared)
}
