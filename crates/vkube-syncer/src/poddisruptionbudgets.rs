//! PodDisruptionBudget synchronization
//!
//! Budgets only flow from the virtual cluster to the host. The selector is
//! rewritten with the same key translation applied to pod labels.

use crate::context::SyncContext;
use crate::error::Result;
use crate::syncer::Syncer;
use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use vkube_core::{GroupVersionKind, Resource, ResourceKey};

#[derive(Debug, Clone, Default)]
pub struct PodDisruptionBudgetSyncer;

impl PodDisruptionBudgetSyncer {
    pub fn new() -> Self {
        Self
    }
}

impl Syncer for PodDisruptionBudgetSyncer {
    type Object = PodDisruptionBudget;

    fn name(&self) -> &'static str {
        "poddisruptionbudget"
    }

    fn physical_key(&self, ctx: &SyncContext, virtual_pdb: &PodDisruptionBudget) -> Result<ResourceKey> {
        let translator = ctx.translator();
        Ok(ResourceKey::new(
            GroupVersionKind::pod_disruption_budget(),
            translator.target_namespace(),
            translator.physical_name(virtual_pdb.name(), virtual_pdb.namespace()),
        ))
    }

    fn virtual_key(&self, ctx: &SyncContext, physical_pdb: &PodDisruptionBudget) -> Option<ResourceKey> {
        let (namespace, name) = ctx.translator().origin(&physical_pdb.metadata)?;
        if namespace.is_empty() {
            return None;
        }
        Some(ResourceKey::new(
            GroupVersionKind::pod_disruption_budget(),
            namespace,
            name,
        ))
    }

    fn translate(&self, ctx: &SyncContext, virtual_pdb: &PodDisruptionBudget) -> Result<PodDisruptionBudget> {
        let translator = ctx.translator();
        let metadata = translator.host_metadata(
            &virtual_pdb.metadata,
            translator.physical_name(virtual_pdb.name(), virtual_pdb.namespace()),
            Some(translator.target_namespace().to_string()),
        );
        let spec = virtual_pdb.spec.as_ref().map(|spec| PodDisruptionBudgetSpec {
            selector: translator.host_label_selector(spec.selector.as_ref()),
            ..spec.clone()
        });

        Ok(PodDisruptionBudget {
            metadata,
            spec,
            status: None,
        })
    }

    fn translate_update(
        &self,
        ctx: &SyncContext,
        physical_pdb: &mut PodDisruptionBudget,
        virtual_pdb: &PodDisruptionBudget,
    ) -> Result<()> {
        let translator = ctx.translator();
        physical_pdb.metadata.annotations = Some(
            translator.host_annotations(&virtual_pdb.metadata, Some(&physical_pdb.metadata)),
        );
        physical_pdb.metadata.labels = Some(
            translator.host_labels(&virtual_pdb.metadata, Some(&physical_pdb.metadata)),
        );

        let desired = virtual_pdb.spec.clone().unwrap_or_default();
        let spec = physical_pdb.spec.get_or_insert_with(Default::default);
        spec.max_unavailable = desired.max_unavailable;
        spec.min_available = desired.min_available;
        spec.unhealthy_pod_eviction_policy = desired.unhealthy_pod_eviction_policy;
        spec.selector = translator.host_label_selector(desired.selector.as_ref());
        Ok(())
    }
}
