pub mod quantities;

pub use quantities::{capacity_equal, ResourceQuantities};

use crate::{GroupVersionKind, ResourceKey, ResourceVersion};
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Base validation for all resources
pub fn validate_base(metadata: &ObjectMeta) -> Result<(), ResourceError> {
    if metadata.name.is_none() {
        return Err(ResourceError::MissingField("metadata.name".to_string()));
    }

    if let Some(name) = &metadata.name {
        if !is_valid_name(name) {
            return Err(ResourceError::InvalidName(name.clone()));
        }
    }

    Ok(())
}

/// Trait for the Kubernetes resources the engine stores and synchronizes
pub trait Resource: Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync + 'static {
    /// apiVersion of this kind ("v1", "policy/v1")
    const API_VERSION: &'static str;

    /// Kind name
    const KIND: &'static str;

    /// Whether objects of this kind live in a namespace
    const NAMESPACED: bool;

    /// Get the metadata of this resource
    fn metadata(&self) -> &ObjectMeta;

    /// Get mutable metadata
    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    /// Get the GroupVersionKind
    fn gvk() -> GroupVersionKind {
        GroupVersionKind::from_api_version_kind(Self::API_VERSION, Self::KIND)
    }

    /// Name, or the empty string when unset
    fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    /// Namespace, or the empty string for cluster-scoped objects
    fn namespace(&self) -> &str {
        if Self::NAMESPACED {
            self.metadata().namespace.as_deref().unwrap_or_default()
        } else {
            ""
        }
    }

    /// Get the ResourceKey
    fn resource_key(&self) -> Result<ResourceKey, ResourceError> {
        let metadata = self.metadata();
        let name = metadata
            .name
            .as_ref()
            .ok_or_else(|| ResourceError::MissingField("metadata.name".to_string()))?;

        if !Self::NAMESPACED {
            return Ok(ResourceKey::cluster_scoped(Self::gvk(), name));
        }

        let namespace = metadata
            .namespace
            .as_ref()
            .filter(|ns| !ns.is_empty())
            .ok_or_else(|| ResourceError::MissingField("metadata.namespace".to_string()))?;

        Ok(ResourceKey::new(Self::gvk(), namespace, name))
    }

    /// Get the resource version
    fn resource_version(&self) -> Option<ResourceVersion> {
        self.metadata()
            .resource_version
            .as_ref()
            .map(ResourceVersion::new)
    }

    /// Set the resource version
    fn set_resource_version(&mut self, version: ResourceVersion) {
        self.metadata_mut().resource_version = Some(version.0);
    }

    /// Get the UID
    fn uid(&self) -> Option<String> {
        self.metadata().uid.clone()
    }

    /// Set the UID
    fn set_uid(&mut self, uid: String) {
        self.metadata_mut().uid = Some(uid);
    }

    /// Look up an annotation value
    fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata()
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }

    /// Look up a label value
    fn label(&self, key: &str) -> Option<&str> {
        self.metadata()
            .labels
            .as_ref()
            .and_then(|l| l.get(key))
            .map(String::as_str)
    }

    /// Whether a deletion has been requested and is waiting on finalizers
    fn is_being_deleted(&self) -> bool {
        self.metadata().deletion_timestamp.is_some()
    }

    /// Whether any finalizer is still pending
    fn has_finalizers(&self) -> bool {
        self.metadata()
            .finalizers
            .as_ref()
            .is_some_and(|f| !f.is_empty())
    }

    /// Validate the resource
    fn validate(&self) -> Result<(), ResourceError> {
        validate_base(self.metadata())
    }
}

/// Resource-related errors
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid resource name: {0}")]
    InvalidName(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

/// Validate a Kubernetes resource name (DNS-1123 subdomain)
pub fn is_valid_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 253 {
        return false;
    }

    // Must contain only lowercase alphanumeric, '-', or '.'
    // Must start and end with alphanumeric
    let chars: Vec<char> = name.chars().collect();

    if !chars[0].is_ascii_lowercase() && !chars[0].is_ascii_digit() {
        return false;
    }

    if !chars[chars.len() - 1].is_ascii_lowercase() && !chars[chars.len() - 1].is_ascii_digit() {
        return false;
    }

    chars
        .iter()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-' || *c == '.')
}

impl Resource for PersistentVolume {
    const API_VERSION: &'static str = "v1";
    const KIND: &'static str = "PersistentVolume";
    const NAMESPACED: bool = false;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Resource for PersistentVolumeClaim {
    const API_VERSION: &'static str = "v1";
    const KIND: &'static str = "PersistentVolumeClaim";
    const NAMESPACED: bool = true;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Resource for PodDisruptionBudget {
    const API_VERSION: &'static str = "policy/v1";
    const KIND: &'static str = "PodDisruptionBudget";
    const NAMESPACED: bool = true;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn validate(&self) -> Result<(), ResourceError> {
        validate_base(&self.metadata)?;

        // minAvailable and maxUnavailable are mutually exclusive
        if let Some(spec) = &self.spec {
            if spec.min_available.is_some() && spec.max_unavailable.is_some() {
                return Err(ResourceError::ValidationFailed(
                    "minAvailable and maxUnavailable cannot both be set".to_string(),
                ));
            }
        }

        Ok(())
    }
}
