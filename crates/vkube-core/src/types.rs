use serde::{Deserialize, Serialize};
use std::fmt;

/// GroupVersionKind uniquely identifies a Kubernetes resource type
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupVersionKind {
    /// API group (e.g., "", "policy")
    pub group: String,
    /// API version (e.g., "v1")
    pub version: String,
    /// Resource kind (e.g., "PersistentVolume")
    pub kind: String,
}

impl GroupVersionKind {
    /// Create a new GVK
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// Create a GVK from apiVersion and kind
    /// apiVersion format: "v1" or "group/version"
    pub fn from_api_version_kind(api_version: &str, kind: &str) -> Self {
        let (group, version) = if let Some(idx) = api_version.find('/') {
            let (g, v) = api_version.split_at(idx);
            (g.to_string(), v[1..].to_string())
        } else {
            (String::new(), api_version.to_string())
        };

        Self {
            group,
            version,
            kind: kind.to_string(),
        }
    }

    /// core/v1 PersistentVolume
    pub fn persistent_volume() -> Self {
        Self::new("", "v1", "PersistentVolume")
    }

    /// core/v1 PersistentVolumeClaim
    pub fn persistent_volume_claim() -> Self {
        Self::new("", "v1", "PersistentVolumeClaim")
    }

    /// policy/v1 PodDisruptionBudget
    pub fn pod_disruption_budget() -> Self {
        Self::new("policy", "v1", "PodDisruptionBudget")
    }

    /// Get the apiVersion string (group/version or just version)
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.kind)
    }
}

/// ResourceKey uniquely identifies a specific resource instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    /// GroupVersionKind of the resource
    pub gvk: GroupVersionKind,
    /// Namespace (empty for cluster-scoped resources)
    pub namespace: String,
    /// Resource name
    pub name: String,
}

impl ResourceKey {
    /// Create a new ResourceKey
    pub fn new(gvk: GroupVersionKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            gvk,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Create a cluster-scoped ResourceKey
    pub fn cluster_scoped(gvk: GroupVersionKind, name: impl Into<String>) -> Self {
        Self {
            gvk,
            namespace: String::new(),
            name: name.into(),
        }
    }

    /// Check if this is a namespaced resource
    pub fn is_namespaced(&self) -> bool {
        !self.namespace.is_empty()
    }

    /// Get the storage key encoding: {api_version}/{kind}/{namespace}/{name}
    /// For cluster-scoped: {api_version}/{kind}/{name}
    pub fn storage_key(&self) -> String {
        let api_version = self.gvk.api_version();
        if self.is_namespaced() {
            format!("{}/{}/{}/{}", api_version, self.gvk.kind, self.namespace, self.name)
        } else {
            format!("{}/{}/{}", api_version, self.gvk.kind, self.name)
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_namespaced() {
            write!(f, "{}/{}/{}", self.gvk, self.namespace, self.name)
        } else {
            write!(f, "{}/{}", self.gvk, self.name)
        }
    }
}

/// Resource version - an opaque optimistic concurrency token
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceVersion(pub String);

impl ResourceVersion {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ResourceVersion {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ResourceVersion {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gvk_from_api_version() {
        let gvk = GroupVersionKind::from_api_version_kind("v1", "PersistentVolume");
        assert_eq!(gvk.group, "");
        assert_eq!(gvk.version, "v1");
        assert_eq!(gvk, GroupVersionKind::persistent_volume());
        assert_eq!(gvk.api_version(), "v1");

        let gvk = GroupVersionKind::from_api_version_kind("policy/v1", "PodDisruptionBudget");
        assert_eq!(gvk.group, "policy");
        assert_eq!(gvk.version, "v1");
        assert_eq!(gvk, GroupVersionKind::pod_disruption_budget());
        assert_eq!(gvk.api_version(), "policy/v1");
    }

    #[test]
    fn test_resource_key_storage_key() {
        let key = ResourceKey::new(GroupVersionKind::persistent_volume_claim(), "test", "data");
        assert_eq!(key.storage_key(), "v1/PersistentVolumeClaim/test/data");

        let key = ResourceKey::cluster_scoped(GroupVersionKind::persistent_volume(), "pv-1");
        assert_eq!(key.storage_key(), "v1/PersistentVolume/pv-1");
        assert!(!key.is_namespaced());
    }

    #[test]
    fn test_resource_key_display() {
        let key = ResourceKey::new(GroupVersionKind::pod_disruption_budget(), "team-a", "web");
        assert_eq!(key.to_string(), "policy/v1/PodDisruptionBudget/team-a/web");
    }
}
