//! Vkube Core - Fundamental types and traits for the vkube synchronization engine
//!
//! This crate provides:
//! - The `Resource` abstraction over the synchronized k8s-openapi kinds
//! - Error types with miette diagnostics
//! - Type-safe resource keys and identifiers
//! - Watch events and YAML helpers

pub mod error;
pub mod events;
pub mod resources;
pub mod types;

// Re-export commonly used types
pub use error::{Result, VkubeError};
pub use events::{ResourceEvent, WatchEventType};
pub use resources::{capacity_equal, is_valid_name, Resource, ResourceError, ResourceQuantities};
pub use types::{GroupVersionKind, ResourceKey, ResourceVersion};

// Re-export k8s-openapi types for convenience
pub use k8s_openapi;
pub use k8s_openapi::api::core::v1::{ObjectReference, PersistentVolume, PersistentVolumeClaim};
pub use k8s_openapi::api::policy::v1::PodDisruptionBudget;
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

use serde::Deserialize;

/// Serialize a resource to YAML
pub fn to_yaml<T: serde::Serialize>(resource: &T) -> Result<String> {
    serde_yaml::to_string(resource).map_err(|e| {
        VkubeError::serialization_error(
            format!("Failed to serialize to YAML: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Deserialize every document of a multi-document YAML stream
pub fn from_yaml_documents(data: &str) -> Result<Vec<serde_json::Value>> {
    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(data) {
        let value = serde_json::Value::deserialize(document).map_err(|e| {
            VkubeError::serialization_error(
                format!("Failed to deserialize from YAML: {}", e),
                Some(Box::new(e)),
            )
        })?;
        // Empty documents (e.g. a trailing `---`) deserialize to null
        if !value.is_null() {
            documents.push(value);
        }
    }
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_documents() {
        let yaml = r#"
apiVersion: v1
kind: PersistentVolumeClaim
metadata:
  name: data
  namespace: test
---
apiVersion: policy/v1
kind: PodDisruptionBudget
metadata:
  name: web
  namespace: test
---
"#;
        let docs = from_yaml_documents(yaml).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1]["kind"], "PodDisruptionBudget");

        let pvc: PersistentVolumeClaim = serde_json::from_value(docs[0].clone()).unwrap();
        assert_eq!(pvc.metadata.namespace.as_deref(), Some("test"));
    }

    #[test]
    fn test_to_yaml() {
        let mut pdb = PodDisruptionBudget::default();
        pdb.metadata.name = Some("web".to_string());
        let yaml = to_yaml(&pdb).unwrap();
        assert!(yaml.contains("name: web"));
    }
}
