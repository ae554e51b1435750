// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Core error type for vkube cluster operations
#[derive(Error, Debug, Diagnostic)]
pub enum VkubeError {
    /// Resource not found
    #[error("Resource not found: {resource_key}")]
    #[diagnostic(
        code(vkube::resource_not_found),
        help("Verify the resource name, namespace, and API version are correct")
    )]
    ResourceNotFound {
        #[allow(unused)]
        resource_key: String,
    },

    /// Resource already exists
    #[error("Resource already exists: {resource_key}")]
    #[diagnostic(
        code(vkube::resource_already_exists),
        help("Update the existing resource instead, or delete it first")
    )]
    ResourceAlreadyExists {
        #[allow(unused)]
        resource_key: String,
    },

    /// Invalid resource
    #[error("Invalid resource: {reason}")]
    #[diagnostic(code(vkube::invalid_resource), help("{suggestion}"))]
    InvalidResource {
        #[allow(unused)]
        reason: String,
        #[allow(unused)]
        suggestion: String,
    },

    /// Validation failed
    #[error("Validation failed for {resource_type}: {details}")]
    #[diagnostic(code(vkube::validation_failed), help("{help_text}"))]
    ValidationFailed {
        #[allow(unused)]
        resource_type: String,
        #[allow(unused)]
        details: String,
        #[allow(unused)]
        help_text: String,
    },

    /// Conflict detected (stale resourceVersion)
    #[error("Conflict detected for resource {resource_key}: expected version {our_version}, found {their_version}")]
    #[diagnostic(
        code(vkube::conflict),
        help("This resource was modified concurrently. Re-read it and retry with the latest resourceVersion")
    )]
    Conflict {
        #[allow(unused)]
        resource_key: String,
        #[allow(unused)]
        our_version: String,
        #[allow(unused)]
        their_version: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(
        code(vkube::serialization_error),
        help("Ensure the resource format is valid JSON or YAML")
    )]
    SerializationError {
        #[allow(unused)]
        message: String,
        #[source]
        #[allow(unused)]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(vkube::internal_error),
        help("This is likely a bug. Please report it with the full error details")
    )]
    InternalError {
        #[allow(unused)]
        message: String,
    },

    /// Invalid kind
    #[error("Unknown resource kind: {kind}")]
    #[diagnostic(
        code(vkube::invalid_kind),
        help("Supported kinds: PersistentVolume, PersistentVolumeClaim, PodDisruptionBudget")
    )]
    InvalidKind {
        #[allow(unused)]
        kind: String,
    },
}

/// Result type alias for vkube operations
pub type Result<T> = std::result::Result<T, VkubeError>;

impl VkubeError {
    /// Create a ResourceNotFound error
    pub fn resource_not_found(resource_key: impl Into<String>) -> Self {
        Self::ResourceNotFound {
            resource_key: resource_key.into(),
        }
    }

    /// Create a ResourceAlreadyExists error
    pub fn resource_already_exists(resource_key: impl Into<String>) -> Self {
        Self::ResourceAlreadyExists {
            resource_key: resource_key.into(),
        }
    }

    /// Create an InvalidResource error
    pub fn invalid_resource(reason: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidResource {
            reason: reason.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a ValidationFailed error
    pub fn validation_failed(
        resource_type: impl Into<String>,
        details: impl Into<String>,
        help_text: impl Into<String>,
    ) -> Self {
        Self::ValidationFailed {
            resource_type: resource_type.into(),
            details: details.into(),
            help_text: help_text.into(),
        }
    }

    /// Create a Conflict error
    pub fn conflict(
        resource_key: impl Into<String>,
        our_version: impl Into<String>,
        their_version: impl Into<String>,
    ) -> Self {
        Self::Conflict {
            resource_key: resource_key.into(),
            our_version: our_version.into(),
            their_version: their_version.into(),
        }
    }

    /// Create a SerializationError
    pub fn serialization_error(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::SerializationError {
            message: message.into(),
            source,
        }
    }

    /// Create an InternalError
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// Create an InvalidKind error
    pub fn invalid_kind(kind: impl Into<String>) -> Self {
        Self::InvalidKind { kind: kind.into() }
    }

    /// Whether the target object was absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ResourceNotFound { .. })
    }

    /// Whether the write lost an optimistic concurrency race
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Whether the object to create already exists
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::ResourceAlreadyExists { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = VkubeError::resource_not_found("v1/PersistentVolume/pv-1");
        assert!(matches!(err, VkubeError::ResourceNotFound { .. }));
        assert!(err.is_not_found());

        let err = VkubeError::validation_failed(
            "PersistentVolume",
            "claimRef has no namespace",
            "Set spec.claimRef.namespace",
        );
        assert!(matches!(err, VkubeError::ValidationFailed { .. }));
        assert!(!err.is_conflict());
    }

    #[test]
    fn test_conflict_message_names_versions() {
        let err = VkubeError::conflict("v1/PersistentVolume/pv-1", "3", "5");
        assert!(err.is_conflict());
        let msg = err.to_string();
        assert!(msg.contains("expected version 3"));
        assert!(msg.contains("found 5"));
    }
}
