use miette::Diagnostic;
use thiserror::Error;
use vkube_core::VkubeError;

/// Error type for synchronization passes
#[derive(Error, Debug, Diagnostic)]
pub enum SyncError {
    /// Cluster API error (not found, conflict, storage, ...)
    #[error(transparent)]
    #[diagnostic(transparent)]
    Cluster(#[from] VkubeError),

    /// A volume's claim reference cannot be translated
    #[error("Invalid claim reference on PersistentVolume '{volume}': {reason}")]
    #[diagnostic(
        code(vkube::sync::invalid_claim_ref),
        help("A claimRef must name both the claim and its namespace. Fix the virtual PersistentVolume")
    )]
    InvalidClaimRef {
        #[allow(unused)]
        volume: String,
        #[allow(unused)]
        reason: String,
    },

    /// A unique index lookup matched several objects
    #[error("Index {index} maps '{value}' to {count} objects, expected at most one")]
    #[diagnostic(
        code(vkube::sync::ambiguous_index),
        help("Two virtual objects translate to the same physical name. Rename one of them")
    )]
    AmbiguousIndex {
        #[allow(unused)]
        index: String,
        #[allow(unused)]
        value: String,
        #[allow(unused)]
        count: usize,
    },

    /// The pass was cancelled before it finished
    #[error("Synchronization cancelled")]
    #[diagnostic(
        code(vkube::sync::cancelled),
        help("The controller is shutting down. The key is picked up again on the next start")
    )]
    Cancelled,

    /// Internal error
    #[error("Internal sync error: {message}")]
    #[diagnostic(
        code(vkube::sync::internal_error),
        help("This is likely a bug in vkube-syncer. Please report it with the full error details")
    )]
    InternalError {
        #[allow(unused)]
        message: String,
    },
}

/// Result type alias for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    pub fn invalid_claim_ref(volume: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidClaimRef {
            volume: volume.into(),
            reason: reason.into(),
        }
    }

    pub fn ambiguous_index(index: impl Into<String>, value: impl Into<String>, count: usize) -> Self {
        Self::AmbiguousIndex {
            index: index.into(),
            value: value.into(),
            count,
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// Whether the underlying cluster call failed with NotFound
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Cluster(e) if e.is_not_found())
    }

    /// Whether the underlying cluster call failed on a stale resourceVersion
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Cluster(e) if e.is_conflict())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_error_helpers() {
        let err: SyncError = VkubeError::resource_not_found("v1/PersistentVolume/pv-1").into();
        assert!(err.is_not_found());
        assert!(!err.is_conflict());

        let err: SyncError = VkubeError::conflict("v1/PersistentVolume/pv-1", "1", "2").into();
        assert!(err.is_conflict());
        assert!(!SyncError::Cancelled.is_not_found());
    }

    #[test]
    fn test_invalid_claim_ref_message() {
        let err = SyncError::invalid_claim_ref("pv-1", "claimRef.namespace is empty");
        assert_eq!(
            err.to_string(),
            "Invalid claim reference on PersistentVolume 'pv-1': claimRef.namespace is empty"
        );
    }
}
