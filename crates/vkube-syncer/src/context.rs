use crate::error::{Result, SyncError};
use crate::translate::Translator;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use vkube_store::Cluster;

/// Everything a syncer needs for one pass
///
/// Cloning is cheap; clusters are shared.
#[derive(Debug, Clone)]
pub struct SyncContext {
    virtual_cluster: Arc<Cluster>,
    physical_cluster: Arc<Cluster>,
    translator: Translator,
    token: CancellationToken,
}

impl SyncContext {
    pub fn new(
        virtual_cluster: Arc<Cluster>,
        physical_cluster: Arc<Cluster>,
        translator: Translator,
        token: CancellationToken,
    ) -> Self {
        Self {
            virtual_cluster,
            physical_cluster,
            translator,
            token,
        }
    }

    /// Virtual cluster client, unless the pass has been cancelled
    pub fn virtual_client(&self) -> Result<&Cluster> {
        self.check_cancelled()?;
        Ok(&self.virtual_cluster)
    }

    /// Physical cluster client, unless the pass has been cancelled
    pub fn physical_client(&self) -> Result<&Cluster> {
        self.check_cancelled()?;
        Ok(&self.physical_cluster)
    }

    pub fn translator(&self) -> &Translator {
        &self.translator
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }
}
