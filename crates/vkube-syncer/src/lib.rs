// Allow unused assignments for diagnostic fields - they're used by the thiserror/miette macros
#![allow(unused_assignments)]

pub mod context;
pub mod controller;
pub mod error;
pub mod persistentvolumes;
pub mod poddisruptionbudgets;
pub mod syncer;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod translate;

// Re-export primary types
pub use context::SyncContext;
pub use error::{Result, SyncError};
pub use syncer::{reconcile, Existence, Reconciler, SyncOutcome, SyncRequest, Syncer};
pub use translate::{Translator, TranslatorConfig};

// Re-export syncers and the controller
pub use controller::{ControllerConfig, RunSummary, SyncController};
pub use persistentvolumes::{Eligibility, PersistentVolumeSyncer, ReclaimPolicy, VolumePhase};
pub use poddisruptionbudgets::PodDisruptionBudgetSyncer;
