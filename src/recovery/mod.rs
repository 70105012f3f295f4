//! Recovery of offline launches.
//!
//! A launch that ran disconnected from this process leaves its status behind in
//! its launch directory. Recovery reads that artifact and folds it back into the
//! job store.

mod offline;

pub use offline::{OFFLINE_ARTIFACT, OfflineRecoverer, OfflineReport, RecoveryAction};

use async_trait::async_trait;

use crate::domain::LaunchId;
use crate::error::Result;

/// Reconciles one launch against its ground truth.
#[async_trait]
pub trait Recoverer: Send + Sync {
    /// Update the stored state of `launch_id` from its artifacts.
    ///
    /// Idempotent: recovering an already completed launch is a no-op. Errors are
    /// `AthenaError::Recovery` and only concern this one launch.
    async fn recover(&self, launch_id: LaunchId) -> Result<()>;
}
