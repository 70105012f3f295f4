//! Job store - persistent launch and work-item records.
//!
//! The reconciliation loop only reads aggregate queries through [`JobStore`].
//! Mutation goes through [`JobDb`] directly and is done by the recoverer and
//! the queue submitter.

mod job_db;

pub use job_db::{JobDb, LAUNCHES_COLLECTION, WORK_COLLECTION};

use async_trait::async_trait;

use crate::domain::LaunchRecord;
use crate::error::Result;

/// Read-side queries the reconciliation loop depends on.
///
/// Every failure is reported as `AthenaError::StoreQuery`.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Any one incomplete launch, or `None`.
    async fn find_first_incomplete(&self) -> Result<Option<LaunchRecord>>;

    /// Every incomplete launch, sorted by `launch_id` ascending.
    async fn find_all_incomplete(&self) -> Result<Vec<LaunchRecord>>;

    /// True if any work is ready, reserved or running, whether or not it has a
    /// launch record yet.
    async fn has_active_run(&self) -> Result<bool>;
}
