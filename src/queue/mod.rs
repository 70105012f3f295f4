//! Queue submission - hands ready work to the external batch scheduler.
//!
//! [`QueueSubmitter`] is what the reconciliation loop calls; [`RapidFireSubmitter`]
//! implements it by reserving ready work items, writing a job script per launch
//! and submitting it through a [`QueueAdapter`].

mod adapter;
mod rapidfire;

pub use adapter::{CommandQueueAdapter, QueueAdapter, SUBMIT_SCRIPT, parse_job_id, render_script};
pub use rapidfire::RapidFireSubmitter;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::config::{QueueConfig, WorkerConfig};
use crate::domain::{LaunchId, LaunchRecord};
use crate::error::Result;

/// Settings forwarded verbatim to every submission call.
#[derive(Debug, Clone)]
pub struct LauncherArgs {
    pub worker: WorkerConfig,
    pub queue: QueueConfig,
    pub launch_dir: PathBuf,
    /// Reserve work items at submission time (required for offline launches)
    pub reserve: bool,
    pub max_jobs_queue: usize,
    pub nlaunches: usize,
    pub log_level: String,
}

impl LauncherArgs {
    /// Level for per-launch log lines, `info` if `log_level` does not parse.
    pub fn launch_log_level(&self) -> log::Level {
        self.log_level.parse().unwrap_or(log::Level::Info)
    }
}

/// Launches created by one submission call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubmissionBatch {
    pub launches: Vec<LaunchRecord>,
}

impl SubmissionBatch {
    pub fn len(&self) -> usize {
        self.launches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.launches.is_empty()
    }

    pub fn launch_ids(&self) -> Vec<LaunchId> {
        self.launches.iter().map(|l| l.launch_id).collect()
    }
}

/// Submits ready work to the batch scheduler.
#[async_trait]
pub trait QueueSubmitter: Send + Sync {
    /// Submit every ready, not yet dispatched work item, creating launch records.
    ///
    /// Errors are `AthenaError::Submission`.
    async fn submit_ready_work(&self, args: &LauncherArgs) -> Result<SubmissionBatch>;
}
