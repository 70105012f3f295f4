//! Rapid-fire submission: dispatch every ready work item in one call.

use std::fs;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info, log, warn};

use super::adapter::{QueueAdapter, SUBMIT_SCRIPT, render_script};
use super::{LauncherArgs, QueueSubmitter, SubmissionBatch};
use crate::domain::{LaunchRecord, WorkItem, WorkState};
use crate::error::{AthenaError, Result};
use crate::storage::Storage;
use crate::store::JobDb;

/// Submits ready work items through a queue adapter, one launch per item.
pub struct RapidFireSubmitter<S: Storage, A: QueueAdapter> {
    db: Arc<JobDb<S>>,
    adapter: A,
}

impl<S: Storage, A: QueueAdapter> RapidFireSubmitter<S, A> {
    /// Create a submitter writing launches into `db`
    pub fn new(db: Arc<JobDb<S>>, adapter: A) -> Self {
        Self { db, adapter }
    }

    /// How many launches this call may create, or `None` if the queue is full.
    async fn capacity(&self, args: &LauncherArgs, ready: usize) -> Result<Option<usize>> {
        let mut limit = ready;
        if args.nlaunches > 0 {
            limit = limit.min(args.nlaunches);
        }
        if args.max_jobs_queue > 0 {
            let active = self.adapter.active_jobs().await?;
            if active >= args.max_jobs_queue {
                info!(
                    "Queue holds {} jobs (limit {}), not submitting",
                    active, args.max_jobs_queue
                );
                return Ok(None);
            }
            limit = limit.min(args.max_jobs_queue - active);
        }
        Ok(Some(limit))
    }

    /// Launch one work item.
    ///
    /// The launch record is saved only once the queue has accepted the job, so a
    /// failure at any earlier step leaves no outstanding launch behind.
    async fn launch_item(&self, args: &LauncherArgs, mut item: WorkItem) -> Result<LaunchRecord> {
        let mut launch = self.db.reserve_launch(item.id, &args.launch_dir)?;
        fs::create_dir_all(&launch.launch_dir)?;

        let script_path = launch.launch_dir.join(SUBMIT_SCRIPT);
        fs::write(&script_path, render_script(&args.queue, &item, &launch))?;

        launch.queue_job_id = Some(self.adapter.submit(&script_path).await?);
        self.db.insert_launch(&launch)?;

        item.set_state(WorkState::Reserved);
        item.launch_id = Some(launch.launch_id);
        self.db.update_work(&item)?;

        log!(
            args.launch_log_level(),
            "Launched work item {} ({}) as launch {} job {}",
            item.id,
            item.name,
            launch.launch_id,
            launch.queue_job_id.as_deref().unwrap_or("?")
        );
        Ok(launch)
    }

    async fn submit(&self, args: &LauncherArgs) -> Result<SubmissionBatch> {
        if !args.reserve {
            return Err(AthenaError::Submission(
                "offline launches require reservation mode".to_string(),
            ));
        }
        fs::create_dir_all(&args.launch_dir)?;

        let ready = self.db.ready_work(&args.worker.category)?;
        if ready.is_empty() {
            debug!("No ready work for worker {}", args.worker.name);
            return Ok(SubmissionBatch::default());
        }

        let Some(limit) = self.capacity(args, ready.len()).await? else {
            return Ok(SubmissionBatch::default());
        };
        if limit < ready.len() {
            warn!("Submitting {} of {} ready work items", limit, ready.len());
        }

        let mut batch = SubmissionBatch::default();
        for item in ready.into_iter().take(limit) {
            batch.launches.push(self.launch_item(args, item).await?);
        }
        Ok(batch)
    }
}

#[async_trait]
impl<S: Storage, A: QueueAdapter> QueueSubmitter for RapidFireSubmitter<S, A> {
    async fn submit_ready_work(&self, args: &LauncherArgs) -> Result<SubmissionBatch> {
        self.submit(args).await.map_err(|e| match e {
            AthenaError::Submission(_) => e,
            other => AthenaError::Submission(other.to_string()),
        })
    }
}
