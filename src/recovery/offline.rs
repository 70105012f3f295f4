//! Offline launch recovery from the launch directory's status artifact.
//!
//! The job script running on the compute node writes `offline.json` into its
//! launch directory as it progresses:
//! - `started_on` once the job begins
//! - `checkpoint` whenever it reports intermediate state
//! - `completed_on` and `state` (`COMPLETED` or `FIZZLED`) when it ends

use std::fs;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::Recoverer;
use crate::domain::{LaunchId, LaunchRecord, LaunchState, WorkState};
use crate::error::{AthenaError, Result};
use crate::storage::Storage;
use crate::store::JobDb;

/// File name of the status artifact inside a launch directory.
pub const OFFLINE_ARTIFACT: &str = "offline.json";

/// Contents of the offline status artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OfflineReport {
    #[serde(default)]
    pub started_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub checkpoint: Option<serde_json::Value>,
    #[serde(default)]
    pub completed_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub state: Option<String>,
}

impl OfflineReport {
    /// Read the artifact from a launch directory.
    ///
    /// Returns `Ok(None)` if the job has not written it yet.
    pub fn read(launch_dir: &Path) -> std::result::Result<Option<Self>, String> {
        let path = launch_dir.join(OFFLINE_ARTIFACT);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(format!("cannot read {}: {}", path.display(), e)),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| format!("malformed {}: {}", path.display(), e))
    }

    /// Terminal state reported by the job, if it finished.
    ///
    /// A finish time without a recognizable state (or the reverse) is ambiguous.
    pub fn terminal_state(&self) -> std::result::Result<Option<LaunchState>, String> {
        match (&self.completed_on, self.state.as_deref()) {
            (None, None) => Ok(None),
            (Some(_), Some("COMPLETED")) => Ok(Some(LaunchState::Completed)),
            (Some(_), Some("FIZZLED")) => Ok(Some(LaunchState::Fizzled)),
            (Some(_), Some(other)) => Err(format!("unknown final state '{}'", other)),
            (Some(_), None) => Err("completed_on is set but state is missing".to_string()),
            (None, Some(state)) => Err(format!("state '{}' reported without completed_on", state)),
        }
    }
}

/// What recovery did with one launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Launch was already completed, nothing changed
    AlreadyComplete { launch_id: LaunchId },
    /// No artifact yet, the job is still queued
    Pending { launch_id: LaunchId },
    /// The job has started and is still running
    Running { launch_id: LaunchId },
    /// The job finished with the given state
    Finished { launch_id: LaunchId, state: LaunchState },
}

/// Recovers launches by reading their offline status artifact.
#[derive(Debug)]
pub struct OfflineRecoverer<S: Storage> {
    db: Arc<JobDb<S>>,
}

impl<S: Storage> OfflineRecoverer<S> {
    /// Create a recoverer mutating the given job database
    pub fn new(db: Arc<JobDb<S>>) -> Self {
        Self { db }
    }

    /// Reconcile a single launch and report what changed.
    pub fn recover_launch(&self, launch_id: LaunchId) -> Result<RecoveryAction> {
        let mut launch = self
            .db
            .get_launch(launch_id)?
            .ok_or(AthenaError::LaunchNotFound(launch_id))?;

        if launch.completed {
            debug!("Launch {} already complete", launch_id);
            return Ok(RecoveryAction::AlreadyComplete { launch_id });
        }

        let report = OfflineReport::read(&launch.launch_dir)
            .map_err(|e| AthenaError::recovery(launch_id, e))?;
        let report = match report {
            Some(report) => report,
            None => {
                debug!("Launch {} has no {} yet", launch_id, OFFLINE_ARTIFACT);
                launch.touch();
                self.db.update_launch(&launch)?;
                return Ok(RecoveryAction::Pending { launch_id });
            }
        };

        let terminal = report
            .terminal_state()
            .map_err(|e| AthenaError::recovery(launch_id, e))?;

        if report.checkpoint.is_some() {
            launch.checkpoint = report.checkpoint.clone();
        }

        match terminal {
            Some(state) => {
                self.finish_work(&launch, state)?;
                launch.finish(state);
                self.db.update_launch(&launch)?;
                info!("Launch {} finished as {:?}", launch_id, state);
                Ok(RecoveryAction::Finished { launch_id, state })
            }
            None if report.started_on.is_some() => {
                if launch.state == LaunchState::Reserved {
                    self.set_work_state(&launch, WorkState::Running)?;
                    launch.state = LaunchState::Running;
                    info!("Launch {} is running", launch_id);
                }
                launch.touch();
                self.db.update_launch(&launch)?;
                Ok(RecoveryAction::Running { launch_id })
            }
            None => {
                launch.touch();
                self.db.update_launch(&launch)?;
                Ok(RecoveryAction::Pending { launch_id })
            }
        }
    }

    fn finish_work(&self, launch: &LaunchRecord, state: LaunchState) -> Result<()> {
        let work_state = match state {
            LaunchState::Fizzled => WorkState::Fizzled,
            _ => WorkState::Completed,
        };
        self.set_work_state(launch, work_state)?;
        if work_state == WorkState::Completed {
            self.db.promote_dependents()?;
        }
        Ok(())
    }

    fn set_work_state(&self, launch: &LaunchRecord, state: WorkState) -> Result<()> {
        match self.db.get_work(launch.work_id)? {
            Some(mut item) => {
                item.set_state(state);
                item.launch_id = Some(launch.launch_id);
                self.db.update_work(&item)
            }
            None => {
                warn!(
                    "Launch {} refers to missing work item {}",
                    launch.launch_id, launch.work_id
                );
                Ok(())
            }
        }
    }
}

#[async_trait]
impl<S: Storage> Recoverer for OfflineRecoverer<S> {
    async fn recover(&self, launch_id: LaunchId) -> Result<()> {
        match self.recover_launch(launch_id) {
            Ok(_) => Ok(()),
            Err(e @ AthenaError::Recovery { .. }) => Err(e),
            Err(e) => Err(AthenaError::recovery(launch_id, e.to_string())),
        }
    }
}
