//! Launch record and related types
//!
//! A launch is one attempt to execute a work item through the batch queue. Offline
//! launches run disconnected from this process, so their status only changes when
//! the recoverer reconciles them against the launch directory.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::domain::work::WorkId;
use crate::id::now_ms;
use crate::storage::Keyed;

/// Launch identifier, allocated monotonically by the job store
pub type LaunchId = u64;

/// A single dispatched execution attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchRecord {
    //=== Identity ===
    pub launch_id: LaunchId,

    /// Work item this launch executes
    pub work_id: WorkId,

    //=== Status ===
    pub state: LaunchState,

    /// Set once recovery has observed a terminal artifact
    pub completed: bool,

    //=== Placement ===
    /// Directory the queue job runs in and writes its offline artifacts to
    pub launch_dir: PathBuf,

    /// Handle returned by the batch scheduler (e.g. "12345.batch")
    pub queue_job_id: Option<String>,

    /// Last checkpoint payload reported by the running job
    #[serde(default)]
    pub checkpoint: Option<serde_json::Value>,

    //=== Timestamps ===
    pub created_at: i64,
    pub last_checked: Option<i64>,
}

/// State of a launch as last observed by recovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaunchState {
    /// Submitted to the queue, not yet started
    Reserved,
    /// The job reported a start time
    Running,
    /// The job finished successfully
    Completed,
    /// The job finished with a failure
    Fizzled,
}

impl LaunchState {
    /// Returns true if the launch will not change state again
    pub fn is_terminal(&self) -> bool {
        matches!(self, LaunchState::Completed | LaunchState::Fizzled)
    }
}

impl LaunchRecord {
    /// Create a freshly reserved launch for a work item
    pub fn new(launch_id: LaunchId, work_id: WorkId, launch_dir: PathBuf) -> Self {
        Self {
            launch_id,
            work_id,
            state: LaunchState::Reserved,
            completed: false,
            launch_dir,
            queue_job_id: None,
            checkpoint: None,
            created_at: now_ms(),
            last_checked: None,
        }
    }

    /// Record that recovery looked at this launch
    pub fn touch(&mut self) {
        self.last_checked = Some(now_ms());
    }

    /// Move to a terminal state and mark the launch completed
    pub fn finish(&mut self, state: LaunchState) {
        self.state = state;
        self.completed = state.is_terminal();
        self.touch();
    }
}

impl Keyed for LaunchRecord {
    const KEY_FIELD: &'static str = "launch_id";

    fn key(&self) -> u64 {
        self.launch_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_launch_is_reserved_and_incomplete() {
        let launch = LaunchRecord::new(4, 2, PathBuf::from("/tmp/launcher_4"));
        assert_eq!(launch.launch_id, 4);
        assert_eq!(launch.work_id, 2);
        assert_eq!(launch.state, LaunchState::Reserved);
        assert!(!launch.completed);
        assert!(launch.last_checked.is_none());
    }

    #[test]
    fn test_finish_completed() {
        let mut launch = LaunchRecord::new(1, 1, PathBuf::from("/tmp/l"));
        launch.finish(LaunchState::Completed);
        assert!(launch.completed);
        assert!(launch.last_checked.is_some());
    }

    #[test]
    fn test_finish_fizzled_is_completed() {
        let mut launch = LaunchRecord::new(1, 1, PathBuf::from("/tmp/l"));
        launch.finish(LaunchState::Fizzled);
        assert!(launch.completed);
        assert_eq!(launch.state, LaunchState::Fizzled);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!LaunchState::Reserved.is_terminal());
        assert!(!LaunchState::Running.is_terminal());
        assert!(LaunchState::Completed.is_terminal());
        assert!(LaunchState::Fizzled.is_terminal());
    }

    #[test]
    fn test_state_serializes_lowercase() {
        let json = serde_json::to_string(&LaunchState::Fizzled).unwrap();
        assert_eq!(json, "\"fizzled\"");
    }

    #[test]
    fn test_keyed_uses_launch_id() {
        let launch = LaunchRecord::new(42, 1, PathBuf::from("/tmp/l"));
        assert_eq!(launch.key(), 42);
        assert_eq!(LaunchRecord::KEY_FIELD, "launch_id");
    }
}
