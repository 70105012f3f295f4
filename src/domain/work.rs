//! Work items
//!
//! A work item is a unit of work waiting to be dispatched to the batch queue.
//! Items without dependencies start Ready; the rest wait until every dependency
//! has Completed.

use serde::{Deserialize, Serialize};

use crate::domain::launch::LaunchId;
use crate::id::now_ms;
use crate::storage::Keyed;

/// Work item identifier, allocated monotonically by the job store
pub type WorkId = u64;

/// A unit of work tracked by the job store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: WorkId,
    pub name: String,

    /// Shell command run on the compute node
    pub command: String,

    /// Only workers with a matching category (or an empty one) pick this up
    #[serde(default)]
    pub category: String,

    pub state: WorkState,

    #[serde(default)]
    pub depends_on: Vec<WorkId>,

    /// Per-item overrides of the default queue settings
    #[serde(default)]
    pub queue: QueueOverrides,

    /// Most recent launch of this item
    pub launch_id: Option<LaunchId>,

    pub created_at: i64,
    pub updated_at: i64,
}

/// Lifecycle of a work item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkState {
    /// Blocked on unfinished dependencies
    Waiting,
    /// Eligible for submission
    Ready,
    /// Submitted to the queue with a launch record
    Reserved,
    /// Its launch reported a start time
    Running,
    Completed,
    Fizzled,
}

impl WorkState {
    /// Ready, reserved or running work keeps a non-daemon run alive
    pub fn is_active(&self) -> bool {
        matches!(self, WorkState::Ready | WorkState::Reserved | WorkState::Running)
    }
}

/// Queue settings a work item may override
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueOverrides {
    pub queue: Option<String>,
    pub walltime: Option<String>,
    pub nnodes: Option<u32>,
    pub ppnode: Option<u32>,
    pub job_name: Option<String>,
}

impl WorkItem {
    /// Create a new work item; the store assigns the final id
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: 0,
            name: name.into(),
            command: command.into(),
            category: String::new(),
            state: WorkState::Ready,
            depends_on: Vec::new(),
            queue: QueueOverrides::default(),
            launch_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the worker category
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Make this item wait on other items
    pub fn with_dependencies(mut self, depends_on: Vec<WorkId>) -> Self {
        self.state = if depends_on.is_empty() {
            WorkState::Ready
        } else {
            WorkState::Waiting
        };
        self.depends_on = depends_on;
        self
    }

    /// Set per-item queue overrides
    pub fn with_queue(mut self, queue: QueueOverrides) -> Self {
        self.queue = queue;
        self
    }

    /// Whether a worker with the given category may run this item
    pub fn matches_category(&self, worker_category: &str) -> bool {
        worker_category.is_empty() || self.category.is_empty() || self.category == worker_category
    }

    /// Change state and bump the update timestamp
    pub fn set_state(&mut self, state: WorkState) {
        self.state = state;
        self.updated_at = now_ms();
    }
}

impl Keyed for WorkItem {
    fn key(&self) -> u64 {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_item_is_ready() {
        let item = WorkItem::new("compute_0", "aprun -n 1 task.sh 0");
        assert_eq!(item.state, WorkState::Ready);
        assert!(item.depends_on.is_empty());
        assert!(item.launch_id.is_none());
    }

    #[test]
    fn test_dependencies_make_item_wait() {
        let item = WorkItem::new("compute_1", "true").with_dependencies(vec![1, 2]);
        assert_eq!(item.state, WorkState::Waiting);
        assert_eq!(item.depends_on, vec![1, 2]);
    }

    #[test]
    fn test_empty_dependencies_stay_ready() {
        let item = WorkItem::new("service_0", "true").with_dependencies(vec![]);
        assert_eq!(item.state, WorkState::Ready);
    }

    #[test]
    fn test_matches_category() {
        let item = WorkItem::new("t", "true").with_category("titan");
        assert!(item.matches_category("titan"));
        assert!(item.matches_category(""));
        assert!(!item.matches_category("rhea"));

        let any = WorkItem::new("t", "true");
        assert!(any.matches_category("rhea"));
    }

    #[test]
    fn test_active_states() {
        assert!(!WorkState::Waiting.is_active());
        assert!(WorkState::Ready.is_active());
        assert!(WorkState::Reserved.is_active());
        assert!(WorkState::Running.is_active());
        assert!(!WorkState::Completed.is_active());
        assert!(!WorkState::Fizzled.is_active());
    }

    #[test]
    fn test_queue_overrides_deserialize_partial() {
        let overrides: QueueOverrides =
            serde_yaml::from_str("walltime: \"00:03:00\"\nnnodes: 4\n").unwrap();
        assert_eq!(overrides.walltime.as_deref(), Some("00:03:00"));
        assert_eq!(overrides.nnodes, Some(4));
        assert!(overrides.queue.is_none());
    }
}
