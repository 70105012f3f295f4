//! Domain types for Athena
//!
//! This module contains the records persisted by the job store:
//! - LaunchRecord: one dispatched execution attempt and its completion flag
//! - WorkItem: a unit of work that becomes a launch once submitted
//! - OutstandingSet: the sorted launch ids still marked incomplete

pub mod launch;
pub mod outstanding;
pub mod work;

pub use launch::{LaunchId, LaunchRecord, LaunchState};
pub use outstanding::OutstandingSet;
pub use work::{QueueOverrides, WorkId, WorkItem, WorkState};
