//! Athena - offline batch-queue launch reconciliation
//!
//! Work items are submitted to PBS or Slurm as offline launches. Each launch
//! reports its progress through an `offline.json` artifact in its launch
//! directory; the reconciliation loop reads those artifacts back into the job
//! store and resubmits newly ready work whenever the outstanding set changes.

pub mod config;
pub mod daemon;
pub mod domain;
pub mod error;
pub mod id;
pub mod queue;
pub mod recovery;
pub mod storage;
pub mod store;

pub use error::{AthenaError, Result};
