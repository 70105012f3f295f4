//! Daemon Core - the offline reconciliation loop
//!
//! The loop:
//! - Submits ready work once at start
//! - Recovers every outstanding launch, in launch id order
//! - Resubmits whenever a pass changed the outstanding set
//! - Exits when no work is left, unless running as a daemon

pub mod reconcile;
pub mod tick;

pub use reconcile::*;
pub use tick::*;
