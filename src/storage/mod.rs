//! Storage layer for Athena - JSONL persistence with in-memory caching.
//!
//! Collections of serde records keyed by a numeric id. The job store builds its
//! launch and work-item tables on top of this.

mod jsonl;
mod traits;

pub use jsonl::JsonlStorage;
pub use traits::{Filter, Keyed, Storage};
