//! ID and naming utilities for Athena
//!
//! Provides timestamps and the directory names used for launches and output blocks.

use chrono::{DateTime, Utc};

use crate::domain::LaunchId;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Directory name for a single launch
///
/// Format: `launcher_{YYYY-MM-DD-HH-MM-SS-ffffff}_{launch_id}`
/// Example: `launcher_2026-10-16-09-30-12-004211_17`
pub fn launch_dir_name(at: DateTime<Utc>, launch_id: LaunchId) -> String {
    format!("launcher_{}_{}", datestamp(at), launch_id)
}

/// Directory name for an output block
///
/// Format: `block_{YYYY-MM-DD-HH-MM-SS-ffffff}`
pub fn block_dir_name(at: DateTime<Utc>) -> String {
    format!("block_{}", datestamp(at))
}

fn datestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d-%H-%M-%S-%6f").to_string()
}
