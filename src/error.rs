//! Error types for Athena
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

use crate::domain::{LaunchId, WorkId};

/// All error types that can occur in Athena
#[derive(Debug, Error)]
pub enum AthenaError {
    /// One launch could not be reconciled (unreadable or ambiguous artifact)
    #[error("Recovery of launch {launch_id} failed: {reason}")]
    Recovery { launch_id: LaunchId, reason: String },

    /// The batch scheduler rejected or failed a submission
    #[error("Submission error: {0}")]
    Submission(String),

    /// The job store is unreachable or returned malformed data
    #[error("Store query error: {0}")]
    StoreQuery(String),

    /// Launch not found in storage
    #[error("Launch not found: {0}")]
    LaunchNotFound(LaunchId),

    /// Work item not found in storage
    #[error("Work item not found: {0}")]
    WorkNotFound(WorkId),

    /// Invalid configuration
    #[error("Config error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AthenaError {
    /// Build a recovery error for a launch
    pub fn recovery(launch_id: LaunchId, reason: impl Into<String>) -> Self {
        AthenaError::Recovery {
            launch_id,
            reason: reason.into(),
        }
    }

    /// Returns true if this error only affects a single launch
    pub fn is_recovery(&self) -> bool {
        matches!(self, AthenaError::Recovery { .. })
    }
}

/// Result type alias for Athena operations
pub type Result<T> = std::result::Result<T, AthenaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_error() {
        let err = AthenaError::recovery(7, "offline.json is not valid JSON");
        assert_eq!(
            err.to_string(),
            "Recovery of launch 7 failed: offline.json is not valid JSON"
        );
        assert!(err.is_recovery());
    }

    #[test]
    fn test_submission_error() {
        let err = AthenaError::Submission("qsub exited with status 1".to_string());
        assert_eq!(err.to_string(), "Submission error: qsub exited with status 1");
        assert!(!err.is_recovery());
    }

    #[test]
    fn test_store_query_error() {
        let err = AthenaError::StoreQuery("lock poisoned".to_string());
        assert_eq!(err.to_string(), "Store query error: lock poisoned");
    }

    #[test]
    fn test_not_found_errors() {
        assert_eq!(AthenaError::LaunchNotFound(3).to_string(), "Launch not found: 3");
        assert_eq!(AthenaError::WorkNotFound(9).to_string(), "Work item not found: 9");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: AthenaError = io_err.into();
        assert!(matches!(err, AthenaError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: AthenaError = json_err.into();
        assert!(matches!(err, AthenaError::Json(_)));
    }
}
