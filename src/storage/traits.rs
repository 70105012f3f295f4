//! Storage trait definitions and the field filter used by queries.

use crate::error::Result;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

/// Matches records whose top-level `field` equals `value`.
///
/// A missing field only matches a null value.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

impl Filter {
    /// Match on equality with any serializable value.
    pub fn eq(field: impl Into<String>, value: impl Serialize) -> Self {
        Self {
            field: field.into(),
            value: serde_json::to_value(value).unwrap_or(Value::Null),
        }
    }

    pub fn matches(&self, record: &Value) -> bool {
        record.get(&self.field).unwrap_or(&Value::Null) == &self.value
    }
}

/// Records addressed by a numeric key.
pub trait Keyed {
    /// JSON field holding the key
    const KEY_FIELD: &'static str = "id";

    fn key(&self) -> u64;
}

/// Collections of keyed records.
///
/// Records are never removed one by one; `clear` empties a whole collection.
pub trait Storage: Send + Sync {
    /// Insert a record; its key must not exist yet.
    fn create<T: Serialize + Keyed>(&self, collection: &str, record: &T) -> Result<()>;

    fn get<T: DeserializeOwned + Keyed>(&self, collection: &str, key: u64) -> Result<Option<T>>;

    /// Replace the record with the same key.
    fn update<T: Serialize + Keyed>(&self, collection: &str, record: &T) -> Result<()>;

    /// Records matching every filter, in insertion order.
    fn query<T: DeserializeOwned>(&self, collection: &str, filters: &[Filter]) -> Result<Vec<T>>;

    fn list<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>>;

    fn clear(&self, collection: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_on_bool() {
        let incomplete = Filter::eq("completed", false);
        assert!(incomplete.matches(&json!({"launch_id": 1, "completed": false})));
        assert!(!incomplete.matches(&json!({"launch_id": 2, "completed": true})));
    }

    #[test]
    fn test_filter_on_serialized_enum() {
        let ready = Filter::eq("state", crate::domain::WorkState::Ready);
        assert_eq!(ready.value, json!("ready"));
        assert!(ready.matches(&json!({"id": 1, "state": "ready"})));
        assert!(!ready.matches(&json!({"id": 1, "state": "waiting"})));
    }

    #[test]
    fn test_missing_field_matches_only_null() {
        let record = json!({"launch_id": 1});
        assert!(Filter::eq("queue_job_id", Value::Null).matches(&record));
        assert!(!Filter::eq("queue_job_id", "12.batch").matches(&record));
    }
}
