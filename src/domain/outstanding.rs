//! Outstanding set of incomplete launches.

use std::fmt;

use crate::domain::launch::{LaunchId, LaunchRecord};

/// Launch ids currently marked incomplete, sorted ascending without duplicates.
///
/// Two snapshots compare by value, so a reconciliation pass can tell whether the
/// shape of outstanding work changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutstandingSet(Vec<LaunchId>);

impl OutstandingSet {
    /// Build a set from arbitrary ids
    pub fn from_ids(ids: impl IntoIterator<Item = LaunchId>) -> Self {
        let mut ids: Vec<LaunchId> = ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        Self(ids)
    }

    /// Build a set from incomplete launch records
    pub fn from_records(records: &[LaunchRecord]) -> Self {
        Self::from_ids(records.iter().filter(|r| !r.completed).map(|r| r.launch_id))
    }

    pub fn ids(&self) -> &[LaunchId] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = LaunchId> + '_ {
        self.0.iter().copied()
    }
}

impl fmt::Display for OutstandingSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<String> = self.0.iter().map(|id| id.to_string()).collect();
        write!(f, "[{}]", ids.join(", "))
    }
}
