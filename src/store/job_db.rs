//! Launch and work-item tables on top of the generic storage layer.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use super::JobStore;
use crate::domain::{LaunchId, LaunchRecord, WorkId, WorkItem, WorkState};
use crate::error::{AthenaError, Result};
use crate::id::launch_dir_name;
use crate::storage::{Filter, JsonlStorage, Keyed, Storage};

/// Collection name for launches.
pub const LAUNCHES_COLLECTION: &str = "launches";

/// Collection name for work items.
pub const WORK_COLLECTION: &str = "work";

/// Job database holding launches and work items.
#[derive(Debug)]
pub struct JobDb<S: Storage = JsonlStorage> {
    storage: S,
    /// Serializes work id allocation with the insert that consumes it
    alloc: Mutex<()>,
    /// Highest launch id handed out by this handle
    last_launch: Mutex<LaunchId>,
}

impl JobDb<JsonlStorage> {
    /// Open or create a JSONL-backed job database in `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(JsonlStorage::new(dir)?))
    }
}

impl<S: Storage> JobDb<S> {
    /// Create a job database over the given storage.
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            alloc: Mutex::new(()),
            last_launch: Mutex::new(0),
        }
    }

    fn next_key<T: Keyed + serde::de::DeserializeOwned>(&self, collection: &str) -> Result<u64> {
        let records: Vec<T> = self.storage.list(collection)?;
        Ok(records.iter().map(Keyed::key).max().unwrap_or(0) + 1)
    }

    //=== Launches ===

    /// Reserve the next launch id for a work item, with its directory under
    /// `launch_root`.
    ///
    /// Nothing is persisted; the caller saves the record with [`insert_launch`]
    /// once the queue has accepted the job. An unused reservation only leaves a
    /// gap in the id sequence.
    ///
    /// [`insert_launch`]: JobDb::insert_launch
    pub fn reserve_launch(&self, work_id: WorkId, launch_root: &Path) -> Result<LaunchRecord> {
        let mut last = self
            .last_launch
            .lock()
            .map_err(|e| AthenaError::StoreQuery(e.to_string()))?;

        let launch_id = self.next_key::<LaunchRecord>(LAUNCHES_COLLECTION)?.max(*last + 1);
        *last = launch_id;
        let launch_dir = launch_root.join(launch_dir_name(Utc::now(), launch_id));
        log::debug!("Reserved launch {} for work item {}", launch_id, work_id);
        Ok(LaunchRecord::new(launch_id, work_id, launch_dir))
    }

    /// Persist a launch obtained from [`JobDb::reserve_launch`].
    pub fn insert_launch(&self, record: &LaunchRecord) -> Result<()> {
        self.storage.create(LAUNCHES_COLLECTION, record)?;
        log::debug!("Saved launch {} for work item {}", record.launch_id, record.work_id);
        Ok(())
    }

    /// Get a launch by id.
    pub fn get_launch(&self, launch_id: LaunchId) -> Result<Option<LaunchRecord>> {
        self.storage.get(LAUNCHES_COLLECTION, launch_id)
    }

    /// Update an existing launch.
    pub fn update_launch(&self, record: &LaunchRecord) -> Result<()> {
        if self.get_launch(record.launch_id)?.is_none() {
            return Err(AthenaError::LaunchNotFound(record.launch_id));
        }
        self.storage.update(LAUNCHES_COLLECTION, record)
    }

    /// List all launches sorted by id.
    pub fn list_launches(&self) -> Result<Vec<LaunchRecord>> {
        let mut launches: Vec<LaunchRecord> = self.storage.list(LAUNCHES_COLLECTION)?;
        launches.sort_by_key(|l| l.launch_id);
        Ok(launches)
    }

    /// Incomplete launches sorted by id, duplicates removed.
    pub fn incomplete_launches(&self) -> Result<Vec<LaunchRecord>> {
        let mut launches: Vec<LaunchRecord> = self
            .storage
            .query(LAUNCHES_COLLECTION, &[Filter::eq("completed", false)])?;
        launches.sort_by_key(|l| l.launch_id);
        launches.dedup_by_key(|l| l.launch_id);
        Ok(launches)
    }

    //=== Work items ===

    /// Add a work item, assigning it the next work id.
    ///
    /// Every dependency must already exist.
    pub fn add_work(&self, mut item: WorkItem) -> Result<WorkItem> {
        let _guard = self
            .alloc
            .lock()
            .map_err(|e| AthenaError::StoreQuery(e.to_string()))?;

        for dep in &item.depends_on {
            if self.get_work(*dep)?.is_none() {
                return Err(AthenaError::WorkNotFound(*dep));
            }
        }

        item.id = self.next_key::<WorkItem>(WORK_COLLECTION)?;
        self.storage.create(WORK_COLLECTION, &item)?;
        log::info!("Added work item {} ({})", item.id, item.name);
        Ok(item)
    }

    /// Get a work item by id.
    pub fn get_work(&self, work_id: WorkId) -> Result<Option<WorkItem>> {
        self.storage.get(WORK_COLLECTION, work_id)
    }

    /// Update an existing work item.
    pub fn update_work(&self, item: &WorkItem) -> Result<()> {
        if self.get_work(item.id)?.is_none() {
            return Err(AthenaError::WorkNotFound(item.id));
        }
        self.storage.update(WORK_COLLECTION, item)
    }

    /// List all work items sorted by id.
    pub fn list_work(&self) -> Result<Vec<WorkItem>> {
        let mut items: Vec<WorkItem> = self.storage.list(WORK_COLLECTION)?;
        items.sort_by_key(|w| w.id);
        Ok(items)
    }

    /// Ready work items a worker of `category` may run, sorted by id.
    pub fn ready_work(&self, category: &str) -> Result<Vec<WorkItem>> {
        let state = serde_json::to_value(WorkState::Ready)?;
        let mut items: Vec<WorkItem> =
            self.storage.query(WORK_COLLECTION, &[Filter::eq("state", state)])?;
        items.retain(|w| w.matches_category(category));
        items.sort_by_key(|w| w.id);
        Ok(items)
    }

    /// True if any work item is ready, reserved or running.
    pub fn any_active_work(&self) -> Result<bool> {
        Ok(self.list_work()?.iter().any(|w| w.state.is_active()))
    }

    /// Promote waiting items whose dependencies have all completed.
    ///
    /// Returns the ids that became ready.
    pub fn promote_dependents(&self) -> Result<Vec<WorkId>> {
        let items = self.list_work()?;
        let completed: Vec<WorkId> = items
            .iter()
            .filter(|w| w.state == WorkState::Completed)
            .map(|w| w.id)
            .collect();

        let mut promoted = Vec::new();
        for item in items.into_iter().filter(|w| w.state == WorkState::Waiting) {
            if item.depends_on.iter().all(|dep| completed.contains(dep)) {
                let mut item = item;
                item.set_state(WorkState::Ready);
                self.storage.update(WORK_COLLECTION, &item)?;
                promoted.push(item.id);
            }
        }

        if !promoted.is_empty() {
            log::info!("Work items now ready: {:?}", promoted);
        }
        Ok(promoted)
    }

    /// Remove every launch and work item.
    pub fn reset(&self) -> Result<()> {
        self.storage.clear(LAUNCHES_COLLECTION)?;
        self.storage.clear(WORK_COLLECTION)?;
        log::warn!("Job store reset");
        Ok(())
    }
}

/// Report any failure of a read query as `StoreQuery`.
fn as_query_error(e: AthenaError) -> AthenaError {
    match e {
        AthenaError::StoreQuery(_) => e,
        other => AthenaError::StoreQuery(other.to_string()),
    }
}

#[async_trait]
impl<S: Storage> JobStore for JobDb<S> {
    async fn find_first_incomplete(&self) -> Result<Option<LaunchRecord>> {
        let mut launches: Vec<LaunchRecord> = self
            .storage
            .query(LAUNCHES_COLLECTION, &[Filter::eq("completed", false)])
            .map_err(as_query_error)?;
        Ok(if launches.is_empty() {
            None
        } else {
            Some(launches.swap_remove(0))
        })
    }

    async fn find_all_incomplete(&self) -> Result<Vec<LaunchRecord>> {
        self.incomplete_launches().map_err(as_query_error)
    }

    async fn has_active_run(&self) -> Result<bool> {
        self.any_active_work().map_err(as_query_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LaunchState;
    use tempfile::TempDir;

    fn create_test_db() -> (JobDb, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = JobDb::open(temp_dir.path().join("db")).unwrap();
        (db, temp_dir)
    }

    fn saved_launch(db: &JobDb, work_id: WorkId, root: &Path) -> LaunchRecord {
        let launch = db.reserve_launch(work_id, root).unwrap();
        db.insert_launch(&launch).unwrap();
        launch
    }

    #[test]
    fn test_saved_launches_get_monotonic_ids() {
        let (db, temp) = create_test_db();
        let a = saved_launch(&db, 1, temp.path());
        let b = saved_launch(&db, 2, temp.path());
        let c = saved_launch(&db, 3, temp.path());

        assert_eq!((a.launch_id, b.launch_id, c.launch_id), (1, 2, 3));
        assert!(a.launch_dir.starts_with(temp.path()));
        assert_ne!(a.launch_dir, b.launch_dir);
    }

    #[test]
    fn test_reserve_launch_persists_nothing() {
        let (db, temp) = create_test_db();
        let launch = db.reserve_launch(1, temp.path()).unwrap();

        assert_eq!(launch.launch_id, 1);
        assert!(db.list_launches().unwrap().is_empty());
        assert!(db.get_launch(1).unwrap().is_none());
    }

    #[test]
    fn test_abandoned_reservation_is_not_reused() {
        let (db, temp) = create_test_db();
        let abandoned = db.reserve_launch(1, temp.path()).unwrap();
        let kept = saved_launch(&db, 1, temp.path());

        assert_eq!(abandoned.launch_id, 1);
        assert_eq!(kept.launch_id, 2);
        assert_eq!(db.incomplete_launches().unwrap().len(), 1);
    }

    #[test]
    fn test_reservation_skips_ids_saved_elsewhere() {
        let (db, temp) = create_test_db();
        db.insert_launch(&LaunchRecord::new(7, 1, temp.path().join("x"))).unwrap();

        assert_eq!(db.reserve_launch(2, temp.path()).unwrap().launch_id, 8);
    }

    #[test]
    fn test_update_launch_not_found() {
        let (db, _temp) = create_test_db();
        let record = LaunchRecord::new(9, 1, "/tmp/x".into());
        assert!(matches!(db.update_launch(&record), Err(AthenaError::LaunchNotFound(9))));
    }

    #[test]
    fn test_incomplete_launches_sorted_without_completed() {
        let (db, temp) = create_test_db();
        for work_id in 1..=4 {
            saved_launch(&db, work_id, temp.path());
        }
        let mut second = db.get_launch(2).unwrap().unwrap();
        second.finish(LaunchState::Completed);
        db.update_launch(&second).unwrap();

        let ids: Vec<LaunchId> = db
            .incomplete_launches()
            .unwrap()
            .iter()
            .map(|l| l.launch_id)
            .collect();
        assert_eq!(ids, vec![1, 3, 4]);
    }

    #[tokio::test]
    async fn test_find_all_incomplete_strictly_ascending() {
        let (db, temp) = create_test_db();
        for work_id in 1..=6 {
            saved_launch(&db, work_id, temp.path());
        }
        // Updating rewrites records in place; order must not depend on it
        let mut fifth = db.get_launch(5).unwrap().unwrap();
        fifth.state = LaunchState::Running;
        db.update_launch(&fifth).unwrap();

        let launches = db.find_all_incomplete().await.unwrap();
        let ids: Vec<LaunchId> = launches.iter().map(|l| l.launch_id).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(ids.len(), 6);
    }

    #[tokio::test]
    async fn test_find_first_consistent_with_find_all() {
        let (db, temp) = create_test_db();
        assert!(db.find_first_incomplete().await.unwrap().is_none());
        assert!(db.find_all_incomplete().await.unwrap().is_empty());

        saved_launch(&db, 1, temp.path());
        let first = db.find_first_incomplete().await.unwrap();
        assert!(first.is_some());
        assert!(!db.find_all_incomplete().await.unwrap().is_empty());
    }

    #[test]
    fn test_add_work_assigns_ids() {
        let (db, _temp) = create_test_db();
        let a = db.add_work(WorkItem::new("a", "true")).unwrap();
        let b = db.add_work(WorkItem::new("b", "true")).unwrap();
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
    }

    #[test]
    fn test_add_work_unknown_dependency() {
        let (db, _temp) = create_test_db();
        let result = db.add_work(WorkItem::new("a", "true").with_dependencies(vec![7]));
        assert!(matches!(result, Err(AthenaError::WorkNotFound(7))));
    }

    #[test]
    fn test_ready_work_filters_state_and_category() {
        let (db, _temp) = create_test_db();
        let a = db.add_work(WorkItem::new("a", "true").with_category("titan")).unwrap();
        db.add_work(WorkItem::new("b", "true").with_category("rhea")).unwrap();
        db.add_work(WorkItem::new("c", "true").with_dependencies(vec![a.id])).unwrap();
        db.add_work(WorkItem::new("d", "true")).unwrap();

        let names: Vec<String> = db
            .ready_work("titan")
            .unwrap()
            .into_iter()
            .map(|w| w.name)
            .collect();
        assert_eq!(names, vec!["a", "d"]);
    }

    #[tokio::test]
    async fn test_has_active_run() {
        let (db, _temp) = create_test_db();
        assert!(!db.has_active_run().await.unwrap());

        let mut item = db.add_work(WorkItem::new("a", "true")).unwrap();
        assert!(db.has_active_run().await.unwrap());

        item.set_state(WorkState::Completed);
        db.update_work(&item).unwrap();
        assert!(!db.has_active_run().await.unwrap());
    }

    #[test]
    fn test_promote_dependents() {
        let (db, _temp) = create_test_db();
        let mut a = db.add_work(WorkItem::new("a", "true")).unwrap();
        let b = db.add_work(WorkItem::new("b", "true")).unwrap();
        let c = db.add_work(WorkItem::new("c", "true").with_dependencies(vec![a.id])).unwrap();
        let d = db
            .add_work(WorkItem::new("d", "true").with_dependencies(vec![a.id, b.id]))
            .unwrap();

        assert!(db.promote_dependents().unwrap().is_empty());

        a.set_state(WorkState::Completed);
        db.update_work(&a).unwrap();

        assert_eq!(db.promote_dependents().unwrap(), vec![c.id]);
        assert_eq!(db.get_work(c.id).unwrap().unwrap().state, WorkState::Ready);
        assert_eq!(db.get_work(d.id).unwrap().unwrap().state, WorkState::Waiting);
    }

    #[test]
    fn test_reset_clears_everything() {
        let (db, temp) = create_test_db();
        db.add_work(WorkItem::new("a", "true")).unwrap();
        saved_launch(&db, 1, temp.path());

        db.reset().unwrap();

        assert!(db.list_work().unwrap().is_empty());
        assert!(db.list_launches().unwrap().is_empty());
    }
}
