//! In-memory task index with write-through persistence.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock, RwLockWriteGuard};
use tracing::{debug, info, warn};

use super::{Task, TaskError, TaskStore};

struct Entry {
    /// Insertion order, used to keep `list` stable for equal timestamps.
    seq: u64,
    task: Task,
}

#[derive(Default)]
struct Inner {
    tasks: HashMap<String, Entry>,
    next_seq: u64,
}

impl Inner {
    fn upsert(&mut self, task: Task) {
        match self.tasks.get_mut(&task.id) {
            Some(entry) => entry.task = task,
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.tasks.insert(task.id.clone(), Entry { seq, task });
            }
        }
    }
}

/// Concurrency-safe registry of every known task.
///
/// All reads and writes of the map go through one read-write lock. Every
/// mutation is written through to the [`TaskStore`] after the map lock is
/// released. Writers take the persist lock before releasing the map lock, so
/// durable writes happen in the same order as the in-memory ones.
pub struct TaskRegistry {
    inner: RwLock<Inner>,
    persist: Mutex<()>,
    store: Arc<dyn TaskStore>,
}

impl TaskRegistry {
    /// Creates an empty registry over `store`.
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            persist: Mutex::new(()),
            store,
        }
    }

    /// Creates a registry preloaded with every task in `store`.
    pub fn load(store: Arc<dyn TaskStore>) -> Result<Self, TaskError> {
        let mut inner = Inner::default();
        // Stored newest first; insert oldest first so seq follows creation.
        for task in store.load_all()?.into_iter().rev() {
            inner.upsert(task);
        }
        info!(count = inner.tasks.len(), "Loaded tasks from storage");

        Ok(Self {
            inner: RwLock::new(inner),
            persist: Mutex::new(()),
            store,
        })
    }

    /// Trades the map lock for the persist lock.
    async fn hand_over(&self, inner: RwLockWriteGuard<'_, Inner>) -> MutexGuard<'_, ()> {
        let order = self.persist.lock().await;
        drop(inner);
        order
    }

    /// Insert a new task in the Initializing stage.
    ///
    /// The record stays in memory even if persisting it fails.
    pub async fn create(&self, id: &str) -> Result<Task, TaskError> {
        let task = Task::new(id);
        let mut inner = self.inner.write().await;
        inner.upsert(task.clone());
        let _order = self.hand_over(inner).await;

        self.store.save(&task).inspect_err(|e| {
            warn!(task_id = %id, error = %e, "Failed to persist new task");
        })?;

        debug!(task_id = %id, "Task created");
        Ok(task)
    }

    /// Look a task up, falling through to durable storage on a miss.
    pub async fn get(&self, id: &str) -> Result<Task, TaskError> {
        if let Some(entry) = self.inner.read().await.tasks.get(id) {
            return Ok(entry.task.clone());
        }

        let Some(task) = self.store.load(id)? else {
            return Err(TaskError::NotFound(id.to_string()));
        };

        let mut inner = self.inner.write().await;
        // Another caller may have inserted a newer copy in the meantime.
        if let Some(entry) = inner.tasks.get(id) {
            return Ok(entry.task.clone());
        }
        debug!(task_id = %id, "Backfilled task from storage");
        inner.upsert(task.clone());
        Ok(task)
    }

    /// Replace a task record. Last writer wins.
    ///
    /// A storage failure is returned, but the in-memory copy is still updated.
    pub async fn update(&self, mut task: Task) -> Result<(), TaskError> {
        task.touch();
        let mut inner = self.inner.write().await;
        inner.upsert(task.clone());
        let _order = self.hand_over(inner).await;

        self.store.save(&task).inspect_err(|e| {
            warn!(task_id = %task.id, error = %e, "Failed to persist task update");
        })
    }

    /// Mutate a task in place under the write lock and persist it.
    ///
    /// Returns the closure's result together with the updated snapshot.
    pub async fn modify<F, R>(&self, id: &str, f: F) -> Result<(R, Task), TaskError>
    where
        F: FnOnce(&mut Task) -> R,
    {
        let mut inner = self.inner.write().await;
        let entry = inner
            .tasks
            .get_mut(id)
            .ok_or_else(|| TaskError::NotFound(id.to_string()))?;

        let result = f(&mut entry.task);
        entry.task.touch();
        let snapshot = entry.task.clone();
        let _order = self.hand_over(inner).await;

        self.store.save(&snapshot).inspect_err(|e| {
            warn!(task_id = %id, error = %e, "Failed to persist task update");
        })?;

        Ok((result, snapshot))
    }

    /// All known tasks, newest first.
    pub async fn list(&self) -> Vec<Task> {
        let inner = self.inner.read().await;
        let mut entries: Vec<&Entry> = inner.tasks.values().collect();
        entries.sort_by(|a, b| {
            b.task
                .created_at
                .cmp(&a.task.created_at)
                .then(a.seq.cmp(&b.seq))
        });
        entries.into_iter().map(|e| e.task.clone()).collect()
    }

    /// Most recently created task for `url`.
    pub async fn find_by_url(&self, url: &str) -> Option<Task> {
        self.list().await.into_iter().find(|task| task.url == url)
    }

    /// Remove a task from memory and storage, reclaiming its thumbnail.
    ///
    /// Only tasks present in memory can be deleted.
    pub async fn delete(&self, id: &str) -> Result<(), TaskError> {
        let mut inner = self.inner.write().await;
        let Some(entry) = inner.tasks.remove(id) else {
            return Err(TaskError::NotFound(id.to_string()));
        };
        let order = self.hand_over(inner).await;
        let deleted = self.store.delete(id);
        drop(order);

        if let Err(e) = deleted {
            // Put it back unless someone re-created it meanwhile
            self.inner
                .write()
                .await
                .tasks
                .entry(id.to_string())
                .or_insert(entry);
            return Err(e);
        }

        let thumbnail = entry.task.thumbnail;
        if !thumbnail.is_empty() {
            if let Err(e) = self.store.purge_thumbnail(&thumbnail) {
                warn!(task_id = %id, error = %e, "Failed to purge cached thumbnail");
            }
        }

        info!(task_id = %id, "Task deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, SharedDatabase};
    use crate::tasks::Stage;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    fn setup() -> (TempDir, SharedDatabase, TaskRegistry) {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::open_at(temp_dir.path().join("test.db")).unwrap();
        db.migrate().unwrap();
        let shared = SharedDatabase::new(db);
        let registry = TaskRegistry::new(Arc::new(shared.clone()));
        (temp_dir, shared, registry)
    }

    /// Store whose writes can be switched off.
    #[derive(Default)]
    struct FlakyStore {
        broken: AtomicBool,
    }

    impl TaskStore for FlakyStore {
        fn save(&self, _task: &Task) -> Result<(), TaskError> {
            if self.broken.load(Ordering::SeqCst) {
                Err(TaskError::Storage(rusqlite::Error::InvalidQuery))
            } else {
                Ok(())
            }
        }
        fn load(&self, _id: &str) -> Result<Option<Task>, TaskError> {
            Ok(None)
        }
        fn load_all(&self) -> Result<Vec<Task>, TaskError> {
            Ok(Vec::new())
        }
        fn delete(&self, _id: &str) -> Result<(), TaskError> {
            Ok(())
        }
        fn purge_thumbnail(&self, _key: &str) -> Result<(), TaskError> {
            Ok(())
        }
    }

    /// Store whose writes block until released.
    #[derive(Default)]
    struct GatedStore {
        closed: AtomicBool,
        entered: AtomicBool,
    }

    impl TaskStore for GatedStore {
        fn save(&self, _task: &Task) -> Result<(), TaskError> {
            self.entered.store(true, Ordering::SeqCst);
            while self.closed.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(5));
            }
            Ok(())
        }
        fn load(&self, _id: &str) -> Result<Option<Task>, TaskError> {
            Ok(None)
        }
        fn load_all(&self) -> Result<Vec<Task>, TaskError> {
            Ok(Vec::new())
        }
        fn delete(&self, _id: &str) -> Result<(), TaskError> {
            Ok(())
        }
        fn purge_thumbnail(&self, _key: &str) -> Result<(), TaskError> {
            Ok(())
        }
    }

    // -------------------------------------------------------------------------
    // CRUD
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_create_persists() {
        let (_temp, store, registry) = setup();

        let task = registry.create("t1").await.unwrap();
        assert_eq!(task.stage, Stage::Initializing);
        assert_eq!(store.load("t1").unwrap().unwrap().id, "t1");
    }

    #[tokio::test]
    async fn test_create_keeps_record_when_persist_fails() {
        let store = Arc::new(FlakyStore::default());
        store.broken.store(true, Ordering::SeqCst);
        let registry = TaskRegistry::new(store);

        assert!(registry.create("t1").await.is_err());
        assert_eq!(registry.get("t1").await.unwrap().id, "t1");
    }

    #[tokio::test]
    async fn test_get_backfills_from_store() {
        let (_temp, store, registry) = setup();
        store.save(&Task::new("durable")).unwrap();

        assert_eq!(registry.get("durable").await.unwrap().id, "durable");
        // Now in memory: visible to list
        assert_eq!(registry.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_get_missing() {
        let (_temp, _store, registry) = setup();
        assert!(matches!(
            registry.get("nope").await,
            Err(TaskError::NotFound(id)) if id == "nope"
        ));
    }

    #[tokio::test]
    async fn test_update_refreshes_timestamp_and_persists() {
        let (_temp, store, registry) = setup();
        let mut task = registry.create("t1").await.unwrap();
        task.title = "Renamed".into();
        task.updated_at = 0;

        registry.update(task).await.unwrap();

        let stored = store.load("t1").unwrap().unwrap();
        assert_eq!(stored.title, "Renamed");
        assert!(stored.updated_at >= stored.created_at);
    }

    #[tokio::test]
    async fn test_update_storage_error_still_updates_memory() {
        let store = Arc::new(FlakyStore::default());
        let registry = TaskRegistry::new(store.clone());
        let mut task = registry.create("t1").await.unwrap();

        store.broken.store(true, Ordering::SeqCst);
        task.title = "best effort".into();
        assert!(registry.update(task).await.is_err());

        assert_eq!(registry.get("t1").await.unwrap().title, "best effort");
    }

    #[tokio::test]
    async fn test_modify_returns_snapshot() {
        let (_temp, _store, registry) = setup();
        registry.create("t1").await.unwrap();

        let (moved, snapshot) = registry
            .modify("t1", |t| t.transition(Stage::Downloading))
            .await
            .unwrap();

        assert!(moved);
        assert_eq!(snapshot.stage, Stage::Downloading);
        assert!(registry.modify("zzz", |_| ()).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reads_proceed_during_slow_write() {
        let store = Arc::new(GatedStore::default());
        let registry = Arc::new(TaskRegistry::new(store.clone()));
        registry.create("t1").await.unwrap();

        store.closed.store(true, Ordering::SeqCst);
        store.entered.store(false, Ordering::SeqCst);
        let writer = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                registry
                    .modify("t1", |t| t.title = "slow".into())
                    .await
                    .map(|_| ())
            })
        };
        while !store.entered.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // The write is stuck in storage; the map must still be readable
        let task = tokio::time::timeout(Duration::from_secs(2), registry.get("t1"))
            .await
            .expect("read blocked by storage write")
            .unwrap();
        assert_eq!(task.title, "slow");
        let listed = tokio::time::timeout(Duration::from_secs(2), registry.list())
            .await
            .expect("list blocked by storage write");
        assert_eq!(listed.len(), 1);

        store.closed.store(false, Ordering::SeqCst);
        writer.await.unwrap().unwrap();
    }

    // -------------------------------------------------------------------------
    // Listing
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_list_newest_first() {
        let (_temp, _store, registry) = setup();

        for (id, created) in [("a", 100), ("b", 300), ("c", 200)] {
            let mut task = Task::new(id);
            task.created_at = created;
            registry.update(task).await.unwrap();
        }

        let ids: Vec<_> = registry.list().await.into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[tokio::test]
    async fn test_list_ties_keep_insertion_order() {
        let (_temp, _store, registry) = setup();

        for id in ["first", "second", "third"] {
            let mut task = Task::new(id);
            task.created_at = 42;
            registry.update(task).await.unwrap();
        }

        let ids: Vec<_> = registry.list().await.into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_load_preloads_store() {
        let (_temp, store, _registry) = setup();
        let mut old = Task::new("old");
        old.created_at = 1;
        let mut new = Task::new("new");
        new.created_at = 2;
        store.save(&old).unwrap();
        store.save(&new).unwrap();

        let registry = TaskRegistry::load(Arc::new(store)).unwrap();
        let ids: Vec<_> = registry.list().await.into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["new", "old"]);
    }

    #[tokio::test]
    async fn test_find_by_url() {
        let (_temp, _store, registry) = setup();
        let mut task = Task::new("t1");
        task.url = "https://example.com/v1".into();
        registry.update(task).await.unwrap();

        assert_eq!(
            registry
                .find_by_url("https://example.com/v1")
                .await
                .map(|t| t.id),
            Some("t1".to_string())
        );
        assert!(registry.find_by_url("https://example.com/v2").await.is_none());
    }

    // -------------------------------------------------------------------------
    // Deletion
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_delete_then_get_is_not_found() {
        let (_temp, store, registry) = setup();
        let mut task = registry.create("t1").await.unwrap();
        task.thumbnail = "https://img.example.com/t1.jpg".into();
        registry.update(task).await.unwrap();
        store
            .lock()
            .save_thumbnail("https://img.example.com/t1.jpg", &[1, 2])
            .unwrap();

        registry.delete("t1").await.unwrap();

        assert!(matches!(
            registry.get("t1").await,
            Err(TaskError::NotFound(_))
        ));
        assert!(store.load("t1").unwrap().is_none());
        assert!(store
            .lock()
            .get_thumbnail("https://img.example.com/t1.jpg")
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_delete_requires_memory_presence() {
        let (_temp, store, registry) = setup();
        store.save(&Task::new("durable-only")).unwrap();

        assert!(matches!(
            registry.delete("durable-only").await,
            Err(TaskError::NotFound(_))
        ));
        // Durable record untouched
        assert!(store.load("durable-only").unwrap().is_some());
    }
}
