//! Durable backing for the task registry.

use super::{Task, TaskError};
use crate::db::SharedDatabase;

/// Durable key-value storage of task records.
pub trait TaskStore: Send + Sync {
    fn save(&self, task: &Task) -> Result<(), TaskError>;
    fn load(&self, id: &str) -> Result<Option<Task>, TaskError>;
    /// Every stored task, newest first.
    fn load_all(&self) -> Result<Vec<Task>, TaskError>;
    fn delete(&self, id: &str) -> Result<(), TaskError>;
    /// Drop a cached thumbnail blob. Missing entries are not an error.
    fn purge_thumbnail(&self, key: &str) -> Result<(), TaskError>;
}

impl TaskStore for SharedDatabase {
    fn save(&self, task: &Task) -> Result<(), TaskError> {
        let json = serde_json::to_string(task)?;
        self.lock().save_task(&task.id, &json, task.created_at)?;
        Ok(())
    }

    fn load(&self, id: &str) -> Result<Option<Task>, TaskError> {
        let raw = self.lock().get_task(id)?;
        Ok(raw.map(|json| serde_json::from_str(&json)).transpose()?)
    }

    fn load_all(&self) -> Result<Vec<Task>, TaskError> {
        let rows = self.lock().list_tasks()?;
        let mut tasks = Vec::with_capacity(rows.len());
        for json in rows {
            match serde_json::from_str::<Task>(&json) {
                Ok(task) => tasks.push(task),
                Err(e) => tracing::warn!(error = %e, "Skipping unreadable task record"),
            }
        }
        Ok(tasks)
    }

    fn delete(&self, id: &str) -> Result<(), TaskError> {
        self.lock().delete_task(id)?;
        Ok(())
    }

    fn purge_thumbnail(&self, key: &str) -> Result<(), TaskError> {
        self.lock().delete_thumbnail(key)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use tempfile::TempDir;

    fn setup() -> (TempDir, SharedDatabase) {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::open_at(temp_dir.path().join("test.db")).unwrap();
        db.migrate().unwrap();
        (temp_dir, SharedDatabase::new(db))
    }

    #[test]
    fn test_save_and_load() {
        let (_temp, store) = setup();
        let mut task = Task::new("t1");
        task.title = "Clip".into();

        store.save(&task).unwrap();

        assert_eq!(store.load("t1").unwrap(), Some(task));
        assert!(store.load("missing").unwrap().is_none());
    }

    #[test]
    fn test_load_all_skips_corrupt_rows() {
        let (_temp, store) = setup();
        store.save(&Task::new("good")).unwrap();
        store.lock().save_task("bad", "{oops", 0).unwrap();

        let tasks = store.load_all().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "good");
    }

    #[test]
    fn test_purge_thumbnail() {
        let (_temp, store) = setup();
        store.lock().save_thumbnail("thumb", &[9]).unwrap();

        store.purge_thumbnail("thumb").unwrap();
        store.purge_thumbnail("thumb").unwrap();

        assert!(store.lock().get_thumbnail("thumb").unwrap().is_none());
    }
}
