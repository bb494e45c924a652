//! SQLite database layer for tubekit.
//!
//! Provides persistent storage for:
//! - Settings (app preferences)
//! - Task records (one JSON document per task id)
//! - Dependency records (one JSON document per external tool)
//! - Cached thumbnail blobs

mod migrations;

use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

/// Database connection wrapper.
///
/// Provides a high-level API for interacting with the SQLite database.
/// Automatically handles connection setup, migrations, and file permissions.
pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    /// Open the database at the default location.
    ///
    /// Default path: `~/.local/share/tubekit/tubekit.db`
    pub fn open() -> anyhow::Result<Self> {
        let path = Self::default_path()?;
        Self::open_at(path)
    }

    /// Open the database at a specific path.
    ///
    /// Creates parent directories if they don't exist.
    /// Sets file permissions to 0600 on Unix (cookies and proxy settings live here).
    pub fn open_at(path: PathBuf) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
            {
                tracing::warn!(path = %path.display(), error = %e, "Failed to set database file permissions");
            }
        }

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        Ok(Self { conn, path })
    }

    /// Get the default database path.
    ///
    /// Returns `~/.local/share/tubekit/tubekit.db` (or platform equivalent).
    pub fn default_path() -> anyhow::Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .or_else(|| dirs::home_dir().map(|h| h.join(".local/share")))
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;

        Ok(data_dir.join("tubekit").join("tubekit.db"))
    }

    /// Run database migrations.
    ///
    /// Safe to call multiple times - migrations are tracked and only run once.
    pub fn migrate(&self) -> anyhow::Result<()> {
        migrations::run_migrations(&self.conn)?;
        Ok(())
    }

    /// Get a reference to the underlying connection.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Get the database file path.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    // =========================================================================
    // Settings Storage
    // =========================================================================

    /// Save a setting to the database (upsert).
    pub fn set_setting(&self, key: &str, value: &str) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, unixepoch())
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            [key, value],
        )?;
        Ok(())
    }

    /// Get a setting from the database.
    ///
    /// Returns `None` if the setting doesn't exist.
    pub fn get_setting(&self, key: &str) -> Result<Option<String>, rusqlite::Error> {
        self.conn
            .query_row("SELECT value FROM settings WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .optional()
    }

    // =========================================================================
    // Task Records
    // =========================================================================

    /// Save a serialized task (upsert).
    pub fn save_task(&self, id: &str, data: &str, created_at: i64) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "INSERT INTO tasks (id, data, created_at, updated_at) VALUES (?1, ?2, ?3, unixepoch())
             ON CONFLICT(id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
            params![id, data, created_at],
        )?;
        Ok(())
    }

    /// Load a serialized task.
    pub fn get_task(&self, id: &str) -> Result<Option<String>, rusqlite::Error> {
        self.conn
            .query_row("SELECT data FROM tasks WHERE id = ?", [id], |row| row.get(0))
            .optional()
    }

    /// Load every serialized task, newest first.
    pub fn list_tasks(&self) -> Result<Vec<String>, rusqlite::Error> {
        let mut stmt = self
            .conn
            .prepare("SELECT data FROM tasks ORDER BY created_at DESC, rowid ASC")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect()
    }

    /// Delete a task row. No-op if the row doesn't exist.
    pub fn delete_task(&self, id: &str) -> Result<(), rusqlite::Error> {
        self.conn.execute("DELETE FROM tasks WHERE id = ?", [id])?;
        Ok(())
    }

    // =========================================================================
    // Dependency Records
    // =========================================================================

    /// Save a serialized dependency record (upsert).
    pub fn save_dependency(&self, dep_type: &str, data: &str) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "INSERT INTO dependencies (dep_type, data, updated_at) VALUES (?, ?, unixepoch())
             ON CONFLICT(dep_type) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
            [dep_type, data],
        )?;
        Ok(())
    }

    /// Load a serialized dependency record.
    pub fn get_dependency(&self, dep_type: &str) -> Result<Option<String>, rusqlite::Error> {
        self.conn
            .query_row(
                "SELECT data FROM dependencies WHERE dep_type = ?",
                [dep_type],
                |row| row.get(0),
            )
            .optional()
    }

    // =========================================================================
    // Thumbnail Cache
    // =========================================================================

    /// Cache a thumbnail blob (upsert).
    pub fn save_thumbnail(&self, key: &str, data: &[u8]) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "INSERT INTO thumbnails (key, data) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET data = excluded.data",
            params![key, data],
        )?;
        Ok(())
    }

    /// Load a cached thumbnail blob.
    pub fn get_thumbnail(&self, key: &str) -> Result<Option<Vec<u8>>, rusqlite::Error> {
        self.conn
            .query_row("SELECT data FROM thumbnails WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .optional()
    }

    /// Remove a cached thumbnail. No-op if nothing is cached.
    pub fn delete_thumbnail(&self, key: &str) -> Result<(), rusqlite::Error> {
        self.conn
            .execute("DELETE FROM thumbnails WHERE key = ?", [key])?;
        Ok(())
    }
}

// =============================================================================
// Shared Handle
// =============================================================================

/// Thread-safe handle to a [`Database`].
///
/// `rusqlite::Connection` is `Send` but not `Sync`, so every component that
/// writes through to SQLite shares one connection behind a mutex.
#[derive(Clone)]
pub struct SharedDatabase {
    inner: Arc<Mutex<Database>>,
}

impl SharedDatabase {
    pub fn new(db: Database) -> Self {
        Self {
            inner: Arc::new(Mutex::new(db)),
        }
    }

    /// Lock the connection. A poisoned lock is recovered since SQLite keeps
    /// its own consistency.
    pub fn lock(&self) -> MutexGuard<'_, Database> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// =============================================================================
// Tests
// =============================================================================
