//! SQLite handle for the organization store.
//!
//! One connection serves the whole process. Callers reach it through
//! `with_conn`, which serializes access; `SqliteStore` calls that from the
//! blocking pool so request tasks never wait on the lock directly.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::info;

use folio_core::error::FolioError;

use crate::migrations;

const FILE_PRAGMAS: &str = "PRAGMA journal_mode = WAL;
     PRAGMA synchronous = NORMAL;
     PRAGMA foreign_keys = ON;";

const MEMORY_PRAGMAS: &str = "PRAGMA foreign_keys = ON;";

/// Organizations, subscriptions and role grants behind one locked connection.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open the database file, creating it and its directory on first use.
    /// The schema is brought up to date before this returns.
    pub fn new(path: &Path) -> Result<Self, FolioError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| {
            FolioError::Storage(format!("Cannot open {}: {}", path.display(), e))
        })?;
        let db = Self::prepare(conn, FILE_PRAGMAS)?;
        info!(path = %path.display(), "Organization database ready");
        Ok(db)
    }

    /// Migrated database that lives only as long as the handle.
    pub fn in_memory() -> Result<Self, FolioError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| FolioError::Storage(format!("Cannot open in-memory database: {}", e)))?;
        Self::prepare(conn, MEMORY_PRAGMAS)
    }

    fn prepare(conn: Connection, pragmas: &str) -> Result<Self, FolioError> {
        conn.execute_batch(pragmas)
            .map_err(|e| FolioError::Storage(format!("Cannot apply pragmas: {}", e)))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Run `f` with exclusive use of the connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, FolioError>
    where
        F: FnOnce(&Connection) -> Result<T, FolioError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| FolioError::Storage(format!("Connection lock poisoned: {}", e)))?;
        f(&conn)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_orgs(db: &Database) -> i64 {
        db.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM organizations", [], |row| row.get(0))
                .map_err(|e| FolioError::Storage(e.to_string()))
        })
        .unwrap()
    }

    #[test]
    fn test_in_memory_database() {
        let db = Database::in_memory().unwrap();
        assert_eq!(count_orgs(&db), 0);
    }

    #[test]
    fn test_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("folio.db");
        let db = Database::new(&path).unwrap();
        assert_eq!(count_orgs(&db), 0);
        assert!(path.exists());
    }

    #[test]
    fn test_reopen_keeps_schema_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("folio.db");
        drop(Database::new(&path).unwrap());

        let db = Database::new(&path).unwrap();
        let version: i64 = db
            .with_conn(|conn| {
                conn.query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                    row.get(0)
                })
                .map_err(|e| FolioError::Storage(e.to_string()))
            })
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn test_file_database_uses_wal() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(&dir.path().join("folio.db")).unwrap();
        let mode: String = db
            .with_conn(|conn| {
                conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))
                    .map_err(|e| FolioError::Storage(e.to_string()))
            })
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }
}
