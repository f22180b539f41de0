//! SQLite persistence layer for the journal registry.
//!
//! Provides a [`Database`] handle with WAL-mode journaling, automatic schema
//! migrations, and query helpers for the session ledger, the journal tables
//! and their history mirrors.

pub mod queries;
pub mod schema;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, info};

use crate::errors::DatabaseError;

/// Main database handle wrapping a SQLite connection.
///
/// The connection is opened in WAL mode for concurrent-read performance and
/// uses `PRAGMA foreign_keys = ON`. The inner connection is wrapped in a
/// `Mutex` so that `Database` is `Send + Sync`, enabling use inside `Arc`.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The database is configured with WAL journaling mode and foreign key
    /// enforcement immediately after opening.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening database");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;

        debug!("database opened successfully with WAL mode");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (useful for testing).
    pub fn in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run all schema migrations to bring the database up to date.
    pub fn initialize(&self) -> Result<(), DatabaseError> {
        info!("initializing database schema");
        let conn = self.conn();
        schema::run_migrations(&conn)?;
        debug!("database schema is up to date");
        Ok(())
    }

    /// Obtain a lock on the underlying connection.
    ///
    /// If the Mutex is poisoned (a previous holder panicked), the lock is
    /// recovered rather than propagating a panic.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("database mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Execute a closure inside a SQLite transaction. If the closure returns
    /// `Ok`, the transaction is committed; otherwise it is rolled back.
    pub fn transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Connection) -> Result<T, E>,
        E: From<DatabaseError>,
    {
        self.transaction_with(TransactionBehavior::Deferred, f)
    }

    /// Like [`transaction`](Self::transaction) but takes the write lock up
    /// front (`BEGIN IMMEDIATE`), so a read-then-write inside `f` cannot
    /// interleave with another writer.
    pub fn immediate_transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Connection) -> Result<T, E>,
        E: From<DatabaseError>,
    {
        self.transaction_with(TransactionBehavior::Immediate, f)
    }

    fn transaction_with<F, T, E>(&self, behavior: TransactionBehavior, f: F) -> Result<T, E>
    where
        F: FnOnce(&Connection) -> Result<T, E>,
        E: From<DatabaseError>,
    {
        let mut conn = self.conn();
        let tx = conn
            .transaction_with_behavior(behavior)
            .map_err(|e| E::from(DatabaseError::from(e)))?;
        // Dropping `tx` on the error path rolls back.
        let result = f(&tx)?;
        tx.commit().map_err(|e| E::from(DatabaseError::from(e)))?;
        Ok(result)
    }
}

/// Run `f` under a named SAVEPOINT on `conn`.
///
/// The outer `Result` reports failures managing the savepoint itself; the
/// inner one is `f`'s own result. When `f` fails its changes are rolled back
/// to the savepoint and the surrounding transaction stays usable.
pub fn with_savepoint<T, F>(
    conn: &Connection,
    name: &str,
    f: F,
) -> Result<Result<T, rusqlite::Error>, DatabaseError>
where
    F: FnOnce(&Connection) -> Result<T, rusqlite::Error>,
{
    conn.execute_batch(&format!("SAVEPOINT {name}"))?;
    match f(conn) {
        Ok(value) => {
            conn.execute_batch(&format!("RELEASE {name}"))?;
            Ok(Ok(value))
        }
        Err(e) => {
            conn.execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name}"))?;
            Ok(Err(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_database() {
        let db = Database::in_memory().expect("failed to create in-memory db");
        db.initialize().expect("failed to initialize schema");
    }

    #[test]
    fn test_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("journals.db");
        let db = Database::new(&path).expect("failed to create file db");
        db.initialize().expect("failed to initialize schema");
        assert!(path.exists());
    }

    #[test]
    fn test_transaction_commit() {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();

        db.transaction(|conn| {
            conn.execute(
                "INSERT INTO master (bibstem, journal_name) VALUES (?1, ?2)",
                rusqlite::params!["ApJ", "Astrophysical Journal"],
            )
            .map_err(DatabaseError::from)?;
            Ok::<_, DatabaseError>(())
        })
        .unwrap();

        let name: String = db
            .conn()
            .query_row(
                "SELECT journal_name FROM master WHERE bibstem = ?1",
                rusqlite::params!["ApJ"],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(name, "Astrophysical Journal");
    }

    #[test]
    fn test_transaction_rollback() {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();

        let result: Result<(), DatabaseError> = db.transaction(|conn| {
            conn.execute(
                "INSERT INTO master (bibstem) VALUES (?1)",
                rusqlite::params!["rollback_test"],
            )?;
            Err(DatabaseError::NotFound {
                entity: "test".into(),
                id: "forced".into(),
            })
        });
        assert!(result.is_err());

        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM master", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_savepoint_isolates_failure() {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();

        db.transaction(|conn| {
            let ok = with_savepoint(conn, "first", |c| {
                c.execute("INSERT INTO master (bibstem) VALUES ('A')", [])
            })?;
            assert!(ok.is_ok());

            // Duplicate bibstem violates the unique constraint.
            let failed = with_savepoint(conn, "second", |c| {
                c.execute("INSERT INTO master (bibstem) VALUES ('B')", [])?;
                c.execute("INSERT INTO master (bibstem) VALUES ('A')", [])
            })?;
            assert!(failed.is_err());
            Ok::<_, DatabaseError>(())
        })
        .unwrap();

        let stems: Vec<String> = {
            let conn = db.conn();
            let mut stmt = conn.prepare("SELECT bibstem FROM master ORDER BY bibstem").unwrap();
            let rows = stmt
                .query_map([], |row| row.get(0))
                .unwrap()
                .collect::<Result<Vec<_>, _>>()
                .unwrap();
            rows
        };
        assert_eq!(stems, vec!["A".to_string()]);
    }
}
