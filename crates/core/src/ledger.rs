//! Session ledger and finalizer.
//!
//! The ledger holds at most one active edit session per table. Acquiring a
//! table checks for an active session and creates a new one inside a single
//! `BEGIN IMMEDIATE` transaction, so two concurrent checkouts of the same
//! table cannot both create a session. The partial unique index on
//! `edit_sessions(tablename) WHERE editstatus = 'active'` backs this up at
//! the storage level.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::ErrorCode;
use tracing::{debug, info, warn};

use crate::db::{queries, Database};
use crate::errors::{DatabaseError, LedgerError};
use crate::models::{CheckinStatus, EditSession, EditStatus};
use crate::surface::EditSurface;

/// Result of [`SessionLedger::acquire`].
#[derive(Debug, Clone, PartialEq)]
pub enum Acquired {
    /// A new session and an empty edit surface were created.
    Created(EditSession),
    /// The table was already checked out; the existing session is reused.
    Existing(EditSession),
}

impl Acquired {
    pub fn session(&self) -> &EditSession {
        match self {
            Self::Created(s) | Self::Existing(s) => s,
        }
    }

    pub fn into_session(self) -> EditSession {
        match self {
            Self::Created(s) | Self::Existing(s) => s,
        }
    }
}

/// Tracks edit sessions and their edit surfaces.
pub struct SessionLedger {
    db: Arc<Database>,
    surface: Arc<dyn EditSurface>,
}

impl SessionLedger {
    pub fn new(db: Arc<Database>, surface: Arc<dyn EditSurface>) -> Self {
        Self { db, surface }
    }

    /// Return the active session for `table`, creating a session and a fresh
    /// edit surface if there is none.
    pub fn acquire(&self, table: &str) -> Result<Acquired, LedgerError> {
        let result = self.db.immediate_transaction(|conn| -> Result<_, LedgerError> {
            if let Some(existing) = queries::find_active_session(conn, table)? {
                return Ok(Acquired::Existing(existing));
            }
            let title = format!("{table} {}", Utc::now().format("%Y-%m-%d %H:%M:%S"));
            let surface_id = self.surface.create(&title)?;
            let session = queries::insert_session(conn, table, &surface_id)?;
            Ok(Acquired::Created(session))
        });

        match result {
            Ok(Acquired::Created(session)) => {
                info!(
                    table,
                    editid = session.editid,
                    surface_id = %session.surface_id,
                    "created edit session"
                );
                Ok(Acquired::Created(session))
            }
            Ok(Acquired::Existing(session)) => {
                debug!(
                    table,
                    editid = session.editid,
                    created = %session.created,
                    "table already checked out"
                );
                Ok(Acquired::Existing(session))
            }
            Err(LedgerError::Database(DatabaseError::SqliteError(e))) if is_unique_violation(&e) => {
                // Another writer committed an active session between our
                // check and insert.
                let winner = self
                    .db
                    .active_session(table)?
                    .ok_or_else(|| LedgerError::NotCheckedOut(table.to_string()))?;
                warn!(table, editid = winner.editid, "lost checkout race, reusing session");
                Ok(Acquired::Existing(winner))
            }
            Err(e) => Err(e),
        }
    }

    /// The active session for `table`, if any.
    pub fn active(&self, table: &str) -> Result<Option<EditSession>, LedgerError> {
        Ok(self.db.active_session(table)?)
    }

    pub fn get(&self, editid: i64) -> Result<EditSession, LedgerError> {
        self.db.get_session(editid).map_err(|e| match e {
            DatabaseError::NotFound { .. } => LedgerError::SessionNotFound(editid),
            other => LedgerError::Database(other),
        })
    }

    /// Most recent sessions first.
    pub fn list(&self, table: Option<&str>, limit: u32) -> Result<Vec<EditSession>, LedgerError> {
        Ok(self.db.list_sessions(table, limit)?)
    }

    /// Write a terminal status to a session, ending its lock.
    pub fn set_status(&self, editid: i64, status: EditStatus) -> Result<EditSession, LedgerError> {
        let session = self.db.immediate_transaction(|conn| -> Result<_, LedgerError> {
            let current = queries::find_session(conn, editid)?
                .ok_or(LedgerError::SessionNotFound(editid))?;
            if !current.is_active() || !status.is_terminal() {
                return Err(LedgerError::InvalidTransition {
                    editid,
                    current: current.status.to_string(),
                    requested: status.to_string(),
                });
            }
            queries::finish_session(conn, editid, status)?;
            queries::find_session(conn, editid)?.ok_or(LedgerError::SessionNotFound(editid))
        })?;

        info!(editid, table = %session.tablename, status = %status, "edit session finalized");
        Ok(session)
    }

    /// Finalize the active session of `table` with a checkin outcome.
    pub fn release(&self, table: &str, status: CheckinStatus) -> Result<EditSession, LedgerError> {
        let session = self
            .active(table)?
            .ok_or_else(|| LedgerError::NotCheckedOut(table.to_string()))?;
        self.set_status(session.editid, status.into())
    }
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SurfaceError;
    use crate::surface::MemorySurface;
    use crate::values::SheetRow;

    fn setup() -> (SessionLedger, Arc<MemorySurface>) {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        let surface = Arc::new(MemorySurface::new());
        (SessionLedger::new(Arc::new(db), surface.clone()), surface)
    }

    struct Unreachable;

    impl EditSurface for Unreachable {
        fn create(&self, _title: &str) -> Result<String, SurfaceError> {
            Err(SurfaceError::Io(std::io::Error::other("surface service unreachable")))
        }
        fn write(&self, id: &str, _: &[&str], _: &[SheetRow]) -> Result<(), SurfaceError> {
            Err(SurfaceError::NotFound(id.to_string()))
        }
        fn fetch(&self, id: &str) -> Result<Vec<SheetRow>, SurfaceError> {
            Err(SurfaceError::NotFound(id.to_string()))
        }
    }

    #[test]
    fn test_acquire_creates_then_reuses() {
        let (ledger, surface) = setup();

        let first = ledger.acquire("names").unwrap();
        assert!(matches!(first, Acquired::Created(_)));
        assert!(first.session().is_active());
        assert!(surface.title(&first.session().surface_id).unwrap().starts_with("names "));

        let second = ledger.acquire("names").unwrap();
        assert!(matches!(second, Acquired::Existing(_)));
        assert_eq!(second.session().editid, first.session().editid);
        assert_eq!(surface.len(), 1);
        assert_eq!(ledger.list(Some("names"), 10).unwrap().len(), 1);
    }

    #[test]
    fn test_surface_failure_leaves_no_session() {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        let ledger = SessionLedger::new(Arc::new(db), Arc::new(Unreachable));

        let err = ledger.acquire("idents").unwrap_err();
        assert!(matches!(err, LedgerError::Surface(_)));
        assert!(ledger.active("idents").unwrap().is_none());
        assert!(ledger.list(None, 10).unwrap().is_empty());
    }

    #[test]
    fn test_set_status_transitions() {
        let (ledger, _) = setup();
        let session = ledger.acquire("master").unwrap().into_session();

        let done = ledger.set_status(session.editid, EditStatus::Completed).unwrap();
        assert_eq!(done.status, EditStatus::Completed);
        assert!(done.finished.is_some());
        assert!(ledger.active("master").unwrap().is_none());

        let again = ledger.set_status(session.editid, EditStatus::Failed).unwrap_err();
        assert!(matches!(again, LedgerError::InvalidTransition { .. }));

        let missing = ledger.set_status(4242, EditStatus::Completed).unwrap_err();
        assert!(matches!(missing, LedgerError::SessionNotFound(4242)));
    }

    #[test]
    fn test_set_status_rejects_active() {
        let (ledger, _) = setup();
        let session = ledger.acquire("abbrevs").unwrap().into_session();
        let err = ledger.set_status(session.editid, EditStatus::Active).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition { .. }));
        assert!(ledger.get(session.editid).unwrap().is_active());
    }

    #[test]
    fn test_release_then_new_checkout() {
        let (ledger, surface) = setup();
        let first = ledger.acquire("publisher").unwrap().into_session();
        let released = ledger.release("publisher", CheckinStatus::Failed).unwrap();
        assert_eq!(released.status, EditStatus::Failed);

        let second = ledger.acquire("publisher").unwrap();
        assert!(matches!(second, Acquired::Created(_)));
        assert_ne!(second.session().editid, first.editid);
        assert_eq!(surface.len(), 2);

        assert!(matches!(
            ledger.release("titlehistory", CheckinStatus::Completed),
            Err(LedgerError::NotCheckedOut(_))
        ));
        assert!(matches!(ledger.get(999), Err(LedgerError::SessionNotFound(999))));
    }

    #[test]
    fn test_unique_violation_detection() {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        let conn = db.conn();
        queries::insert_session(&conn, "names", "a").unwrap();
        let err = queries::insert_session(&conn, "names", "b").unwrap_err();
        assert!(is_unique_violation(&err));
    }
}
