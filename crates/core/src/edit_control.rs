//! Checkout / checkin orchestration.
//!
//! [`EditControl`] is the task boundary: `checkout`, `checkin` and
//! `set_status` are independently callable units. Each runs one operation to
//! completion on the calling thread.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::config::AppConfig;
use crate::db::Database;
use crate::errors::{CheckinError, CheckoutError, DatabaseError, LedgerError, ValidationError};
use crate::export::export_table;
use crate::ledger::{Acquired, SessionLedger};
use crate::models::{EditSession, EditStatus};
use crate::reconcile::{ReconcileReport, ReconciliationEngine};
use crate::registry::SchemaRegistry;
use crate::surface::EditSurface;
use crate::values::BlankPolicy;

/// Result of [`EditControl::checkout`].
#[derive(Debug, Clone, PartialEq)]
pub enum CheckoutOutcome {
    /// A new session was opened and `rows` snapshot rows were written.
    Created { session: EditSession, rows: usize },
    /// The table was already checked out; nothing was written.
    Reused { session: EditSession },
}

impl CheckoutOutcome {
    pub fn session(&self) -> &EditSession {
        match self {
            Self::Created { session, .. } | Self::Reused { session } => session,
        }
    }
}

/// Result of [`EditControl::checkin`].
#[derive(Debug, Clone, PartialEq)]
pub enum CheckinOutcome {
    /// The table has no active session; nothing was fetched or changed.
    NotCheckedOut,
    /// The edited rows were reconciled and the session finalized.
    Reconciled(ReconcileReport),
}

/// Entry point for checkout, checkin and session finalization.
pub struct EditControl {
    db: Arc<Database>,
    surface: Arc<dyn EditSurface>,
    registry: SchemaRegistry,
    ledger: SessionLedger,
    editable: BTreeSet<String>,
    modify_blanks: BlankPolicy,
}

impl EditControl {
    /// All registry tables are editable until narrowed with
    /// [`with_editable`](Self::with_editable).
    pub fn new(db: Arc<Database>, surface: Arc<dyn EditSurface>, registry: SchemaRegistry) -> Self {
        let editable = registry.tables().map(String::from).collect();
        let ledger = SessionLedger::new(db.clone(), surface.clone());
        Self {
            db,
            surface,
            registry,
            ledger,
            editable,
            modify_blanks: BlankPolicy::Keep,
        }
    }

    /// Build from configuration with the journal schemas.
    pub fn from_config(
        config: &AppConfig,
        db: Arc<Database>,
        surface: Arc<dyn EditSurface>,
    ) -> Self {
        let policy = if config.reconcile.blank_as_null_on_modify {
            BlankPolicy::Null
        } else {
            BlankPolicy::Keep
        };
        Self::new(db, surface, SchemaRegistry::journals())
            .with_editable(config.registry.editable_tables.iter().cloned())
            .with_modify_blanks(policy)
    }

    /// Restrict the tables that may be checked out.
    pub fn with_editable<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.editable = tables.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_modify_blanks(mut self, policy: BlankPolicy) -> Self {
        self.modify_blanks = policy;
        self
    }

    pub fn ledger(&self) -> &SessionLedger {
        &self.ledger
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    fn validate_table(&self, table: &str) -> Result<(), ValidationError> {
        if self.editable.contains(table) && self.registry.contains(table) {
            Ok(())
        } else {
            Err(ValidationError::InvalidTable(table.to_string()))
        }
    }

    /// Lock `table` for editing and write a snapshot to a new edit surface,
    /// or return the existing session if the table is already checked out.
    pub fn checkout(&self, table: &str) -> Result<CheckoutOutcome, CheckoutError> {
        self.validate_table(table)?;

        let session = match self.ledger.acquire(table) {
            Ok(Acquired::Existing(session)) => return Ok(CheckoutOutcome::Reused { session }),
            Ok(Acquired::Created(session)) => session,
            Err(source) => {
                return Err(CheckoutError::Ledger {
                    table: table.to_string(),
                    source,
                })
            }
        };

        match self.write_snapshot(table, &session.surface_id) {
            Ok(rows) => {
                info!(table, editid = session.editid, rows, "table checked out");
                Ok(CheckoutOutcome::Created { session, rows })
            }
            Err(detail) => {
                error!(table, editid = session.editid, %detail, "snapshot write failed");
                if let Err(e) = self.ledger.set_status(session.editid, EditStatus::Failed) {
                    error!(editid = session.editid, error = %e, "failed to release session");
                }
                Err(CheckoutError::SnapshotWrite {
                    table: table.to_string(),
                    surface_id: session.surface_id,
                    detail,
                })
            }
        }
    }

    fn write_snapshot(&self, table: &str, surface_id: &str) -> Result<usize, String> {
        let snapshot = {
            let conn = self.db.conn();
            export_table(&conn, &self.registry, table).map_err(|e| e.to_string())?
        };
        self.surface
            .write(surface_id, &snapshot.header, &snapshot.rows)
            .map_err(|e| e.to_string())?;
        Ok(snapshot.len())
    }

    /// Fetch the edited rows of `table`, reconcile them, and finalize the
    /// session with the outcome.
    ///
    /// On error the session is left active so the checkin can be retried.
    pub fn checkin(
        &self,
        table: &str,
        lookup: &HashMap<String, i64>,
        delete_flag: bool,
    ) -> Result<CheckinOutcome, CheckinError> {
        self.validate_table(table)?;

        let Some(session) = self.ledger.active(table)? else {
            debug!(table, "table is not checked out, nothing to check in");
            return Ok(CheckinOutcome::NotCheckedOut);
        };
        debug!(
            table,
            editid = session.editid,
            created = %session.created,
            surface_id = %session.surface_id,
            "checking in table"
        );

        let rows = self
            .surface
            .fetch(&session.surface_id)
            .map_err(|source| CheckinError::Fetch {
                table: table.to_string(),
                source,
            })?;

        let report = ReconciliationEngine::new(&self.registry)
            .with_modify_blanks(self.modify_blanks)
            .reconcile(&self.db, table, session.editid, &rows, lookup, delete_flag)?;

        self.ledger
            .set_status(session.editid, report.status().into())
            .map_err(|source| CheckinError::Finalize {
                table: table.to_string(),
                source,
            })?;

        Ok(CheckinOutcome::Reconciled(report))
    }

    /// Write a terminal status to a session.
    pub fn set_status(&self, editid: i64, status: EditStatus) -> Result<EditSession, LedgerError> {
        self.ledger.set_status(editid, status)
    }

    /// Bibstem to masterid map, computed before checkin.
    pub fn master_lookup(&self) -> Result<HashMap<String, i64>, DatabaseError> {
        self.db.master_lookup()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::MemorySurface;

    fn setup() -> (EditControl, Arc<MemorySurface>) {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        let surface = Arc::new(MemorySurface::new());
        let control = EditControl::new(Arc::new(db), surface.clone(), SchemaRegistry::journals());
        (control, surface)
    }

    #[test]
    fn test_checkout_rejects_non_editable_table() {
        let (control, surface) = setup();
        let control = control.with_editable(["master"]);

        let err = control.checkout("names").unwrap_err();
        assert!(matches!(
            err,
            CheckoutError::Validation(ValidationError::InvalidTable(_))
        ));
        assert!(matches!(
            control.checkin("raster", &HashMap::new(), false),
            Err(CheckinError::Validation(_))
        ));
        assert!(surface.is_empty());
        assert!(control.ledger().list(None, 10).unwrap().is_empty());
    }

    #[test]
    fn test_snapshot_write_failure_releases_session() {
        let (control, surface) = setup();
        surface.set_reject_writes(true);

        let err = control.checkout("publisher").unwrap_err();
        assert!(matches!(err, CheckoutError::SnapshotWrite { .. }));
        assert!(control.ledger().active("publisher").unwrap().is_none());
        let sessions = control.ledger().list(Some("publisher"), 10).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].status, EditStatus::Failed);

        surface.set_reject_writes(false);
        assert!(matches!(
            control.checkout("publisher").unwrap(),
            CheckoutOutcome::Created { rows: 0, .. }
        ));
    }

    #[test]
    fn test_checkin_without_checkout() {
        let (control, _) = setup();
        let outcome = control.checkin("idents", &HashMap::new(), false).unwrap();
        assert_eq!(outcome, CheckinOutcome::NotCheckedOut);
    }

    #[test]
    fn test_fetch_failure_leaves_session_active() {
        let (control, _) = setup();
        let session = control.checkout("abbrevs").unwrap().session().clone();

        // A surface that never saw the checkout cannot fetch it.
        let other = EditControl::new(
            control.db.clone(),
            Arc::new(MemorySurface::new()),
            SchemaRegistry::journals(),
        );
        let err = other.checkin("abbrevs", &HashMap::new(), false).unwrap_err();
        assert!(matches!(err, CheckinError::Fetch { .. }));
        assert!(control.ledger().get(session.editid).unwrap().is_active());
    }

    #[test]
    fn test_from_config_applies_editable_set() {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        let mut config = AppConfig::default();
        config.registry.editable_tables = vec!["names".into()];

        let control = EditControl::from_config(&config, Arc::new(db), Arc::new(MemorySurface::new()));
        assert!(control.checkout("names").is_ok());
        assert!(control.checkout("master").is_err());
    }
}
