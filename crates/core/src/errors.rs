//! Error types for the journal registry core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.
//!
//! Per-row reconciliation problems are *not* errors in this sense: they are
//! carried as [`RowFailure`] values inside the checkin report and never abort
//! sibling rows.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Surface(#[from] SurfaceError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Checkout(#[from] CheckoutError),

    #[error(transparent)]
    Checkin(#[from] CheckinError),
}

// ---------------------------------------------------------------------------
// Validation errors
// ---------------------------------------------------------------------------

/// A request was rejected before any side effect took place.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The table is not in the configured editable set.
    #[error("table '{0}' is not editable")]
    InvalidTable(String),

    /// A status string was not one of the known session states.
    #[error("invalid session status '{0}'")]
    InvalidStatus(String),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Database errors
// ---------------------------------------------------------------------------

/// Errors from the SQLite persistence layer.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed { version: u32, detail: String },

    /// A record was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Generic I/O error (e.g. file permissions).
    #[error("database I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Edit surface errors
// ---------------------------------------------------------------------------

/// Errors from an edit surface collaborator.
#[derive(Debug, Error)]
pub enum SurfaceError {
    /// No surface exists with the given identifier.
    #[error("edit surface not found: {0}")]
    NotFound(String),

    /// The surface content could not be interpreted as a table.
    #[error("malformed edit surface {id}: {detail}")]
    Malformed { id: String, detail: String },

    /// CSV encoding or decoding failed.
    #[error("edit surface CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Generic I/O wrapper.
    #[error("edit surface I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Session ledger errors
// ---------------------------------------------------------------------------

/// Errors from the session ledger and finalizer.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// No session exists with the given id.
    #[error("edit session {0} not found")]
    SessionNotFound(i64),

    /// The table has no active session to release.
    #[error("table '{0}' is not checked out")]
    NotCheckedOut(String),

    /// Only active sessions may be finalized.
    #[error("edit session {editid} is '{current}', cannot mark it '{requested}'")]
    InvalidTransition {
        editid: i64,
        current: String,
        requested: String,
    },

    /// Creating the edit surface for a new session failed.
    #[error("ledger surface error: {0}")]
    Surface(#[from] SurfaceError),

    /// Underlying database error.
    #[error("ledger database error: {0}")]
    Database(#[from] DatabaseError),
}

impl From<rusqlite::Error> for LedgerError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(DatabaseError::SqliteError(e))
    }
}

// ---------------------------------------------------------------------------
// Checkout errors
// ---------------------------------------------------------------------------

/// Errors from checking a table out to the edit surface.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// The request was rejected before any side effect.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Acquiring the session failed.
    #[error("checkout of '{table}' failed: {source}")]
    Ledger {
        table: String,
        #[source]
        source: LedgerError,
    },

    /// The snapshot could not be exported or written; the new session was
    /// released as failed.
    #[error("writing snapshot of '{table}' to edit surface {surface_id} failed: {detail}")]
    SnapshotWrite {
        table: String,
        surface_id: String,
        detail: String,
    },
}

// ---------------------------------------------------------------------------
// Checkin errors
// ---------------------------------------------------------------------------

/// Fatal errors during checkin orchestration.
///
/// Any of these leaves the session active (unresolved); the caller is
/// expected to retry the checkin.
#[derive(Debug, Error)]
pub enum CheckinError {
    /// The request was rejected before any side effect.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The edited rows could not be fetched.
    #[error("fetching edit surface for '{table}' failed: {source}")]
    Fetch {
        table: String,
        #[source]
        source: SurfaceError,
    },

    /// The batch transaction failed outside per-row scope and was rolled back.
    #[error("reconciliation of '{table}' aborted: {source}")]
    Aborted {
        table: String,
        #[source]
        source: DatabaseError,
    },

    /// Writing the terminal status failed.
    #[error("finalizing session for '{table}' failed: {source}")]
    Finalize {
        table: String,
        #[source]
        source: LedgerError,
    },

    /// Ledger lookup failed.
    #[error("checkin ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

// ---------------------------------------------------------------------------
// Row failures (data, not propagated)
// ---------------------------------------------------------------------------

/// Why a single submitted row could not be reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RowFailure {
    /// The identifier cell was not an integer.
    #[error("identifier '{value}' is not an integer")]
    InvalidIdentifier { value: String },

    /// A cell could not be converted to its column type.
    #[error("column '{column}': cannot read '{value}' as {expected}")]
    InvalidValue {
        column: String,
        value: String,
        expected: String,
    },

    /// More than one stored record carries this identifier.
    #[error("identifier {id} matches {count} stored records")]
    DuplicateIdentifier { id: i64, count: usize },

    /// The bibstem on a new row is not present in the master lookup.
    #[error("bibstem '{bibstem}' has no master entry")]
    UnresolvedBibstem { bibstem: String },

    /// A new row on a masterid-referencing table names no master entry.
    #[error("new row supplies neither masterid nor bibstem")]
    MissingMasterReference,

    /// An earlier row editing the same record was rolled back, so this
    /// row's comparison no longer reflects the stored values.
    #[error("an earlier edit of record {id} was rolled back")]
    EarlierEditFailed { id: i64 },

    /// The database rejected the row's change; it was rolled back.
    #[error("commit failed: {detail}")]
    Commit { detail: String },
}

// CoreError implements `std::error::Error` via `thiserror`, which means
// `anyhow::Error: From<CoreError>` is already provided by the blanket impl
// in `anyhow`.
