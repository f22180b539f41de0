//! Database schema definitions and migration runner.
//!
//! Migrations are simple SQL strings applied in order. The `schema_version`
//! user-version pragma tracks which migrations have already been applied.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::DatabaseError;

/// All migrations, in order. Each entry is `(version, description, sql)`.
/// Versions start at 1. The current schema version is stored in the SQLite
/// `user_version` pragma.
static MIGRATIONS: &[(u32, &str, &str)] = &[
    (
        1,
        "journal tables",
        r#"
        CREATE TABLE IF NOT EXISTS master (
            masterid          INTEGER PRIMARY KEY AUTOINCREMENT,
            bibstem           TEXT    NOT NULL UNIQUE,
            journal_name      TEXT,
            primary_language  TEXT,
            multilingual      INTEGER,
            defunct           INTEGER DEFAULT 0,
            pubtype           TEXT,
            refereed          TEXT,
            collection        TEXT,
            notes             TEXT,
            not_indexed       INTEGER DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS names (
            nameid                   INTEGER PRIMARY KEY AUTOINCREMENT,
            masterid                 INTEGER NOT NULL REFERENCES master (masterid),
            name_english_translated  TEXT,
            title_language           TEXT,
            name_native_language     TEXT,
            name_normalized          TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_names_masterid ON names (masterid);

        CREATE TABLE IF NOT EXISTS idents (
            identid   INTEGER PRIMARY KEY AUTOINCREMENT,
            masterid  INTEGER NOT NULL REFERENCES master (masterid),
            id_type   TEXT,
            id_value  TEXT,
            UNIQUE (id_type, id_value)
        );

        CREATE INDEX IF NOT EXISTS idx_idents_masterid ON idents (masterid);

        CREATE TABLE IF NOT EXISTS abbrevs (
            abbrevid      INTEGER PRIMARY KEY AUTOINCREMENT,
            masterid      INTEGER NOT NULL REFERENCES master (masterid),
            abbreviation  TEXT    NOT NULL,
            UNIQUE (masterid, abbreviation)
        );

        CREATE INDEX IF NOT EXISTS idx_abbrevs_masterid ON abbrevs (masterid);

        CREATE TABLE IF NOT EXISTS publisher (
            publisherid  INTEGER PRIMARY KEY AUTOINCREMENT,
            pubname      TEXT,
            pubaddress   TEXT,
            pubcontact   TEXT,
            puburl       TEXT,
            pubextid     TEXT,
            notes        TEXT
        );

        CREATE TABLE IF NOT EXISTS titlehistory (
            titlehistoryid  INTEGER PRIMARY KEY AUTOINCREMENT,
            masterid        INTEGER NOT NULL REFERENCES master (masterid),
            year_start      INTEGER,
            year_end        INTEGER,
            complete        INTEGER,
            publisherid     INTEGER REFERENCES publisher (publisherid),
            predecessorid   INTEGER,
            successorid     INTEGER,
            notes           TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_titlehistory_masterid ON titlehistory (masterid);
        "#,
    ),
    (
        2,
        "edit session ledger",
        r#"
        CREATE TABLE IF NOT EXISTS edit_sessions (
            editid      INTEGER PRIMARY KEY AUTOINCREMENT,
            tablename   TEXT NOT NULL,
            editstatus  TEXT NOT NULL CHECK (editstatus IN ('active', 'completed', 'failed')),
            editfileid  TEXT NOT NULL,
            created     TEXT NOT NULL,
            finished    TEXT
        );

        -- At most one active session per table.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_edit_sessions_one_active
            ON edit_sessions (tablename) WHERE editstatus = 'active';
        CREATE INDEX IF NOT EXISTS idx_edit_sessions_tablename ON edit_sessions (tablename);
        "#,
    ),
    (
        3,
        "history mirrors",
        r#"
        CREATE TABLE IF NOT EXISTS master_hist (
            histid            INTEGER PRIMARY KEY AUTOINCREMENT,
            masterid          INTEGER,
            bibstem           TEXT,
            journal_name      TEXT,
            primary_language  TEXT,
            multilingual      INTEGER,
            defunct           INTEGER,
            pubtype           TEXT,
            refereed          TEXT,
            collection        TEXT,
            notes             TEXT,
            not_indexed       INTEGER,
            editid            INTEGER NOT NULL REFERENCES edit_sessions (editid),
            recorded_at       TEXT    NOT NULL
        );

        CREATE TABLE IF NOT EXISTS names_hist (
            histid                   INTEGER PRIMARY KEY AUTOINCREMENT,
            nameid                   INTEGER,
            masterid                 INTEGER,
            name_english_translated  TEXT,
            title_language           TEXT,
            name_native_language     TEXT,
            name_normalized          TEXT,
            editid                   INTEGER NOT NULL REFERENCES edit_sessions (editid),
            recorded_at              TEXT    NOT NULL
        );

        CREATE TABLE IF NOT EXISTS idents_hist (
            histid       INTEGER PRIMARY KEY AUTOINCREMENT,
            identid      INTEGER,
            masterid     INTEGER,
            id_type      TEXT,
            id_value     TEXT,
            editid       INTEGER NOT NULL REFERENCES edit_sessions (editid),
            recorded_at  TEXT    NOT NULL
        );

        CREATE TABLE IF NOT EXISTS abbrevs_hist (
            histid        INTEGER PRIMARY KEY AUTOINCREMENT,
            abbrevid      INTEGER,
            masterid      INTEGER,
            abbreviation  TEXT,
            editid        INTEGER NOT NULL REFERENCES edit_sessions (editid),
            recorded_at   TEXT    NOT NULL
        );

        CREATE TABLE IF NOT EXISTS publisher_hist (
            histid       INTEGER PRIMARY KEY AUTOINCREMENT,
            publisherid  INTEGER,
            pubname      TEXT,
            pubaddress   TEXT,
            pubcontact   TEXT,
            puburl       TEXT,
            pubextid     TEXT,
            notes        TEXT,
            editid       INTEGER NOT NULL REFERENCES edit_sessions (editid),
            recorded_at  TEXT    NOT NULL
        );

        CREATE TABLE IF NOT EXISTS titlehistory_hist (
            histid          INTEGER PRIMARY KEY AUTOINCREMENT,
            titlehistoryid  INTEGER,
            masterid        INTEGER,
            year_start      INTEGER,
            year_end        INTEGER,
            complete        INTEGER,
            publisherid     INTEGER,
            predecessorid   INTEGER,
            successorid     INTEGER,
            notes           TEXT,
            editid          INTEGER NOT NULL REFERENCES edit_sessions (editid),
            recorded_at     TEXT    NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_master_hist_editid ON master_hist (editid);
        CREATE INDEX IF NOT EXISTS idx_names_hist_editid ON names_hist (editid);
        CREATE INDEX IF NOT EXISTS idx_idents_hist_editid ON idents_hist (editid);
        CREATE INDEX IF NOT EXISTS idx_abbrevs_hist_editid ON abbrevs_hist (editid);
        CREATE INDEX IF NOT EXISTS idx_publisher_hist_editid ON publisher_hist (editid);
        CREATE INDEX IF NOT EXISTS idx_titlehistory_hist_editid ON titlehistory_hist (editid);
        "#,
    ),
    (
        4,
        "append-only history triggers",
        r#"
        CREATE TRIGGER IF NOT EXISTS master_hist_no_update BEFORE UPDATE ON master_hist
            BEGIN SELECT RAISE(ABORT, 'history is append-only'); END;
        CREATE TRIGGER IF NOT EXISTS master_hist_no_delete BEFORE DELETE ON master_hist
            BEGIN SELECT RAISE(ABORT, 'history is append-only'); END;
        CREATE TRIGGER IF NOT EXISTS names_hist_no_update BEFORE UPDATE ON names_hist
            BEGIN SELECT RAISE(ABORT, 'history is append-only'); END;
        CREATE TRIGGER IF NOT EXISTS names_hist_no_delete BEFORE DELETE ON names_hist
            BEGIN SELECT RAISE(ABORT, 'history is append-only'); END;
        CREATE TRIGGER IF NOT EXISTS idents_hist_no_update BEFORE UPDATE ON idents_hist
            BEGIN SELECT RAISE(ABORT, 'history is append-only'); END;
        CREATE TRIGGER IF NOT EXISTS idents_hist_no_delete BEFORE DELETE ON idents_hist
            BEGIN SELECT RAISE(ABORT, 'history is append-only'); END;
        CREATE TRIGGER IF NOT EXISTS abbrevs_hist_no_update BEFORE UPDATE ON abbrevs_hist
            BEGIN SELECT RAISE(ABORT, 'history is append-only'); END;
        CREATE TRIGGER IF NOT EXISTS abbrevs_hist_no_delete BEFORE DELETE ON abbrevs_hist
            BEGIN SELECT RAISE(ABORT, 'history is append-only'); END;
        CREATE TRIGGER IF NOT EXISTS publisher_hist_no_update BEFORE UPDATE ON publisher_hist
            BEGIN SELECT RAISE(ABORT, 'history is append-only'); END;
        CREATE TRIGGER IF NOT EXISTS publisher_hist_no_delete BEFORE DELETE ON publisher_hist
            BEGIN SELECT RAISE(ABORT, 'history is append-only'); END;
        CREATE TRIGGER IF NOT EXISTS titlehistory_hist_no_update BEFORE UPDATE ON titlehistory_hist
            BEGIN SELECT RAISE(ABORT, 'history is append-only'); END;
        CREATE TRIGGER IF NOT EXISTS titlehistory_hist_no_delete BEFORE DELETE ON titlehistory_hist
            BEGIN SELECT RAISE(ABORT, 'history is append-only'); END;
        "#,
    ),
];

/// Run all pending migrations against `conn`.
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current_version = get_schema_version(conn)?;
    info!(
        current_version,
        target_version = MIGRATIONS.last().map(|m| m.0).unwrap_or(0),
        "checking database migrations"
    );

    for &(version, description, sql) in MIGRATIONS {
        if version > current_version {
            info!(version, description, "applying migration");
            conn.execute_batch(sql)
                .map_err(|e| DatabaseError::MigrationFailed {
                    version,
                    detail: e.to_string(),
                })?;
            set_schema_version(conn, version)?;
            debug!(version, "migration applied successfully");
        }
    }

    Ok(())
}

/// Read the current schema version from the SQLite `user_version` pragma.
fn get_schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

/// Set the schema version via the SQLite `user_version` pragma.
fn set_schema_version(conn: &Connection, version: u32) -> Result<(), DatabaseError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}
