//! Typed query helpers for the ledger, the journal tables and their history
//! mirrors.
//!
//! Helpers that must run inside a caller's transaction take a `&Connection`
//! and return `rusqlite::Result`; the `impl Database` methods below lock the
//! connection themselves and are meant for standalone reads.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use tracing::debug;

use super::Database;
use crate::errors::DatabaseError;
use crate::models::{EditSession, EditStatus, HistoryEntry};
use crate::registry::TableSchema;
use crate::values::FieldValue;

// ---------------------------------------------------------------------------
// Domain structs returned by queries
// ---------------------------------------------------------------------------

/// A stored record of one journal table: its identifier plus every stored
/// column (identifier included) keyed by column name.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: i64,
    pub fields: BTreeMap<String, FieldValue>,
}

impl StoredRecord {
    pub fn get(&self, column: &str) -> Option<&FieldValue> {
        self.fields.get(column)
    }
}

const SESSION_COLUMNS: &str = "editid, tablename, editstatus, editfileid, created, finished";

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<EditSession> {
    let status: String = row.get(2)?;
    let status = EditStatus::parse(&status)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
    let created: String = row.get(4)?;
    let finished: Option<String> = row.get(5)?;
    Ok(EditSession {
        editid: row.get(0)?,
        tablename: row.get(1)?,
        status,
        surface_id: row.get(3)?,
        created: parse_datetime(&created),
        finished: finished.as_deref().map(parse_datetime),
    })
}

// ---------------------------------------------------------------------------
// edit_sessions (transaction-scoped)
// ---------------------------------------------------------------------------

/// The active session for `table`, if any.
pub fn find_active_session(
    conn: &Connection,
    table: &str,
) -> rusqlite::Result<Option<EditSession>> {
    conn.query_row(
        &format!(
            "SELECT {SESSION_COLUMNS} FROM edit_sessions
             WHERE tablename = ?1 AND editstatus = 'active' LIMIT 1"
        ),
        params![table],
        session_from_row,
    )
    .optional()
}

/// Insert a new active session. Fails with a constraint violation if the
/// table already has one.
pub fn insert_session(
    conn: &Connection,
    table: &str,
    surface_id: &str,
) -> rusqlite::Result<EditSession> {
    let now = Utc::now();
    conn.execute(
        "INSERT INTO edit_sessions (tablename, editstatus, editfileid, created)
         VALUES (?1, 'active', ?2, ?3)",
        params![table, surface_id, now.to_rfc3339()],
    )?;
    let editid = conn.last_insert_rowid();
    debug!(editid, table, surface_id, "inserted edit session");
    Ok(EditSession {
        editid,
        tablename: table.to_string(),
        status: EditStatus::Active,
        surface_id: surface_id.to_string(),
        created: now,
        finished: None,
    })
}

pub fn find_session(conn: &Connection, editid: i64) -> rusqlite::Result<Option<EditSession>> {
    conn.query_row(
        &format!("SELECT {SESSION_COLUMNS} FROM edit_sessions WHERE editid = ?1"),
        params![editid],
        session_from_row,
    )
    .optional()
}

/// Write a terminal status. Returns the number of rows changed.
pub fn finish_session(
    conn: &Connection,
    editid: i64,
    status: EditStatus,
) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE edit_sessions SET editstatus = ?1, finished = ?2 WHERE editid = ?3",
        params![status.as_str(), Utc::now().to_rfc3339(), editid],
    )
}

// ---------------------------------------------------------------------------
// journal records (transaction-scoped)
// ---------------------------------------------------------------------------

/// Load every stored record of `schema`'s table, ordered by identifier.
pub fn load_records(conn: &Connection, schema: &TableSchema) -> rusqlite::Result<Vec<StoredRecord>> {
    let columns: Vec<_> = schema.stored_columns().collect();
    let select = columns.iter().map(|c| c.name).collect::<Vec<_>>().join(", ");
    let sql = format!(
        "SELECT {select} FROM {table} ORDER BY {id} ASC",
        table = schema.name,
        id = schema.identifier,
    );

    let mut stmt = conn.prepare(&sql)?;
    let records = stmt
        .query_map([], |row| {
            let mut fields = BTreeMap::new();
            let mut id = 0;
            for (i, col) in columns.iter().enumerate() {
                if col.name == schema.identifier {
                    id = row.get(i)?;
                }
                fields.insert(
                    col.name.to_string(),
                    FieldValue::from_sql(row.get_ref(i)?, col.kind),
                );
            }
            Ok(StoredRecord { id, fields })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

/// Insert a record with the given column values; returns its identifier.
pub fn insert_record(
    conn: &Connection,
    schema: &TableSchema,
    values: &[(&str, FieldValue)],
) -> rusqlite::Result<i64> {
    if values.is_empty() {
        conn.execute(&format!("INSERT INTO {} DEFAULT VALUES", schema.name), [])?;
        return Ok(conn.last_insert_rowid());
    }
    let columns = values.iter().map(|(c, _)| *c).collect::<Vec<_>>().join(", ");
    let placeholders = (1..=values.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    conn.execute(
        &format!(
            "INSERT INTO {} ({columns}) VALUES ({placeholders})",
            schema.name
        ),
        params_from_iter(values.iter().map(|(_, v)| v)),
    )?;
    Ok(conn.last_insert_rowid())
}

/// Overwrite the given columns of the record with identifier `id`.
pub fn update_record(
    conn: &Connection,
    schema: &TableSchema,
    id: i64,
    changes: &[(&str, FieldValue)],
) -> rusqlite::Result<usize> {
    let assignments = changes
        .iter()
        .enumerate()
        .map(|(i, (c, _))| format!("{c} = ?{}", i + 1))
        .collect::<Vec<_>>()
        .join(", ");
    let id_param = FieldValue::Integer(id);
    conn.execute(
        &format!(
            "UPDATE {} SET {assignments} WHERE {} = ?{}",
            schema.name,
            schema.identifier,
            changes.len() + 1
        ),
        params_from_iter(changes.iter().map(|(_, v)| v).chain(std::iter::once(&id_param))),
    )
}

pub fn delete_record(conn: &Connection, schema: &TableSchema, id: i64) -> rusqlite::Result<usize> {
    conn.execute(
        &format!("DELETE FROM {} WHERE {} = ?1", schema.name, schema.identifier),
        params![id],
    )
}

/// Append a pre-change snapshot to the table's history mirror.
pub fn insert_history(
    conn: &Connection,
    schema: &TableSchema,
    editid: i64,
    before: &StoredRecord,
) -> rusqlite::Result<i64> {
    let columns: Vec<&str> = schema.stored_columns().map(|c| c.name).collect();
    let values: Vec<&FieldValue> = columns
        .iter()
        .map(|c| before.fields.get(*c).unwrap_or(&FieldValue::Null))
        .collect();
    let placeholders = (1..=columns.len() + 2)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");

    let editid_param = FieldValue::Integer(editid);
    let recorded_at = FieldValue::Text(Utc::now().to_rfc3339());
    conn.execute(
        &format!(
            "INSERT INTO {} ({}, editid, recorded_at) VALUES ({placeholders})",
            schema.history_table(),
            columns.join(", ")
        ),
        params_from_iter(values.into_iter().chain([&editid_param, &recorded_at])),
    )?;
    Ok(conn.last_insert_rowid())
}

// ---------------------------------------------------------------------------
// Standalone reads
// ---------------------------------------------------------------------------

impl Database {
    /// The active session for `table`, if any.
    pub fn active_session(&self, table: &str) -> Result<Option<EditSession>, DatabaseError> {
        let conn = self.conn();
        Ok(find_active_session(&conn, table)?)
    }

    /// Get a session by id (returns an error if not found).
    pub fn get_session(&self, editid: i64) -> Result<EditSession, DatabaseError> {
        let conn = self.conn();
        find_session(&conn, editid)?.ok_or_else(|| DatabaseError::NotFound {
            entity: "edit_session".into(),
            id: editid.to_string(),
        })
    }

    /// Most recent sessions first, optionally filtered by table.
    pub fn list_sessions(
        &self,
        table: Option<&str>,
        limit: u32,
    ) -> Result<Vec<EditSession>, DatabaseError> {
        let conn = self.conn();
        let sessions = match table {
            Some(t) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SESSION_COLUMNS} FROM edit_sessions
                     WHERE tablename = ?1 ORDER BY editid DESC LIMIT ?2"
                ))?;
                let rows = stmt
                    .query_map(params![t, limit], session_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SESSION_COLUMNS} FROM edit_sessions ORDER BY editid DESC LIMIT ?1"
                ))?;
                let rows = stmt
                    .query_map(params![limit], session_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };
        Ok(sessions)
    }

    /// Map every master bibstem to its masterid.
    pub fn master_lookup(&self) -> Result<HashMap<String, i64>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT bibstem, masterid FROM master")?;
        let lookup = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<Result<HashMap<_, _>, _>>()?;
        debug!(entries = lookup.len(), "read bibstem to masterid lookup");
        Ok(lookup)
    }

    /// Number of stored records in a journal table.
    pub fn count_records(&self, schema: &TableSchema) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", schema.name),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Fetch one stored record by identifier.
    pub fn get_record(
        &self,
        schema: &TableSchema,
        id: i64,
    ) -> Result<Option<StoredRecord>, DatabaseError> {
        let conn = self.conn();
        Ok(load_records(&conn, schema)?.into_iter().find(|r| r.id == id))
    }

    /// Most recent history entries of a table, optionally for one session.
    pub fn list_history(
        &self,
        schema: &TableSchema,
        editid: Option<i64>,
        limit: u32,
    ) -> Result<Vec<HistoryEntry>, DatabaseError> {
        let conn = self.conn();
        let columns: Vec<_> = schema.stored_columns().collect();
        let select = columns.iter().map(|c| c.name).collect::<Vec<_>>().join(", ");
        let filter = if editid.is_some() { "WHERE editid = ?2" } else { "" };
        let sql = format!(
            "SELECT histid, editid, recorded_at, {select} FROM {} {filter}
             ORDER BY histid DESC LIMIT ?1",
            schema.history_table()
        );

        let map_row = |row: &Row<'_>| {
            let mut fields = BTreeMap::new();
            for (i, col) in columns.iter().enumerate() {
                fields.insert(
                    col.name.to_string(),
                    FieldValue::from_sql(row.get_ref(i + 3)?, col.kind),
                );
            }
            Ok(HistoryEntry {
                histid: row.get(0)?,
                editid: row.get(1)?,
                recorded_at: row.get(2)?,
                fields,
            })
        };

        let mut stmt = conn.prepare(&sql)?;
        let entries = match editid {
            Some(id) => stmt
                .query_map(params![limit, id], map_row)?
                .collect::<Result<Vec<_>, _>>()?,
            None => stmt
                .query_map(params![limit], map_row)?
                .collect::<Result<Vec<_>, _>>()?,
        };
        Ok(entries)
    }
}

/// Parse a datetime string, returning Utc::now() as a fallback if parsing fails.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
