//! History recorder.
//!
//! Every modified or deleted record leaves one append-only snapshot of its
//! prior state in `<table>_hist`, tagged with the edit session. The mirrors
//! are never read back to rebuild a record;
//! [`Database::list_history`](crate::db::Database::list_history) exists
//! for inspection only.

use rusqlite::Connection;
use tracing::{debug, warn};

use crate::db::queries::{self, StoredRecord};
use crate::registry::TableSchema;

/// Append the pre-change snapshot `before` to the table's history mirror.
///
/// Runs on the caller's connection so the write shares the transaction (and
/// savepoint) of the change it records.
pub fn record(
    conn: &Connection,
    schema: &TableSchema,
    editid: i64,
    before: &StoredRecord,
) -> rusqlite::Result<i64> {
    match queries::insert_history(conn, schema, editid, before) {
        Ok(histid) => {
            debug!(
                table = schema.name,
                id = before.id,
                editid,
                histid,
                "recorded history snapshot"
            );
            Ok(histid)
        }
        Err(e) => {
            warn!(table = schema.name, id = before.id, editid, error = %e, "history write failed");
            Err(e)
        }
    }
}
