//! Snapshot exporter.
//!
//! Produces the ordered, schema-fixed row set written to an edit surface at
//! checkout. Subordinate tables carry the master `bibstem` next to their
//! `masterid` so curators see the business key rather than the internal id.

use rusqlite::Connection;
use tracing::debug;

use crate::db::Database;
use crate::errors::DatabaseError;
use crate::registry::{ColumnOrigin, SchemaRegistry, TableSchema, MASTERID};
use crate::values::{FieldValue, SheetRow};

/// Header and rows of one table, ready to be written to an edit surface.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub header: Vec<&'static str>,
    pub rows: Vec<SheetRow>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Export `table`. A table the registry does not know yields an empty
/// snapshot.
pub fn export_table(
    conn: &Connection,
    registry: &SchemaRegistry,
    table: &str,
) -> rusqlite::Result<Snapshot> {
    let Some(schema) = registry.get(table) else {
        debug!(table, "no export schema for table");
        return Ok(Snapshot::default());
    };

    let sql = snapshot_sql(schema);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            let mut out = SheetRow::new();
            for (i, col) in schema.columns.iter().enumerate() {
                out.insert(col.name, FieldValue::from_sql(row.get_ref(i)?, col.kind).render());
            }
            Ok(out)
        })?
        .collect::<Result<Vec<_>, _>>()?;

    debug!(table, rows = rows.len(), "exported snapshot");
    Ok(Snapshot {
        header: schema.header(),
        rows,
    })
}

/// Build the snapshot query. Joined columns come from `master` through a
/// LEFT JOIN so every stored row is exported even if its master is missing.
fn snapshot_sql(schema: &TableSchema) -> String {
    let select = schema
        .columns
        .iter()
        .map(|c| match c.origin {
            ColumnOrigin::Stored => format!("t.{}", c.name),
            ColumnOrigin::Joined => format!("m.{}", c.name),
        })
        .collect::<Vec<_>>()
        .join(", ");

    if schema.references_master {
        format!(
            "SELECT {select} FROM {table} t
             LEFT JOIN master m ON m.masterid = t.{MASTERID}
             ORDER BY t.{MASTERID} ASC, t.{id} ASC",
            table = schema.name,
            id = schema.identifier,
        )
    } else {
        format!(
            "SELECT {select} FROM {table} t ORDER BY t.{id} ASC",
            table = schema.name,
            id = schema.identifier,
        )
    }
}

impl Database {
    /// Export a snapshot of `table` using a standalone connection lock.
    pub fn export_table(
        &self,
        registry: &SchemaRegistry,
        table: &str,
    ) -> Result<Snapshot, DatabaseError> {
        let conn = self.conn();
        Ok(export_table(&conn, registry, table)?)
    }
}
