//! Immutable registry of editable table schemas.
//!
//! A [`SchemaRegistry`] is built once and handed to the exporter and the
//! reconciliation engine. Each [`TableSchema`] fixes the export column order,
//! the identifier column, which columns are joined from `master` rather than
//! stored on the table itself, and whether new rows must resolve a `masterid`.

use std::collections::BTreeMap;

use crate::values::ColumnKind;

/// Name of the business-key column joined from `master`.
pub const BIBSTEM: &str = "bibstem";

/// Name of the foreign reference column to `master`.
pub const MASTERID: &str = "masterid";

/// Where a column's value lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnOrigin {
    /// A column of the table itself.
    Stored,
    /// Read from `master` through `masterid`; exported but never written.
    Joined,
}

/// One column of a table's export schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub kind: ColumnKind,
    pub origin: ColumnOrigin,
}

const fn stored(name: &'static str, kind: ColumnKind) -> ColumnDef {
    ColumnDef {
        name,
        kind,
        origin: ColumnOrigin::Stored,
    }
}

const fn joined(name: &'static str) -> ColumnDef {
    ColumnDef {
        name,
        kind: ColumnKind::Text,
        origin: ColumnOrigin::Joined,
    }
}

/// Schema descriptor for one editable table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: &'static str,
    /// Immutable unique identifier; the sole reconciliation join key.
    pub identifier: &'static str,
    /// Export columns in order.
    pub columns: Vec<ColumnDef>,
    /// Whether new rows must carry a resolved `masterid`.
    pub references_master: bool,
}

impl TableSchema {
    /// Column names in export order.
    pub fn header(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.name).collect()
    }

    /// Columns persisted on the table itself, in export order.
    pub fn stored_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns
            .iter()
            .filter(|c| c.origin == ColumnOrigin::Stored)
    }

    /// Stored columns other than the identifier; the set a diff runs over.
    pub fn diff_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        let identifier = self.identifier;
        self.stored_columns().filter(move |c| c.name != identifier)
    }

    /// Name of the append-only history mirror.
    pub fn history_table(&self) -> String {
        format!("{}_hist", self.name)
    }
}

/// Registry of table schemas keyed by table name.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    tables: BTreeMap<&'static str, TableSchema>,
}

impl SchemaRegistry {
    /// Build a registry from explicit descriptors.
    pub fn new(schemas: impl IntoIterator<Item = TableSchema>) -> Self {
        Self {
            tables: schemas.into_iter().map(|s| (s.name, s)).collect(),
        }
    }

    /// The journal tables that can be checked out.
    pub fn journals() -> Self {
        use ColumnKind::{Bool, Integer, Text};

        Self::new([
            TableSchema {
                name: "master",
                identifier: "masterid",
                columns: vec![
                    stored("masterid", Integer),
                    stored("bibstem", Text),
                    stored("journal_name", Text),
                    stored("primary_language", Text),
                    stored("multilingual", Bool),
                    stored("defunct", Bool),
                    stored("pubtype", Text),
                    stored("refereed", Text),
                    stored("collection", Text),
                    stored("notes", Text),
                    stored("not_indexed", Bool),
                ],
                references_master: false,
            },
            TableSchema {
                name: "names",
                identifier: "nameid",
                columns: vec![
                    stored("nameid", Integer),
                    stored(MASTERID, Integer),
                    joined(BIBSTEM),
                    stored("name_english_translated", Text),
                    stored("title_language", Text),
                    stored("name_native_language", Text),
                    stored("name_normalized", Text),
                ],
                references_master: true,
            },
            TableSchema {
                name: "idents",
                identifier: "identid",
                columns: vec![
                    stored("identid", Integer),
                    stored(MASTERID, Integer),
                    joined(BIBSTEM),
                    stored("id_type", Text),
                    stored("id_value", Text),
                ],
                references_master: true,
            },
            TableSchema {
                name: "abbrevs",
                identifier: "abbrevid",
                columns: vec![
                    stored("abbrevid", Integer),
                    stored(MASTERID, Integer),
                    joined(BIBSTEM),
                    stored("abbreviation", Text),
                ],
                references_master: true,
            },
            TableSchema {
                name: "publisher",
                identifier: "publisherid",
                columns: vec![
                    stored("publisherid", Integer),
                    stored("pubname", Text),
                    stored("pubaddress", Text),
                    stored("pubcontact", Text),
                    stored("puburl", Text),
                    stored("pubextid", Text),
                    stored("notes", Text),
                ],
                references_master: false,
            },
            TableSchema {
                name: "titlehistory",
                identifier: "titlehistoryid",
                columns: vec![
                    stored("titlehistoryid", Integer),
                    stored(MASTERID, Integer),
                    joined(BIBSTEM),
                    stored("year_start", Integer),
                    stored("year_end", Integer),
                    stored("complete", Bool),
                    stored("publisherid", Integer),
                    stored("predecessorid", Integer),
                    stored("successorid", Integer),
                    stored("notes", Text),
                ],
                references_master: true,
            },
        ])
    }

    pub fn get(&self, table: &str) -> Option<&TableSchema> {
        self.tables.get(table)
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    /// Table names in sorted order.
    pub fn tables(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.tables.keys().copied()
    }
}
