//! Classification of edited rows against stored records.
//!
//! Nothing here touches the database: [`classify`] folds the submitted rows
//! into a [`Plan`] of typed decisions that [`super::apply`] then executes.

use std::collections::{BTreeSet, HashMap};

use crate::db::queries::StoredRecord;
use crate::errors::RowFailure;
use crate::registry::{TableSchema, BIBSTEM, MASTERID};
use crate::values::{BlankPolicy, Cell, FieldValue, SheetRow};

/// Column assignments for an insert or update.
pub type Changes = Vec<(&'static str, FieldValue)>;

/// What to do with one submitted row.
#[derive(Debug, Clone, PartialEq)]
pub enum RowDecision {
    /// No stored record matches; insert `values`.
    Create { values: Changes },
    /// Exactly one stored record matches and differs. `before` is its state
    /// prior to this row's changes.
    Modify {
        id: i64,
        before: StoredRecord,
        changes: Changes,
    },
    /// Exactly one stored record matches and nothing differs.
    Discard { id: i64 },
    Failure { reason: RowFailure },
}

/// A decision together with the row it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedRow {
    /// Position of the row in the submitted sequence.
    pub index: usize,
    pub identifier: Option<i64>,
    pub decision: RowDecision,
}

/// Every decision for one checkin batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub rows: Vec<PlannedRow>,
    /// Stored records to remove because no submitted row names them. Only
    /// populated when deletion of missing rows was requested, at least one
    /// row was submitted, and every row classified cleanly.
    pub deletions: Vec<StoredRecord>,
}

/// Knobs for [`classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifyOptions {
    /// How blank cells are read when diffing a matched record.
    pub modify_blanks: BlankPolicy,
    /// Plan deletion of stored records missing from the submission.
    pub delete_missing: bool,
}

impl Default for ClassifyOptions {
    fn default() -> Self {
        Self {
            modify_blanks: BlankPolicy::Keep,
            delete_missing: false,
        }
    }
}

/// Classify `rows` against `stored`.
///
/// Rows are processed in order. When a row modifies a record, later rows
/// naming the same identifier are diffed against the modified values.
pub fn classify(
    schema: &TableSchema,
    stored: &[StoredRecord],
    rows: &[SheetRow],
    lookup: &HashMap<String, i64>,
    options: ClassifyOptions,
) -> Plan {
    let mut working: Vec<StoredRecord> = stored.to_vec();
    let mut by_id: HashMap<i64, Vec<usize>> = HashMap::new();
    for (i, record) in working.iter().enumerate() {
        by_id.entry(record.id).or_default().push(i);
    }

    let mut submitted = BTreeSet::new();
    let mut planned = Vec::with_capacity(rows.len());

    for (index, row) in rows.iter().enumerate() {
        let identifier = match read_identifier(schema, row) {
            Ok(id) => id,
            Err(reason) => {
                planned.push(PlannedRow {
                    index,
                    identifier: None,
                    decision: RowDecision::Failure { reason },
                });
                continue;
            }
        };

        let matches = identifier
            .and_then(|id| by_id.get(&id))
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        let decision = match (identifier, matches) {
            (Some(id), [only]) => {
                let record = &mut working[*only];
                match diff(schema, record, row, options.modify_blanks) {
                    Ok(changes) if changes.is_empty() => RowDecision::Discard { id },
                    Ok(changes) => {
                        let before = record.clone();
                        for (column, value) in &changes {
                            record.fields.insert(column.to_string(), value.clone());
                        }
                        RowDecision::Modify {
                            id,
                            before,
                            changes,
                        }
                    }
                    Err(reason) => RowDecision::Failure { reason },
                }
            }
            (Some(id), many) if many.len() > 1 => RowDecision::Failure {
                reason: RowFailure::DuplicateIdentifier {
                    id,
                    count: many.len(),
                },
            },
            _ => match create_values(schema, row, identifier, lookup) {
                Ok(values) => RowDecision::Create { values },
                Err(reason) => RowDecision::Failure { reason },
            },
        };

        if let Some(id) = identifier {
            submitted.insert(id);
        }
        planned.push(PlannedRow {
            index,
            identifier,
            decision,
        });
    }

    // An empty submission or an unreadable row cannot tell a removed record
    // from a lost one.
    let deletable = options.delete_missing
        && !planned.is_empty()
        && !planned
            .iter()
            .any(|p| matches!(p.decision, RowDecision::Failure { .. }));
    let deletions = if deletable {
        working
            .into_iter()
            .filter(|r| !submitted.contains(&r.id))
            .collect()
    } else {
        Vec::new()
    };

    Plan {
        rows: planned,
        deletions,
    }
}

/// The row's identifier; `None` when absent or blank.
fn read_identifier(schema: &TableSchema, row: &SheetRow) -> Result<Option<i64>, RowFailure> {
    match row.cell(schema.identifier) {
        Cell::Absent | Cell::Blank => Ok(None),
        Cell::Filled(text) => text
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| RowFailure::InvalidIdentifier {
                value: text.to_string(),
            }),
    }
}

/// Columns whose submitted value differs from the record. Absent cells are
/// left alone, and a blank cell never differs from a stored NULL since NULL
/// is exported as a blank.
fn diff(
    schema: &TableSchema,
    record: &StoredRecord,
    row: &SheetRow,
    blanks: BlankPolicy,
) -> Result<Changes, RowFailure> {
    let mut changes = Vec::new();
    for col in schema.diff_columns() {
        let cell = row.cell(col.name);
        let Some(value) = cell.parse(col.name, col.kind, blanks)? else {
            continue;
        };
        let current = record.get(col.name).unwrap_or(&FieldValue::Null);
        if cell == Cell::Blank && current.is_null() {
            continue;
        }
        if *current != value {
            changes.push((col.name, value));
        }
    }
    Ok(changes)
}

/// Values for a new record. Blank cells become NULL, and a missing masterid
/// is resolved from the row's bibstem.
fn create_values(
    schema: &TableSchema,
    row: &SheetRow,
    identifier: Option<i64>,
    lookup: &HashMap<String, i64>,
) -> Result<Changes, RowFailure> {
    let mut values = Vec::new();
    if let Some(id) = identifier {
        values.push((schema.identifier, FieldValue::Integer(id)));
    }

    let mut masterid = None;
    for col in schema.diff_columns() {
        let Some(value) = row.cell(col.name).parse(col.name, col.kind, BlankPolicy::Null)? else {
            continue;
        };
        if col.name == MASTERID && schema.references_master {
            masterid = value.as_integer();
            continue;
        }
        values.push((col.name, value));
    }

    if schema.references_master {
        let resolved = match (masterid, row.cell(BIBSTEM)) {
            (Some(id), _) => id,
            (None, Cell::Filled(bibstem)) => {
                let bibstem = bibstem.trim();
                *lookup
                    .get(bibstem)
                    .ok_or_else(|| RowFailure::UnresolvedBibstem {
                        bibstem: bibstem.to_string(),
                    })?
            }
            (None, _) => return Err(RowFailure::MissingMasterReference),
        };
        values.push((MASTERID, FieldValue::Integer(resolved)));
    }

    Ok(values)
}
