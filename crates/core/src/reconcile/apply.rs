//! Execution of a classified [`Plan`].
//!
//! The caller supplies a connection that is already inside a transaction.
//! Each create, modify and delete runs under its own savepoint: a failure
//! rolls back that row only and is recorded in the report. Failures managing
//! the savepoints themselves are returned to the caller, who rolls back the
//! whole batch.
//!
//! Classification assumes every modify lands. Once a modify of a record rolls
//! back, later rows naming that record were judged against values that never
//! reached the table, so they fail too.

use std::collections::HashSet;

use rusqlite::Connection;
use tracing::debug;

use super::classify::{Plan, RowDecision};
use super::{ReconcileReport, RowAction, RowOutcome};
use crate::db::{queries, with_savepoint};
use crate::errors::{DatabaseError, RowFailure};
use crate::history;
use crate::registry::TableSchema;

const ROW_SAVEPOINT: &str = "reconcile_row";

/// Apply `plan` to `schema`'s table, recording history under `editid`.
pub fn apply(
    conn: &Connection,
    schema: &TableSchema,
    editid: i64,
    plan: Plan,
) -> Result<ReconcileReport, DatabaseError> {
    let mut report = ReconcileReport::new(schema.name, editid);
    let mut rolled_back: HashSet<i64> = HashSet::new();

    for planned in plan.rows {
        let index = Some(planned.index);
        let outcome = match planned.decision {
            RowDecision::Modify { id, .. } | RowDecision::Discard { id }
                if rolled_back.contains(&id) =>
            {
                RowOutcome::failed(index, Some(id), RowFailure::EarlierEditFailed { id })
            }
            RowDecision::Create { values } => {
                match with_savepoint(conn, ROW_SAVEPOINT, |c| {
                    queries::insert_record(c, schema, &values)
                })? {
                    Ok(id) => {
                        debug!(table = schema.name, id, "created record");
                        RowOutcome::new(index, Some(id), RowAction::Create)
                    }
                    Err(e) => RowOutcome::failed(index, planned.identifier, commit_failure(e)),
                }
            }
            RowDecision::Modify {
                id,
                before,
                changes,
            } => {
                let result = with_savepoint(conn, ROW_SAVEPOINT, |c| {
                    let updated = queries::update_record(c, schema, id, &changes)?;
                    if updated != 1 {
                        return Err(rusqlite::Error::StatementChangedRows(updated));
                    }
                    history::record(c, schema, editid, &before)
                })?;
                match result {
                    Ok(_) => {
                        debug!(table = schema.name, id, columns = changes.len(), "modified record");
                        RowOutcome::new(index, Some(id), RowAction::Modify)
                    }
                    Err(e) => {
                        rolled_back.insert(id);
                        RowOutcome::failed(index, Some(id), commit_failure(e))
                    }
                }
            }
            RowDecision::Discard { id } => RowOutcome::new(index, Some(id), RowAction::Discard),
            RowDecision::Failure { reason } => {
                RowOutcome::failed(index, planned.identifier, reason)
            }
        };
        report.push(outcome);
    }

    for before in plan.deletions {
        let result = with_savepoint(conn, ROW_SAVEPOINT, |c| {
            history::record(c, schema, editid, &before)?;
            queries::delete_record(c, schema, before.id)
        })?;
        let outcome = match result {
            Ok(_) => {
                debug!(table = schema.name, id = before.id, "deleted record");
                RowOutcome::new(None, Some(before.id), RowAction::Delete)
            }
            Err(e) => RowOutcome::failed(None, Some(before.id), commit_failure(e)),
        };
        report.push(outcome);
    }

    Ok(report)
}

fn commit_failure(e: rusqlite::Error) -> RowFailure {
    RowFailure::Commit {
        detail: e.to_string(),
    }
}
