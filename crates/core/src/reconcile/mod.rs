//! Reconciliation engine.
//!
//! Checkin merges edited rows back into a journal table in two phases:
//!
//! 1. [`classify`] compares each submitted row with the stored records and
//!    decides whether it creates, modifies, or leaves a record alone, or
//!    cannot be applied at all. This phase is pure.
//! 2. [`apply`] executes the plan inside one transaction, giving every row
//!    its own savepoint so that a rejected row never affects its siblings.
//!
//! The result is a [`ReconcileReport`] whose status is `completed` when no
//! row failed and `failed` otherwise.

pub mod apply;
pub mod classify;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub use apply::apply;
pub use classify::{classify, ClassifyOptions, Plan, PlannedRow, RowDecision};

use crate::db::{queries, Database};
use crate::errors::{CheckinError, DatabaseError, RowFailure, ValidationError};
use crate::models::CheckinStatus;
use crate::registry::SchemaRegistry;
use crate::values::{BlankPolicy, SheetRow};

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Final classification of one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowAction {
    Create,
    Modify,
    Discard,
    Delete,
    Failure,
}

/// What happened to one submitted row (or, for deletions, one stored record).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowOutcome {
    /// Position in the submitted rows; `None` for records deleted because
    /// no row named them.
    pub index: Option<usize>,
    pub identifier: Option<i64>,
    pub action: RowAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<RowFailure>,
}

impl RowOutcome {
    pub fn new(index: Option<usize>, identifier: Option<i64>, action: RowAction) -> Self {
        Self {
            index,
            identifier,
            action,
            failure: None,
        }
    }

    pub fn failed(index: Option<usize>, identifier: Option<i64>, reason: RowFailure) -> Self {
        Self {
            index,
            identifier,
            action: RowAction::Failure,
            failure: Some(reason),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileCounts {
    pub create: usize,
    pub modify: usize,
    pub discard: usize,
    pub failure: usize,
    pub delete: usize,
}

/// Outcome of reconciling one checkin batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub table: String,
    pub editid: i64,
    pub outcomes: Vec<RowOutcome>,
    pub counts: ReconcileCounts,
}

impl ReconcileReport {
    pub fn new(table: &str, editid: i64) -> Self {
        Self {
            table: table.to_string(),
            editid,
            outcomes: Vec::new(),
            counts: ReconcileCounts::default(),
        }
    }

    pub fn push(&mut self, outcome: RowOutcome) {
        let counter = match outcome.action {
            RowAction::Create => &mut self.counts.create,
            RowAction::Modify => &mut self.counts.modify,
            RowAction::Discard => &mut self.counts.discard,
            RowAction::Delete => &mut self.counts.delete,
            RowAction::Failure => &mut self.counts.failure,
        };
        *counter += 1;
        self.outcomes.push(outcome);
    }

    /// `completed` iff no row failed.
    pub fn status(&self) -> CheckinStatus {
        if self.counts.failure == 0 {
            CheckinStatus::Completed
        } else {
            CheckinStatus::Failed
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &RowOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.action == RowAction::Failure)
    }

    /// One warning per failed row, then the batch summary.
    pub fn log(&self) {
        for outcome in self.failures() {
            let reason = outcome
                .failure
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default();
            warn!(
                table = %self.table,
                editid = self.editid,
                row = ?outcome.index.map(|i| i + 1),
                id = ?outcome.identifier,
                %reason,
                "row not reconciled"
            );
        }
        info!(
            table = %self.table,
            editid = self.editid,
            deleted = self.counts.delete,
            status = %self.status(),
            "Total records from sheet: {} New; {} Updates; {} Ignored; {} Problematic",
            self.counts.create,
            self.counts.modify,
            self.counts.discard,
            self.counts.failure,
        );
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Runs classification and application against a [`Database`].
pub struct ReconciliationEngine<'a> {
    registry: &'a SchemaRegistry,
    modify_blanks: BlankPolicy,
}

impl<'a> ReconciliationEngine<'a> {
    pub fn new(registry: &'a SchemaRegistry) -> Self {
        Self {
            registry,
            modify_blanks: BlankPolicy::Keep,
        }
    }

    /// How blank cells are read when diffing existing records.
    pub fn with_modify_blanks(mut self, policy: BlankPolicy) -> Self {
        self.modify_blanks = policy;
        self
    }

    /// Reconcile `rows` into `table` on behalf of session `editid`.
    ///
    /// Row-level problems end up in the report. An error is returned only
    /// when the batch as a whole could not run; nothing is applied then.
    pub fn reconcile(
        &self,
        db: &Database,
        table: &str,
        editid: i64,
        rows: &[SheetRow],
        lookup: &HashMap<String, i64>,
        delete_missing: bool,
    ) -> Result<ReconcileReport, CheckinError> {
        let schema = self
            .registry
            .get(table)
            .ok_or_else(|| ValidationError::InvalidTable(table.to_string()))?;
        let options = ClassifyOptions {
            modify_blanks: self.modify_blanks,
            delete_missing,
        };

        let report = db
            .immediate_transaction(|conn| -> Result<_, DatabaseError> {
                let stored = queries::load_records(conn, schema)?;
                let plan = classify(schema, &stored, rows, lookup, options);
                let unclean = plan.rows.is_empty()
                    || plan
                        .rows
                        .iter()
                        .any(|p| matches!(p.decision, RowDecision::Failure { .. }));
                if delete_missing && unclean && !stored.is_empty() {
                    warn!(
                        table,
                        editid,
                        rows = rows.len(),
                        "no records deleted: submission is empty or has unreadable rows"
                    );
                }
                apply(conn, schema, editid, plan)
            })
            .map_err(|source| CheckinError::Aborted {
                table: table.to_string(),
                source,
            })?;

        report.log();
        Ok(report)
    }
}
