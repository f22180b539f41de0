//! Tabular rendering of sessions, history and checkin reports.

use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};

use journals_core::models::{EditSession, HistoryEntry};
use journals_core::reconcile::ReconcileReport;
use journals_core::registry::TableSchema;

use crate::style;

pub fn print_sessions(sessions: &[EditSession]) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Edit ID", "Table", "Status", "Surface", "Created", "Finished"]);

    for s in sessions {
        table.add_row(vec![
            Cell::new(s.editid),
            Cell::new(&s.tablename),
            style::status_cell(s.status),
            Cell::new(&s.surface_id),
            Cell::new(s.created.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(
                s.finished
                    .map(|f| f.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
        ]);
    }

    println!("{table}");
    println!("{}", style::dim(&format!("{} session(s) shown", sessions.len())));
}

pub fn print_history(schema: &TableSchema, entries: &[HistoryEntry]) {
    let columns: Vec<&str> = schema.stored_columns().map(|c| c.name).collect();

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    let mut header = vec!["Hist ID", "Edit ID", "Recorded"];
    header.extend(columns.iter().copied());
    table.set_header(header);

    for entry in entries {
        let mut row = vec![
            Cell::new(entry.histid),
            Cell::new(entry.editid),
            Cell::new(&entry.recorded_at[..19.min(entry.recorded_at.len())]),
        ];
        row.extend(columns.iter().map(|c| {
            Cell::new(
                entry
                    .fields
                    .get(*c)
                    .map(ToString::to_string)
                    .unwrap_or_default(),
            )
        }));
        table.add_row(row);
    }

    println!("{table}");
    println!("{}", style::dim(&format!("{} entries shown", entries.len())));
}

pub fn print_report(report: &ReconcileReport) {
    let c = &report.counts;
    println!();
    println!(
        "{}",
        style::header(&format!("Checkin of '{}' (edit {})", report.table, report.editid))
    );
    println!();
    println!("  New        : {}", c.create);
    println!("  Updated    : {}", c.modify);
    println!("  Unchanged  : {}", c.discard);
    if c.delete > 0 {
        println!("  Deleted    : {}", c.delete);
    }
    println!("  Problematic: {}", c.failure);
    println!("  Status     : {}", style::checkin_status(report.status()));

    if c.failure == 0 {
        println!();
        return;
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Row", "ID", "Reason"]);
    for outcome in report.failures() {
        table.add_row(vec![
            Cell::new(
                outcome
                    .index
                    .map(|i| (i + 1).to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
            Cell::new(
                outcome
                    .identifier
                    .map(|i| i.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
            Cell::new(
                outcome
                    .failure
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default(),
            ),
        ]);
    }
    println!();
    println!("{table}");
    println!();
}
