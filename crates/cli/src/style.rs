//! Shared styling utilities for terminal output.

use comfy_table::{Cell, Color};
use console::Style;

use journals_core::models::{CheckinStatus, EditStatus};

/// Create a success-styled string (green with checkmark).
pub fn success(msg: &str) -> String {
    let style = Style::new().green();
    format!("{} {}", style.apply_to("✓"), msg)
}

/// Create an error-styled string (red with cross).
pub fn error(msg: &str) -> String {
    let style = Style::new().red();
    format!("{} {}", style.apply_to("✗"), msg)
}

/// Create a warning-styled string (yellow).
pub fn warn(msg: &str) -> String {
    let style = Style::new().yellow();
    format!("{} {}", style.apply_to("⚠"), msg)
}

/// Create a header-styled string (bold).
pub fn header(msg: &str) -> String {
    let style = Style::new().bold();
    style.apply_to(msg).to_string()
}

pub fn dim(msg: &str) -> String {
    let style = Style::new().dim();
    style.apply_to(msg).to_string()
}

/// Table cell for a session status.
pub fn status_cell(status: EditStatus) -> Cell {
    match status {
        EditStatus::Active => Cell::new("● active").fg(Color::Yellow),
        EditStatus::Completed => Cell::new("✓ completed").fg(Color::Green),
        EditStatus::Failed => Cell::new("✗ failed").fg(Color::Red),
    }
}

/// One-line checkin outcome.
pub fn checkin_status(status: CheckinStatus) -> String {
    match status {
        CheckinStatus::Completed => success("completed"),
        CheckinStatus::Failed => error("failed"),
    }
}
