//! Domain model types used throughout the journal registry.
//!
//! These types bridge the ledger, the reconciliation engine, the database
//! layer and the command-line tool.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;
use crate::values::FieldValue;

// ---------------------------------------------------------------------------
// Edit session status
// ---------------------------------------------------------------------------

/// Lifecycle state of an edit session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EditStatus {
    Active,
    Completed,
    Failed,
}

impl EditStatus {
    /// The string stored in the ledger.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse a ledger status string.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(ValidationError::InvalidStatus(other.to_string())),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl std::fmt::Display for EditStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<CheckinStatus> for EditStatus {
    fn from(status: CheckinStatus) -> Self {
        match status {
            CheckinStatus::Completed => Self::Completed,
            CheckinStatus::Failed => Self::Failed,
        }
    }
}

// ---------------------------------------------------------------------------
// Edit session
// ---------------------------------------------------------------------------

/// A row of the session ledger: one checkout/checkin cycle for one table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EditSession {
    pub editid: i64,
    pub tablename: String,
    pub status: EditStatus,
    /// Identifier of the edit surface holding the snapshot.
    pub surface_id: String,
    pub created: DateTime<Utc>,
    pub finished: Option<DateTime<Utc>>,
}

impl EditSession {
    pub fn is_active(&self) -> bool {
        self.status == EditStatus::Active
    }
}

// ---------------------------------------------------------------------------
// Checkin outcome
// ---------------------------------------------------------------------------

/// Overall result of reconciling one checkin batch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckinStatus {
    Completed,
    Failed,
}

impl CheckinStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for CheckinStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// A pre-change snapshot read back from a `<table>_hist` mirror for
/// inspection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub histid: i64,
    pub editid: i64,
    pub recorded_at: String,
    /// Stored column values as they were before the change.
    pub fields: BTreeMap<String, FieldValue>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_strings() {
        for status in [EditStatus::Active, EditStatus::Completed, EditStatus::Failed] {
            assert_eq!(EditStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(matches!(
            EditStatus::parse("locked"),
            Err(ValidationError::InvalidStatus(ref s)) if s == "locked"
        ));
    }

    #[test]
    fn test_checkin_status_maps_to_terminal_edit_status() {
        assert_eq!(EditStatus::from(CheckinStatus::Completed), EditStatus::Completed);
        assert_eq!(EditStatus::from(CheckinStatus::Failed), EditStatus::Failed);
        assert!(EditStatus::Failed.is_terminal());
        assert!(!EditStatus::Active.is_terminal());
    }
}
