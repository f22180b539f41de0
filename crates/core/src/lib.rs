//! Journal registry core library.
//!
//! This crate provides checkout/checkin editing of the journal metadata
//! tables: the session ledger, snapshot export to an edit surface,
//! reconciliation of edited rows, the history recorder, configuration, and
//! database persistence.

pub mod config;
pub mod db;
pub mod edit_control;
pub mod errors;
pub mod export;
pub mod history;
pub mod ledger;
pub mod models;
pub mod reconcile;
pub mod registry;
pub mod surface;
pub mod values;

// Re-exports for convenience.
pub use config::AppConfig;
pub use db::Database;
pub use edit_control::{CheckinOutcome, CheckoutOutcome, EditControl};
pub use ledger::SessionLedger;
pub use reconcile::{ReconcileReport, ReconciliationEngine};
pub use registry::SchemaRegistry;
pub use surface::{EditSurface, FolderSurface, MemorySurface};
