//! End-to-end checkout / checkin tests against an in-memory database and
//! edit surface.

use std::collections::HashMap;
use std::sync::{Arc, Barrier};
use std::thread;

use journals_core::db::{queries, Database};
use journals_core::edit_control::{CheckinOutcome, CheckoutOutcome, EditControl};
use journals_core::errors::RowFailure;
use journals_core::models::{CheckinStatus, EditStatus};
use journals_core::reconcile::{ReconcileReport, RowAction};
use journals_core::registry::SchemaRegistry;
use journals_core::surface::{EditSurface, FolderSurface, MemorySurface};
use journals_core::values::{FieldValue, SheetRow};

struct Harness {
    db: Arc<Database>,
    surface: Arc<MemorySurface>,
    control: EditControl,
    registry: SchemaRegistry,
}

fn harness() -> Harness {
    let db = Arc::new(Database::in_memory().unwrap());
    db.initialize().unwrap();
    let surface = Arc::new(MemorySurface::new());
    let control = EditControl::new(db.clone(), surface.clone(), SchemaRegistry::journals());
    Harness {
        db,
        surface,
        control,
        registry: SchemaRegistry::journals(),
    }
}

fn seed(db: &Database) {
    db.conn()
        .execute_batch(
            "INSERT INTO master (masterid, bibstem, journal_name, pubtype, refereed, not_indexed)
                 VALUES (5, 'ApJ', 'The Astrophysical Journal', 'Journal', 'yes', 0);
             INSERT INTO master (masterid, bibstem, journal_name, pubtype, refereed, not_indexed)
                 VALUES (6, 'AJ', 'The Astronomical Journal', 'Journal', 'yes', 0);
             INSERT INTO names (nameid, masterid, name_english_translated)
                 VALUES (1, 5, 'Astrophysical Journal');
             INSERT INTO idents (identid, masterid, id_type, id_value)
                 VALUES (1, 5, 'ISSN', '0004-637X');
             INSERT INTO idents (identid, masterid, id_type, id_value)
                 VALUES (2, 6, 'ISSN', '0004-6256');",
        )
        .unwrap();
}

fn checkout(h: &Harness, table: &str) -> (i64, String) {
    match h.control.checkout(table).unwrap() {
        CheckoutOutcome::Created { session, .. } => (session.editid, session.surface_id),
        other => panic!("expected a new session, got {other:?}"),
    }
}

fn checkin(h: &Harness, table: &str, delete: bool) -> ReconcileReport {
    let lookup = h.control.master_lookup().unwrap();
    match h.control.checkin(table, &lookup, delete).unwrap() {
        CheckinOutcome::Reconciled(report) => report,
        CheckinOutcome::NotCheckedOut => panic!("{table} was not checked out"),
    }
}

fn set_cell(h: &Harness, surface_id: &str, index: usize, column: &str, value: &str) {
    h.surface
        .edit(surface_id, |rows| rows[index].insert(column, value))
        .unwrap();
}

fn append_row(h: &Harness, surface_id: &str, pairs: &[(&str, &str)]) {
    let row: SheetRow = pairs.iter().copied().collect();
    h.surface.edit(surface_id, |rows| rows.push(row)).unwrap();
}

// ---------------------------------------------------------------------------
// Checkout
// ---------------------------------------------------------------------------

#[test]
fn checkout_snapshots_every_record_of_every_table() {
    let h = harness();
    seed(&h.db);

    for table in h.registry.tables() {
        let schema = h.registry.get(table).unwrap();
        let expected = h.db.count_records(schema).unwrap() as usize;

        let outcome = h.control.checkout(table).unwrap();
        let CheckoutOutcome::Created { session, rows } = outcome else {
            panic!("expected a new session for {table}");
        };
        assert_eq!(session.status, EditStatus::Active);
        assert_eq!(rows, expected);
        assert_eq!(h.surface.fetch(&session.surface_id).unwrap().len(), expected);
        assert_eq!(
            h.surface.header(&session.surface_id).unwrap(),
            schema.header().iter().map(|c| c.to_string()).collect::<Vec<_>>()
        );
        assert_eq!(h.control.ledger().list(Some(table), 10).unwrap().len(), 1);
    }
}

#[test]
fn repeated_checkout_reuses_the_session() {
    let h = harness();
    seed(&h.db);
    let (editid, surface_id) = checkout(&h, "names");
    set_cell(&h, &surface_id, 0, "name_english_translated", "edited");

    let again = h.control.checkout("names").unwrap();
    let CheckoutOutcome::Reused { session } = again else {
        panic!("expected the existing session");
    };
    assert_eq!(session.editid, editid);
    assert_eq!(session.surface_id, surface_id);
    assert_eq!(h.surface.len(), 1);
    assert_eq!(h.control.ledger().list(Some("names"), 10).unwrap().len(), 1);

    // The snapshot was not rewritten over the curator's edit.
    let rows = h.surface.fetch(&surface_id).unwrap();
    assert_eq!(rows[0].get("name_english_translated"), Some("edited"));
}

// ---------------------------------------------------------------------------
// Checkin classification
// ---------------------------------------------------------------------------

#[test]
fn unchanged_rows_are_discarded_without_history() {
    let h = harness();
    seed(&h.db);
    let (editid, _) = checkout(&h, "idents");

    let report = checkin(&h, "idents", false);
    assert_eq!(report.counts.discard, 2);
    assert_eq!(report.counts.modify, 0);
    assert_eq!(report.status(), CheckinStatus::Completed);

    let idents = h.registry.get("idents").unwrap();
    assert!(h.db.list_history(idents, Some(editid), 10).unwrap().is_empty());
    assert_eq!(h.control.ledger().get(editid).unwrap().status, EditStatus::Completed);
}

#[test]
fn refereed_change_updates_record_and_writes_prior_values() {
    let h = harness();
    seed(&h.db);
    let (editid, surface_id) = checkout(&h, "master");

    let rows = h.surface.fetch(&surface_id).unwrap();
    let apj = rows.iter().position(|r| r.get("masterid") == Some("5")).unwrap();
    set_cell(&h, &surface_id, apj, "refereed", "no");

    let report = checkin(&h, "master", false);
    assert_eq!(report.counts.create, 0);
    assert_eq!(report.counts.modify, 1);
    assert_eq!(report.counts.discard, 1);
    assert_eq!(report.counts.failure, 0);
    assert_eq!(report.status(), CheckinStatus::Completed);

    let master = h.registry.get("master").unwrap();
    let record = h.db.get_record(master, 5).unwrap().unwrap();
    assert_eq!(record.get("refereed"), Some(&FieldValue::text("no")));

    let history = h.db.list_history(master, None, 10).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].editid, editid);
    assert_eq!(history[0].fields.get("masterid"), Some(&FieldValue::Integer(5)));
    assert_eq!(history[0].fields.get("bibstem"), Some(&FieldValue::text("ApJ")));
    assert_eq!(history[0].fields.get("refereed"), Some(&FieldValue::text("yes")));
}

#[test]
fn new_row_resolves_masterid_from_bibstem() {
    let h = harness();
    seed(&h.db);
    let (_, surface_id) = checkout(&h, "names");
    append_row(
        &h,
        &surface_id,
        &[
            ("nameid", ""),
            ("masterid", ""),
            ("bibstem", "AJ"),
            ("name_english_translated", "Astronomical Journal"),
            ("title_language", ""),
        ],
    );

    let report = checkin(&h, "names", false);
    assert_eq!(report.counts.create, 1);
    assert_eq!(report.counts.discard, 1);
    assert_eq!(report.status(), CheckinStatus::Completed);

    let created = report
        .outcomes
        .iter()
        .find(|o| o.action == RowAction::Create)
        .and_then(|o| o.identifier)
        .unwrap();
    let names = h.registry.get("names").unwrap();
    let record = h.db.get_record(names, created).unwrap().unwrap();
    assert_eq!(record.get("masterid"), Some(&FieldValue::Integer(6)));
    assert_eq!(record.get("title_language"), Some(&FieldValue::Null));
    assert_eq!(h.db.count_records(names).unwrap(), 2);
}

#[test]
fn duplicate_stored_identifier_touches_nothing() {
    // Identifiers are primary keys in storage, so a duplicate can only be
    // presented to classification directly.
    use journals_core::reconcile::{classify, ClassifyOptions, RowDecision};

    let registry = SchemaRegistry::journals();
    let publisher = registry.get("publisher").unwrap();
    let record = |name: &str| queries::StoredRecord {
        id: 3,
        fields: [
            ("publisherid".to_string(), FieldValue::Integer(3)),
            ("pubname".to_string(), FieldValue::text(name)),
        ]
        .into_iter()
        .collect(),
    };
    let stored = vec![record("AAS"), record("IOP")];
    let rows: Vec<SheetRow> = vec![[("publisherid", "3"), ("pubname", "EDP")].into_iter().collect()];

    let plan = classify(publisher, &stored, &rows, &HashMap::new(), ClassifyOptions::default());
    assert_eq!(
        plan.rows[0].decision,
        RowDecision::Failure {
            reason: RowFailure::DuplicateIdentifier { id: 3, count: 2 }
        }
    );
}

#[test]
fn failed_rows_do_not_undo_the_rest_of_the_batch() {
    let h = harness();
    seed(&h.db);
    let (editid, surface_id) = checkout(&h, "idents");

    // Row 0: a real change. Row 1: collides with row 0's unique (type, value).
    set_cell(&h, &surface_id, 0, "id_value", "0004-637Y");
    set_cell(&h, &surface_id, 1, "id_value", "0004-637Y");
    // A new row whose bibstem is unknown.
    append_row(&h, &surface_id, &[("bibstem", "NoSuchJ"), ("id_type", "ISSN")]);
    // A new row that is fine.
    append_row(
        &h,
        &surface_id,
        &[("bibstem", "AJ"), ("id_type", "CODEN"), ("id_value", "ANJOAA")],
    );

    let report = checkin(&h, "idents", false);
    assert_eq!(report.counts.modify, 1);
    assert_eq!(report.counts.create, 1);
    assert_eq!(report.counts.failure, 2);
    assert_eq!(report.status(), CheckinStatus::Failed);

    let failures: Vec<_> = report.failures().filter_map(|o| o.failure.clone()).collect();
    assert!(matches!(failures[0], RowFailure::Commit { .. }));
    assert_eq!(
        failures[1],
        RowFailure::UnresolvedBibstem {
            bibstem: "NoSuchJ".into()
        }
    );

    let idents = h.registry.get("idents").unwrap();
    let first = h.db.get_record(idents, 1).unwrap().unwrap();
    assert_eq!(first.get("id_value"), Some(&FieldValue::text("0004-637Y")));
    let second = h.db.get_record(idents, 2).unwrap().unwrap();
    assert_eq!(second.get("id_value"), Some(&FieldValue::text("0004-6256")));
    assert_eq!(h.db.count_records(idents).unwrap(), 3);

    // Only the applied modify left history behind.
    let history = h.db.list_history(idents, Some(editid), 10).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].fields.get("identid"), Some(&FieldValue::Integer(1)));

    assert_eq!(h.control.ledger().get(editid).unwrap().status, EditStatus::Failed);
}

// ---------------------------------------------------------------------------
// Session lifecycle
// ---------------------------------------------------------------------------

#[test]
fn checkin_without_checkout_changes_nothing() {
    let h = harness();
    seed(&h.db);
    let outcome = h.control.checkin("master", &HashMap::new(), false).unwrap();
    assert_eq!(outcome, CheckinOutcome::NotCheckedOut);
    assert!(h.control.ledger().list(None, 10).unwrap().is_empty());
}

#[test]
fn finished_session_frees_the_table_for_a_new_checkout() {
    let h = harness();
    seed(&h.db);
    let (first, _) = checkout(&h, "publisher");
    checkin(&h, "publisher", false);

    let (second, _) = checkout(&h, "publisher");
    assert_ne!(first, second);
    assert_eq!(h.surface.len(), 2);

    let session = h.control.set_status(second, EditStatus::Failed).unwrap();
    assert_eq!(session.status, EditStatus::Failed);
    assert!(h.control.set_status(second, EditStatus::Completed).is_err());
}

#[test]
fn delete_flag_removes_rows_missing_from_the_surface() {
    let h = harness();
    seed(&h.db);
    let (editid, surface_id) = checkout(&h, "idents");
    h.surface
        .edit(&surface_id, |rows| rows.retain(|r| r.get("identid") != Some("2")))
        .unwrap();

    let report = checkin(&h, "idents", true);
    assert_eq!(report.counts.delete, 1);
    assert_eq!(report.counts.discard, 1);
    assert_eq!(report.status(), CheckinStatus::Completed);

    let idents = h.registry.get("idents").unwrap();
    assert!(h.db.get_record(idents, 2).unwrap().is_none());
    let history = h.db.list_history(idents, Some(editid), 10).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].fields.get("id_value"), Some(&FieldValue::text("0004-6256")));
}

#[test]
fn delete_flag_spares_records_behind_unreadable_identifiers() {
    let h = harness();
    seed(&h.db);
    let (_, surface_id) = checkout(&h, "idents");
    h.surface
        .edit(&surface_id, |rows| {
            let row = rows.iter_mut().find(|r| r.get("identid") == Some("2")).unwrap();
            row.insert("identid", "2x");
        })
        .unwrap();

    let report = checkin(&h, "idents", true);
    assert_eq!(report.counts.delete, 0);
    assert_eq!(report.counts.discard, 1);
    assert_eq!(report.counts.failure, 1);
    assert!(matches!(
        report.failures().next().unwrap().failure,
        Some(RowFailure::InvalidIdentifier { .. })
    ));
    let idents = h.registry.get("idents").unwrap();
    assert_eq!(h.db.count_records(idents).unwrap(), 2);
}

#[test]
fn delete_flag_ignores_an_empty_submission() {
    let h = harness();
    seed(&h.db);
    let (editid, surface_id) = checkout(&h, "idents");
    h.surface.edit(&surface_id, |rows| rows.clear()).unwrap();

    let report = checkin(&h, "idents", true);
    assert_eq!(report.counts.delete, 0);
    assert!(report.outcomes.is_empty());
    let idents = h.registry.get("idents").unwrap();
    assert_eq!(h.db.count_records(idents).unwrap(), 2);
    assert!(h.db.list_history(idents, Some(editid), 10).unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[test]
fn concurrent_checkouts_share_one_session() {
    const WORKERS: usize = 8;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("journals.db");
    {
        let db = Database::new(&path).unwrap();
        db.initialize().unwrap();
        seed(&db);
    }
    let surface = Arc::new(MemorySurface::new());
    let barrier = Arc::new(Barrier::new(WORKERS));

    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let path = path.clone();
            let surface = surface.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let db = Arc::new(Database::new(&path).unwrap());
                let control = EditControl::new(db, surface, SchemaRegistry::journals());
                barrier.wait();
                control.checkout("names").unwrap()
            })
        })
        .collect();
    let outcomes: Vec<CheckoutOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let created: Vec<_> = outcomes
        .iter()
        .filter(|o| matches!(o, CheckoutOutcome::Created { .. }))
        .collect();
    assert_eq!(created.len(), 1);
    let winner = created[0].session().editid;
    assert!(outcomes.iter().all(|o| o.session().editid == winner));
    assert_eq!(surface.len(), 1);

    let db = Database::new(&path).unwrap();
    let sessions = db.list_sessions(Some("names"), 10).unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].status, EditStatus::Active);
}

#[test]
fn folder_surface_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(Database::in_memory().unwrap());
    db.initialize().unwrap();
    seed(&db);
    let surface = Arc::new(FolderSurface::new(dir.path()).unwrap());
    let control = EditControl::new(db.clone(), surface.clone(), SchemaRegistry::journals());

    let session = control.checkout("master").unwrap().session().clone();
    let path = surface.path_for(&session.surface_id).unwrap();
    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(contents.starts_with("masterid,bibstem,journal_name"));

    // A curator flips AJ's refereed flag in a spreadsheet program.
    let mut rows = surface.fetch(&session.surface_id).unwrap();
    let aj = rows.iter_mut().find(|r| r.get("bibstem") == Some("AJ")).unwrap();
    aj.insert("refereed", "no");
    let header = SchemaRegistry::journals().get("master").unwrap().header();
    surface.write(&session.surface_id, &header, &rows).unwrap();

    let lookup = control.master_lookup().unwrap();
    let CheckinOutcome::Reconciled(report) = control.checkin("master", &lookup, false).unwrap() else {
        panic!("expected a reconciled checkin");
    };
    assert_eq!(report.counts.modify, 1);
    assert_eq!(report.counts.discard, 1);
    assert_eq!(report.status(), CheckinStatus::Completed);
}
