//! Property tests for merge and commit invariants.

use proptest::prelude::*;
use rowsync::test_harness::{MemoryService, ScriptedTransport, TransportScript};
use rowsync::{
    CommitError, CommitTarget, EditTracker, Field, MergeMode, MutationEvent, OverlayKeys,
    ReconciliationMerger, Record, RecordStore, RowId, Session, SessionConfig, SnapshotSource,
};
use serde_json::json;
use std::time::{Duration, Instant};

fn merger(capacity: usize) -> ReconciliationMerger {
    ReconciliationMerger::new(
        OverlayKeys::default(),
        capacity,
        Duration::from_secs(9),
        Duration::from_secs(9),
    )
}

fn log_event(id: u64) -> MutationEvent {
    serde_json::from_value(json!({
        "id": id,
        "timestamp": "20250314_101500",
        "drug_name": "Aspirin",
        "drug_standard_code": "880123",
        "count_quantity": 30,
    }))
    .unwrap_or_else(|e| panic!("bad event: {e}"))
}

fn count_event(code: &str, count: i64) -> MutationEvent {
    serde_json::from_value(json!({"drug_standard_code": code, "count_quantity": count}))
        .unwrap_or_else(|e| panic!("bad event: {e}"))
}

fn inventory_store(quantity: i64) -> RecordStore {
    let mut store = RecordStore::new();
    store.replace_all(vec![Record::new(RowId(1))
        .with(Field::Barcode, "A")
        .with(Field::Quantity, quantity)
        .with(Field::Manufacturer, "Acme")]);
    store
}

fn inventory_session(
    rows: Vec<serde_json::Value>,
) -> (Session<ScriptedTransport, MemoryService>, TransportScript) {
    let transport = ScriptedTransport::new();
    let script = transport.script();
    let session = Session::new(
        SessionConfig::inventory(),
        SnapshotSource::Inventory,
        transport,
        MemoryService::with_rows(rows),
    )
    .unwrap_or_else(|e| panic!("session: {e}"));
    (session, script)
}

// --- Prepend ---

proptest! {
    #[test]
    fn prop_cap_keeps_most_recent(ids in proptest::collection::vec(1u64..500, 1..200)) {
        let mut store = RecordStore::new();
        let mut edits = EditTracker::new();
        let mut merger = merger(50);
        let now = Instant::now();

        for &id in &ids {
            merger
                .apply(&log_event(id), MergeMode::Prepend, &mut store, &mut edits, now)
                .unwrap_or_else(|e| panic!("merge failed: {e}"));
        }

        // Most recent delivery of each id, newest first.
        let mut expected: Vec<RowId> = Vec::new();
        for &id in ids.iter().rev() {
            if !expected.contains(&RowId(id)) {
                expected.push(RowId(id));
            }
        }
        expected.truncate(50);

        prop_assert!(store.len() <= 50);
        prop_assert_eq!(store.ids(), expected);
    }

    #[test]
    fn prop_prepend_is_idempotent_by_id(id in 1u64..1000, repeats in 1usize..10) {
        let mut store = RecordStore::new();
        let mut edits = EditTracker::new();
        let mut merger = merger(50);
        let now = Instant::now();

        for _ in 0..repeats {
            merger
                .apply(&log_event(id), MergeMode::Prepend, &mut store, &mut edits, now)
                .unwrap_or_else(|e| panic!("merge failed: {e}"));
        }

        prop_assert_eq!(store.ids(), vec![RowId(id)]);
        let highlighted = store.iter().filter(|r| r.is_new).count();
        prop_assert_eq!(highlighted, 1);
    }
}

// --- Overlay ---

proptest! {
    #[test]
    fn prop_overlay_never_touches_edit(
        start in 0i64..500,
        counts in proptest::collection::vec(0i64..100, 0..20),
    ) {
        let mut store = inventory_store(start);
        let mut edits = EditTracker::new();
        let base = store.get(RowId(1)).cloned().unwrap_or_else(|| panic!("row missing"));
        let edited = base.clone().with(Field::Manufacturer, "Pfizer");
        edits.set_edit(edited.clone(), &base).unwrap_or_else(|e| panic!("{e}"));

        let mut merger = merger(50);
        let now = Instant::now();
        for &count in &counts {
            merger
                .apply(&count_event("A", count), MergeMode::Overlay, &mut store, &mut edits, now)
                .unwrap_or_else(|e| panic!("merge failed: {e}"));
        }

        let total: i64 = counts.iter().sum();
        let entry = edits.get(RowId(1)).unwrap_or_else(|| panic!("edit missing"));
        prop_assert_eq!(&entry.record, &edited);
        prop_assert_eq!(entry.drift, total);

        let stored = store.get(RowId(1)).and_then(|r| r.integer(&Field::Quantity));
        prop_assert!(stored.is_some_and(|q| q >= 0));

        let shown = edits
            .resolved(RowId(1), &Field::Quantity)
            .and_then(|r| r.integer(&Field::Quantity));
        prop_assert_eq!(shown, Some((start - total).max(0)));
    }
}

// --- Scenarios ---

#[test]
fn test_overlay_on_untouched_row() {
    let (mut session, _script) =
        inventory_session(vec![json!({"id": 1, "barcode": "A", "quantity": 10})]);
    let now = Instant::now();
    session.mount(now).unwrap_or_else(|e| panic!("{e}"));

    session
        .ingest(&count_event("A", 3), now)
        .unwrap_or_else(|e| panic!("{e}"));

    assert_eq!(session.visible_rows()[0].integer(&Field::Quantity), Some(7));
    assert_eq!(session.pending_change_count(), 0);
}

#[test]
fn test_edited_field_survives_overlay() {
    let (mut session, _script) = inventory_session(vec![
        json!({"id": 1, "barcode": "A", "quantity": 10, "제조사": "Acme"}),
    ]);
    let now = Instant::now();
    session.mount(now).unwrap_or_else(|e| panic!("{e}"));

    let row = session.visible_rows()[0].clone();
    session
        .edit_row(row.with(Field::Manufacturer, "Pfizer"))
        .unwrap_or_else(|e| panic!("{e}"));
    session
        .ingest(&count_event("A", 3), now)
        .unwrap_or_else(|e| panic!("{e}"));

    let shown = &session.visible_rows()[0];
    assert_eq!(shown.text(&Field::Manufacturer), Some("Pfizer"));
    assert_eq!(shown.integer(&Field::Quantity), Some(7));
    assert!(session.is_row_edited(RowId(1)));
}

#[test]
fn test_highlight_expiry_only_flips_flag() {
    let transport = ScriptedTransport::new();
    let mut session = Session::new(
        SessionConfig::transaction_log(),
        SnapshotSource::Reports,
        transport,
        MemoryService::new(),
    )
    .unwrap_or_else(|e| panic!("{e}"));
    let t0 = Instant::now();
    session.mount(t0).unwrap_or_else(|e| panic!("{e}"));

    session.ingest(&log_event(5), t0).unwrap_or_else(|e| panic!("{e}"));
    let before = session.visible_rows()[0].clone();
    assert!(before.is_new);

    session.tick(t0 + Duration::from_secs(9));
    let after = session.visible_rows()[0].clone();
    assert!(!after.is_new);
    assert_eq!(before.fields, after.fields);
    assert_eq!(before.id, after.id);
}

#[test]
fn test_commit_clears_only_on_success() {
    let (mut session, _script) = inventory_session(vec![
        json!({"id": 1, "barcode": "A", "quantity": 10, "제조사": "Acme"}),
    ]);
    session.mount(Instant::now()).unwrap_or_else(|e| panic!("{e}"));
    let row = session.visible_rows()[0].clone();
    session
        .edit_row(row.with(Field::Manufacturer, "Pfizer"))
        .unwrap_or_else(|e| panic!("{e}"));

    session.service().fail_next_save(CommitError::Status(502));
    assert!(session.commit(CommitTarget::Row(RowId(1))).is_err());
    assert_eq!(session.pending_change_count(), 1);

    assert!(session.commit(CommitTarget::Row(RowId(1))).is_ok());
    assert_eq!(session.pending_change_count(), 0);
}

#[test]
fn test_reconnect_cycle_triggers_fresh_load() {
    let (mut session, script) = inventory_session(vec![
        json!({"id": 1, "barcode": "A", "quantity": 10, "제조사": "Acme"}),
    ]);
    let t0 = Instant::now();
    session.mount(t0).unwrap_or_else(|e| panic!("{e}"));
    script.open();
    session.pump(t0);
    let loads = session.service().fetch_count();

    let row = session.visible_rows()[0].clone();
    session
        .edit_row(row.with(Field::Manufacturer, "Pfizer"))
        .unwrap_or_else(|e| panic!("{e}"));

    script.close("blip");
    session.pump(t0);
    session.pump(t0 + Duration::from_secs(5));
    script.open();
    session.pump(t0 + Duration::from_secs(5));

    assert_eq!(session.service().fetch_count(), loads + 1);
    assert!(session.is_row_edited(RowId(1)));
}
