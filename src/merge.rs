//! Merging live events into the record store.
//!
//! Two policies share one engine:
//! - **Overlay**: a counter event decrements the quantity of every row whose
//!   join key matches. Rows with a pending edit keep their edit untouched;
//!   the decrement is recorded as drift and shows up in the displayed row.
//! - **Prepend**: a counter event becomes a new highlighted row at the head
//!   of a capped log. Redelivery of the same event id replaces the old row.
//!
//! A toast is produced only when the store actually changed.

use crate::config::OverlayKeys;
use crate::error::{MergeError, RecordError};
use crate::records::{EditTracker, RecordStore};
use crate::types::{
    device_timestamp_display, value_is_blank, Field, MergeMode, MutationEvent, Record, RowId,
};
use serde::Serialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Transient notification shown for a merged event.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Toast {
    /// Monotonic per merger; a clear timer only hides its own toast.
    pub seq: u64,
    pub mode: MergeMode,
    pub drug_name: Option<String>,
    pub code: Option<String>,
    pub quantity: Option<i64>,
    pub timestamp: Option<String>,
    /// Rows the event touched.
    pub rows: Vec<RowId>,
    #[serde(skip)]
    pub expires_at: Instant,
}

/// What one merged event did.
#[derive(Clone, Debug, PartialEq)]
pub struct MergeOutcome {
    /// Rows changed or inserted.
    pub touched: Vec<RowId>,
    /// Touched rows that had a pending edit (drift recorded instead).
    pub drifted: Vec<RowId>,
    /// Prepended row and when its highlight ends.
    pub highlight: Option<(RowId, Instant)>,
    /// Rows pushed out by the log cap.
    pub evicted: Vec<RowId>,
    pub toast: Toast,
}

struct Applied {
    touched: Vec<RowId>,
    drifted: Vec<RowId>,
    highlight: Option<(RowId, Instant)>,
    evicted: Vec<RowId>,
}

/// Applies mutation events to a store.
#[derive(Debug)]
pub struct ReconciliationMerger {
    keys: OverlayKeys,
    log_capacity: usize,
    highlight: Duration,
    toast_duration: Duration,
    next_toast: u64,
}

impl ReconciliationMerger {
    pub fn new(
        keys: OverlayKeys,
        log_capacity: usize,
        highlight: Duration,
        toast_duration: Duration,
    ) -> Self {
        Self {
            keys,
            log_capacity,
            highlight,
            toast_duration,
            next_toast: 1,
        }
    }

    pub fn keys(&self) -> &OverlayKeys {
        &self.keys
    }

    /// Merge one event.
    ///
    /// On error the store and tracker are unchanged and no toast is made.
    pub fn apply(
        &mut self,
        event: &MutationEvent,
        mode: MergeMode,
        store: &mut RecordStore,
        edits: &mut EditTracker,
        now: Instant,
    ) -> Result<MergeOutcome, MergeError> {
        let result = match mode {
            MergeMode::Overlay => self.overlay(event, store, edits),
            MergeMode::Prepend => self.prepend(event, store, edits, now),
        };

        match result {
            Ok(applied) => {
                let toast = self.toast(event, mode, &applied.touched, now);
                Ok(MergeOutcome {
                    touched: applied.touched,
                    drifted: applied.drifted,
                    highlight: applied.highlight,
                    evicted: applied.evicted,
                    toast,
                })
            }
            Err(e) => {
                match &e {
                    MergeError::MatchDropped { .. } => debug!(error = %e, "live event dropped"),
                    _ => warn!(error = %e, "live event rejected"),
                }
                Err(e)
            }
        }
    }

    fn overlay(
        &self,
        event: &MutationEvent,
        store: &mut RecordStore,
        edits: &mut EditTracker,
    ) -> Result<Applied, MergeError> {
        let key = event
            .get(&self.keys.event_key)
            .filter(|v| !value_is_blank(Some(*v)))
            .ok_or_else(|| MergeError::MissingJoinKey(self.keys.event_key.clone()))?;
        let count = event
            .integer(&self.keys.event_count)
            .ok_or_else(|| MergeError::MissingQuantity(self.keys.event_count.clone()))?;

        let ids = store.find_by(&self.keys.record_key, key);
        if ids.is_empty() {
            return Err(MergeError::MatchDropped {
                key: self.keys.record_key.clone(),
                value: display_value(key),
            });
        }

        // Validate every row first so a failure leaves nothing half-applied.
        let mut updates = Vec::with_capacity(ids.len());
        for &id in &ids {
            let row = store.require(id)?;
            if row.get(&self.keys.quantity).is_none() {
                return Err(RecordError::UnknownField(self.keys.quantity.clone()).into());
            }
            let current = row.integer(&self.keys.quantity).unwrap_or(0);
            updates.push((id, current.saturating_sub(count).max(0)));
        }

        let mut drifted = Vec::new();
        for (id, quantity) in updates {
            store.set_field(id, &self.keys.quantity, Value::from(quantity))?;
            if edits.add_drift(id, count) {
                drifted.push(id);
            }
        }

        Ok(Applied {
            touched: ids,
            drifted,
            highlight: None,
            evicted: Vec::new(),
        })
    }

    fn prepend(
        &self,
        event: &MutationEvent,
        store: &mut RecordStore,
        edits: &mut EditTracker,
        now: Instant,
    ) -> Result<Applied, MergeError> {
        let id = RowId(event.id.ok_or(MergeError::MissingEventId)?);

        let mut record = Record::new(id);
        record.fields = event.fields.clone();
        if let Some(raw) = &event.timestamp {
            record.set(Field::Timestamp, raw.clone());
            if let Some((date, time)) = device_timestamp_display(raw) {
                record.set(Field::Date, date);
                record.set(Field::Time, time);
            }
        }
        if let Some(columns) = store.schema() {
            let columns = columns.to_vec();
            record.conform_to(&columns);
        }
        record.is_new = true;
        store.check_shape(&record)?;

        if store.remove(id).is_some() {
            debug!(%id, "replacing redelivered log event");
        }
        store.clear_new_flags();
        store.upsert(record)?;

        let evicted: Vec<RowId> = store
            .cap(self.log_capacity)
            .into_iter()
            .map(|r| r.id)
            .collect();
        for &gone in &evicted {
            if edits.clear_edit(gone).is_some() {
                warn!(id = %gone, "pending edit dropped with evicted log row");
            }
        }

        Ok(Applied {
            touched: vec![id],
            drifted: Vec::new(),
            highlight: Some((id, now + self.highlight)),
            evicted,
        })
    }

    fn toast(
        &mut self,
        event: &MutationEvent,
        mode: MergeMode,
        touched: &[RowId],
        now: Instant,
    ) -> Toast {
        let seq = self.next_toast;
        self.next_toast += 1;
        Toast {
            seq,
            mode,
            drug_name: event.text(&Field::DrugName).map(str::to_string),
            code: event.get(&self.keys.event_key).map(display_value),
            quantity: event.integer(&self.keys.event_count),
            timestamp: event.timestamp.clone(),
            rows: touched.to_vec(),
            expires_at: now + self.toast_duration,
        }
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn merger() -> ReconciliationMerger {
        ReconciliationMerger::new(
            OverlayKeys::default(),
            50,
            Duration::from_secs(9),
            Duration::from_secs(7),
        )
    }

    fn inventory() -> RecordStore {
        let mut store = RecordStore::new();
        store.replace_all(vec![
            Record::new(RowId(1))
                .with(Field::Barcode, "A")
                .with(Field::Quantity, 10)
                .with(Field::Manufacturer, "Acme"),
            Record::new(RowId(2))
                .with(Field::Barcode, "B")
                .with(Field::Quantity, 2)
                .with(Field::Manufacturer, "Bayer"),
        ]);
        store
    }

    fn count_event(code: &str, count: i64) -> MutationEvent {
        serde_json::from_value(json!({
            "timestamp": "20250314_134502",
            "drug_name": "Aspirin",
            "drug_standard_code": code,
            "count_quantity": count,
        }))
        .unwrap()
    }

    fn log_event(id: u64) -> MutationEvent {
        serde_json::from_value(json!({
            "id": id,
            "timestamp": "20250314_134502",
            "drug_name": "Aspirin",
            "drug_standard_code": "880123",
            "count_quantity": 30,
        }))
        .unwrap()
    }

    #[test]
    fn test_overlay_decrements_quantity() {
        let mut store = inventory();
        let mut edits = EditTracker::new();
        let now = Instant::now();

        let outcome = merger()
            .apply(&count_event("A", 3), MergeMode::Overlay, &mut store, &mut edits, now)
            .unwrap();

        assert_eq!(outcome.touched, vec![RowId(1)]);
        assert!(outcome.drifted.is_empty());
        assert_eq!(store.get(RowId(1)).unwrap().integer(&Field::Quantity), Some(7));
        assert!(!edits.has_pending());
        assert_eq!(outcome.toast.quantity, Some(3));
        assert_eq!(outcome.toast.expires_at, now + Duration::from_secs(7));
    }

    #[test]
    fn test_overlay_floors_at_zero() {
        let mut store = inventory();
        let mut edits = EditTracker::new();
        merger()
            .apply(&count_event("B", 5), MergeMode::Overlay, &mut store, &mut edits, Instant::now())
            .unwrap();
        assert_eq!(store.get(RowId(2)).unwrap().integer(&Field::Quantity), Some(0));
    }

    #[test]
    fn test_overlay_records_drift_for_edited_row() {
        let mut store = inventory();
        let mut edits = EditTracker::new();
        let base = store.get(RowId(1)).unwrap().clone();
        edits
            .set_edit(base.clone().with(Field::Manufacturer, "Pfizer"), &base)
            .unwrap();

        let outcome = merger()
            .apply(&count_event("A", 3), MergeMode::Overlay, &mut store, &mut edits, Instant::now())
            .unwrap();

        assert_eq!(outcome.drifted, vec![RowId(1)]);
        let entry = edits.get(RowId(1)).unwrap();
        assert_eq!(entry.record.text(&Field::Manufacturer), Some("Pfizer"));
        assert_eq!(entry.record.integer(&Field::Quantity), Some(10));
        let shown = edits.resolved(RowId(1), &Field::Quantity).unwrap();
        assert_eq!(shown.integer(&Field::Quantity), Some(7));
    }

    #[test]
    fn test_overlay_without_match_is_dropped() {
        let mut store = inventory();
        let mut edits = EditTracker::new();
        let mut merger = merger();

        let err = merger
            .apply(&count_event("Z", 3), MergeMode::Overlay, &mut store, &mut edits, Instant::now())
            .unwrap_err();
        assert!(matches!(err, MergeError::MatchDropped { .. }));

        // The next successful toast still gets the first sequence number.
        let outcome = merger
            .apply(&count_event("A", 1), MergeMode::Overlay, &mut store, &mut edits, Instant::now())
            .unwrap();
        assert_eq!(outcome.toast.seq, 1);
    }

    #[test]
    fn test_overlay_needs_key_and_count() {
        let mut store = inventory();
        let mut edits = EditTracker::new();
        let mut merger = merger();
        let now = Instant::now();

        let no_key: MutationEvent = serde_json::from_value(json!({"count_quantity": 1})).unwrap();
        assert!(matches!(
            merger.apply(&no_key, MergeMode::Overlay, &mut store, &mut edits, now),
            Err(MergeError::MissingJoinKey(_))
        ));

        let no_count: MutationEvent =
            serde_json::from_value(json!({"drug_standard_code": "A"})).unwrap();
        assert!(matches!(
            merger.apply(&no_count, MergeMode::Overlay, &mut store, &mut edits, now),
            Err(MergeError::MissingQuantity(_))
        ));
    }

    #[test]
    fn test_prepend_inserts_highlighted_at_head() {
        let mut store = RecordStore::new();
        let mut edits = EditTracker::new();
        let mut merger = merger();
        let now = Instant::now();

        merger.apply(&log_event(1), MergeMode::Prepend, &mut store, &mut edits, now).unwrap();
        let outcome = merger
            .apply(&log_event(2), MergeMode::Prepend, &mut store, &mut edits, now)
            .unwrap();

        assert_eq!(store.ids(), vec![RowId(2), RowId(1)]);
        assert!(store.get(RowId(2)).unwrap().is_new);
        assert!(!store.get(RowId(1)).unwrap().is_new);
        assert_eq!(outcome.highlight, Some((RowId(2), now + Duration::from_secs(9))));

        let row = store.get(RowId(2)).unwrap();
        assert_eq!(row.text(&Field::Date), Some("2025-03-14"));
        assert_eq!(row.text(&Field::Time), Some("01:45 PM"));
    }

    #[test]
    fn test_prepend_replaces_redelivered_event() {
        let mut store = RecordStore::new();
        let mut edits = EditTracker::new();
        let mut merger = merger();
        let now = Instant::now();

        merger.apply(&log_event(1), MergeMode::Prepend, &mut store, &mut edits, now).unwrap();
        merger.apply(&log_event(2), MergeMode::Prepend, &mut store, &mut edits, now).unwrap();
        merger.apply(&log_event(1), MergeMode::Prepend, &mut store, &mut edits, now).unwrap();

        assert_eq!(store.ids(), vec![RowId(1), RowId(2)]);
    }

    #[test]
    fn test_prepend_conforms_to_loaded_schema() {
        let mut store = RecordStore::new();
        store.replace_all(vec![Record::new(RowId(10))
            .with(Field::Timestamp, "20250313_080000")
            .with(Field::Date, "2025-03-13")
            .with(Field::Time, "08:00 AM")
            .with(Field::DrugName, "Old")
            .with(Field::DrugStandardCode, "1")
            .with(Field::DrugReferCode, "r")
            .with(Field::CountQuantity, 1)]);
        let mut edits = EditTracker::new();

        merger()
            .apply(&log_event(11), MergeMode::Prepend, &mut store, &mut edits, Instant::now())
            .unwrap();

        let row = store.get(RowId(11)).unwrap();
        assert_eq!(row.get(&Field::DrugReferCode), Some(&Value::Null));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_prepend_caps_log() {
        let mut store = RecordStore::new();
        let mut edits = EditTracker::new();
        let mut merger = ReconciliationMerger::new(
            OverlayKeys::default(),
            3,
            Duration::from_secs(9),
            Duration::from_secs(9),
        );
        let now = Instant::now();

        let mut last = None;
        for id in 1..=5 {
            last = Some(
                merger
                    .apply(&log_event(id), MergeMode::Prepend, &mut store, &mut edits, now)
                    .unwrap(),
            );
        }
        assert_eq!(store.ids(), vec![RowId(5), RowId(4), RowId(3)]);
        assert_eq!(last.unwrap().evicted, vec![RowId(2)]);
    }

    #[test]
    fn test_rejected_prepend_keeps_log_intact() {
        let mut store = RecordStore::new();
        let mut edits = EditTracker::new();
        let mut merger = merger();
        let now = Instant::now();
        merger.apply(&log_event(1), MergeMode::Prepend, &mut store, &mut edits, now).unwrap();

        let no_id: MutationEvent =
            serde_json::from_value(json!({"drug_standard_code": "880123"})).unwrap();
        assert!(merger
            .apply(&no_id, MergeMode::Prepend, &mut store, &mut edits, now)
            .is_err());

        assert_eq!(store.ids(), vec![RowId(1)]);
        assert!(store.get(RowId(1)).unwrap().is_new);
    }

    #[test]
    fn test_prepend_needs_event_id() {
        let mut store = RecordStore::new();
        let mut edits = EditTracker::new();
        let err = merger()
            .apply(&count_event("A", 1), MergeMode::Prepend, &mut store, &mut edits, Instant::now())
            .unwrap_err();
        assert_eq!(err, MergeError::MissingEventId);
        assert!(store.is_empty());
    }
}
