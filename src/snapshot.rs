//! One-shot bulk loads that seed the record store.

use crate::error::FetchError;
use crate::records::{EditTracker, RecordStore};
use crate::service::{InventoryService, SnapshotSource};
use crate::types::{device_timestamp_display, Field, Record, RowId};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Identifies one load request. Only the newest ticket may finish.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadTicket(u64);

/// What a successful load did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadReport {
    /// Rows in the store after the load.
    pub rows: usize,
    /// Rows whose pending edit survived the reload.
    pub kept_edits: usize,
    /// Edited rows the new snapshot no longer contains (kept from before).
    pub orphaned_edits: usize,
}

/// Performs bulk loads into a [`RecordStore`].
#[derive(Debug)]
pub struct SnapshotLoader {
    generation: u64,
    in_flight: Option<u64>,

    /// Column live decrements apply to; pending edits are rebased on it.
    quantity: Field,
}

impl Default for SnapshotLoader {
    fn default() -> Self {
        Self::with_quantity(Field::Quantity)
    }
}

impl SnapshotLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quantity(quantity: Field) -> Self {
        Self {
            generation: 0,
            in_flight: None,
            quantity,
        }
    }

    /// Start a load. Any earlier unfinished ticket becomes stale.
    pub fn begin(&mut self) -> LoadTicket {
        self.generation += 1;
        self.in_flight = Some(self.generation);
        LoadTicket(self.generation)
    }

    /// True while a load has begun and not yet finished.
    pub fn is_loading(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Forget any in-flight load; its ticket can no longer finish.
    pub fn cancel(&mut self) {
        self.in_flight = None;
    }

    /// Turn raw rows into records.
    ///
    /// Rows without a usable `id` get ordinals `1..n` in arrival order.
    /// Rows carrying a device `timestamp` also get display `date`/`time`
    /// columns.
    pub fn decode(rows: Vec<Value>) -> Result<Vec<Record>, FetchError> {
        rows.into_iter()
            .enumerate()
            .map(|(i, row)| match row {
                Value::Object(object) => {
                    let mut record = Record::from_object(object, RowId(i as u64 + 1));
                    derive_display_time(&mut record);
                    Ok(record)
                }
                other => Err(FetchError::Decode(format!(
                    "row {} is not an object: {}",
                    i + 1,
                    other
                ))),
            })
            .collect()
    }

    /// Apply the result of a load begun with `ticket`.
    ///
    /// On success the store is replaced and becomes the new baseline, except
    /// that rows with a pending edit are never dropped: if the new snapshot
    /// lacks such a row, the previously stored row is kept at the tail.
    /// Edits of rows the snapshot does contain are rebased onto the fresh
    /// row, so decrements missed while disconnected show through. On
    /// failure nothing is touched.
    pub fn finish(
        &mut self,
        ticket: LoadTicket,
        result: Result<Vec<Value>, FetchError>,
        store: &mut RecordStore,
        edits: &mut EditTracker,
    ) -> Result<LoadReport, FetchError> {
        if self.in_flight != Some(ticket.0) {
            debug!(ticket = ticket.0, "discarding stale snapshot result");
            return Err(FetchError::Superseded);
        }
        self.in_flight = None;

        let rows = match result {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "snapshot load failed");
                return Err(e);
            }
        };
        let mut records = Self::decode(rows)?;

        let mut kept = Vec::new();
        let mut orphaned_edits = 0;
        for id in edits.pending_ids() {
            if records.iter().any(|r| r.id == id) {
                kept.push(id);
            } else if let Some(previous) = store.get(id) {
                orphaned_edits += 1;
                let mut previous = previous.clone();
                previous.is_new = false;
                records.push(previous);
            }
        }

        store.replace_all(records);

        let mut kept_edits = 0;
        for id in kept {
            if let Some(fresh) = store.get(id) {
                if edits.rebase(fresh, &self.quantity) {
                    kept_edits += 1;
                }
            }
        }
        info!(rows = store.len(), kept_edits, orphaned_edits, "snapshot loaded");

        Ok(LoadReport {
            rows: store.len(),
            kept_edits,
            orphaned_edits,
        })
    }

    /// Begin, fetch and finish in one call.
    pub fn load<S: InventoryService + ?Sized>(
        &mut self,
        source: &SnapshotSource,
        service: &S,
        store: &mut RecordStore,
        edits: &mut EditTracker,
    ) -> Result<LoadReport, FetchError> {
        let ticket = self.begin();
        let result = service.fetch(source);
        self.finish(ticket, result, store, edits)
    }
}

fn derive_display_time(record: &mut Record) {
    let Some(raw) = record.text(&Field::Timestamp) else {
        return;
    };
    if let Some((date, time)) = device_timestamp_display(raw) {
        record.set(Field::Date, date);
        record.set(Field::Time, time);
    }
}
