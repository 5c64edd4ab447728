//! Unsaved local edits.

use crate::error::RecordError;
use crate::types::{Field, Record, RowId};
use serde_json::Value;

/// The pending version of one row.
#[derive(Clone, Debug, PartialEq)]
pub struct EditEntry {
    /// Full post-edit snapshot.
    pub record: Record,

    /// Quantity pushed off the row by live events since the edit began.
    pub drift: i64,

    /// The stored row the edit started from (or was last rebased onto).
    pub baseline: Record,
}

/// Tracks which rows carry unsaved changes.
///
/// Entries keep the order in which rows were first edited; overwriting an
/// entry keeps its position.
#[derive(Debug, Default)]
pub struct EditTracker {
    entries: Vec<(RowId, EditEntry)>,
}

impl EditTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// True iff `id` has unsaved changes.
    pub fn record_edited(&self, id: RowId) -> bool {
        self.position(id).is_some()
    }

    pub fn get(&self, id: RowId) -> Option<&EditEntry> {
        self.position(id).map(|i| &self.entries[i].1)
    }

    /// Store or overwrite the edited snapshot for `record.id`.
    ///
    /// `base` is the stored row being edited; the snapshot must carry the
    /// same columns. Overwriting keeps the accumulated drift and the
    /// original baseline.
    pub fn set_edit(&mut self, record: Record, base: &Record) -> Result<(), RecordError> {
        if !record.same_shape(base) {
            return Err(RecordError::SchemaMismatch {
                id: record.id,
                expected: base.fields.len(),
                got: record.fields.len(),
            });
        }

        let id = record.id;
        match self.position(id) {
            Some(i) => self.entries[i].1.record = record,
            None => {
                let mut baseline = base.clone();
                baseline.is_new = false;
                self.entries.push((
                    id,
                    EditEntry {
                        record,
                        drift: 0,
                        baseline,
                    },
                ));
            }
        }
        Ok(())
    }

    pub fn clear_edit(&mut self, id: RowId) -> Option<EditEntry> {
        self.position(id).map(|i| self.entries.remove(i).1)
    }

    pub fn clear_all(&mut self) {
        self.entries.clear();
    }

    /// Pending snapshots in first-edit order.
    pub fn pending_edits(&self) -> impl Iterator<Item = (RowId, &Record)> {
        self.entries.iter().map(|(id, entry)| (*id, &entry.record))
    }

    pub fn pending_ids(&self) -> Vec<RowId> {
        self.entries.iter().map(|(id, _)| *id).collect()
    }

    pub fn has_pending(&self) -> bool {
        !self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Absorb a live decrement for an edited row without touching the edit.
    pub fn add_drift(&mut self, id: RowId, amount: i64) -> bool {
        match self.position(id) {
            Some(i) => {
                self.entries[i].1.drift = self.entries[i].1.drift.saturating_add(amount);
                true
            }
            None => false,
        }
    }

    pub fn drift(&self, id: RowId) -> i64 {
        self.get(id).map_or(0, |e| e.drift)
    }

    /// The edit read back into a fresh record, with the drift applied to
    /// `quantity` as `max(0, edited - drift)`.
    pub fn resolved(&self, id: RowId, quantity: &Field) -> Option<Record> {
        let entry = self.get(id)?;
        let mut record = entry.record.clone();
        if entry.drift != 0 {
            if let Some(current) = record.integer(quantity) {
                let shown = current.saturating_sub(entry.drift).max(0);
                record.set(quantity.clone(), Value::from(shown));
            }
        }
        Some(record)
    }

    /// Move the edit of `fresh.id` onto a newly loaded row.
    ///
    /// Columns the user changed keep the edited value; every other column
    /// takes the fresh one. If `quantity` was not changed by the user the
    /// drift is dropped, since the fresh row already reflects those
    /// decrements. Returns false if the row has no edit.
    pub fn rebase(&mut self, fresh: &Record, quantity: &Field) -> bool {
        let Some(i) = self.position(fresh.id) else {
            return false;
        };
        let entry = &mut self.entries[i].1;

        let mut record = fresh.clone();
        record.is_new = false;
        for (field, value) in &entry.record.fields {
            if entry.baseline.get(field) != Some(value) && record.fields.contains_key(field) {
                record.set(field.clone(), value.clone());
            }
        }

        if entry.record.get(quantity) == entry.baseline.get(quantity) {
            entry.drift = 0;
        }
        entry.record = record;
        entry.baseline = fresh.clone();
        entry.baseline.is_new = false;
        true
    }

    fn position(&self, id: RowId) -> Option<usize> {
        self.entries.iter().position(|(entry_id, _)| *entry_id == id)
    }
}
