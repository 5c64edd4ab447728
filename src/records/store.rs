//! The canonical in-memory row table.

use crate::error::RecordError;
use crate::types::{Field, Record, RowId};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Result of an upsert.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Upsert {
    /// An existing row was replaced in place.
    Replaced,
    /// A new row was inserted at the head.
    Inserted,
}

/// Ordered table of rows with unique ids.
///
/// The head of the table (index 0) is the most recently inserted row.
/// All rows share one column set, fixed by the first load or insert.
#[derive(Debug, Default)]
pub struct RecordStore {
    /// Rows in display order.
    rows: Vec<Record>,

    /// Column set shared by every row.
    schema: Option<Vec<Field>>,

    /// Rows as of the last full load (the committed baseline).
    origin: HashMap<RowId, Record>,
}

impl RecordStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// All rows in order.
    pub fn all(&self) -> &[Record] {
        &self.rows
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.rows.iter()
    }

    pub fn ids(&self) -> Vec<RowId> {
        self.rows.iter().map(|r| r.id).collect()
    }

    /// Shared column set, if any row has been stored yet.
    pub fn schema(&self) -> Option<&[Field]> {
        self.schema.as_deref()
    }

    pub fn get(&self, id: RowId) -> Option<&Record> {
        self.position(id).map(|i| &self.rows[i])
    }

    /// Like [`get`](Self::get) but reports a missing row as an error.
    pub fn require(&self, id: RowId) -> Result<&Record, RecordError> {
        self.get(id).ok_or(RecordError::NotFound(id))
    }

    pub fn contains(&self, id: RowId) -> bool {
        self.position(id).is_some()
    }

    /// Replace the row with the same id in place, or insert at the head.
    pub fn upsert(&mut self, record: Record) -> Result<Upsert, RecordError> {
        self.check_shape(&record)?;

        if self.schema.is_none() {
            self.schema = Some(record.columns());
        }

        match self.position(record.id) {
            Some(i) => {
                self.rows[i] = record;
                Ok(Upsert::Replaced)
            }
            None => {
                self.rows.insert(0, record);
                Ok(Upsert::Inserted)
            }
        }
    }

    /// Remove a row. The origin baseline is kept so a reload can still diff.
    pub fn remove(&mut self, id: RowId) -> Option<Record> {
        self.position(id).map(|i| self.rows.remove(i))
    }

    /// Trim to the `n` most recently inserted rows. Returns what was evicted.
    pub fn cap(&mut self, n: usize) -> Vec<Record> {
        if self.rows.len() <= n {
            return Vec::new();
        }
        self.rows.split_off(n)
    }

    /// Replace every row and make them the new baseline.
    ///
    /// Rows with differing column sets are widened to the union of all
    /// columns (missing values become `null`). Later duplicates of an id are
    /// dropped.
    pub fn replace_all(&mut self, records: Vec<Record>) {
        let mut columns: Vec<Field> = Vec::new();
        for record in &records {
            for field in record.fields.keys() {
                if !columns.contains(field) {
                    columns.push(field.clone());
                }
            }
        }
        columns.sort();

        let mut seen = HashSet::with_capacity(records.len());
        let mut rows = Vec::with_capacity(records.len());
        for mut record in records {
            if !seen.insert(record.id) {
                warn!(id = %record.id, "duplicate row id in snapshot; keeping the first");
                continue;
            }
            record.conform_to(&columns);
            rows.push(record);
        }

        self.origin = rows.iter().map(|r| (r.id, r.clone())).collect();
        self.schema = if rows.is_empty() { None } else { Some(columns) };
        self.rows = rows;
    }

    /// Baseline row for `id` from the last full load.
    pub fn origin(&self, id: RowId) -> Option<&Record> {
        self.origin.get(&id)
    }

    /// Ids of rows whose `field` equals `value`.
    ///
    /// String values are compared trimmed, so `" A"` and `"A"` join.
    pub fn find_by(&self, field: &Field, value: &Value) -> Vec<RowId> {
        self.rows
            .iter()
            .filter(|r| r.get(field).is_some_and(|v| join_eq(v, value)))
            .map(|r| r.id)
            .collect()
    }

    /// Set one column of one row.
    pub fn set_field(&mut self, id: RowId, field: &Field, value: Value) -> Result<(), RecordError> {
        let i = self.position(id).ok_or(RecordError::NotFound(id))?;
        match self.rows[i].fields.get_mut(field) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(RecordError::UnknownField(field.clone())),
        }
    }

    /// Flip the highlight flag. Returns false if the row is gone.
    pub fn set_new_flag(&mut self, id: RowId, is_new: bool) -> bool {
        match self.position(id) {
            Some(i) => {
                self.rows[i].is_new = is_new;
                true
            }
            None => false,
        }
    }

    /// Clear every highlight.
    pub fn clear_new_flags(&mut self) {
        for row in &mut self.rows {
            row.is_new = false;
        }
    }

    fn position(&self, id: RowId) -> Option<usize> {
        self.rows.iter().position(|r| r.id == id)
    }

    /// Check that `record` fits the shared column set without storing it.
    pub fn check_shape(&self, record: &Record) -> Result<(), RecordError> {
        match &self.schema {
            Some(columns) if !record.has_columns(columns) => Err(RecordError::SchemaMismatch {
                id: record.id,
                expected: columns.len(),
                got: record.fields.len(),
            }),
            _ => Ok(()),
        }
    }
}

fn join_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(a), Value::String(b)) => a.trim() == b.trim(),
        (Value::String(s), Value::Number(n)) | (Value::Number(n), Value::String(s)) => {
            s.trim() == n.to_string()
        }
        _ => a == b,
    }
}
