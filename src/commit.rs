//! Persisting pending edits.

use crate::config::ApprovalScope;
use crate::error::CommitError;
use crate::records::{EditTracker, RecordStore};
use crate::service::InventoryService;
use crate::types::{value_is_blank, Field, Record, RowId};
use serde_json::Value;
use tracing::{debug, info, warn};

/// What a commit request covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitTarget {
    /// Save one row.
    Row(RowId),
    /// Bulk approve per the configured scope.
    All,
}

/// A row left out of a bulk approve.
#[derive(Clone, Debug, PartialEq)]
pub struct RowIssue {
    pub id: RowId,
    pub error: CommitError,
}

/// Result of a bulk approve that reached the server (or had nothing valid
/// to send).
#[derive(Clone, Debug, PartialEq)]
pub struct ApproveOutcome {
    /// Rows sent and accepted.
    pub committed: Vec<RowId>,
    /// Count the server reported.
    pub server_count: usize,
    /// Rows not sent.
    pub skipped: Vec<RowIssue>,
    /// True when every candidate row was committed.
    pub navigate_away: bool,
}

/// Result of [`CommitTarget`] handling on a session.
#[derive(Clone, Debug, PartialEq)]
pub enum CommitReport {
    Saved(RowId),
    Approved(ApproveOutcome),
}

/// One row of the pending-change preview.
#[derive(Clone, Debug, PartialEq)]
pub struct PreviewRow {
    /// The row as it would be sent.
    pub record: Record,
    /// Whether the row carries an unsaved edit.
    pub edited: bool,
    /// Columns differing from the loaded baseline.
    pub changed_fields: Vec<Field>,
}

/// Sends rows to the backend and reconciles the store with the reply.
#[derive(Clone, Debug)]
pub struct CommitCoordinator {
    commit_key: Field,
    quantity: Field,
}

impl CommitCoordinator {
    /// `commit_key` must be non-blank on every sent row; `quantity` is the
    /// column drift is applied to.
    pub fn new(commit_key: Field, quantity: Field) -> Self {
        Self {
            commit_key,
            quantity,
        }
    }

    pub fn commit_key(&self) -> &Field {
        &self.commit_key
    }

    /// The row as it would be sent: the resolved edit, or the stored row.
    pub fn payload(
        &self,
        id: RowId,
        store: &RecordStore,
        edits: &EditTracker,
    ) -> Result<Record, CommitError> {
        if let Some(record) = edits.resolved(id, &self.quantity) {
            return Ok(record);
        }
        store.get(id).cloned().ok_or(CommitError::NotFound(id))
    }

    /// Save a single row.
    ///
    /// On success the pending edit is cleared and the server's normalized
    /// row replaces the stored one (local id kept). On failure nothing
    /// changes.
    pub fn save_one<S: InventoryService + ?Sized>(
        &self,
        id: RowId,
        store: &mut RecordStore,
        edits: &mut EditTracker,
        service: &S,
    ) -> Result<RowId, CommitError> {
        let payload = self.payload(id, store, edits)?;
        self.check_key(&payload)?;

        let resp = service.save_row(&payload).map_err(|e| {
            warn!(%id, error = %e, "row save failed");
            e
        })?;
        if !resp.ok {
            let message = resp.message.unwrap_or_else(|| "save rejected".to_string());
            warn!(%id, %message, "row save rejected");
            return Err(CommitError::Rejected(message));
        }

        let normalized = match resp.record {
            Some(Value::Object(object)) => Record::from_object(object, id),
            _ => payload,
        };
        self.store_committed(normalized, id, store)?;
        edits.clear_edit(id);
        debug!(%id, "row saved");
        Ok(id)
    }

    /// Bulk approve.
    ///
    /// Rows without a commit key are not sent and are reported in
    /// [`ApproveOutcome::skipped`]. A failed request clears nothing.
    pub fn approve_all<S: InventoryService + ?Sized>(
        &self,
        scope: ApprovalScope,
        store: &mut RecordStore,
        edits: &mut EditTracker,
        service: &S,
    ) -> Result<ApproveOutcome, CommitError> {
        let candidates = self.candidates(scope, store, edits)?;
        if candidates.is_empty() {
            return Err(CommitError::Empty);
        }

        let (valid, skipped): (Vec<Record>, Vec<Record>) = candidates
            .into_iter()
            .partition(|record| self.check_key(record).is_ok());
        let skipped: Vec<RowIssue> = skipped
            .into_iter()
            .map(|record| RowIssue {
                id: record.id,
                error: CommitError::MissingJoinKey {
                    id: record.id,
                    key: self.commit_key.clone(),
                },
            })
            .collect();

        if valid.is_empty() {
            warn!(skipped = skipped.len(), "approve has no committable rows");
            return Ok(ApproveOutcome {
                committed: Vec::new(),
                server_count: 0,
                skipped,
                navigate_away: false,
            });
        }

        let resp = service.save_all(&valid).map_err(|e| {
            warn!(rows = valid.len(), error = %e, "approve failed");
            e
        })?;
        if !resp.ok {
            let message = resp.message.unwrap_or_else(|| "approve rejected".to_string());
            warn!(%message, "approve rejected");
            return Err(CommitError::Rejected(message));
        }

        let mut committed = Vec::with_capacity(valid.len());
        for record in valid {
            let id = record.id;
            if edits.clear_edit(id).is_some() {
                self.store_committed(record, id, store)?;
            }
            committed.push(id);
        }

        info!(
            committed = committed.len(),
            skipped = skipped.len(),
            server_count = resp.count,
            "rows approved"
        );
        Ok(ApproveOutcome {
            navigate_away: skipped.is_empty(),
            committed,
            server_count: resp.count,
            skipped,
        })
    }

    /// Rows a bulk approve would send, with their diff against the baseline.
    pub fn preview(
        &self,
        scope: ApprovalScope,
        store: &RecordStore,
        edits: &EditTracker,
    ) -> Vec<PreviewRow> {
        let Ok(candidates) = self.candidates(scope, store, edits) else {
            return Vec::new();
        };
        candidates
            .into_iter()
            .map(|record| {
                let changed_fields = match store.origin(record.id) {
                    Some(origin) => record.changed_fields(origin),
                    None => record.columns(),
                };
                PreviewRow {
                    edited: edits.record_edited(record.id),
                    changed_fields,
                    record,
                }
            })
            .collect()
    }

    fn candidates(
        &self,
        scope: ApprovalScope,
        store: &RecordStore,
        edits: &EditTracker,
    ) -> Result<Vec<Record>, CommitError> {
        match scope {
            ApprovalScope::AllRecords => store
                .iter()
                .map(|row| self.payload(row.id, store, edits))
                .collect(),
            ApprovalScope::EditedOnly => edits
                .pending_ids()
                .into_iter()
                .map(|id| self.payload(id, store, edits))
                .collect(),
        }
    }

    fn check_key(&self, record: &Record) -> Result<(), CommitError> {
        if value_is_blank(record.get(&self.commit_key)) {
            return Err(CommitError::MissingJoinKey {
                id: record.id,
                key: self.commit_key.clone(),
            });
        }
        Ok(())
    }

    fn store_committed(
        &self,
        mut record: Record,
        id: RowId,
        store: &mut RecordStore,
    ) -> Result<(), CommitError> {
        record.id = id;
        if let Some(columns) = store.schema() {
            let columns = columns.to_vec();
            record.conform_to(&columns);
        }
        record.is_new = store.get(id).is_some_and(|r| r.is_new);
        store
            .upsert(record)
            .map_err(|e| CommitError::Decode(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_harness::MemoryService;
    use serde_json::json;

    fn coordinator() -> CommitCoordinator {
        CommitCoordinator::new(Field::Barcode, Field::Quantity)
    }

    fn loaded() -> (RecordStore, EditTracker) {
        let mut store = RecordStore::new();
        store.replace_all(vec![
            Record::new(RowId(1))
                .with(Field::Barcode, "A")
                .with(Field::Quantity, 10)
                .with(Field::Manufacturer, "Acme"),
            Record::new(RowId(2))
                .with(Field::Barcode, "")
                .with(Field::Quantity, 4)
                .with(Field::Manufacturer, "Bayer"),
        ]);
        (store, EditTracker::new())
    }

    fn edit(store: &RecordStore, edits: &mut EditTracker, id: u64, manufacturer: &str) {
        let base = store.get(RowId(id)).unwrap().clone();
        edits
            .set_edit(base.clone().with(Field::Manufacturer, manufacturer), &base)
            .unwrap();
    }

    #[test]
    fn test_save_one_clears_edit_and_takes_server_row() {
        let (mut store, mut edits) = loaded();
        edit(&store, &mut edits, 1, "Pfizer");
        let service = MemoryService::new();
        service.respond_with_row(json!({
            "id": 999, "barcode": "A", "quantity": 10, "제조사": "PFIZER"
        }));

        let id = coordinator()
            .save_one(RowId(1), &mut store, &mut edits, &service)
            .unwrap();

        assert_eq!(id, RowId(1));
        assert!(!edits.record_edited(RowId(1)));
        let row = store.get(RowId(1)).unwrap();
        assert_eq!(row.text(&Field::Manufacturer), Some("PFIZER"));
        assert_eq!(store.ids(), vec![RowId(1), RowId(2)]);
    }

    #[test]
    fn test_save_one_sends_resolved_edit() {
        let (mut store, mut edits) = loaded();
        edit(&store, &mut edits, 1, "Pfizer");
        edits.add_drift(RowId(1), 3);
        let service = MemoryService::new();

        coordinator()
            .save_one(RowId(1), &mut store, &mut edits, &service)
            .unwrap();

        let sent = service.saved_rows();
        assert_eq!(sent[0].integer(&Field::Quantity), Some(7));
        assert_eq!(sent[0].text(&Field::Manufacturer), Some("Pfizer"));
    }

    #[test]
    fn test_save_one_failure_keeps_edit() {
        let (mut store, mut edits) = loaded();
        edit(&store, &mut edits, 1, "Pfizer");
        let service = MemoryService::new();
        service.fail_next_save(CommitError::Status(500));

        let err = coordinator()
            .save_one(RowId(1), &mut store, &mut edits, &service)
            .unwrap_err();

        assert_eq!(err, CommitError::Status(500));
        assert!(edits.record_edited(RowId(1)));
        assert_eq!(store.get(RowId(1)).unwrap().text(&Field::Manufacturer), Some("Acme"));
    }

    #[test]
    fn test_save_one_rejected_keeps_edit() {
        let (mut store, mut edits) = loaded();
        edit(&store, &mut edits, 1, "Pfizer");
        let service = MemoryService::new();
        service.reject_next_save("duplicate code");

        let err = coordinator()
            .save_one(RowId(1), &mut store, &mut edits, &service)
            .unwrap_err();
        assert_eq!(err, CommitError::Rejected("duplicate code".into()));
        assert!(edits.record_edited(RowId(1)));
    }

    #[test]
    fn test_save_one_requires_join_key() {
        let (mut store, mut edits) = loaded();
        let service = MemoryService::new();
        let err = coordinator()
            .save_one(RowId(2), &mut store, &mut edits, &service)
            .unwrap_err();
        assert!(matches!(err, CommitError::MissingJoinKey { .. }));
        assert!(service.saved_rows().is_empty());
    }

    #[test]
    fn test_approve_all_skips_invalid_rows() {
        let (mut store, mut edits) = loaded();
        edit(&store, &mut edits, 1, "Pfizer");
        edit(&store, &mut edits, 2, "Roche");
        let service = MemoryService::new();

        let outcome = coordinator()
            .approve_all(ApprovalScope::AllRecords, &mut store, &mut edits, &service)
            .unwrap();

        assert_eq!(outcome.committed, vec![RowId(1)]);
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].id, RowId(2));
        assert!(!outcome.navigate_away);
        assert!(!edits.record_edited(RowId(1)));
        assert!(edits.record_edited(RowId(2)));
        assert_eq!(store.get(RowId(1)).unwrap().text(&Field::Manufacturer), Some("Pfizer"));
    }

    #[test]
    fn test_approve_all_failure_clears_nothing() {
        let (mut store, mut edits) = loaded();
        edit(&store, &mut edits, 1, "Pfizer");
        let service = MemoryService::new();
        service.fail_next_save(CommitError::Transport("connection reset".into()));

        let err = coordinator()
            .approve_all(ApprovalScope::EditedOnly, &mut store, &mut edits, &service)
            .unwrap_err();
        assert!(matches!(err, CommitError::Transport(_)));
        assert!(edits.record_edited(RowId(1)));
    }

    #[test]
    fn test_approve_edited_only_with_nothing_pending() {
        let (mut store, mut edits) = loaded();
        let service = MemoryService::new();
        let err = coordinator()
            .approve_all(ApprovalScope::EditedOnly, &mut store, &mut edits, &service)
            .unwrap_err();
        assert_eq!(err, CommitError::Empty);
    }

    #[test]
    fn test_preview_lists_changed_fields() {
        let (store, mut edits) = loaded();
        edit(&store, &mut edits, 1, "Pfizer");

        let preview = coordinator().preview(ApprovalScope::AllRecords, &store, &edits);
        assert_eq!(preview.len(), 2);
        assert!(preview[0].edited);
        assert_eq!(preview[0].changed_fields, vec![Field::Manufacturer]);
        assert!(!preview[1].edited);
        assert!(preview[1].changed_fields.is_empty());
    }
}
