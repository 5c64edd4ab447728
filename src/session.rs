//! Per-screen session tying the components together.

use crate::commit::{CommitCoordinator, CommitReport, CommitTarget, PreviewRow};
use crate::config::SessionConfig;
use crate::error::{FetchError, Result, SyncError};
use crate::live::{ChannelSignal, LiveChannel, Transport};
use crate::merge::{MergeOutcome, ReconciliationMerger, Toast};
use crate::records::{EditTracker, RecordStore};
use crate::service::{InventoryService, SnapshotSource};
use crate::snapshot::{LoadReport, LoadTicket, SnapshotLoader};
use crate::timers::{TimerKind, TimerQueue};
use crate::types::{ConnectivityState, Field, MutationEvent, Record, RowId};
use crate::view::{Notice, RowFilter};
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, info, warn};

/// One mounted screen.
///
/// Owns its store, edit tracker, live channel and timers; nothing is shared
/// between sessions. All time-dependent calls take `now` so the host drives
/// the clock. After [`teardown`](Self::teardown) every call is a no-op (or
/// returns [`SyncError::TornDown`]).
pub struct Session<T: Transport, S: InventoryService> {
    /// Session configuration.
    config: SessionConfig,

    /// Where snapshots are loaded from.
    source: SnapshotSource,

    store: RecordStore,
    edits: EditTracker,
    loader: SnapshotLoader,
    channel: LiveChannel<T>,
    merger: ReconciliationMerger,
    commits: CommitCoordinator,
    service: S,

    /// Highlight and toast expiry.
    timers: TimerQueue,

    /// Toast currently shown, if any.
    toast: Option<Toast>,

    /// Commit results not yet shown.
    notices: Vec<Notice>,

    /// Last snapshot failure, shown as a dismissable banner.
    fetch_error: Option<FetchError>,

    torn_down: bool,
}

impl<T: Transport, S: InventoryService> Session<T, S> {
    /// Build a session. Nothing is loaded or connected until
    /// [`mount`](Self::mount).
    pub fn new(
        config: SessionConfig,
        source: SnapshotSource,
        transport: T,
        service: S,
    ) -> Result<Self> {
        config.validate()?;

        let channel = LiveChannel::new(transport, config.reconnect_interval());
        let merger = ReconciliationMerger::new(
            config.overlay.clone(),
            config.log_capacity,
            config.highlight_duration(),
            config.toast_duration(),
        );
        let commits =
            CommitCoordinator::new(config.commit_key.clone(), config.overlay.quantity.clone());
        let loader = SnapshotLoader::with_quantity(config.overlay.quantity.clone());

        Ok(Self {
            config,
            source,
            store: RecordStore::new(),
            edits: EditTracker::new(),
            loader,
            channel,
            merger,
            commits,
            service,
            timers: TimerQueue::new(),
            toast: None,
            notices: Vec::new(),
            fetch_error: None,
            torn_down: false,
        })
    }

    // --- Lifecycle ---

    /// Load the snapshot and open the live channel.
    ///
    /// A failed load is reported through [`fetch_error`](Self::fetch_error);
    /// the channel is started either way.
    pub fn mount(&mut self, now: Instant) -> Result<()> {
        self.ensure_live()?;
        info!(source = self.source.label(), mode = ?self.config.mode, "mounting session");
        if let Err(e) = self.resync() {
            debug!(error = %e, "initial load failed");
        }
        let signals = self.channel.start(now);
        self.handle_signals(signals, now);
        Ok(())
    }

    /// Drive the channel and timers: perform a due reconnect, handle every
    /// pending channel message in order, then fire due timers.
    pub fn pump(&mut self, now: Instant) {
        if self.torn_down {
            return;
        }
        let mut signals = self.channel.reconnect_due(now);
        signals.extend(self.channel.poll(now));
        self.handle_signals(signals, now);
        self.tick(now);
    }

    /// Fire due highlight and toast timers.
    pub fn tick(&mut self, now: Instant) {
        if self.torn_down {
            return;
        }
        for kind in self.timers.due(now) {
            match kind {
                TimerKind::ClearHighlight(id) => {
                    self.store.set_new_flag(id, false);
                }
                TimerKind::ClearToast(seq) => {
                    if self.toast.as_ref().is_some_and(|t| t.seq == seq) {
                        self.toast = None;
                    }
                }
            }
        }
    }

    /// Earliest instant at which [`pump`](Self::pump) has timed work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.torn_down {
            return None;
        }
        match (self.timers.next_deadline(), self.channel.reconnect_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Close the channel, cancel the reconnect, all timers and any in-flight
    /// load. Terminal.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.channel.teardown();
        self.loader.cancel();
        self.timers.clear();
        self.toast = None;
        info!(source = self.source.label(), "session torn down");
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    // --- Snapshots ---

    /// Reload the snapshot from the current source.
    pub fn resync(&mut self) -> Result<LoadReport> {
        let ticket = self.begin_snapshot()?;
        let result = self.service.fetch(&self.source);
        self.finish_snapshot(ticket, result)
    }

    /// Switch the snapshot source (e.g. a new uploaded order list) and load it.
    pub fn load_source(&mut self, source: SnapshotSource) -> Result<LoadReport> {
        self.ensure_live()?;
        self.source = source;
        self.resync()
    }

    /// Start a load whose result the host delivers later through
    /// [`finish_snapshot`](Self::finish_snapshot).
    pub fn begin_snapshot(&mut self) -> Result<LoadTicket> {
        self.ensure_live()?;
        Ok(self.loader.begin())
    }

    /// Apply a load result.
    ///
    /// Events and edits applied while the load was in flight are superseded
    /// by the snapshot, except pending edits which always survive.
    pub fn finish_snapshot(
        &mut self,
        ticket: LoadTicket,
        result: std::result::Result<Vec<Value>, FetchError>,
    ) -> Result<LoadReport> {
        self.ensure_live()?;
        let loaded = self
            .loader
            .finish(ticket, result, &mut self.store, &mut self.edits);
        match loaded {
            Ok(report) => {
                self.fetch_error = None;
                self.timers
                    .cancel_where(|k| matches!(k, TimerKind::ClearHighlight(_)));
                Ok(report)
            }
            Err(FetchError::Superseded) => Err(FetchError::Superseded.into()),
            Err(e) => {
                self.fetch_error = Some(e.clone());
                Err(e.into())
            }
        }
    }

    pub fn is_loading(&self) -> bool {
        self.loader.is_loading()
    }

    pub fn fetch_error(&self) -> Option<&FetchError> {
        self.fetch_error.as_ref()
    }

    pub fn dismiss_fetch_error(&mut self) {
        self.fetch_error = None;
    }

    // --- Live events ---

    /// Merge one event as if it had arrived on the channel.
    pub fn ingest(&mut self, event: &MutationEvent, now: Instant) -> Result<MergeOutcome> {
        self.ensure_live()?;
        let outcome = self.merger.apply(
            event,
            self.config.mode,
            &mut self.store,
            &mut self.edits,
            now,
        )?;

        if let Some((id, until)) = outcome.highlight {
            // Older highlights were cleared by the prepend.
            self.timers
                .cancel_where(|k| matches!(k, TimerKind::ClearHighlight(_)));
            self.timers.schedule(until, TimerKind::ClearHighlight(id));
        }

        self.timers
            .cancel_where(|k| matches!(k, TimerKind::ClearToast(_)));
        self.timers.schedule(
            outcome.toast.expires_at,
            TimerKind::ClearToast(outcome.toast.seq),
        );
        self.toast = Some(outcome.toast.clone());

        Ok(outcome)
    }

    pub fn is_connected(&self) -> bool {
        !self.torn_down && self.channel.is_open()
    }

    pub fn connectivity(&self) -> ConnectivityState {
        self.channel.state()
    }

    pub fn toast(&self) -> Option<&Toast> {
        self.toast.as_ref()
    }

    // --- Rows and edits ---

    /// Rows for display, pending edits taking precedence.
    pub fn visible_rows(&self) -> Vec<Record> {
        self.store
            .iter()
            .map(|row| match self.edits.resolved(row.id, &self.config.overlay.quantity) {
                Some(mut edited) => {
                    edited.is_new = row.is_new;
                    edited
                }
                None => row.clone(),
            })
            .collect()
    }

    /// [`visible_rows`](Self::visible_rows) narrowed by a filter.
    pub fn filtered_rows(&self, filter: &RowFilter) -> Vec<Record> {
        self.visible_rows()
            .into_iter()
            .filter(|row| filter.matches(row))
            .collect()
    }

    pub fn is_row_edited(&self, id: RowId) -> bool {
        self.edits.record_edited(id)
    }

    /// True if the pending edit of `id` changes `field` relative to the
    /// loaded baseline.
    pub fn is_field_edited(&self, id: RowId, field: &Field) -> bool {
        let Some(entry) = self.edits.get(id) else {
            return false;
        };
        let baseline = self.store.origin(id).or_else(|| self.store.get(id));
        baseline.map_or(true, |b| entry.record.get(field) != b.get(field))
    }

    pub fn pending_change_count(&self) -> usize {
        self.edits.len()
    }

    /// Record a local edit of a displayed row.
    ///
    /// `record` is the full row as the user sees it. Returns false when
    /// nothing changed.
    pub fn edit_row(&mut self, mut record: Record) -> Result<bool> {
        self.ensure_live()?;
        let quantity = &self.config.overlay.quantity;
        let base = self.store.require(record.id)?;

        let shown = match self.edits.resolved(record.id, quantity) {
            Some(resolved) => resolved,
            None => base.clone(),
        };
        if shown.fields == record.fields {
            return Ok(false);
        }

        // The user saw the drift-adjusted quantity; store it un-adjusted so
        // the drift is not applied twice.
        let drift = self.edits.drift(record.id);
        if drift != 0 {
            if let Some(q) = record.integer(quantity) {
                record.set(quantity.clone(), q.saturating_add(drift));
            }
        }
        record.is_new = false;

        let id = record.id;
        self.edits.set_edit(record, base)?;
        debug!(%id, pending = self.edits.len(), "row edited");
        Ok(true)
    }

    /// Drop the pending edit of `id`. Returns false if there was none.
    pub fn discard_edit(&mut self, id: RowId) -> bool {
        if self.torn_down {
            return false;
        }
        self.edits.clear_edit(id).is_some()
    }

    /// Remove a row from the table along with its pending edit.
    pub fn delete_row(&mut self, id: RowId) -> Option<Record> {
        if self.torn_down {
            return None;
        }
        self.edits.clear_edit(id);
        self.timers
            .cancel_where(|k| *k == TimerKind::ClearHighlight(id));
        self.store.remove(id)
    }

    // --- Commits ---

    /// Save one row or approve in bulk. The result is also queued as a
    /// notice.
    pub fn commit(&mut self, target: CommitTarget) -> Result<CommitReport> {
        self.ensure_live()?;
        let result = match target {
            CommitTarget::Row(id) => self
                .commits
                .save_one(id, &mut self.store, &mut self.edits, &self.service)
                .map(CommitReport::Saved),
            CommitTarget::All => self
                .commits
                .approve_all(
                    self.config.approval_scope,
                    &mut self.store,
                    &mut self.edits,
                    &self.service,
                )
                .map(CommitReport::Approved),
        };

        match &result {
            Ok(CommitReport::Saved(id)) => {
                self.notices.push(Notice::success(format!("Row {} saved", id)));
            }
            Ok(CommitReport::Approved(outcome)) => {
                if !outcome.committed.is_empty() {
                    self.notices.push(Notice::success(format!(
                        "{} rows approved",
                        outcome.committed.len()
                    )));
                }
                if !outcome.skipped.is_empty() {
                    let ids: Vec<String> =
                        outcome.skipped.iter().map(|issue| issue.id.to_string()).collect();
                    self.notices.push(Notice::error(format!(
                        "{} rows not approved (missing {}): {}",
                        outcome.skipped.len(),
                        self.commits.commit_key(),
                        ids.join(", ")
                    )));
                }
            }
            Err(e) => {
                warn!(?target, error = %e, "commit failed");
                self.notices.push(Notice::error(format!("Save failed: {}", e)));
            }
        }

        result.map_err(SyncError::from)
    }

    /// What a bulk approve would send.
    pub fn preview(&self) -> Vec<PreviewRow> {
        self.commits
            .preview(self.config.approval_scope, &self.store, &self.edits)
    }

    /// Take every queued notice.
    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    // --- Accessors ---

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn source(&self) -> &SnapshotSource {
        &self.source
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn edits(&self) -> &EditTracker {
        &self.edits
    }

    pub fn channel(&self) -> &LiveChannel<T> {
        &self.channel
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    fn ensure_live(&self) -> Result<()> {
        if self.torn_down {
            return Err(SyncError::TornDown);
        }
        Ok(())
    }

    fn handle_signals(&mut self, signals: Vec<ChannelSignal>, now: Instant) {
        for signal in signals {
            if self.torn_down {
                return;
            }
            match signal {
                ChannelSignal::Opened => {
                    if let Err(e) = self.resync() {
                        debug!(error = %e, "resync after reconnect failed");
                    }
                }
                ChannelSignal::Event(event) => {
                    if let Err(e) = self.ingest(&event, now) {
                        debug!(error = %e, "live event not applied");
                    }
                }
                ChannelSignal::Closed(reason) => {
                    debug!(error = %reason, "channel closed; reconnect scheduled");
                }
            }
        }
    }
}
