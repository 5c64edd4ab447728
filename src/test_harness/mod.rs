//! Deterministic stand-ins for the socket and the backend.
//!
//! Compiled for the crate's own tests and behind the `test-harness` feature
//! for hosts that want to drive a [`Session`](crate::session::Session)
//! without a network.

use crate::error::{ChannelError, CommitError, FetchError};
use crate::live::{Transport, TransportMessage};
use crate::service::{InventoryService, SaveAllResponse, SaveRowResponse, SnapshotSource};
use crate::types::Record;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

// --- Scripted transport ---

#[derive(Debug, Default)]
struct ScriptState {
    queue: VecDeque<TransportMessage>,
    connected: bool,
    refuse: usize,
    connects: usize,
    closes: usize,
}

/// A [`Transport`] whose traffic is pushed by the test through a
/// [`TransportScript`].
///
/// Each connect starts with an empty queue; while closed nothing is
/// delivered.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    state: Rc<RefCell<ScriptState>>,
}

/// Test-side handle of a [`ScriptedTransport`].
#[derive(Clone, Debug)]
pub struct TransportScript {
    state: Rc<RefCell<ScriptState>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self) -> TransportScript {
        TransportScript {
            state: Rc::clone(&self.state),
        }
    }
}

impl Transport for ScriptedTransport {
    fn connect(&mut self) -> Result<(), ChannelError> {
        let mut state = self.state.borrow_mut();
        state.connects += 1;
        state.queue.clear();
        if state.refuse > 0 {
            state.refuse -= 1;
            return Err(ChannelError::Handshake("connection refused".to_string()));
        }
        state.connected = true;
        Ok(())
    }

    fn poll_message(&mut self) -> Option<TransportMessage> {
        let mut state = self.state.borrow_mut();
        if !state.connected {
            return None;
        }
        state.queue.pop_front()
    }

    fn close(&mut self) {
        let mut state = self.state.borrow_mut();
        state.connected = false;
        state.closes += 1;
        state.queue.clear();
    }
}

impl TransportScript {
    /// Complete the handshake.
    pub fn open(&self) {
        self.push(TransportMessage::Opened);
    }

    /// Deliver a raw text frame.
    pub fn frame(&self, frame: impl Into<String>) {
        self.push(TransportMessage::Frame(frame.into()));
    }

    /// Deliver a JSON frame.
    pub fn event(&self, value: Value) {
        self.frame(value.to_string());
    }

    /// Drop the connection from the server side.
    pub fn close(&self, reason: impl Into<String>) {
        self.push(TransportMessage::Closed(ChannelError::Closed(reason.into())));
    }

    /// Fail the next `n` handshakes.
    pub fn refuse_connects(&self, n: usize) {
        self.state.borrow_mut().refuse = n;
    }

    /// True while no connection is up.
    pub fn is_closed(&self) -> bool {
        !self.state.borrow().connected
    }

    /// Connect attempts so far, refused ones included.
    pub fn connects(&self) -> usize {
        self.state.borrow().connects
    }

    /// Client-side closes so far.
    pub fn closes(&self) -> usize {
        self.state.borrow().closes
    }

    fn push(&self, message: TransportMessage) {
        self.state.borrow_mut().queue.push_back(message);
    }
}

// --- In-memory service ---

/// A call received by [`MemoryService`].
#[derive(Clone, Debug, PartialEq)]
pub enum ServiceCall {
    Fetch(&'static str),
    SaveRow(Record),
    SaveAll(Vec<Record>),
}

#[derive(Debug, Default)]
struct ServiceState {
    rows: Vec<Value>,
    fetch_failures: VecDeque<FetchError>,
    save_failures: VecDeque<CommitError>,
    rejections: VecDeque<String>,
    row_reply: Option<Value>,
    calls: Vec<ServiceCall>,
}

/// [`InventoryService`] backed by memory.
///
/// Fetches return the configured rows; saves echo what was sent. Failures
/// and rejections are queued and consumed one per call.
#[derive(Debug, Default)]
pub struct MemoryService {
    state: RefCell<ServiceState>,
}

impl MemoryService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: Vec<Value>) -> Self {
        let service = Self::new();
        service.set_rows(rows);
        service
    }

    /// Rows returned by later fetches.
    pub fn set_rows(&self, rows: Vec<Value>) {
        self.state.borrow_mut().rows = rows;
    }

    pub fn fail_next_fetch(&self, error: FetchError) {
        self.state.borrow_mut().fetch_failures.push_back(error);
    }

    /// Fail the next save or approve at the transport level.
    pub fn fail_next_save(&self, error: CommitError) {
        self.state.borrow_mut().save_failures.push_back(error);
    }

    /// Answer the next save or approve with `ok: false`.
    pub fn reject_next_save(&self, message: impl Into<String>) {
        self.state.borrow_mut().rejections.push_back(message.into());
    }

    /// Row returned by the next single-row save instead of the echo.
    pub fn respond_with_row(&self, row: Value) {
        self.state.borrow_mut().row_reply = Some(row);
    }

    pub fn calls(&self) -> Vec<ServiceCall> {
        self.state.borrow().calls.clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|c| matches!(c, ServiceCall::Fetch(_)))
            .count()
    }

    /// Rows sent through single-row saves, in order.
    pub fn saved_rows(&self) -> Vec<Record> {
        self.state
            .borrow()
            .calls
            .iter()
            .filter_map(|c| match c {
                ServiceCall::SaveRow(record) => Some(record.clone()),
                _ => None,
            })
            .collect()
    }

    /// Batches sent through approves, in order.
    pub fn approved_batches(&self) -> Vec<Vec<Record>> {
        self.state
            .borrow()
            .calls
            .iter()
            .filter_map(|c| match c {
                ServiceCall::SaveAll(records) => Some(records.clone()),
                _ => None,
            })
            .collect()
    }
}

impl InventoryService for MemoryService {
    fn fetch(&self, source: &SnapshotSource) -> Result<Vec<Value>, FetchError> {
        let mut state = self.state.borrow_mut();
        state.calls.push(ServiceCall::Fetch(source.label()));
        if let Some(error) = state.fetch_failures.pop_front() {
            return Err(error);
        }
        Ok(state.rows.clone())
    }

    fn save_row(&self, record: &Record) -> Result<SaveRowResponse, CommitError> {
        let mut state = self.state.borrow_mut();
        state.calls.push(ServiceCall::SaveRow(record.clone()));
        if let Some(error) = state.save_failures.pop_front() {
            return Err(error);
        }
        if let Some(message) = state.rejections.pop_front() {
            return Ok(SaveRowResponse {
                ok: false,
                record: None,
                message: Some(message),
            });
        }
        let reply = state.row_reply.take().unwrap_or_else(|| record.to_json());
        Ok(SaveRowResponse {
            ok: true,
            record: Some(reply),
            message: None,
        })
    }

    fn save_all(&self, records: &[Record]) -> Result<SaveAllResponse, CommitError> {
        let mut state = self.state.borrow_mut();
        state.calls.push(ServiceCall::SaveAll(records.to_vec()));
        if let Some(error) = state.save_failures.pop_front() {
            return Err(error);
        }
        if let Some(message) = state.rejections.pop_front() {
            return Ok(SaveAllResponse {
                ok: false,
                count: 0,
                message: Some(message),
            });
        }
        Ok(SaveAllResponse {
            ok: true,
            count: records.len(),
            message: None,
        })
    }
}
