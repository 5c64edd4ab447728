//! Backend contract consumed by the engine.
//!
//! The engine only ever talks to the backend through [`InventoryService`].
//! [`HttpInventoryService`] implements it over HTTP; tests use the in-memory
//! service from [`crate::test_harness`].

#[cfg(feature = "http")]
mod http;

#[cfg(feature = "http")]
pub use http::HttpInventoryService;

use crate::error::{CommitError, FetchError};
use crate::types::Record;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where a snapshot comes from.
#[derive(Clone, Debug, PartialEq)]
pub enum SnapshotSource {
    /// Current stock (`GET /api/inventory`).
    Inventory,
    /// Counting-log history, newest first (`GET /api/reports`).
    Reports,
    /// An uploaded order list matched against the drug database
    /// (`POST /match-json`).
    Match { file_name: String, bytes: Vec<u8> },
}

impl SnapshotSource {
    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            SnapshotSource::Inventory => "inventory",
            SnapshotSource::Reports => "reports",
            SnapshotSource::Match { .. } => "match",
        }
    }
}

/// Response to a single-row save.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SaveRowResponse {
    pub ok: bool,

    /// The row as normalized by the server, when it returns one.
    #[serde(default, alias = "row")]
    pub record: Option<Value>,

    #[serde(default)]
    pub message: Option<String>,
}

/// Response to a bulk approve.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SaveAllResponse {
    pub ok: bool,

    #[serde(default, alias = "updated")]
    pub count: usize,

    #[serde(default)]
    pub message: Option<String>,
}

/// Backend operations used by a session.
pub trait InventoryService {
    /// Fetch raw snapshot rows.
    fn fetch(&self, source: &SnapshotSource) -> Result<Vec<Value>, FetchError>;

    /// Persist one row.
    fn save_row(&self, record: &Record) -> Result<SaveRowResponse, CommitError>;

    /// Persist a batch of rows.
    fn save_all(&self, records: &[Record]) -> Result<SaveAllResponse, CommitError>;
}

impl<S: InventoryService + ?Sized> InventoryService for &S {
    fn fetch(&self, source: &SnapshotSource) -> Result<Vec<Value>, FetchError> {
        (**self).fetch(source)
    }

    fn save_row(&self, record: &Record) -> Result<SaveRowResponse, CommitError> {
        (**self).save_row(record)
    }

    fn save_all(&self, records: &[Record]) -> Result<SaveAllResponse, CommitError> {
        (**self).save_all(records)
    }
}
