//! Error types for the reconciliation engine.
//!
//! Each failure class is handled at the boundary where it occurs and turned
//! into either session state (banner, connectivity) or a one-shot notice.

use crate::types::{Field, RowId};
use thiserror::Error;

/// Errors from the in-memory record table.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RecordError {
    #[error("Record not found: {0}")]
    NotFound(RowId),

    #[error("Unknown column: {0}")]
    UnknownField(Field),

    #[error("Record {id} does not match the table shape (expected {expected} fields, got {got})")]
    SchemaMismatch {
        id: RowId,
        expected: usize,
        got: usize,
    },
}

/// Snapshot load failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FetchError {
    #[error("Request failed: {0}")]
    Transport(String),

    #[error("Server responded with status {0}")]
    Status(u16),

    #[error("Could not decode snapshot: {0}")]
    Decode(String),

    #[error("Snapshot load was superseded by a newer request")]
    Superseded,
}

/// Real-time channel failures. Folded into connectivity state.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ChannelError {
    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Connection closed: {0}")]
    Closed(String),

    #[error("Undecodable frame: {0}")]
    Decode(String),
}

/// Save and approve failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CommitError {
    #[error("Request failed: {0}")]
    Transport(String),

    #[error("Server responded with status {0}")]
    Status(u16),

    #[error("Server rejected the commit: {0}")]
    Rejected(String),

    #[error("Could not decode commit response: {0}")]
    Decode(String),

    #[error("Row {id} has no value for join key {key}")]
    MissingJoinKey { id: RowId, key: Field },

    #[error("Nothing to commit")]
    Empty,

    #[error("Record not found: {0}")]
    NotFound(RowId),
}

/// Live event merge outcomes that do not mutate the store.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MergeError {
    #[error("No row matches {key} = {value:?}")]
    MatchDropped { key: Field, value: String },

    #[error("Event carries no join key {0}")]
    MissingJoinKey(Field),

    #[error("Event carries no quantity {0}")]
    MissingQuantity(Field),

    #[error("Log event carries no id")]
    MissingEventId,

    #[error(transparent)]
    Record(#[from] RecordError),
}

/// Umbrella error for session-level operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Commit(#[from] CommitError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Session has been torn down")]
    TornDown,
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        FetchError::Decode(e.to_string())
    }
}

impl From<serde_json::Error> for CommitError {
    fn from(e: serde_json::Error) -> Self {
        CommitError::Decode(e.to_string())
    }
}

impl From<serde_json::Error> for ChannelError {
    fn from(e: serde_json::Error) -> Self {
        ChannelError::Decode(e.to_string())
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => FetchError::Status(status.as_u16()),
            None if e.is_decode() => FetchError::Decode(e.to_string()),
            None => FetchError::Transport(e.to_string()),
        }
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for CommitError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => CommitError::Status(status.as_u16()),
            None if e.is_decode() => CommitError::Decode(e.to_string()),
            None => CommitError::Transport(e.to_string()),
        }
    }
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, SyncError>;
