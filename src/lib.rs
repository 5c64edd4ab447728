//! # rowsync
//!
//! Client-side reconciliation engine for the pharmacy front end: keeps an
//! editable table of rows consistent with a bulk snapshot, the user's
//! unsaved edits, and a live stream of pill-counter events.
//!
//! ## Core Concepts
//!
//! - **Records**: rows keyed by a stable id over a fixed column set
//! - **Edits**: full pending snapshots that win over live merges
//! - **Live channel**: a reconnecting event stream with explicit state
//! - **Merge modes**: overlay (decrement in place) or prepend (capped log)
//! - **Commits**: single-row save and bulk approve against the backend
//!
//! ## Example
//!
//! ```ignore
//! use rowsync::{websocket_transport, HttpInventoryService, Session, SessionConfig, SnapshotSource};
//!
//! let service = HttpInventoryService::new("http://localhost:8000")?;
//! let transport = websocket_transport("ws://localhost:8000/ws");
//! let mut session = Session::new(
//!     SessionConfig::inventory(),
//!     SnapshotSource::Inventory,
//!     transport,
//!     service,
//! )?;
//! session.mount(Instant::now())?;
//!
//! loop {
//!     session.pump(Instant::now());
//!     render(session.visible_rows(), session.connectivity().indicator());
//! }
//! ```

pub mod commit;
pub mod config;
pub mod error;
pub mod live;
pub mod merge;
pub mod records;
pub mod service;
pub mod session;
pub mod snapshot;
#[cfg(any(test, feature = "test-harness"))]
pub mod test_harness;
pub mod timers;
pub mod types;
pub mod view;

// Re-exports
pub use commit::{
    ApproveOutcome, CommitCoordinator, CommitReport, CommitTarget, PreviewRow, RowIssue,
};
pub use config::{ApprovalScope, OverlayKeys, SessionConfig};
pub use error::{
    ChannelError, CommitError, FetchError, MergeError, RecordError, Result, SyncError,
};
#[cfg(feature = "ws")]
pub use live::websocket_transport;
pub use live::{
    ChannelSignal, ChannelTransport, LiveChannel, Transport, TransportFeed, TransportMessage,
};
pub use merge::{MergeOutcome, ReconciliationMerger, Toast};
pub use records::{EditEntry, EditTracker, RecordStore, Upsert};
#[cfg(feature = "http")]
pub use service::HttpInventoryService;
pub use service::{InventoryService, SaveAllResponse, SaveRowResponse, SnapshotSource};
pub use session::Session;
pub use snapshot::{LoadReport, LoadTicket, SnapshotLoader};
pub use types::*;
pub use view::{MatchFilter, Notice, NoticeLevel, RowFilter};
