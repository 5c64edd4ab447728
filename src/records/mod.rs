//! Row table and pending edits.
//!
//! The store holds the rows as the server last described them (snapshot
//! plus live merges plus committed responses). The tracker holds the user's
//! unsaved versions, which always win for display until committed or
//! discarded.

mod edits;
mod store;

pub use edits::{EditEntry, EditTracker};
pub use store::{RecordStore, Upsert};
