//! Session configuration.

use crate::error::SyncError;
use crate::types::{Field, MergeMode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which rows a bulk approve sends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalScope {
    /// Every row in the table.
    #[default]
    AllRecords,
    /// Only rows with unsaved edits.
    EditedOnly,
}

/// How overlay events find their rows.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayKeys {
    /// Join key column on the row.
    pub record_key: Field,
    /// Join key column on the event.
    pub event_key: Field,
    /// Quantity column on the row.
    pub quantity: Field,
    /// Counted amount on the event.
    pub event_count: Field,
}

impl Default for OverlayKeys {
    fn default() -> Self {
        Self {
            record_key: Field::Barcode,
            event_key: Field::DrugStandardCode,
            quantity: Field::Quantity,
            event_count: Field::CountQuantity,
        }
    }
}

/// Configuration for one screen session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How live events are merged.
    pub mode: MergeMode,

    /// Delay before a reconnect attempt after the channel closes.
    /// Default: 5000 ms
    pub reconnect_interval_ms: u64,

    /// How long a prepended log row stays highlighted.
    /// Default: 9000 ms
    pub highlight_ms: u64,

    /// Toast lifetime for overlay events.
    /// Default: 7000 ms
    pub overlay_toast_ms: u64,

    /// Toast lifetime for prepended log events.
    /// Default: 9000 ms
    pub prepend_toast_ms: u64,

    /// Maximum rows kept in prepend mode.
    /// Default: 50
    pub log_capacity: usize,

    /// Overlay join and quantity columns.
    pub overlay: OverlayKeys,

    /// Column that must be non-empty before a row may be committed.
    pub commit_key: Field,

    /// Which rows a bulk approve sends.
    pub approval_scope: ApprovalScope,

    /// Backend base URL for the HTTP service.
    pub base_url: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: MergeMode::Overlay,
            reconnect_interval_ms: 5_000,
            highlight_ms: 9_000,
            overlay_toast_ms: 7_000,
            prepend_toast_ms: 9_000,
            log_capacity: 50,
            overlay: OverlayKeys::default(),
            commit_key: Field::MatchStandardCode,
            approval_scope: ApprovalScope::AllRecords,
            base_url: "http://localhost:8000".to_string(),
        }
    }
}

impl SessionConfig {
    /// Live inventory: counter events decrement stock in place.
    pub fn inventory() -> Self {
        Self {
            mode: MergeMode::Overlay,
            commit_key: Field::Barcode,
            ..Default::default()
        }
    }

    /// Transaction log: counter events are prepended as new rows.
    pub fn transaction_log() -> Self {
        Self {
            mode: MergeMode::Prepend,
            commit_key: Field::DrugStandardCode,
            ..Default::default()
        }
    }

    /// Order-list upload: matched rows keyed by standard code.
    pub fn order_upload() -> Self {
        Self {
            mode: MergeMode::Overlay,
            overlay: OverlayKeys {
                record_key: Field::MatchStandardCode,
                quantity: Field::InputQuantity,
                ..Default::default()
            },
            commit_key: Field::MatchStandardCode,
            ..Default::default()
        }
    }

    /// Parse from JSON. Missing keys take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, SyncError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.reconnect_interval_ms == 0 {
            return Err(SyncError::Config("reconnect_interval_ms must be positive".into()));
        }
        if self.log_capacity == 0 {
            return Err(SyncError::Config("log_capacity must be positive".into()));
        }
        Ok(())
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn highlight_duration(&self) -> Duration {
        Duration::from_millis(self.highlight_ms)
    }

    /// Toast lifetime for the configured mode.
    pub fn toast_duration(&self) -> Duration {
        match self.mode {
            MergeMode::Overlay => Duration::from_millis(self.overlay_toast_ms),
            MergeMode::Prepend => Duration::from_millis(self.prepend_toast_ms),
        }
    }
}
