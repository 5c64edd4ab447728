//! Display-side helpers: row filters and user notices.

use crate::types::{Field, Record};
use serde::{Deserialize, Serialize};

/// Match-status filter on the upload screen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchFilter {
    #[default]
    All,
    /// Rows marked `O`.
    Matched,
    /// Rows marked `X`.
    Unmatched,
}

/// Which rows to show.
#[derive(Clone, Debug, PartialEq)]
pub struct RowFilter {
    /// Case-insensitive substring searched in `search_field`.
    pub search: String,
    pub search_field: Field,
    pub status: MatchFilter,
    pub status_field: Field,
}

impl Default for RowFilter {
    fn default() -> Self {
        Self {
            search: String::new(),
            search_field: Field::InputName,
            status: MatchFilter::All,
            status_field: Field::MatchStatus,
        }
    }
}

impl RowFilter {
    pub fn search(mut self, text: impl Into<String>) -> Self {
        self.search = text.into();
        self
    }

    pub fn status(mut self, status: MatchFilter) -> Self {
        self.status = status;
        self
    }

    pub fn matches(&self, record: &Record) -> bool {
        let status_ok = match self.status {
            MatchFilter::All => true,
            MatchFilter::Matched => record.text(&self.status_field) == Some("O"),
            MatchFilter::Unmatched => record.text(&self.status_field) == Some("X"),
        };
        if !status_ok {
            return false;
        }

        let needle = self.search.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        record
            .text(&self.search_field)
            .is_some_and(|text| text.to_lowercase().contains(&needle))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Success,
    Error,
}

/// One-shot message for the user (commit results).
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}
