//! Blocking HTTP implementation of the backend contract.

use super::{InventoryService, SaveAllResponse, SaveRowResponse, SnapshotSource};
use crate::error::{CommitError, FetchError};
use crate::types::Record;
use reqwest::blocking::{multipart, Client, Response};
use serde_json::Value;
use tracing::debug;

/// Talks to the pharmacy backend over HTTP.
pub struct HttpInventoryService {
    base_url: String,
    client: Client,
}

impl HttpInventoryService {
    pub fn new(base_url: impl Into<String>) -> Result<Self, FetchError> {
        let client = Client::builder().user_agent("rowsync").build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn ensure_fetch_ok(resp: Response) -> Result<Response, FetchError> {
        if !resp.status().is_success() {
            return Err(FetchError::Status(resp.status().as_u16()));
        }
        Ok(resp)
    }

    fn ensure_commit_ok(resp: Response) -> Result<Response, CommitError> {
        if !resp.status().is_success() {
            return Err(CommitError::Status(resp.status().as_u16()));
        }
        Ok(resp)
    }
}

impl InventoryService for HttpInventoryService {
    fn fetch(&self, source: &SnapshotSource) -> Result<Vec<Value>, FetchError> {
        debug!(source = source.label(), "fetching snapshot");
        let resp = match source {
            SnapshotSource::Inventory => self.client.get(self.url("/api/inventory")).send()?,
            SnapshotSource::Reports => self.client.get(self.url("/api/reports")).send()?,
            SnapshotSource::Match { file_name, bytes } => {
                let part = multipart::Part::bytes(bytes.clone()).file_name(file_name.clone());
                let form = multipart::Form::new().part("file", part);
                self.client
                    .post(self.url("/match-json"))
                    .multipart(form)
                    .send()?
            }
        };

        let rows: Vec<Value> = Self::ensure_fetch_ok(resp)?.json()?;
        Ok(rows)
    }

    fn save_row(&self, record: &Record) -> Result<SaveRowResponse, CommitError> {
        let resp = self
            .client
            .post(self.url("/save-matched-row"))
            .json(record)
            .send()?;

        // Older backends answer with a bare message; treat any 2xx as ok.
        let body: Value = Self::ensure_commit_ok(resp)?.json()?;
        match serde_json::from_value::<SaveRowResponse>(body.clone()) {
            Ok(parsed) => Ok(parsed),
            Err(_) => Ok(SaveRowResponse {
                ok: true,
                record: None,
                message: body.get("message").and_then(|m| m.as_str()).map(str::to_string),
            }),
        }
    }

    fn save_all(&self, records: &[Record]) -> Result<SaveAllResponse, CommitError> {
        let resp = self
            .client
            .post(self.url("/save-approved"))
            .json(records)
            .send()?;

        let body: Value = Self::ensure_commit_ok(resp)?.json()?;
        match serde_json::from_value::<SaveAllResponse>(body.clone()) {
            Ok(parsed) => Ok(parsed),
            Err(_) => Ok(SaveAllResponse {
                ok: true,
                count: records.len(),
                message: body.get("message").and_then(|m| m.as_str()).map(str::to_string),
            }),
        }
    }
}
