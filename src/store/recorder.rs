//! Upsert recorder: merges partial records into one row per participant.
//!
//! 1. Read the header row and union it with the incoming field names
//!    (existing order kept, new names appended).
//! 2. On growth, snapshot all data rows and replace the sheet in one step
//!    with the new headers and the snapshot projected onto the new order.
//! 3. Find the participant's row by `user_id`; overlay the incoming fields on
//!    the stored values and write it back, or append a fresh row.
//!
//! Header growth rewrites the whole sheet, so it must not interleave with
//! any other write. Plain row upserts hold the shared side of `header_lock`;
//! growth holds the exclusive side.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::RetryPolicy;
use crate::error::RecordError;
use crate::store::record::{ID_COLUMN, PartialRecord};
use crate::store::traits::RecordStore;

/// Whether the upsert created or updated the participant's row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowAction {
    Inserted,
    Updated,
}

/// Result of a successful upsert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpsertOutcome {
    pub action: RowAction,
    /// 1-based sheet row the record now lives in.
    pub row: usize,
    /// Headers appended by this call, in order.
    pub added_headers: Vec<String>,
}

/// Read-merge-write recorder over a [`RecordStore`].
pub struct UpsertRecorder {
    store: Arc<dyn RecordStore>,
    retry: RetryPolicy,
    header_lock: RwLock<()>,
}

impl UpsertRecorder {
    pub fn new(store: Arc<dyn RecordStore>, retry: RetryPolicy) -> Self {
        Self {
            store,
            retry,
            header_lock: RwLock::new(()),
        }
    }

    /// Merge `record` into the participant's row, retrying transient store
    /// failures according to the configured policy.
    pub async fn upsert(&self, record: &PartialRecord) -> Result<UpsertOutcome, RecordError> {
        if record.user_id().trim().is_empty() {
            return Err(RecordError::MissingKey);
        }

        let mut attempt = 0;
        loop {
            match self.upsert_once(record).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_transient() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        user_id = record.user_id(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient record store failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn upsert_once(&self, record: &PartialRecord) -> Result<UpsertOutcome, RecordError> {
        {
            let _shared = self.header_lock.read().await;
            let headers = self.store.read_headers().await?;
            if missing_headers(&headers, record).is_empty() {
                return self.write_record(&headers, record, Vec::new()).await;
            }
        }

        let exclusive = self.header_lock.write().await;
        // Another upsert may have grown the headers while we waited.
        let current = self.store.read_headers().await?;
        let missing = missing_headers(&current, record);
        let (headers, added_headers) = if missing.is_empty() {
            (current, Vec::new())
        } else {
            let grown = self.grow_headers(&current, missing.clone()).await?;
            (grown, missing)
        };
        let _shared = exclusive.downgrade();
        self.write_record(&headers, record, added_headers).await
    }

    /// Rewrite the header row with `missing` appended, preserving every data
    /// row. Caller must hold the exclusive header lock.
    async fn grow_headers(
        &self,
        current: &[String],
        missing: Vec<String>,
    ) -> Result<Vec<String>, RecordError> {
        let mut grown = current.to_vec();
        grown.extend(missing.iter().cloned());

        if current.is_empty() {
            self.store.write_row(1, &grown).await?;
            info!(headers = ?grown, "Initial sheet headers written");
            return Ok(grown);
        }

        let snapshot = self.store.read_records().await?;
        let reprojected: Vec<Vec<String>> = snapshot
            .iter()
            .map(|values| {
                let by_header = row_map(current, values);
                project(&grown, |h| by_header.get(h).map(|v| v.as_str()))
            })
            .collect();

        let mut rebuilt = Vec::with_capacity(reprojected.len() + 1);
        rebuilt.push(grown.clone());
        rebuilt.extend(reprojected);
        // Atomic: on failure the old sheet is intact for the retry.
        self.store.replace_all(&rebuilt).await?;

        info!(
            added = ?missing,
            rows = rebuilt.len() - 1,
            "Sheet headers extended"
        );
        Ok(grown)
    }

    async fn write_record(
        &self,
        headers: &[String],
        record: &PartialRecord,
        added_headers: Vec<String>,
    ) -> Result<UpsertOutcome, RecordError> {
        let id_col = headers
            .iter()
            .position(|h| h == ID_COLUMN)
            .map(|i| i + 1)
            .ok_or_else(|| RecordError::Query(format!("sheet has no {ID_COLUMN} column")))?;

        let ids = self.store.read_column(id_col).await?;
        let existing = ids
            .iter()
            .skip(1)
            .position(|id| id == record.user_id())
            .map(|pos| pos + 2);

        match existing {
            Some(row) => {
                let stored = self.store.read_row(row).await?;
                let mut merged = row_map(headers, &stored);
                for (field, value) in record.fields() {
                    merged.insert(field.as_str(), value.clone());
                }
                let values = project(headers, |h| merged.get(h).map(|v| v.as_str()));
                self.store.write_row(row, &values).await?;

                debug!(user_id = record.user_id(), row, "Record updated");
                Ok(UpsertOutcome {
                    action: RowAction::Updated,
                    row,
                    added_headers,
                })
            }
            None => {
                let values = project(headers, |h| record.get(h));
                self.store.append_row(&values).await?;
                let row = ids.len().max(1) + 1;

                debug!(user_id = record.user_id(), row, "Record inserted");
                Ok(UpsertOutcome {
                    action: RowAction::Inserted,
                    row,
                    added_headers,
                })
            }
        }
    }
}

/// Record fields not yet present in `headers`, in record order.
fn missing_headers(headers: &[String], record: &PartialRecord) -> Vec<String> {
    record
        .field_names()
        .filter(|f| !headers.iter().any(|h| h == f))
        .map(String::from)
        .collect()
}

/// Map header → stored value; cells missing from a short row become empty.
fn row_map<'a>(headers: &'a [String], values: &[String]) -> HashMap<&'a str, String> {
    headers
        .iter()
        .enumerate()
        .map(|(i, h)| (h.as_str(), values.get(i).cloned().unwrap_or_default()))
        .collect()
}

/// Lay values out in header order; absent fields become empty strings.
fn project<'a>(headers: &[String], lookup: impl Fn(&str) -> Option<&'a str>) -> Vec<String> {
    headers
        .iter()
        .map(|h| lookup(h.as_str()).unwrap_or_default().to_string())
        .collect()
}
