//! In-process sheet, used in tests and for dry runs without a database.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::RecordError;
use crate::store::traits::RecordStore;

/// A `RecordStore` held entirely in memory.
///
/// Failures can be queued with [`MemorySheet::fail_next`]; each queued error
/// is returned by the next primitive call instead of touching the data.
#[derive(Default)]
pub struct MemorySheet {
    rows: RwLock<Vec<Vec<String>>>,
    failures: RwLock<VecDeque<RecordError>>,
}

impl MemorySheet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an error for the next primitive call.
    pub async fn fail_next(&self, error: RecordError) {
        self.failures.write().await.push_back(error);
    }

    /// Snapshot of every row, header included.
    pub async fn snapshot(&self) -> Vec<Vec<String>> {
        self.rows.read().await.clone()
    }

    async fn check_failure(&self) -> Result<(), RecordError> {
        match self.failures.write().await.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RecordStore for MemorySheet {
    async fn read_headers(&self) -> Result<Vec<String>, RecordError> {
        self.check_failure().await?;
        Ok(self.rows.read().await.first().cloned().unwrap_or_default())
    }

    async fn read_row(&self, row: usize) -> Result<Vec<String>, RecordError> {
        self.check_failure().await?;
        if row == 0 {
            return Err(RecordError::RowOutOfRange { row, rows: 0 });
        }
        Ok(self
            .rows
            .read()
            .await
            .get(row - 1)
            .cloned()
            .unwrap_or_default())
    }

    async fn read_column(&self, column: usize) -> Result<Vec<String>, RecordError> {
        self.check_failure().await?;
        if column == 0 {
            return Ok(Vec::new());
        }
        Ok(self
            .rows
            .read()
            .await
            .iter()
            .map(|r| r.get(column - 1).cloned().unwrap_or_default())
            .collect())
    }

    async fn read_records(&self) -> Result<Vec<Vec<String>>, RecordError> {
        self.check_failure().await?;
        Ok(self.rows.read().await.iter().skip(1).cloned().collect())
    }

    async fn write_row(&self, row: usize, values: &[String]) -> Result<(), RecordError> {
        self.check_failure().await?;
        let mut rows = self.rows.write().await;
        if row == 0 || row > rows.len() + 1 {
            return Err(RecordError::RowOutOfRange {
                row,
                rows: rows.len(),
            });
        }
        if row == rows.len() + 1 {
            rows.push(values.to_vec());
        } else {
            rows[row - 1] = values.to_vec();
        }
        Ok(())
    }

    async fn append_row(&self, values: &[String]) -> Result<(), RecordError> {
        self.check_failure().await?;
        self.rows.write().await.push(values.to_vec());
        Ok(())
    }

    async fn append_rows(&self, rows: &[Vec<String>]) -> Result<(), RecordError> {
        self.check_failure().await?;
        self.rows.write().await.extend(rows.iter().cloned());
        Ok(())
    }

    async fn clear(&self) -> Result<(), RecordError> {
        self.check_failure().await?;
        self.rows.write().await.clear();
        Ok(())
    }

    async fn replace_all(&self, rows: &[Vec<String>]) -> Result<(), RecordError> {
        self.check_failure().await?;
        *self.rows.write().await = rows.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn write_extends_by_one_row() {
        let sheet = MemorySheet::new();
        sheet.write_row(1, &row(&["a", "b"])).await.unwrap();
        assert_eq!(sheet.read_headers().await.unwrap(), row(&["a", "b"]));
        assert!(sheet.write_row(3, &row(&["x"])).await.is_err());
    }

    #[tokio::test]
    async fn column_pads_short_rows() {
        let sheet = MemorySheet::new();
        sheet.append_row(&row(&["id", "x"])).await.unwrap();
        sheet.append_row(&row(&["u1"])).await.unwrap();
        assert_eq!(sheet.read_column(2).await.unwrap(), row(&["x", ""]));
    }

    #[tokio::test]
    async fn queued_failure_fires_once() {
        let sheet = MemorySheet::new();
        sheet.fail_next(RecordError::RateLimited).await;
        assert!(matches!(
            sheet.read_headers().await,
            Err(RecordError::RateLimited)
        ));
        assert!(sheet.read_headers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_then_records_empty() {
        let sheet = MemorySheet::new();
        sheet
            .append_rows(&[row(&["h"]), row(&["1"]), row(&["2"])])
            .await
            .unwrap();
        assert_eq!(sheet.read_records().await.unwrap().len(), 2);
        sheet.clear().await.unwrap();
        assert!(sheet.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn failed_replace_keeps_rows() {
        let sheet = MemorySheet::new();
        sheet.append_rows(&[row(&["h"]), row(&["1"])]).await.unwrap();
        sheet.fail_next(RecordError::RateLimited).await;
        assert!(sheet.replace_all(&[row(&["h", "x"])]).await.is_err());
        assert_eq!(sheet.snapshot().await, vec![row(&["h"]), row(&["1"])]);

        sheet.replace_all(&[row(&["h", "x"]), row(&["1", ""])]).await.unwrap();
        assert_eq!(sheet.snapshot().await, vec![row(&["h", "x"]), row(&["1", ""])]);
    }
}
