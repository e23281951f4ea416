//! libSQL backend: durable `RecordStore` implementation.
//!
//! A sheet is stored as one SQL row per sheet row, with the cells kept as a
//! JSON array. Several named sheets can share one database file.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::RecordError;
use crate::store::migrations;
use crate::store::traits::RecordStore;

/// libSQL-backed sheet.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlSheet {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    sheet: String,
}

impl LibSqlSheet {
    /// Open (or create) a local database file, run migrations and bind to
    /// the named sheet.
    pub async fn new_local(path: &Path, sheet: &str) -> Result<Self, RecordError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                RecordError::Unavailable(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| RecordError::Unavailable(format!("Failed to open libSQL database: {e}")))?;

        let sheet = Self::connect(db, sheet).await?;
        info!(path = %path.display(), sheet = %sheet.sheet, "Record sheet opened");
        Ok(sheet)
    }

    /// Create an in-memory sheet (for tests).
    pub async fn new_memory(sheet: &str) -> Result<Self, RecordError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                RecordError::Unavailable(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::connect(db, sheet).await
    }

    async fn connect(db: LibSqlDatabase, sheet: &str) -> Result<Self, RecordError> {
        let conn = db
            .connect()
            .map_err(|e| RecordError::Unavailable(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            sheet: sheet.to_string(),
        })
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn row_count(&self) -> Result<usize, RecordError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COALESCE(MAX(row_index), 0) FROM sheet_rows WHERE sheet = ?1",
                params![self.sheet.clone()],
            )
            .await
            .map_err(|e| RecordError::Query(format!("row_count: {e}")))?;
        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row
                    .get(0)
                    .map_err(|e| RecordError::Query(format!("row_count parse: {e}")))?;
                Ok(count as usize)
            }
            Ok(None) => Ok(0),
            Err(e) => Err(RecordError::Query(format!("row_count: {e}"))),
        }
    }

    /// Run a `SELECT cells ...` query and decode every returned row.
    async fn query_cells(
        &self,
        sql: &str,
        args: impl libsql::params::IntoParams,
        op: &str,
    ) -> Result<Vec<Vec<String>>, RecordError> {
        let mut rows = self
            .conn()
            .query(sql, args)
            .await
            .map_err(|e| RecordError::Query(format!("{op}: {e}")))?;

        let mut out = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => {
                    let cells: String = row
                        .get(0)
                        .map_err(|e| RecordError::Query(format!("{op} row parse: {e}")))?;
                    out.push(decode_cells(&cells)?);
                }
                Ok(None) => break,
                Err(e) => return Err(RecordError::Query(format!("{op}: {e}"))),
            }
        }
        Ok(out)
    }
}

// ── Helper functions ────────────────────────────────────────────────

fn encode_cells(values: &[String]) -> Result<String, RecordError> {
    serde_json::to_string(values).map_err(|e| RecordError::Serialization(e.to_string()))
}

fn decode_cells(raw: &str) -> Result<Vec<String>, RecordError> {
    serde_json::from_str(raw).map_err(|e| RecordError::Serialization(e.to_string()))
}

#[async_trait]
impl RecordStore for LibSqlSheet {
    async fn read_headers(&self) -> Result<Vec<String>, RecordError> {
        self.read_row(1).await
    }

    async fn read_row(&self, row: usize) -> Result<Vec<String>, RecordError> {
        let rows = self
            .query_cells(
                "SELECT cells FROM sheet_rows WHERE sheet = ?1 AND row_index = ?2",
                params![self.sheet.clone(), row as i64],
                "read_row",
            )
            .await?;
        Ok(rows.into_iter().next().unwrap_or_default())
    }

    async fn read_column(&self, column: usize) -> Result<Vec<String>, RecordError> {
        if column == 0 {
            return Ok(Vec::new());
        }
        let rows = self
            .query_cells(
                "SELECT cells FROM sheet_rows WHERE sheet = ?1 ORDER BY row_index",
                params![self.sheet.clone()],
                "read_column",
            )
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| r.get(column - 1).cloned().unwrap_or_default())
            .collect())
    }

    async fn read_records(&self) -> Result<Vec<Vec<String>>, RecordError> {
        self.query_cells(
            "SELECT cells FROM sheet_rows WHERE sheet = ?1 AND row_index > 1 ORDER BY row_index",
            params![self.sheet.clone()],
            "read_records",
        )
        .await
    }

    async fn write_row(&self, row: usize, values: &[String]) -> Result<(), RecordError> {
        let rows = self.row_count().await?;
        if row == 0 || row > rows + 1 {
            return Err(RecordError::RowOutOfRange { row, rows });
        }

        self.conn()
            .execute(
                "INSERT INTO sheet_rows (sheet, row_index, cells, updated_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (sheet, row_index) DO UPDATE SET cells = excluded.cells, updated_at = excluded.updated_at",
                params![
                    self.sheet.clone(),
                    row as i64,
                    encode_cells(values)?,
                    Utc::now().to_rfc3339()
                ],
            )
            .await
            .map_err(|e| RecordError::Query(format!("write_row: {e}")))?;

        debug!(sheet = %self.sheet, row, "Sheet row written");
        Ok(())
    }

    async fn append_row(&self, values: &[String]) -> Result<(), RecordError> {
        self.conn()
            .execute(
                "INSERT INTO sheet_rows (sheet, row_index, cells, updated_at)
                 SELECT ?1, COALESCE(MAX(row_index), 0) + 1, ?2, ?3 FROM sheet_rows WHERE sheet = ?1",
                params![
                    self.sheet.clone(),
                    encode_cells(values)?,
                    Utc::now().to_rfc3339()
                ],
            )
            .await
            .map_err(|e| RecordError::Query(format!("append_row: {e}")))?;

        debug!(sheet = %self.sheet, "Sheet row appended");
        Ok(())
    }

    async fn append_rows(&self, rows: &[Vec<String>]) -> Result<(), RecordError> {
        if rows.is_empty() {
            return Ok(());
        }

        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| RecordError::Query(format!("append_rows begin: {e}")))?;
        let now = Utc::now().to_rfc3339();
        for values in rows {
            tx.execute(
                "INSERT INTO sheet_rows (sheet, row_index, cells, updated_at)
                 SELECT ?1, COALESCE(MAX(row_index), 0) + 1, ?2, ?3 FROM sheet_rows WHERE sheet = ?1",
                params![self.sheet.clone(), encode_cells(values)?, now.clone()],
            )
            .await
            .map_err(|e| RecordError::Query(format!("append_rows: {e}")))?;
        }
        tx.commit()
            .await
            .map_err(|e| RecordError::Query(format!("append_rows commit: {e}")))?;

        debug!(sheet = %self.sheet, count = rows.len(), "Sheet rows appended");
        Ok(())
    }

    async fn clear(&self) -> Result<(), RecordError> {
        let removed = self
            .conn()
            .execute(
                "DELETE FROM sheet_rows WHERE sheet = ?1",
                params![self.sheet.clone()],
            )
            .await
            .map_err(|e| RecordError::Query(format!("clear: {e}")))?;

        debug!(sheet = %self.sheet, removed, "Sheet cleared");
        Ok(())
    }

    async fn replace_all(&self, rows: &[Vec<String>]) -> Result<(), RecordError> {
        // Dropping the transaction on any early return rolls it back.
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| RecordError::Query(format!("replace_all begin: {e}")))?;
        tx.execute(
            "DELETE FROM sheet_rows WHERE sheet = ?1",
            params![self.sheet.clone()],
        )
        .await
        .map_err(|e| RecordError::Query(format!("replace_all clear: {e}")))?;

        let now = Utc::now().to_rfc3339();
        for (i, values) in rows.iter().enumerate() {
            tx.execute(
                "INSERT INTO sheet_rows (sheet, row_index, cells, updated_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    self.sheet.clone(),
                    (i + 1) as i64,
                    encode_cells(values)?,
                    now.clone()
                ],
            )
            .await
            .map_err(|e| RecordError::Query(format!("replace_all: {e}")))?;
        }
        tx.commit()
            .await
            .map_err(|e| RecordError::Query(format!("replace_all commit: {e}")))?;

        debug!(sheet = %self.sheet, rows = rows.len(), "Sheet replaced");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_sheet() -> LibSqlSheet {
        LibSqlSheet::new_memory("responses").await.unwrap()
    }

    fn row(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn empty_sheet_has_no_headers() {
        let sheet = test_sheet().await;
        assert!(sheet.read_headers().await.unwrap().is_empty());
        assert!(sheet.read_records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn append_then_read_back() {
        let sheet = test_sheet().await;
        sheet.append_row(&row(&["user_id", "status"])).await.unwrap();
        sheet.append_row(&row(&["u1", "a"])).await.unwrap();
        sheet.append_row(&row(&["u2", "b"])).await.unwrap();

        assert_eq!(sheet.read_headers().await.unwrap(), row(&["user_id", "status"]));
        assert_eq!(sheet.read_row(3).await.unwrap(), row(&["u2", "b"]));
        assert_eq!(
            sheet.read_column(1).await.unwrap(),
            row(&["user_id", "u1", "u2"])
        );
        assert_eq!(sheet.read_records().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn write_row_overwrites_in_place() {
        let sheet = test_sheet().await;
        sheet
            .append_rows(&[row(&["user_id", "x"]), row(&["u1", "1"])])
            .await
            .unwrap();
        sheet.write_row(2, &row(&["u1", "2"])).await.unwrap();
        assert_eq!(sheet.read_row(2).await.unwrap(), row(&["u1", "2"]));
        assert_eq!(sheet.read_records().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn write_row_rejects_gaps() {
        let sheet = test_sheet().await;
        let err = sheet.write_row(3, &row(&["x"])).await.unwrap_err();
        assert!(matches!(err, RecordError::RowOutOfRange { row: 3, rows: 0 }));
        sheet.write_row(1, &row(&["h"])).await.unwrap();
        assert_eq!(sheet.read_headers().await.unwrap(), row(&["h"]));
    }

    #[tokio::test]
    async fn clear_removes_only_own_sheet() {
        let db_dir = tempfile::TempDir::new().unwrap();
        let path = db_dir.path().join("study.db");
        let a = LibSqlSheet::new_local(&path, "a").await.unwrap();
        a.append_row(&row(&["h"])).await.unwrap();
        drop(a);

        let b = LibSqlSheet::new_local(&path, "b").await.unwrap();
        b.append_row(&row(&["h"])).await.unwrap();
        b.clear().await.unwrap();
        assert!(b.read_headers().await.unwrap().is_empty());
        drop(b);

        let a = LibSqlSheet::new_local(&path, "a").await.unwrap();
        assert_eq!(a.read_headers().await.unwrap(), row(&["h"]));
    }

    #[tokio::test]
    async fn replace_all_rewrites_rows_in_order() {
        let sheet = test_sheet().await;
        sheet
            .append_rows(&[row(&["user_id", "x"]), row(&["u1", "1"]), row(&["u2", "2"])])
            .await
            .unwrap();
        sheet
            .replace_all(&[row(&["user_id", "x", "z"]), row(&["u1", "1", ""])])
            .await
            .unwrap();

        assert_eq!(sheet.read_headers().await.unwrap(), row(&["user_id", "x", "z"]));
        assert_eq!(sheet.read_records().await.unwrap(), vec![row(&["u1", "1", ""])]);
        sheet.append_row(&row(&["u3", "", "9"])).await.unwrap();
        assert_eq!(sheet.read_row(3).await.unwrap(), row(&["u3", "", "9"]));
    }

    #[tokio::test]
    async fn cells_survive_unicode_and_newlines() {
        let sheet = test_sheet().await;
        let values = row(&["u1", "Kobieta", "Assistant: Cześć\nUser: hej"]);
        sheet.append_row(&values).await.unwrap();
        assert_eq!(sheet.read_row(1).await.unwrap(), values);
    }
}
