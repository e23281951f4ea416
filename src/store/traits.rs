//! `RecordStore` trait: sheet-like table primitives the recorder is built on.
//!
//! Rows are 1-based and row 1 holds the headers, matching how spreadsheet
//! services address a worksheet. Each call is an independent round trip that
//! may fail on its own.

use async_trait::async_trait;

use crate::error::RecordError;

/// A single tabular sheet. Cells are plain strings; absent trailing cells
/// read back as a shorter row.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Header row (row 1). Empty when the sheet is empty.
    async fn read_headers(&self) -> Result<Vec<String>, RecordError>;

    /// Values of a single row. Rows past the end read back empty.
    async fn read_row(&self, row: usize) -> Result<Vec<String>, RecordError>;

    /// Values of one 1-based column across every row, header included.
    async fn read_column(&self, column: usize) -> Result<Vec<String>, RecordError>;

    /// Every data row (row 2 onward), in sheet order.
    async fn read_records(&self) -> Result<Vec<Vec<String>>, RecordError>;

    /// Overwrite a row in full. Writing one row past the end extends the sheet.
    async fn write_row(&self, row: usize, values: &[String]) -> Result<(), RecordError>;

    /// Append one row after the last row.
    async fn append_row(&self, values: &[String]) -> Result<(), RecordError>;

    /// Append many rows in one round trip.
    async fn append_rows(&self, rows: &[Vec<String>]) -> Result<(), RecordError>;

    /// Remove every row, headers included.
    async fn clear(&self) -> Result<(), RecordError>;

    /// Replace the whole sheet with `rows` (row 1 being the headers) as one
    /// step. On error the previous contents are left untouched.
    async fn replace_all(&self, rows: &[Vec<String>]) -> Result<(), RecordError>;
}
