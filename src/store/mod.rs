//! Persistence layer: the participant record sheet and the upsert recorder.

pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod record;
pub mod recorder;
pub mod traits;

pub use libsql_backend::LibSqlSheet;
pub use memory::MemorySheet;
pub use record::{ID_COLUMN, PartialRecord};
pub use recorder::{RowAction, UpsertOutcome, UpsertRecorder};
pub use traits::RecordStore;
