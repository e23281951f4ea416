//! Schema versioning for the libSQL sheet backend.
//!
//! Steps are applied in order, each inside its own transaction together with
//! the bump of the recorded version. A database whose recorded version is
//! newer than this build knows about is refused.

use libsql::Connection;

use crate::error::RecordError;

struct Step {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// Append new steps at the end; never edit a released one.
const STEPS: &[Step] = &[
    Step {
        version: 1,
        name: "sheet_rows",
        sql: "CREATE TABLE IF NOT EXISTS sheet_rows (
                sheet TEXT NOT NULL,
                row_index INTEGER NOT NULL,
                cells TEXT NOT NULL,
                PRIMARY KEY (sheet, row_index)
            );",
    },
    Step {
        version: 2,
        name: "sheet_rows_updated_at",
        sql: "ALTER TABLE sheet_rows ADD COLUMN updated_at TEXT NOT NULL DEFAULT '';",
    },
];

fn migration_err(context: &str, e: libsql::Error) -> RecordError {
    RecordError::Migration(format!("{context}: {e}"))
}

/// Latest schema version this build can produce.
pub fn latest_version() -> i64 {
    STEPS.last().map_or(0, |s| s.version)
}

/// Bring the schema up to [`latest_version`].
pub async fn run_migrations(conn: &Connection) -> Result<(), RecordError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS sheet_schema (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| migration_err("Failed to create sheet_schema table", e))?;

    let current = schema_version(conn).await?;
    if current > latest_version() {
        return Err(RecordError::Migration(format!(
            "database schema v{current} is newer than supported v{}",
            latest_version()
        )));
    }

    for step in STEPS.iter().filter(|s| s.version > current) {
        let tx = conn
            .transaction()
            .await
            .map_err(|e| migration_err("Failed to begin migration", e))?;
        tx.execute_batch(step.sql)
            .await
            .map_err(|e| migration_err(&format!("Step v{} ({})", step.version, step.name), e))?;
        tx.execute(
            "INSERT INTO sheet_schema (version, name) VALUES (?1, ?2)",
            libsql::params![step.version, step.name],
        )
        .await
        .map_err(|e| migration_err(&format!("Failed to record v{}", step.version), e))?;
        tx.commit()
            .await
            .map_err(|e| migration_err(&format!("Failed to commit v{}", step.version), e))?;
        tracing::info!(version = step.version, name = step.name, "Applied sheet schema step");
    }

    Ok(())
}

/// Highest recorded schema version, 0 for a fresh database.
pub async fn schema_version(conn: &Connection) -> Result<i64, RecordError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM sheet_schema", ())
        .await
        .map_err(|e| migration_err("Failed to query schema version", e))?;
    match rows
        .next()
        .await
        .map_err(|e| migration_err("Failed to read schema version", e))?
    {
        Some(row) => row
            .get::<i64>(0)
            .map_err(|e| migration_err("Failed to parse schema version", e)),
        None => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn conn() -> Connection {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .unwrap();
        db.connect().unwrap()
    }

    #[tokio::test]
    async fn fresh_database_reaches_latest_version() {
        let conn = conn().await;
        run_migrations(&conn).await.unwrap();
        assert_eq!(schema_version(&conn).await.unwrap(), latest_version());

        // updated_at exists once step 2 has run
        conn.execute(
            "INSERT INTO sheet_rows (sheet, row_index, cells, updated_at) VALUES ('s', 1, '[]', 'now')",
            (),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn rerun_applies_nothing() {
        let conn = conn().await;
        run_migrations(&conn).await.unwrap();
        run_migrations(&conn).await.unwrap();

        let mut rows = conn
            .query("SELECT COUNT(*) FROM sheet_schema", ())
            .await
            .unwrap();
        let count: i64 = rows.next().await.unwrap().unwrap().get(0).unwrap();
        assert_eq!(count, STEPS.len() as i64);
    }

    #[tokio::test]
    async fn newer_schema_is_refused() {
        let conn = conn().await;
        run_migrations(&conn).await.unwrap();
        conn.execute(
            "INSERT INTO sheet_schema (version, name) VALUES (?1, 'future')",
            libsql::params![latest_version() + 1],
        )
        .await
        .unwrap();

        let err = run_migrations(&conn).await.unwrap_err();
        assert!(matches!(err, RecordError::Migration(_)));
    }
}
