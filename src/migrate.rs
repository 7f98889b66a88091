use sqlx::{Executor, Sqlite, SqlitePool};

use crate::error::Result;

/// Vector records of one user's collection. `id` is the SHA-256 of
/// `chunk_text`, so identical chunks collapse to one row.
pub const RECORDS_DDL: &str = r#"
    CREATE TABLE IF NOT EXISTS records (
        id TEXT PRIMARY KEY,
        chunk_text TEXT NOT NULL,
        embedding BLOB NOT NULL,
        dims INTEGER NOT NULL,
        metadata_json TEXT NOT NULL DEFAULT '{}',
        created_at INTEGER NOT NULL
    )
"#;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    create_records_table(pool).await
}

/// Create the records table on any executor (pool or open transaction).
pub async fn create_records_table<'e, E>(executor: E) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(RECORDS_DDL).execute(executor).await?;
    Ok(())
}
