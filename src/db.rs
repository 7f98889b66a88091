use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::models::UserId;

/// Per-user state directory: `{root}/{user_id}`.
pub fn user_dir(root: &Path, user: &UserId) -> PathBuf {
    root.join(user.as_str())
}

pub fn vectors_path(root: &Path, user: &UserId) -> PathBuf {
    user_dir(root, user).join("vectors.sqlite")
}

/// Open (creating if missing) a SQLite database in WAL mode.
pub async fn connect(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}
