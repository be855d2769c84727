//! SQLite-backed storage

use super::Storage;
use crate::error::{Error, Result};
use chrono::Utc;
use directories::ProjectDirs;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

/// Get the default database path
fn default_db_path() -> Result<PathBuf> {
    let proj_dirs = ProjectDirs::from("", "", "iam-steward")
        .ok_or_else(|| Error::Storage("failed to determine project directories".into()))?;

    let state_dir = proj_dirs.data_local_dir();
    fs::create_dir_all(state_dir)
        .map_err(|e| Error::Storage(format!("failed to create state directory: {e}")))?;

    Ok(state_dir.join("state.db"))
}

impl SqliteStorage {
    /// Open the database in the platform data directory, creating it if needed
    pub async fn open_default() -> Result<Self> {
        let path = default_db_path()?;
        Self::open(&format!("sqlite://{}?mode=rwc", path.display())).await
    }

    pub async fn open(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    /// Private in-memory database. A single connection, since every
    /// connection to `sqlite::memory:` opens its own database.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, creating the schema if needed
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl Storage for SqliteStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as("SELECT value FROM entries WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(value,)| value))
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        sqlx::query(
            "INSERT INTO entries (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        debug!(key, "Stored entry");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT key FROM entries WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(key,)| key).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn temp_storage(dir: &TempDir) -> SqliteStorage {
        let path = dir.path().join("test-state.db");
        SqliteStorage::open(&format!("sqlite://{}?mode=rwc", path.display()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn put_get_overwrite_delete() {
        let dir = TempDir::new().unwrap();
        let storage = temp_storage(&dir).await;

        assert_eq!(storage.get("roleset/a").await.unwrap(), None);
        storage.put("roleset/a", b"one").await.unwrap();
        storage.put("roleset/a", b"two").await.unwrap();
        assert_eq!(storage.get("roleset/a").await.unwrap(), Some(b"two".to_vec()));

        storage.delete("roleset/a").await.unwrap();
        storage.delete("roleset/a").await.unwrap();
        assert_eq!(storage.get("roleset/a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn list_is_prefix_scoped_and_sorted() {
        let dir = TempDir::new().unwrap();
        let storage = temp_storage(&dir).await;

        for key in ["wal/b", "wal/a", "walrus", "roleset/x", "wal_/c"] {
            storage.put(key, b"{}").await.unwrap();
        }
        assert_eq!(storage.list("wal/").await.unwrap(), vec!["wal/a", "wal/b"]);
        assert!(storage.list("static-account/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = TempDir::new().unwrap();
        temp_storage(&dir).await.put("config", b"{}").await.unwrap();
        let reopened = temp_storage(&dir).await;
        assert_eq!(reopened.get("config").await.unwrap(), Some(b"{}".to_vec()));
    }
}
