//! Database test utilities
//!
//! Provides in-memory SQLite storage for testing.

use anyhow::Result;
use iam_steward::storage::SqliteStorage;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

/// Database connection pool type alias
pub type TestDbPool = SqlitePool;

/// Create an in-memory SQLite connection pool for testing.
///
/// This creates a fresh database with no schema.
pub async fn open_test_db() -> Result<TestDbPool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1) // Single connection for in-memory to maintain state
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Fresh in-memory storage with the schema in place.
///
/// # Example
///
/// ```ignore
/// use iam_steward_test_utils::db::test_storage;
///
/// #[tokio::test]
/// async fn test_records() {
///     let storage = test_storage().await.unwrap();
///     // Run tests against storage...
/// }
/// ```
pub async fn test_storage() -> Result<SqliteStorage> {
    Ok(SqliteStorage::from_pool(open_test_db().await?).await?)
}
