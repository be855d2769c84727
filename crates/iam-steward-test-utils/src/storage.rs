//! Storage wrapper that fails writes on demand

use iam_steward::storage::{SqliteStorage, Storage};
use iam_steward::{Error, Result};
use std::sync::Mutex;

/// Delegates to [`SqliteStorage`], failing `put` for keys under chosen prefixes.
///
/// Used to simulate a crash or outage at the commit point of a lifecycle
/// operation, after remote resources were already created.
pub struct FaultyStorage {
    inner: SqliteStorage,
    failing_prefixes: Mutex<Vec<String>>,
}

impl FaultyStorage {
    pub fn new(inner: SqliteStorage) -> Self {
        Self {
            inner,
            failing_prefixes: Mutex::new(Vec::new()),
        }
    }

    /// Fail every subsequent `put` whose key starts with `prefix`
    pub fn fail_puts(&self, prefix: &str) {
        self.failing_prefixes
            .lock()
            .unwrap()
            .push(prefix.to_string());
    }

    pub fn heal(&self) {
        self.failing_prefixes.lock().unwrap().clear();
    }

    pub fn inner(&self) -> &SqliteStorage {
        &self.inner
    }

    fn should_fail(&self, key: &str) -> bool {
        self.failing_prefixes
            .lock()
            .unwrap()
            .iter()
            .any(|p| key.starts_with(p.as_str()))
    }
}

impl Storage for FaultyStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        if self.should_fail(key) {
            return Err(Error::Storage(format!("injected write failure for {key}")));
        }
        self.inner.put(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.list(prefix).await
    }
}
