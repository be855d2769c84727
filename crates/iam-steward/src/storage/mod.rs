//! Durable key-value storage
//!
//! Writes are atomic per key only. Anything that must survive a crash between
//! two writes goes through the compensation log.

mod sqlite;

pub use sqlite::SqliteStorage;

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;

pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    fn put(&self, key: &str, value: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Deleting a missing key is not an error
    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Full keys starting with `prefix`, sorted
    fn list(&self, prefix: &str) -> impl Future<Output = Result<Vec<String>>> + Send;
}

impl<S: Storage> Storage for &S {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send {
        (**self).get(key)
    }

    fn put(&self, key: &str, value: &[u8]) -> impl Future<Output = Result<()>> + Send {
        (**self).put(key, value)
    }

    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send {
        (**self).delete(key)
    }

    fn list(&self, prefix: &str) -> impl Future<Output = Result<Vec<String>>> + Send {
        (**self).list(prefix)
    }
}

pub async fn get_json<S: Storage, T: DeserializeOwned>(
    storage: &S,
    key: &str,
    what: &'static str,
) -> Result<Option<T>> {
    match storage.get(key).await? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(Error::codec(what)),
        None => Ok(None),
    }
}

pub async fn put_json<S: Storage, T: Serialize>(
    storage: &S,
    key: &str,
    value: &T,
    what: &'static str,
) -> Result<()> {
    let bytes = serde_json::to_vec(value).map_err(Error::codec(what))?;
    storage.put(key, &bytes).await
}
