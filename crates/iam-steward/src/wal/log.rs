//! Durable compensation log over [`Storage`]

use super::types::{entry_key, Compensation, Owner, WalEntry, WAL_PREFIX};
use crate::error::Result;
use crate::storage::{get_json, put_json, Storage};
use tracing::{debug, warn};
use uuid::Uuid;

/// Append and discharge compensation entries.
///
/// An entry must be recorded before the remote call it compensates is made,
/// and discharged only once the owning record no longer depends on it.
pub struct CompensationLog<'a, S> {
    storage: &'a S,
}

impl<'a, S: Storage> CompensationLog<'a, S> {
    pub fn new(storage: &'a S) -> Self {
        Self { storage }
    }

    pub async fn record(&self, owner: &Owner, action: Compensation) -> Result<WalEntry> {
        let entry = WalEntry::new(owner.clone(), action);
        put_json(self.storage, &entry.storage_key(), &entry, "compensation entry").await?;
        debug!(wal_id = %entry.id, owner = %owner, action = %entry.action, "Recorded compensation");
        Ok(entry)
    }

    /// Remove an entry. Discharging a missing entry is not an error.
    pub async fn discharge(&self, id: Uuid) -> Result<()> {
        self.storage.delete(&entry_key(id)).await?;
        debug!(wal_id = %id, "Discharged compensation");
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<WalEntry>> {
        get_json(self.storage, &entry_key(id), "compensation entry").await
    }

    /// All entries in creation order. Undecodable entries are skipped.
    pub async fn list(&self) -> Result<Vec<WalEntry>> {
        let keys = self.storage.list(WAL_PREFIX).await?;
        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            match get_json::<_, WalEntry>(self.storage, &key, "compensation entry").await {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => {}
                Err(e) => warn!(key = %key, error = %e, "Skipping unreadable compensation entry"),
            }
        }
        entries.sort_by_key(|e| e.id);
        Ok(entries)
    }
}
