//! Per-record mutual exclusion for lifecycle operations

use super::types::AccountKind;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = HashMap<(AccountKind, String), Arc<AsyncMutex<()>>>;

/// One async mutex per managed record, held for a whole multi-step operation.
///
/// Locks are created on demand and dropped once nobody holds or waits on them.
#[derive(Default)]
pub struct AccountLocks {
    locks: Mutex<LockMap>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, kind: AccountKind, name: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            // Entries only referenced by the map are idle
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(
                locks
                    .entry((kind, name.to_string()))
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        lock.lock_owned().await
    }

    /// Number of records currently locked or waited on
    pub fn active(&self) -> usize {
        let locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.values().filter(|l| Arc::strong_count(l) > 1).count()
    }
}
