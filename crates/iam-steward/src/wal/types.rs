//! Compensation log entry types

use crate::account::types::{AccountKind, ServiceAccountId};
use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Storage prefix of compensation entries
pub const WAL_PREFIX: &str = "wal/";

/// A cleanup action to perform unless the owning record still needs its target.
#[derive(Debug, Clone, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Compensation {
    #[display("delete service account {}", account.email)]
    DeleteAccount { account: ServiceAccountId },
    #[display("remove {} from {resource}", roles.iter().cloned().collect::<Vec<_>>().join(","))]
    RemoveBinding {
        email: String,
        resource: String,
        roles: BTreeSet<String>,
    },
    #[display("delete key {key_name}")]
    DeleteKey {
        service_account: ServiceAccountId,
        key_name: String,
    },
}

impl Compensation {
    /// Short label for logs and reports
    pub fn kind(&self) -> &'static str {
        match self {
            Compensation::DeleteAccount { .. } => "delete_account",
            Compensation::RemoveBinding { .. } => "remove_binding",
            Compensation::DeleteKey { .. } => "delete_key",
        }
    }
}

/// The managed record an entry was written for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[display("{kind} '{name}'")]
pub struct Owner {
    pub kind: AccountKind,
    pub name: String,
}

impl Owner {
    pub fn new(kind: AccountKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Time-ordered id; also the storage key suffix
    pub id: Uuid,
    pub owner: Owner,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub action: Compensation,
}

impl WalEntry {
    pub fn new(owner: Owner, action: Compensation) -> Self {
        Self {
            id: Uuid::now_v7(),
            owner,
            created_at: Utc::now(),
            action,
        }
    }

    pub fn storage_key(&self) -> String {
        entry_key(self.id)
    }
}

pub fn entry_key(id: Uuid) -> String {
    format!("{WAL_PREFIX}{id}")
}
