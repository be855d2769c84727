//! Service account key secrets issued directly to callers

use super::manager::AccountManager;
use super::types::{binding_hash, AccountKind, SecretType};
use crate::error::{Error, Result};
use crate::gcp::TransportProvider;
use crate::storage::Storage;
use crate::wal::Owner;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A freshly issued key. The caller owns it until it calls [`AccountManager::revoke_key`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeySecret {
    pub key_name: String,
    /// Base64 credentials file
    pub private_key_data: String,
    pub key_algorithm: String,
    pub key_type: String,
    pub service_account_email: String,
    /// Binding generation the key was issued under
    pub binding_hash: String,
}

impl<S: Storage, P: TransportProvider> AccountManager<S, P> {
    /// Issue a new key for a record configured with `service_account_key` secrets.
    pub async fn issue_key(
        &self,
        kind: AccountKind,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<KeySecret> {
        let _guard = self.locks.lock(kind, name).await;
        let account = self.read(kind, name).await?.ok_or_else(|| Error::RecordNotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        })?;
        if account.secret_type != SecretType::Key || !kind.supports_keys() {
            return Err(Error::UnsupportedSecretType {
                kind: kind.to_string(),
                secret_type: SecretType::Key.to_string(),
            });
        }

        let remote = self.remote(cancel).await?;
        let owner = Owner::new(kind, name).to_string();
        remote.find_account(&owner, account.email()).await?;
        let key = remote.create_key(&account.service_account, false).await?;
        info!(kind = %kind, name, key_id = %key.id(), "Issued service account key");

        Ok(KeySecret {
            key_name: key.name,
            private_key_data: key.private_key_data,
            key_algorithm: key.key_algorithm,
            key_type: key.private_key_type,
            service_account_email: account.service_account.email,
            binding_hash: account.binding_hash,
        })
    }

    /// Delete an issued key. A key that is already gone counts as revoked.
    pub async fn revoke_key(&self, key_name: &str, cancel: &CancellationToken) -> Result<()> {
        self.remote(cancel).await?.delete_key(key_name).await
    }

    /// Whether a key issued under `hash` still matches the record's bindings.
    ///
    /// False once the record is deleted or its bindings change.
    pub async fn key_lease_valid(&self, kind: AccountKind, name: &str, hash: &str) -> Result<bool> {
        Ok(self
            .read(kind, name)
            .await?
            .is_some_and(|account| account.binding_hash == hash && binding_hash(&account.bindings) == hash))
    }
}
