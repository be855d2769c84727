//! Remote mutations shared by the lifecycle manager and the reconciliation sweep

use super::types::ServiceAccountId;
use crate::config::StewardConfig;
use crate::error::{Error, Result};
use crate::gcp::admin::{service_account_name, ServiceAccount, ServiceAccountKey};
use crate::gcp::{IamAdmin, Transport};
use crate::iam::{PolicyDelta, PolicyHandle, Registry};
use crate::retry::{retry, retry_transient, Attempt};
use crate::wal::Compensation;
use std::collections::BTreeSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Remote calls bound to one transport, configuration and cancellation token.
///
/// Built once per operation, so a configuration change applies from the next
/// operation on. Every call runs under the backoff retrier.
pub(crate) struct Remote<'a, T> {
    transport: T,
    config: StewardConfig,
    cancel: &'a CancellationToken,
}

impl<'a, T: Transport> Remote<'a, T> {
    pub(crate) fn new(transport: T, config: StewardConfig, cancel: &'a CancellationToken) -> Self {
        Self {
            transport,
            config,
            cancel,
        }
    }

    pub(crate) fn config(&self) -> &StewardConfig {
        &self.config
    }

    fn admin(&self) -> IamAdmin<'_, T> {
        IamAdmin::new(&self.transport, &self.config.iam_endpoint)
    }

    pub(crate) async fn create_account(
        &self,
        project: &str,
        account_id: &str,
        display_name: &str,
    ) -> Result<ServiceAccount> {
        let admin = self.admin();
        retry_transient(&self.config.retry, self.cancel, "creating service account", || {
            admin.create_service_account(project, account_id, display_name)
        })
        .await
    }

    /// Look up an account by email in any project.
    pub(crate) async fn find_account(&self, owner: &str, email: &str) -> Result<ServiceAccount> {
        let admin = self.admin();
        let name = service_account_name("-", email);
        match retry_transient(&self.config.retry, self.cancel, "reading service account", || {
            admin.get_service_account(&name)
        })
        .await
        {
            Err(e) if e.is_not_found() => Err(Error::AccountNotFound {
                owner: owner.to_string(),
                email: email.to_string(),
            }),
            other => other,
        }
    }

    /// Create a key, waiting out a 404 while a fresh account becomes visible.
    pub(crate) async fn create_key(
        &self,
        account: &ServiceAccountId,
        freshly_created: bool,
    ) -> Result<ServiceAccountKey> {
        let admin = self.admin();
        let name = account.resource_name();
        retry(&self.config.retry, self.cancel, "creating service account key", || {
            let fut = admin.create_key(&name);
            async move {
                match fut.await {
                    Ok(key) => Ok(Attempt::Done(key)),
                    Err(e) if e.is_retryable() || (freshly_created && e.is_not_found()) => {
                        Ok(Attempt::Retry(Some(e)))
                    }
                    Err(e) => Err(e),
                }
            }
        })
        .await
    }

    /// Grant `roles` to the account on `resource`.
    pub(crate) async fn grant(&self, resource: &str, roles: &BTreeSet<String>, email: &str) -> Result<()> {
        let parsed = Registry::builtin().parse(resource)?;
        let delta = PolicyDelta::new(roles.iter().cloned(), email);
        let handle = PolicyHandle::new(&self.transport);
        let what = format!("granting roles on {resource}");
        let changed = retry_transient(&self.config.retry, self.cancel, &what, || {
            handle.update_bindings(&parsed, Some(&delta), None)
        })
        .await?;
        info!(resource, email, roles = roles.len(), changed, "Applied binding");
        Ok(())
    }

    /// Remove `roles` from the account on `resource`. A missing resource counts as done.
    pub(crate) async fn revoke(&self, resource: &str, roles: &BTreeSet<String>, email: &str) -> Result<()> {
        let parsed = Registry::builtin().parse(resource)?;
        let delta = PolicyDelta::new(roles.iter().cloned(), email);
        let handle = PolicyHandle::new(&self.transport);
        let what = format!("removing roles on {resource}");
        match retry_transient(&self.config.retry, self.cancel, &what, || {
            handle.update_bindings(&parsed, None, Some(&delta))
        })
        .await
        {
            Ok(changed) => {
                info!(resource, email, changed, "Removed binding");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(resource, error = %e, "Resource already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub(crate) async fn delete_account(&self, account: &ServiceAccountId) -> Result<()> {
        let admin = self.admin();
        let name = account.resource_name();
        retry_transient(&self.config.retry, self.cancel, "deleting service account", || {
            admin.delete_service_account(&name)
        })
        .await
    }

    pub(crate) async fn delete_key(&self, key_name: &str) -> Result<()> {
        let admin = self.admin();
        retry_transient(&self.config.retry, self.cancel, "deleting service account key", || {
            admin.delete_key(key_name)
        })
        .await
    }

    /// Perform a compensating action. Targets that are already gone count as done.
    pub(crate) async fn execute(&self, action: &Compensation) -> Result<()> {
        match action {
            Compensation::DeleteAccount { account } => self.delete_account(account).await,
            Compensation::RemoveBinding {
                email,
                resource,
                roles,
            } => self.revoke(resource, roles, email).await,
            Compensation::DeleteKey { key_name, .. } => self.delete_key(key_name).await,
        }
    }
}
