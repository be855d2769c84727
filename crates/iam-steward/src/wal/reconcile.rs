//! Reconciliation sweep over the compensation log
//!
//! Each entry is either obsolete (its owning record still uses the target) and
//! discharged, or executed and then discharged. Failures stay in the log for
//! the next sweep.

use super::types::{Compensation, WalEntry};
use crate::account::{AccountManager, ManagedAccount};
use crate::error::Result;
use crate::account::cleanup::Remote;
use crate::gcp::TransportProvider;
use crate::storage::Storage;
use chrono::{Duration, Utc};
use std::collections::BTreeSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Configuration for a reconciliation sweep
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Entries younger than this are left alone
    pub min_age: Duration,
    /// Report what would happen without changing anything
    pub dry_run: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            min_age: Duration::minutes(5),
            dry_run: false,
        }
    }
}

/// Report of a reconciliation sweep
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub total: usize,
    /// Compensations performed and discharged
    pub executed: usize,
    /// Entries whose target is still in use, discharged without action
    pub discharged_obsolete: usize,
    pub failed: usize,
    /// Too young, or dry run
    pub skipped: usize,
}

/// What a sweep should do with one entry
#[derive(Debug, PartialEq)]
enum Disposition {
    Obsolete,
    Execute(Compensation),
}

/// Decide an entry against the current state of its owning record.
fn disposition(action: &Compensation, owner: Option<&ManagedAccount>) -> Disposition {
    let Some(record) = owner else {
        return Disposition::Execute(action.clone());
    };
    match action {
        Compensation::DeleteAccount { account } => {
            if record.service_account.email == account.email {
                Disposition::Obsolete
            } else {
                Disposition::Execute(action.clone())
            }
        }
        Compensation::RemoveBinding {
            email,
            resource,
            roles,
        } => {
            if record.email() != email {
                return Disposition::Execute(action.clone());
            }
            let still_needed = record.bindings.get(resource);
            let remaining: BTreeSet<String> = roles
                .iter()
                .filter(|role| !still_needed.is_some_and(|needed| needed.contains(*role)))
                .cloned()
                .collect();
            if remaining.is_empty() {
                Disposition::Obsolete
            } else {
                Disposition::Execute(Compensation::RemoveBinding {
                    email: email.clone(),
                    resource: resource.clone(),
                    roles: remaining,
                })
            }
        }
        Compensation::DeleteKey { key_name, .. } => {
            let in_use = record
                .token_gen
                .as_ref()
                .is_some_and(|token| &token.key_name == key_name);
            if in_use {
                Disposition::Obsolete
            } else {
                Disposition::Execute(action.clone())
            }
        }
    }
}

impl<S: Storage, P: TransportProvider> AccountManager<S, P> {
    /// Discharge obsolete compensations and perform the rest.
    ///
    /// Holds each owner's lock while its entry is handled, so a sweep never
    /// races a lifecycle operation on the same record.
    pub async fn reconcile(
        &self,
        config: &ReconcileConfig,
        cancel: &CancellationToken,
    ) -> Result<ReconcileReport> {
        let entries = self.log().list().await?;
        let remote = self.remote(cancel).await?;
        let mut report = ReconcileReport {
            total: entries.len(),
            ..Default::default()
        };

        info!(
            entries = entries.len(),
            min_age_secs = config.min_age.num_seconds(),
            dry_run = config.dry_run,
            "Reconciling compensation log"
        );

        let now = Utc::now();
        for entry in entries {
            if cancel.is_cancelled() {
                warn!("Reconciliation cancelled");
                break;
            }
            if now - entry.created_at < config.min_age {
                debug!(wal_id = %entry.id, "Entry too young, skipping");
                report.skipped += 1;
                continue;
            }

            let _guard = self.locks.lock(entry.owner.kind, &entry.owner.name).await;
            // The entry may have been handled while waiting for the lock
            if self.log().get(entry.id).await?.is_none() {
                report.skipped += 1;
                continue;
            }
            self.reconcile_entry(&entry, config, &remote, &mut report).await?;
        }

        info!(
            executed = report.executed,
            obsolete = report.discharged_obsolete,
            failed = report.failed,
            skipped = report.skipped,
            "Reconciliation finished"
        );
        Ok(report)
    }

    async fn reconcile_entry(
        &self,
        entry: &WalEntry,
        config: &ReconcileConfig,
        remote: &Remote<'_, P::Transport>,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let owner = self.read(entry.owner.kind, &entry.owner.name).await?;
        match disposition(&entry.action, owner.as_ref()) {
            Disposition::Obsolete => {
                if config.dry_run {
                    info!(wal_id = %entry.id, owner = %entry.owner, action = %entry.action, "[DRY RUN] Would discharge obsolete entry");
                    report.skipped += 1;
                } else {
                    self.log().discharge(entry.id).await?;
                    debug!(wal_id = %entry.id, owner = %entry.owner, "Discharged obsolete entry");
                    report.discharged_obsolete += 1;
                }
            }
            Disposition::Execute(action) => {
                if config.dry_run {
                    info!(wal_id = %entry.id, owner = %entry.owner, action = %action, "[DRY RUN] Would execute");
                    report.skipped += 1;
                    return Ok(());
                }
                match remote.execute(&action).await {
                    Ok(()) => {
                        self.log().discharge(entry.id).await?;
                        info!(wal_id = %entry.id, owner = %entry.owner, action = %action, "Compensation executed");
                        report.executed += 1;
                    }
                    Err(e) => {
                        warn!(wal_id = %entry.id, owner = %entry.owner, action = %action, error = ?e, "Compensation failed");
                        report.failed += 1;
                    }
                }
            }
        }
        Ok(())
    }
}
