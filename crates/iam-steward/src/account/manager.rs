//! Account lifecycle: create, update, rotate and delete managed accounts
//!
//! Every change that replaces remote state follows the same sequence:
//!
//! 1. record compensations for everything the previous generation owns that
//!    the new one will not
//! 2. record a compensation, then create the new service account (role sets)
//! 3. record a compensation, then apply each new binding
//! 4. create the token key and record its compensation
//! 5. save the record (the commit point)
//! 6. discharge the new generation's compensations
//! 7. clean up the previous generation, reporting failures as warnings
//!
//! A failure before step 5 leaves the stored record untouched and every
//! compensation in place for the reconciliation sweep.

use super::cleanup::Remote;
use super::input::AccountInput;
use super::locks::AccountLocks;
use super::types::{
    binding_hash, AccountKind, BindingSet, ManagedAccount, SecretType, ServiceAccountId,
    TokenGenerator,
};
use crate::config::{ConfigStore, StewardConfig};
use crate::error::{Error, Result};
use crate::gcp::admin::service_account_email;
use crate::gcp::{Transport, TransportProvider};
use crate::storage::{get_json, put_json, Storage};
use crate::wal::{Compensation, CompensationLog, Owner, WalEntry};
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Service account ids are 6 to 30 characters
const MAX_ACCOUNT_ID_LEN: usize = 30;
const ACCOUNT_ID_SUFFIX_LEN: usize = 8;
const MAX_DISPLAY_NAME_LEN: usize = 100;

/// Result of a successful mutation.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub account: ManagedAccount,
    /// Deferred cleanup and ignored input; the operation itself succeeded
    pub warnings: Vec<String>,
}

/// The state a generation replacement should end in.
struct Generation {
    service_account: ServiceAccountId,
    /// Account id to create before anything else
    create_account_id: Option<String>,
    bindings: BindingSet,
    /// Subset of `bindings` that must be applied remotely
    grants: BindingSet,
    issue_key: bool,
    secret_type: SecretType,
    token_scopes: Vec<String>,
}

/// Orchestrates managed accounts over a storage backend and a remote API.
///
/// Configuration lives in storage and is read at the start of every
/// operation; the transport comes from `clients` under that configuration.
/// Mutations on one record are serialized; reads never take the lock.
pub struct AccountManager<S, P> {
    pub(crate) storage: S,
    pub(crate) clients: P,
    pub(crate) locks: AccountLocks,
}

impl<S: Storage, P: TransportProvider> AccountManager<S, P> {
    pub fn new(storage: S, clients: P) -> Self {
        Self {
            storage,
            clients,
            locks: AccountLocks::new(),
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    fn config_store(&self) -> ConfigStore<'_, S> {
        ConfigStore::new(&self.storage, &self.clients)
    }

    /// Stored configuration, or defaults if none has been written
    pub async fn config(&self) -> Result<StewardConfig> {
        self.config_store().load().await
    }

    /// Validate and persist `config`, dropping any transport built for the old one.
    pub async fn save_config(&self, config: &StewardConfig) -> Result<()> {
        self.config_store().save(config).await
    }

    pub async fn delete_config(&self) -> Result<()> {
        self.config_store().delete().await
    }

    pub(crate) fn log(&self) -> CompensationLog<'_, S> {
        CompensationLog::new(&self.storage)
    }

    /// Remote calls under the current configuration
    pub(crate) async fn remote<'a>(
        &self,
        cancel: &'a CancellationToken,
    ) -> Result<Remote<'a, P::Transport>> {
        let config = self.config().await?;
        let transport = self.clients.transport(&config)?;
        Ok(Remote::new(transport, config, cancel))
    }

    pub async fn read(&self, kind: AccountKind, name: &str) -> Result<Option<ManagedAccount>> {
        get_json(&self.storage, &kind.storage_key(name), "managed account").await
    }

    /// Names of all records of `kind`, sorted
    pub async fn list(&self, kind: AccountKind) -> Result<Vec<String>> {
        let prefix = kind.storage_prefix();
        Ok(self
            .storage
            .list(prefix)
            .await?
            .into_iter()
            .filter_map(|key| key.strip_prefix(prefix).map(str::to_string))
            .collect())
    }

    async fn require(&self, kind: AccountKind, name: &str) -> Result<ManagedAccount> {
        self.read(kind, name).await?.ok_or_else(|| Error::RecordNotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        })
    }

    /// Create or update a record from loosely typed fields.
    pub async fn write(
        &self,
        kind: AccountKind,
        name: &str,
        fields: &Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        validate_name(name)?;
        let _guard = self.locks.lock(kind, name).await;
        let existing = self.read(kind, name).await?;
        let input = AccountInput::parse(kind, fields, existing.as_ref())?;
        let mut warnings = input.warnings.clone();
        let remote = self.remote(cancel).await?;

        let plan = match kind {
            AccountKind::RoleSet => {
                plan_role_set(name, &input, existing.as_ref(), &remote.config().account_prefix)
            }
            AccountKind::StaticAccount => {
                self.plan_static(name, &input, existing.as_ref(), &remote)
                    .await?
            }
            AccountKind::ImpersonatedAccount => {
                self.plan_impersonated(name, &input, existing.as_ref(), &remote)
                    .await?
            }
        };

        let mut outcome = match (plan, existing) {
            (Some(generation), existing) => {
                self.replace_generation(kind, name, existing.as_ref(), generation, &remote)
                    .await?
            }
            (None, Some(mut current)) => {
                // Nothing remote changes; only token scopes can differ
                current.token_scopes = input.token_scopes;
                current.updated_at = Utc::now();
                self.save(&current).await?;
                info!(kind = %kind, name, "Updated account settings");
                Outcome {
                    account: current,
                    warnings: Vec::new(),
                }
            }
            (None, None) => {
                return Err(Error::InvalidInput(format!(
                    "nothing to create for {kind} '{name}'"
                )))
            }
        };
        warnings.append(&mut outcome.warnings);
        outcome.warnings = warnings;
        Ok(outcome)
    }

    async fn plan_static(
        &self,
        name: &str,
        input: &AccountInput,
        existing: Option<&ManagedAccount>,
        remote: &Remote<'_, P::Transport>,
    ) -> Result<Option<Generation>> {
        let bindings = input
            .bindings
            .clone()
            .or_else(|| existing.map(|e| e.bindings.clone()))
            .unwrap_or_default();

        let service_account = match existing {
            Some(current) => {
                if current.bindings == bindings {
                    return Ok(None);
                }
                current.service_account.clone()
            }
            None => lookup_external(AccountKind::StaticAccount, name, input, remote).await?,
        };

        let grants = match existing {
            Some(current) => missing_bindings(&bindings, &current.bindings),
            None => bindings.clone(),
        };
        Ok(Some(Generation {
            service_account,
            create_account_id: None,
            bindings,
            grants,
            issue_key: existing.is_none() && input.secret_type == SecretType::AccessToken,
            secret_type: input.secret_type,
            token_scopes: input.token_scopes.clone(),
        }))
    }

    async fn plan_impersonated(
        &self,
        name: &str,
        input: &AccountInput,
        existing: Option<&ManagedAccount>,
        remote: &Remote<'_, P::Transport>,
    ) -> Result<Option<Generation>> {
        if existing.is_some() {
            return Ok(None);
        }
        let service_account =
            lookup_external(AccountKind::ImpersonatedAccount, name, input, remote).await?;
        Ok(Some(Generation {
            service_account,
            create_account_id: None,
            bindings: BindingSet::new(),
            grants: BindingSet::new(),
            issue_key: false,
            secret_type: input.secret_type,
            token_scopes: input.token_scopes.clone(),
        }))
    }

    /// Move a role set to a freshly created service account with the same bindings.
    pub async fn rotate(
        &self,
        kind: AccountKind,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        if !kind.owns_identity() {
            return Err(Error::InvalidInput(format!(
                "{kind} does not own its service account; use rotate_key instead"
            )));
        }
        let _guard = self.locks.lock(kind, name).await;
        let current = self.require(kind, name).await?;
        let remote = self.remote(cancel).await?;
        let generation = new_identity(
            name,
            &remote.config().account_prefix,
            current.service_account.project.clone(),
            current.bindings.clone(),
            current.secret_type,
            current.token_scopes.clone(),
        );
        info!(kind = %kind, name, "Rotating service account");
        self.replace_generation(kind, name, Some(&current), generation, &remote)
            .await
    }

    /// Replace the key used to mint access tokens, leaving the account and bindings alone.
    pub async fn rotate_key(
        &self,
        kind: AccountKind,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        if !kind.supports_keys() {
            return Err(Error::InvalidInput(format!("{kind} has no key to rotate")));
        }
        let _guard = self.locks.lock(kind, name).await;
        let current = self.require(kind, name).await?;
        if current.secret_type != SecretType::AccessToken {
            return Err(Error::InvalidInput(format!(
                "{kind} '{name}' issues service_account_key secrets and holds no token key"
            )));
        }
        let owner = Owner::new(kind, name).to_string();
        let remote = self.remote(cancel).await?;
        remote.find_account(&owner, current.email()).await?;

        let generation = Generation {
            service_account: current.service_account.clone(),
            create_account_id: None,
            bindings: current.bindings.clone(),
            grants: BindingSet::new(),
            issue_key: true,
            secret_type: current.secret_type,
            token_scopes: current.token_scopes.clone(),
        };
        info!(kind = %kind, name, "Rotating token key");
        self.replace_generation(kind, name, Some(&current), generation, &remote)
            .await
    }

    /// Delete a record and clean up what it owns. Deleting a missing record succeeds.
    ///
    /// Returns cleanup failures as warnings; the record is gone either way.
    pub async fn delete(
        &self,
        kind: AccountKind,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let _guard = self.locks.lock(kind, name).await;
        let Some(current) = self.read(kind, name).await? else {
            info!(kind = %kind, name, "Account already deleted");
            return Ok(Vec::new());
        };

        let remote = self.remote(cancel).await?;
        let owner = Owner::new(kind, name);
        let actions = generation_compensations(&current, None);
        let mut entries = Vec::with_capacity(actions.len());
        for action in actions {
            entries.push(self.log().record(&owner, action).await?);
        }

        self.storage.delete(&current.storage_key()).await?;
        info!(kind = %kind, name, email = %current.email(), "Deleted account record");

        Ok(self.clean_up(&entries, &remote).await)
    }

    async fn replace_generation(
        &self,
        kind: AccountKind,
        name: &str,
        previous: Option<&ManagedAccount>,
        generation: Generation,
        remote: &Remote<'_, P::Transport>,
    ) -> Result<Outcome> {
        let owner = Owner::new(kind, name);
        let log = self.log();

        // 1. The previous generation's leftovers, before anything new exists
        let mut obsolete = Vec::new();
        if let Some(previous) = previous {
            for action in generation_compensations(previous, Some(&generation)) {
                obsolete.push(log.record(&owner, action).await?);
            }
        }

        // 2. New identity
        let mut pending: Vec<Uuid> = Vec::new();
        let mut service_account = generation.service_account.clone();
        if let Some(account_id) = &generation.create_account_id {
            let entry = log
                .record(
                    &owner,
                    Compensation::DeleteAccount {
                        account: service_account.clone(),
                    },
                )
                .await?;
            pending.push(entry.id);

            let created = remote
                .create_account(
                    &service_account.project,
                    account_id,
                    &display_name(kind, name),
                )
                .await?;
            if created.email != service_account.email {
                warn!(expected = %service_account.email, actual = %created.email, "Created account has an unexpected email");
                service_account = ServiceAccountId::new(service_account.project.clone(), created.email);
                let entry = log
                    .record(
                        &owner,
                        Compensation::DeleteAccount {
                            account: service_account.clone(),
                        },
                    )
                    .await?;
                pending.push(entry.id);
            }
            info!(kind = %kind, name, email = %service_account.email, "Created service account");
        }

        // 3. Bindings
        for (resource, roles) in &generation.grants {
            let entry = log
                .record(
                    &owner,
                    Compensation::RemoveBinding {
                        email: service_account.email.clone(),
                        resource: resource.clone(),
                        roles: roles.clone(),
                    },
                )
                .await?;
            pending.push(entry.id);
            remote.grant(resource, roles, &service_account.email).await?;
        }

        // 4. Token key
        let token_gen = if generation.issue_key {
            let key = remote
                .create_key(&service_account, generation.create_account_id.is_some())
                .await?;
            let entry = log
                .record(
                    &owner,
                    Compensation::DeleteKey {
                        service_account: service_account.clone(),
                        key_name: key.name.clone(),
                    },
                )
                .await?;
            pending.push(entry.id);
            Some(TokenGenerator {
                key_name: key.name,
                private_key_data: key.private_key_data,
                key_algorithm: key.key_algorithm,
                key_type: key.private_key_type,
            })
        } else {
            previous
                .filter(|p| p.service_account == service_account)
                .and_then(|p| p.token_gen.clone())
        };

        // 5. Commit
        let account = ManagedAccount {
            kind,
            name: name.to_string(),
            secret_type: generation.secret_type,
            service_account,
            binding_hash: binding_hash(&generation.bindings),
            bindings: generation.bindings,
            token_scopes: generation.token_scopes,
            token_gen,
            updated_at: Utc::now(),
        };
        self.save(&account).await?;
        info!(kind = %kind, name, email = %account.email(), "Committed account");

        // 6. The new generation is owned by the record now
        let mut warnings = Vec::new();
        for id in pending {
            if let Err(e) = log.discharge(id).await {
                warn!(wal_id = %id, error = %e, "Failed to discharge compensation");
                warnings.push(format!("failed to discharge compensation {id}: {e}"));
            }
        }

        // 7. Best-effort cleanup of what was replaced
        warnings.extend(self.clean_up(&obsolete, remote).await);
        Ok(Outcome { account, warnings })
    }

    /// Run compensations now, discharging those that succeed.
    async fn clean_up(&self, entries: &[WalEntry], remote: &Remote<'_, P::Transport>) -> Vec<String> {
        let log = self.log();
        let mut warnings = Vec::new();
        for entry in entries {
            match remote.execute(&entry.action).await {
                Ok(()) => {
                    if let Err(e) = log.discharge(entry.id).await {
                        warn!(wal_id = %entry.id, error = %e, "Failed to discharge compensation");
                    }
                }
                Err(e) => {
                    warn!(wal_id = %entry.id, action = %entry.action, error = %e, "Cleanup deferred");
                    warnings.push(format!(
                        "unable to {}, it will be retried by reconciliation: {e}",
                        entry.action
                    ));
                }
            }
        }
        warnings
    }

    async fn save(&self, account: &ManagedAccount) -> Result<()> {
        put_json(&self.storage, &account.storage_key(), account, "managed account").await
    }
}

fn plan_role_set(
    name: &str,
    input: &AccountInput,
    existing: Option<&ManagedAccount>,
    prefix: &str,
) -> Option<Generation> {
    let project = input
        .project
        .clone()
        .or_else(|| existing.map(|e| e.service_account.project.clone()))?;
    let bindings = input
        .bindings
        .clone()
        .or_else(|| existing.map(|e| e.bindings.clone()))
        .unwrap_or_default();

    if let Some(current) = existing {
        if current.service_account.project == project && current.bindings == bindings {
            return None;
        }
    }
    Some(new_identity(
        name,
        prefix,
        project,
        bindings,
        input.secret_type,
        input.token_scopes.clone(),
    ))
}

/// A generation on a freshly generated service account
fn new_identity(
    name: &str,
    prefix: &str,
    project: String,
    bindings: BindingSet,
    secret_type: SecretType,
    token_scopes: Vec<String>,
) -> Generation {
    let account_id = generate_account_id(prefix, name);
    let email = service_account_email(&account_id, &project);
    Generation {
        service_account: ServiceAccountId::new(project, email),
        create_account_id: Some(account_id),
        grants: bindings.clone(),
        bindings,
        issue_key: secret_type == SecretType::AccessToken,
        secret_type,
        token_scopes,
    }
}

/// Compensations for what `previous` owns that `next` will not.
///
/// With no `next`, everything the record owns.
fn generation_compensations(
    previous: &ManagedAccount,
    next: Option<&Generation>,
) -> Vec<Compensation> {
    let same_account = next.is_some_and(|n| n.service_account == previous.service_account);
    let mut actions = Vec::new();

    for (resource, roles) in &previous.bindings {
        let kept = next
            .filter(|_| same_account)
            .and_then(|n| n.bindings.get(resource));
        let roles: BTreeSet<String> = match kept {
            Some(kept) => roles.difference(kept).cloned().collect(),
            None => roles.clone(),
        };
        if !roles.is_empty() {
            actions.push(Compensation::RemoveBinding {
                email: previous.email().to_string(),
                resource: resource.clone(),
                roles,
            });
        }
    }

    if let Some(token_gen) = &previous.token_gen {
        let key_kept = same_account && next.is_some_and(|n| !n.issue_key);
        if !key_kept {
            actions.push(Compensation::DeleteKey {
                service_account: previous.service_account.clone(),
                key_name: token_gen.key_name.clone(),
            });
        }
    }

    if previous.owns_identity() && !same_account {
        actions.push(Compensation::DeleteAccount {
            account: previous.service_account.clone(),
        });
    }
    actions
}

async fn lookup_external<T: Transport>(
    kind: AccountKind,
    name: &str,
    input: &AccountInput,
    remote: &Remote<'_, T>,
) -> Result<ServiceAccountId> {
    let email = input
        .email
        .as_deref()
        .ok_or_else(|| Error::InvalidInput("service_account_email is required".into()))?;
    let owner = Owner::new(kind, name).to_string();
    let account = remote.find_account(&owner, email).await?;
    Ok(ServiceAccountId::new(account.project_id, account.email))
}

/// Roles in `desired` not already present in `current`
fn missing_bindings(desired: &BindingSet, current: &BindingSet) -> BindingSet {
    desired
        .iter()
        .filter_map(|(resource, roles)| {
            let missing: BTreeSet<String> = match current.get(resource) {
                Some(have) => roles.difference(have).cloned().collect(),
                None => roles.clone(),
            };
            (!missing.is_empty()).then(|| (resource.clone(), missing))
        })
        .collect()
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') {
        return Err(Error::InvalidInput(format!(
            "invalid account name {name:?}: must be non-empty and must not contain '/'"
        )));
    }
    Ok(())
}

/// `<prefix>-<name>-<random>`, lowercase, at most 30 characters, starting with a letter.
pub fn generate_account_id(prefix: &str, name: &str) -> String {
    let joined = if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}-{name}")
    };
    let mut base: String = joined
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    if !base.starts_with(|c: char| c.is_ascii_lowercase()) {
        base.insert(0, 'a');
    }
    base.truncate(MAX_ACCOUNT_ID_LEN - ACCOUNT_ID_SUFFIX_LEN - 1);
    let base = base.trim_end_matches('-');

    let random = Uuid::new_v4().simple().to_string();
    format!("{base}-{}", &random[..ACCOUNT_ID_SUFFIX_LEN])
}

fn display_name(kind: AccountKind, name: &str) -> String {
    let mut display = format!("Managed by iam-steward for {kind} {name}");
    if display.len() > MAX_DISPLAY_NAME_LEN {
        let mut end = MAX_DISPLAY_NAME_LEN;
        while !display.is_char_boundary(end) {
            end -= 1;
        }
        display.truncate(end);
    }
    display
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roles(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn record(kind: AccountKind, email: &str, bindings: BindingSet, key: Option<&str>) -> ManagedAccount {
        ManagedAccount {
            kind,
            name: "app".into(),
            secret_type: SecretType::AccessToken,
            service_account: ServiceAccountId::new("p", email),
            binding_hash: binding_hash(&bindings),
            bindings,
            token_scopes: vec!["scope".into()],
            token_gen: key.map(|k| TokenGenerator {
                key_name: k.into(),
                private_key_data: String::new(),
                key_algorithm: String::new(),
                key_type: String::new(),
            }),
            updated_at: Utc::now(),
        }
    }

    fn generation(email: &str, bindings: BindingSet, issue_key: bool) -> Generation {
        Generation {
            service_account: ServiceAccountId::new("p", email),
            create_account_id: None,
            grants: BindingSet::new(),
            bindings,
            issue_key,
            secret_type: SecretType::AccessToken,
            token_scopes: Vec::new(),
        }
    }

    #[test]
    fn account_ids_fit_the_service_account_rules() {
        let id = generate_account_id("steward", "My_App.Prod");
        assert!(id.starts_with("steward-my-app-prod-"), "{id}");
        assert!(id.len() <= MAX_ACCOUNT_ID_LEN);

        let long = generate_account_id("steward", &"x".repeat(80));
        assert_eq!(long.len(), MAX_ACCOUNT_ID_LEN);

        let numeric = generate_account_id("", "42");
        assert!(numeric.starts_with("a42-"), "{numeric}");
        assert_ne!(generate_account_id("s", "n"), generate_account_id("s", "n"));
    }

    #[test]
    fn rotation_compensates_everything_previous() {
        let bindings = BindingSet::from([("projects/p".to_string(), roles(&["roles/viewer"]))]);
        let previous = record(AccountKind::RoleSet, "old@p.iam.gserviceaccount.com", bindings.clone(), Some("k1"));
        let next = generation("new@p.iam.gserviceaccount.com", bindings, true);

        let actions = generation_compensations(&previous, Some(&next));
        assert_eq!(actions.len(), 3);
        assert!(matches!(&actions[0], Compensation::RemoveBinding { email, .. } if email.starts_with("old@")));
        assert!(matches!(&actions[1], Compensation::DeleteKey { key_name, .. } if key_name == "k1"));
        assert!(matches!(&actions[2], Compensation::DeleteAccount { account } if account.email.starts_with("old@")));
    }

    #[test]
    fn static_update_only_removes_dropped_roles() {
        let email = "ci@p.iam.gserviceaccount.com";
        let previous = record(
            AccountKind::StaticAccount,
            email,
            BindingSet::from([
                ("projects/p".to_string(), roles(&["roles/viewer", "roles/editor"])),
                ("projects/q".to_string(), roles(&["roles/viewer"])),
            ]),
            Some("k1"),
        );
        let next = generation(
            email,
            BindingSet::from([("projects/p".to_string(), roles(&["roles/viewer"]))]),
            false,
        );

        let actions = generation_compensations(&previous, Some(&next));
        assert_eq!(
            actions,
            vec![
                Compensation::RemoveBinding {
                    email: email.into(),
                    resource: "projects/p".into(),
                    roles: roles(&["roles/editor"]),
                },
                Compensation::RemoveBinding {
                    email: email.into(),
                    resource: "projects/q".into(),
                    roles: roles(&["roles/viewer"]),
                },
            ]
        );
    }

    #[test]
    fn key_rotation_only_replaces_the_key() {
        let email = "ci@p.iam.gserviceaccount.com";
        let bindings = BindingSet::from([("projects/p".to_string(), roles(&["roles/viewer"]))]);
        let previous = record(AccountKind::StaticAccount, email, bindings.clone(), Some("k1"));
        let actions = generation_compensations(&previous, Some(&generation(email, bindings, true)));
        assert_eq!(actions.len(), 1);
        assert!(matches!(&actions[0], Compensation::DeleteKey { .. }));
    }

    #[test]
    fn delete_never_removes_external_accounts() {
        let previous = record(AccountKind::StaticAccount, "ci@p.iam.gserviceaccount.com", BindingSet::new(), None);
        assert!(generation_compensations(&previous, None).is_empty());
    }

    #[test]
    fn missing_bindings_diff() {
        let desired = BindingSet::from([
            ("projects/p".to_string(), roles(&["roles/viewer", "roles/editor"])),
            ("projects/q".to_string(), roles(&["roles/viewer"])),
        ]);
        let current = BindingSet::from([("projects/p".to_string(), roles(&["roles/viewer"]))]);
        assert_eq!(
            missing_bindings(&desired, &current),
            BindingSet::from([
                ("projects/p".to_string(), roles(&["roles/editor"])),
                ("projects/q".to_string(), roles(&["roles/viewer"])),
            ])
        );
    }

    #[test]
    fn names_are_single_path_segments() {
        assert!(validate_name("app").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("a/b").is_err());
    }
}
