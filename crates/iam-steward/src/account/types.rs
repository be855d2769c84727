//! Managed account records

use crate::gcp::admin::service_account_name;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

/// Resource identifier -> roles granted on it
pub type BindingSet = BTreeMap<String, BTreeSet<String>>;

/// The three flavours of managed account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    /// Owns a generated service account, rebuilt on every binding change
    #[display("role set")]
    RoleSet,
    /// Binds roles to an existing service account
    #[display("static account")]
    StaticAccount,
    /// Mints tokens for an existing service account; no bindings or keys
    #[display("impersonated account")]
    ImpersonatedAccount,
}

impl AccountKind {
    pub const ALL: [AccountKind; 3] = [
        AccountKind::RoleSet,
        AccountKind::StaticAccount,
        AccountKind::ImpersonatedAccount,
    ];

    /// Whether the service account is created and deleted by this engine
    pub fn owns_identity(self) -> bool {
        matches!(self, AccountKind::RoleSet)
    }

    pub fn supports_bindings(self) -> bool {
        !matches!(self, AccountKind::ImpersonatedAccount)
    }

    pub fn supports_keys(self) -> bool {
        !matches!(self, AccountKind::ImpersonatedAccount)
    }

    /// Storage prefix for records of this kind
    pub fn storage_prefix(self) -> &'static str {
        match self {
            AccountKind::RoleSet => "roleset/",
            AccountKind::StaticAccount => "static-account/",
            AccountKind::ImpersonatedAccount => "impersonated-account/",
        }
    }

    pub fn storage_key(self, name: &str) -> String {
        format!("{}{}", self.storage_prefix(), name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretType {
    /// OAuth2 access tokens minted from a key held by the engine
    #[display("access_token")]
    AccessToken,
    /// Service account keys issued to callers
    #[display("service_account_key")]
    #[serde(rename = "service_account_key")]
    Key,
}

impl SecretType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "access_token" => Some(SecretType::AccessToken),
            "service_account_key" | "key" => Some(SecretType::Key),
            _ => None,
        }
    }
}

/// A service account identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceAccountId {
    pub project: String,
    pub email: String,
}

impl ServiceAccountId {
    pub fn new(project: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            email: email.into(),
        }
    }

    /// `projects/{project}/serviceAccounts/{email}`
    pub fn resource_name(&self) -> String {
        service_account_name(&self.project, &self.email)
    }
}

/// Key the engine holds to mint access tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenGenerator {
    /// Full key resource name
    pub key_name: String,
    /// Base64 credentials file
    pub private_key_data: String,
    pub key_algorithm: String,
    pub key_type: String,
}

/// The owning record of a managed account.
///
/// Rotations replace `service_account` and `token_gen` wholesale; they are
/// never edited in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedAccount {
    pub kind: AccountKind,
    pub name: String,
    pub secret_type: SecretType,
    pub service_account: ServiceAccountId,
    #[serde(default)]
    pub bindings: BindingSet,
    #[serde(default)]
    pub binding_hash: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub token_scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_gen: Option<TokenGenerator>,
    pub updated_at: DateTime<Utc>,
}

impl ManagedAccount {
    pub fn storage_key(&self) -> String {
        self.kind.storage_key(&self.name)
    }

    pub fn owns_identity(&self) -> bool {
        self.kind.owns_identity()
    }

    /// Email of the account, owned or external
    pub fn email(&self) -> &str {
        &self.service_account.email
    }
}

/// SHA-256 of the canonical JSON form of a binding set, base64 encoded.
///
/// Issued keys carry the hash so a lease from an older binding generation can
/// be recognised.
pub fn binding_hash(bindings: &BindingSet) -> String {
    let canonical = serde_json::to_vec(bindings).unwrap_or_default();
    STANDARD.encode(Sha256::digest(&canonical))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings(pairs: &[(&str, &[&str])]) -> BindingSet {
        pairs
            .iter()
            .map(|(r, roles)| (r.to_string(), roles.iter().map(|s| s.to_string()).collect()))
            .collect()
    }

    #[test]
    fn hash_ignores_insertion_order() {
        let a = bindings(&[("projects/p", &["roles/viewer", "roles/browser"]), ("projects/q", &["roles/owner"])]);
        let b = bindings(&[("projects/q", &["roles/owner"]), ("projects/p", &["roles/browser", "roles/viewer"])]);
        assert_eq!(binding_hash(&a), binding_hash(&b));

        let c = bindings(&[("projects/p", &["roles/viewer"])]);
        assert_ne!(binding_hash(&a), binding_hash(&c));
    }

    #[test]
    fn kinds() {
        assert!(AccountKind::RoleSet.owns_identity());
        assert!(!AccountKind::StaticAccount.owns_identity());
        assert!(!AccountKind::ImpersonatedAccount.supports_bindings());
        assert_eq!(AccountKind::StaticAccount.storage_key("ci"), "static-account/ci");
        assert_eq!(AccountKind::RoleSet.to_string(), "role set");
    }

    #[test]
    fn secret_type_names() {
        assert_eq!(SecretType::parse("access_token"), Some(SecretType::AccessToken));
        assert_eq!(SecretType::parse("service_account_key"), Some(SecretType::Key));
        assert_eq!(SecretType::parse("password"), None);
        assert_eq!(
            serde_json::to_value(SecretType::Key).unwrap(),
            serde_json::json!("service_account_key")
        );
    }
}
