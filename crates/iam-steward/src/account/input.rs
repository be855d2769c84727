//! Typed parsing of caller-supplied account fields

use super::types::{AccountKind, BindingSet, ManagedAccount, SecretType};
use crate::error::{Error, Result};
use crate::iam::Registry;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Desired state for a create or update, after validation.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountInput {
    pub secret_type: SecretType,
    /// Target project for generated accounts
    pub project: Option<String>,
    /// Existing account to bind or impersonate
    pub email: Option<String>,
    pub token_scopes: Vec<String>,
    /// `None` keeps the current bindings on update
    pub bindings: Option<BindingSet>,
    /// Non-fatal notes for the caller
    pub warnings: Vec<String>,
}

impl AccountInput {
    /// Validate `fields` for `kind`, taking immutable fields from `existing`.
    pub fn parse(
        kind: AccountKind,
        fields: &Map<String, Value>,
        existing: Option<&ManagedAccount>,
    ) -> Result<Self> {
        let mut warnings = Vec::new();

        let secret_type = match (optional_str(fields, "secret_type")?, existing) {
            (Some(raw), existing) => {
                let parsed = SecretType::parse(raw).ok_or_else(|| Error::UnsupportedSecretType {
                    kind: kind.to_string(),
                    secret_type: raw.to_string(),
                })?;
                if let Some(existing) = existing {
                    if existing.secret_type != parsed {
                        return Err(Error::InvalidInput(format!(
                            "cannot change secret_type of {kind} '{}' from {} to {parsed}",
                            existing.name, existing.secret_type
                        )));
                    }
                }
                parsed
            }
            (None, Some(existing)) => existing.secret_type,
            (None, None) => SecretType::AccessToken,
        };
        if kind == AccountKind::ImpersonatedAccount && secret_type != SecretType::AccessToken {
            return Err(Error::UnsupportedSecretType {
                kind: kind.to_string(),
                secret_type: secret_type.to_string(),
            });
        }

        let project = optional_str(fields, "project")?.map(str::to_string);
        let email = optional_str(fields, "service_account_email")?.map(str::to_string);
        match kind {
            AccountKind::RoleSet => {
                if email.is_some() {
                    return Err(Error::InvalidInput(
                        "service_account_email cannot be set on a role set; its account is generated".into(),
                    ));
                }
                if project.is_none() && existing.is_none() {
                    return Err(Error::InvalidInput("project is required".into()));
                }
            }
            AccountKind::StaticAccount | AccountKind::ImpersonatedAccount => {
                if project.is_some() {
                    warnings.push("project is ignored; it is taken from the service account".into());
                }
                match (&email, existing) {
                    (None, None) => {
                        return Err(Error::InvalidInput("service_account_email is required".into()))
                    }
                    (Some(new), Some(existing)) if new != existing.email() => {
                        return Err(Error::InvalidInput(format!(
                            "cannot change service_account_email of {kind} '{}'",
                            existing.name
                        )))
                    }
                    _ => {}
                }
            }
        }

        let mut token_scopes = match fields.get("token_scopes") {
            Some(value) => parse_scopes(value)?,
            None => existing.map(|e| e.token_scopes.clone()).unwrap_or_default(),
        };
        match secret_type {
            SecretType::AccessToken if token_scopes.is_empty() => {
                return Err(Error::InvalidInput(
                    "token_scopes are required for access_token secrets".into(),
                ));
            }
            SecretType::Key if !token_scopes.is_empty() => {
                if fields.contains_key("token_scopes") {
                    warnings.push("token_scopes are ignored for service_account_key secrets".into());
                }
                token_scopes.clear();
            }
            _ => {}
        }

        let bindings = match fields.get("bindings") {
            Some(_) if !kind.supports_bindings() => {
                return Err(Error::InvalidInput(format!("bindings are not supported for {kind}")));
            }
            Some(Value::Null) | None => None,
            Some(value) => Some(parse_bindings(value)?),
        };
        if kind == AccountKind::RoleSet && existing.is_none() {
            match &bindings {
                Some(b) if !b.is_empty() => {}
                _ => return Err(Error::InvalidInput("bindings are required for a role set".into())),
            }
        }

        Ok(Self {
            secret_type,
            project,
            email,
            token_scopes,
            bindings,
            warnings,
        })
    }
}

fn optional_str<'a>(fields: &'a Map<String, Value>, name: &str) -> Result<Option<&'a str>> {
    match fields.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim())),
        Some(other) => Err(Error::InvalidInput(format!(
            "{name} must be a string, got {other}"
        ))),
    }
}

/// Scopes as a JSON array or a comma separated string
fn parse_scopes(value: &Value) -> Result<Vec<String>> {
    let scopes: Vec<String> = match value {
        Value::Null => Vec::new(),
        Value::String(s) => s.split(',').map(str::trim).map(str::to_string).collect(),
        Value::Array(items) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(|s| s.trim().to_string())
                    .ok_or_else(|| Error::InvalidInput("token_scopes must be strings".into()))
            })
            .collect::<Result<_>>()?,
        other => {
            return Err(Error::InvalidInput(format!(
                "token_scopes must be a list or comma separated string, got {other}"
            )))
        }
    };
    let mut seen = BTreeSet::new();
    Ok(scopes
        .into_iter()
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .collect())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawRoles {
    List(Vec<String>),
    Object { roles: Vec<String> },
}

/// Parse a bindings document.
///
/// Accepts a JSON object (or a string holding one, optionally base64 encoded)
/// mapping resource identifiers to a role list or `{"roles": [...]}`. Every
/// resource must resolve against the registry and every role must be a
/// predefined or custom role name.
pub fn parse_bindings(value: &Value) -> Result<BindingSet> {
    let document: Value = match value {
        Value::String(raw) => decode_document(raw)?,
        other => other.clone(),
    };
    let raw: BTreeMap<String, RawRoles> = serde_json::from_value(document)
        .map_err(|e| Error::InvalidInput(format!("unable to parse bindings: {e}")))?;

    let registry = Registry::builtin();
    let mut bindings = BindingSet::new();
    let mut problems = Vec::new();
    for (resource, roles) in raw {
        let roles = match roles {
            RawRoles::List(roles) | RawRoles::Object { roles } => roles,
        };
        if let Err(e) = registry.parse(&resource) {
            problems.push(e.to_string());
            continue;
        }
        if roles.is_empty() {
            problems.push(format!("resource {resource} has no roles"));
            continue;
        }
        let entry = bindings.entry(resource.clone()).or_insert_with(BTreeSet::new);
        for role in roles {
            let role = role.trim().to_string();
            if !is_valid_role(&role) {
                problems.push(format!(
                    "invalid role {role:?} on {resource}: expected roles/X, projects/P/roles/X or organizations/O/roles/X"
                ));
                continue;
            }
            entry.insert(role);
        }
    }

    if !problems.is_empty() {
        return Err(Error::InvalidInput(format!(
            "invalid bindings: {}",
            problems.join("; ")
        )));
    }
    Ok(bindings)
}

fn decode_document(raw: &str) -> Result<Value> {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }
    let decoded = STANDARD
        .decode(trimmed)
        .map_err(|_| Error::InvalidInput("bindings are neither JSON nor base64 encoded JSON".into()))?;
    serde_json::from_slice(&decoded)
        .map_err(|e| Error::InvalidInput(format!("unable to parse decoded bindings: {e}")))
}

fn is_valid_role(role: &str) -> bool {
    let parts: Vec<&str> = role.split('/').collect();
    match parts.as_slice() {
        ["roles", name] => !name.is_empty(),
        ["projects" | "organizations", parent, "roles", name] => !parent.is_empty() && !name.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::types::ServiceAccountId;
    use chrono::Utc;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn existing(kind: AccountKind, secret_type: SecretType) -> ManagedAccount {
        ManagedAccount {
            kind,
            name: "app".into(),
            secret_type,
            service_account: ServiceAccountId::new("p", "app@p.iam.gserviceaccount.com"),
            bindings: BindingSet::new(),
            binding_hash: String::new(),
            token_scopes: vec!["https://www.googleapis.com/auth/cloud-platform".into()],
            token_gen: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn bindings_accept_list_object_and_base64() {
        let doc = json!({
            "projects/my-project": ["roles/viewer", "projects/my-project/roles/custom"],
            "//pubsub.googleapis.com/projects/my-project/topics/events": { "roles": ["roles/pubsub.publisher"] }
        });
        let direct = parse_bindings(&doc).unwrap();
        assert_eq!(direct.len(), 2);
        assert_eq!(
            direct["projects/my-project"],
            BTreeSet::from(["roles/viewer".to_string(), "projects/my-project/roles/custom".to_string()])
        );

        let as_string = parse_bindings(&Value::String(doc.to_string())).unwrap();
        let as_base64 = parse_bindings(&Value::String(STANDARD.encode(doc.to_string()))).unwrap();
        assert_eq!(direct, as_string);
        assert_eq!(direct, as_base64);
    }

    #[test]
    fn bindings_report_every_problem() {
        let err = parse_bindings(&json!({
            "projects/p": ["viewer"],
            "projects/p/widgets/w": ["roles/viewer"],
            "projects/q": []
        }))
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("invalid role \"viewer\""), "{message}");
        assert!(message.contains("unsupported resource type"), "{message}");
        assert!(message.contains("has no roles"), "{message}");
    }

    #[test]
    fn role_names() {
        assert!(is_valid_role("roles/viewer"));
        assert!(is_valid_role("organizations/123/roles/auditor"));
        assert!(!is_valid_role("roles/"));
        assert!(!is_valid_role("folders/1/roles/x"));
    }

    #[test]
    fn role_set_requires_project_and_bindings() {
        let err = AccountInput::parse(
            AccountKind::RoleSet,
            &fields(json!({ "token_scopes": ["scope"], "bindings": { "projects/p": ["roles/viewer"] } })),
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("project is required"));

        let err = AccountInput::parse(
            AccountKind::RoleSet,
            &fields(json!({ "project": "p", "token_scopes": "scope" })),
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("bindings are required"));
    }

    #[test]
    fn access_token_requires_scopes() {
        let err = AccountInput::parse(
            AccountKind::RoleSet,
            &fields(json!({ "project": "p", "bindings": { "projects/p": ["roles/viewer"] } })),
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("token_scopes"));
    }

    #[test]
    fn key_secrets_ignore_scopes_with_warning() {
        let input = AccountInput::parse(
            AccountKind::RoleSet,
            &fields(json!({
                "project": "p",
                "secret_type": "service_account_key",
                "token_scopes": "a, b",
                "bindings": { "projects/p": ["roles/viewer"] }
            })),
            None,
        )
        .unwrap();
        assert_eq!(input.secret_type, SecretType::Key);
        assert!(input.token_scopes.is_empty());
        assert_eq!(input.warnings.len(), 1);
    }

    #[test]
    fn secret_type_is_immutable() {
        let current = existing(AccountKind::RoleSet, SecretType::AccessToken);
        let err = AccountInput::parse(
            AccountKind::RoleSet,
            &fields(json!({ "secret_type": "service_account_key" })),
            Some(&current),
        )
        .unwrap_err();
        assert!(err.to_string().contains("cannot change secret_type"));

        let input = AccountInput::parse(AccountKind::RoleSet, &fields(json!({})), Some(&current)).unwrap();
        assert_eq!(input.secret_type, SecretType::AccessToken);
        assert_eq!(input.bindings, None);
        assert_eq!(input.token_scopes, current.token_scopes);
    }

    #[test]
    fn impersonated_rules() {
        let err = AccountInput::parse(
            AccountKind::ImpersonatedAccount,
            &fields(json!({ "service_account_email": "a@p.iam.gserviceaccount.com", "secret_type": "service_account_key" })),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnsupportedSecretType { .. }));

        let err = AccountInput::parse(
            AccountKind::ImpersonatedAccount,
            &fields(json!({
                "service_account_email": "a@p.iam.gserviceaccount.com",
                "token_scopes": ["s"],
                "bindings": { "projects/p": ["roles/viewer"] }
            })),
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("bindings are not supported"));
    }

    #[test]
    fn static_email_is_immutable() {
        let current = existing(AccountKind::StaticAccount, SecretType::AccessToken);
        let err = AccountInput::parse(
            AccountKind::StaticAccount,
            &fields(json!({ "service_account_email": "other@p.iam.gserviceaccount.com" })),
            Some(&current),
        )
        .unwrap_err();
        assert!(err.to_string().contains("cannot change service_account_email"));
    }
}
