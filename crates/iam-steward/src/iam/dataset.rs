//! BigQuery dataset access lists viewed as IAM policies.
//!
//! Datasets do not expose `getIamPolicy`; their `access` array carries one
//! entry per (role, grantee) pair. Entries that are not member grants
//! (authorized views, routines and datasets) are kept aside and written back
//! unchanged.

use super::policy::{Binding, Policy};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const SERVICE_ACCOUNT_DOMAIN: &str = ".gserviceaccount.com";

/// `specialGroup` values that have an IAM member equivalent
const SPECIAL_GROUPS: &[(&str, &str)] = &[("allAuthenticatedUsers", "allAuthenticatedUsers")];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    #[serde(default)]
    pub access: Vec<AccessEntry>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub etag: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_by_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub special_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iam_member: Option<String>,
    /// `view`, `routine`, `dataset` and anything newer
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl AccessEntry {
    fn grant(role: &str, member: &str) -> Self {
        let mut entry = AccessEntry {
            role: Some(role.to_string()),
            ..Default::default()
        };
        match member.split_once(':') {
            Some(("user" | "serviceAccount", email)) => entry.user_by_email = Some(email.into()),
            Some(("group", email)) => entry.group_by_email = Some(email.into()),
            Some(("domain", domain)) => entry.domain = Some(domain.into()),
            _ => match SPECIAL_GROUPS.iter().find(|(m, _)| *m == member) {
                Some((_, group)) => entry.special_group = Some(group.to_string()),
                None => entry.iam_member = Some(member.into()),
            },
        }
        entry
    }

    /// IAM member string for a grant entry; `None` for views, routines and
    /// legacy special groups with no member equivalent.
    pub fn member(&self) -> Option<String> {
        if !self.other.is_empty() || self.role.is_none() {
            return None;
        }
        if let Some(email) = &self.user_by_email {
            let kind = if email.ends_with(SERVICE_ACCOUNT_DOMAIN) {
                "serviceAccount"
            } else {
                "user"
            };
            return Some(format!("{kind}:{email}"));
        }
        if let Some(email) = &self.group_by_email {
            return Some(format!("group:{email}"));
        }
        if let Some(domain) = &self.domain {
            return Some(format!("domain:{domain}"));
        }
        if let Some(group) = &self.special_group {
            return SPECIAL_GROUPS
                .iter()
                .find(|(_, g)| g == group)
                .map(|(m, _)| m.to_string());
        }
        self.iam_member.clone()
    }
}

/// Convert a policy into dataset access entries.
///
/// Fails if any binding carries a condition.
pub fn policy_as_dataset(policy: &Policy) -> Result<Dataset> {
    let mut access = Vec::new();
    for binding in &policy.bindings {
        if binding.condition.is_some() {
            return Err(Error::ConditionalBindingUnsupported {
                role: binding.role.clone(),
            });
        }
        for member in &binding.members {
            if !member.is_empty() {
                access.push(AccessEntry::grant(&binding.role, member));
            }
        }
    }
    Ok(Dataset {
        access,
        etag: policy.etag.clone(),
        extra: Map::new(),
    })
}

/// Group a dataset's grant entries by role, in first-seen order.
pub fn dataset_as_policy(dataset: &Dataset) -> Policy {
    let mut bindings: Vec<Binding> = Vec::new();
    for entry in &dataset.access {
        let (Some(role), Some(member)) = (&entry.role, entry.member()) else {
            continue;
        };
        match bindings.iter_mut().find(|b| &b.role == role) {
            Some(binding) => {
                if !binding.members.contains(&member) {
                    binding.members.push(member);
                }
            }
            None => bindings.push(Binding::new(role.clone(), vec![member])),
        }
    }
    Policy {
        bindings,
        etag: dataset.etag.clone(),
        ..Default::default()
    }
}

/// Access list to PATCH: the current non-grant entries followed by the policy's grants.
pub fn merged_access(current: &Dataset, policy: &Policy) -> Result<Vec<AccessEntry>> {
    let grants = policy_as_dataset(policy)?.access;
    Ok(current
        .access
        .iter()
        .filter(|e| e.member().is_none())
        .cloned()
        .chain(grants)
        .collect())
}
