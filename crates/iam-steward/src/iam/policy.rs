//! IAM policy documents and the binding diff.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::collections::BTreeSet;

const SERVICE_ACCOUNT_MEMBER_PREFIX: &str = "serviceAccount:";

/// An IAM policy as returned by `getIamPolicy`.
///
/// Fields the engine does not interpret (`auditConfigs` and friends) are kept
/// in `extra` so a read-modify-write never drops them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bindings: Vec<Binding>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub etag: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub version: i32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn is_zero(v: &i32) -> bool {
    *v == 0
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub role: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Expr>,
}

impl Binding {
    pub fn new(role: impl Into<String>, members: Vec<String>) -> Self {
        Self {
            role: role.into(),
            members,
            condition: None,
        }
    }
}

/// CEL condition attached to a binding
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub expression: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// A set of roles granted to (or revoked from) one service account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDelta {
    pub roles: BTreeSet<String>,
    pub email: String,
}

impl PolicyDelta {
    pub fn new<I, R>(roles: I, email: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
            email: email.into(),
        }
    }

    /// IAM member string for the delta's service account
    pub fn member(&self) -> String {
        service_account_member(&self.email)
    }
}

pub fn service_account_member(email: &str) -> String {
    format!("{SERVICE_ACCOUNT_MEMBER_PREFIX}{email}")
}

impl Policy {
    pub fn add_bindings(&self, to_add: &PolicyDelta) -> (bool, Cow<'_, Policy>) {
        self.changed_bindings(Some(to_add), None)
    }

    pub fn remove_bindings(&self, to_remove: &PolicyDelta) -> (bool, Cow<'_, Policy>) {
        self.changed_bindings(None, Some(to_remove))
    }

    /// Apply an add and/or remove delta.
    ///
    /// Only unconditional bindings are edited: a conditional binding is carried
    /// over untouched even if its role is in the delta, and an added role gets
    /// its own unconditional binding. When no membership actually changes the
    /// original policy is returned borrowed, so callers can skip the write.
    pub fn changed_bindings(
        &self,
        to_add: Option<&PolicyDelta>,
        to_remove: Option<&PolicyDelta>,
    ) -> (bool, Cow<'_, Policy>) {
        if to_add.is_none() && to_remove.is_none() {
            return (false, Cow::Borrowed(self));
        }

        let add_member = to_add.map(PolicyDelta::member);
        let remove_member = to_remove.map(PolicyDelta::member);

        let mut changed = false;
        let mut already_present = BTreeSet::new();
        let mut bindings = Vec::with_capacity(self.bindings.len());

        for binding in &self.bindings {
            if binding.condition.is_some() {
                bindings.push(binding.clone());
                continue;
            }

            let mut members = binding.members.clone();
            let mut touched = false;

            if let (Some(delta), Some(member)) = (to_add, &add_member) {
                if delta.roles.contains(&binding.role) {
                    already_present.insert(binding.role.as_str());
                    if !members.contains(member) {
                        members.push(member.clone());
                        touched = true;
                    }
                }
            }

            if let (Some(delta), Some(member)) = (to_remove, &remove_member) {
                if delta.roles.contains(&binding.role) {
                    let before = members.len();
                    members.retain(|m| m != member);
                    touched |= members.len() != before;
                }
            }

            changed |= touched;
            if touched && members.is_empty() {
                continue;
            }
            bindings.push(Binding {
                role: binding.role.clone(),
                members,
                condition: None,
            });
        }

        if let (Some(delta), Some(member)) = (to_add, &add_member) {
            for role in &delta.roles {
                if !already_present.contains(role.as_str()) {
                    changed = true;
                    bindings.push(Binding::new(role.clone(), vec![member.clone()]));
                }
            }
        }

        if !changed {
            return (false, Cow::Borrowed(self));
        }

        (
            true,
            Cow::Owned(Policy {
                bindings,
                etag: self.etag.clone(),
                version: self.version,
                extra: self.extra.clone(),
            }),
        )
    }

    /// Roles held unconditionally by `member`
    pub fn roles_for(&self, member: &str) -> BTreeSet<&str> {
        self.bindings
            .iter()
            .filter(|b| b.condition.is_none() && b.members.iter().any(|m| m == member))
            .map(|b| b.role.as_str())
            .collect()
    }
}
