//! In-process fake of the Google Cloud APIs the engine talks to
//!
//! Serves the IAM admin API (service accounts and keys), get/set IAM policy on
//! any resource the registry knows, and BigQuery dataset access lists. Supports
//! etag conflicts, eventual consistency of new accounts and injected failures.
//!
//! Clones share state, so the fake is also its own [`TransportProvider`].

use iam_steward::config::StewardConfig;
use iam_steward::error::classify_api_error;
use iam_steward::gcp::{HttpMethod, HttpRequest, Invalidate, Transport, TransportProvider};
use iam_steward::iam::{Policy, PolicyHandle, Registry};
use iam_steward::Result;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

const IAM_PREFIX: &str = "https://iam.googleapis.com/v1/";
const SERVICE_ACCOUNT_DOMAIN: &str = "iam.gserviceaccount.com";

#[derive(Debug, Clone)]
enum UrlPattern {
    Contains(String),
    EndsWith(String),
}

impl UrlPattern {
    fn matches(&self, url: &str) -> bool {
        match self {
            UrlPattern::Contains(s) => url.contains(s.as_str()),
            UrlPattern::EndsWith(s) => url.ends_with(s.as_str()),
        }
    }
}

/// A failure to return for matching requests.
#[derive(Debug, Clone)]
struct FailRule {
    method: Option<HttpMethod>,
    pattern: UrlPattern,
    status: u16,
    message: String,
    remaining: u32,
}

#[derive(Debug, Default)]
struct State {
    /// email -> account resource
    accounts: BTreeMap<String, Value>,
    /// key name -> owning email
    keys: BTreeMap<String, String>,
    /// policy key -> policy document
    policies: HashMap<String, Value>,
    /// dataset path -> dataset resource
    datasets: HashMap<String, Value>,
    missing: HashSet<String>,
    etag_counter: u64,
    propagation_failures: u32,
    stale_etags: u32,
    rules: Vec<FailRule>,
    requests: Vec<(HttpMethod, String)>,
    account_deletes: HashMap<String, u32>,
    accounts_created: u32,
    invalidations: u32,
    transports_handed_out: u32,
}

/// Fake Google Cloud backend implementing [`Transport`].
#[derive(Debug, Clone, Default)]
pub struct FakeGcp {
    state: Arc<Mutex<State>>,
}

fn error(status: u16, canonical: &str, message: &str) -> iam_steward::Error {
    let body = json!({
        "error": { "code": status, "message": message, "status": canonical }
    });
    classify_api_error(status, body.to_string().as_bytes())
}

fn not_found(what: &str) -> iam_steward::Error {
    error(404, "NOT_FOUND", &format!("{what} not found"))
}

/// Path of a policy URL with the method suffix and query removed
fn policy_key(url: &str) -> String {
    let path = url.split('?').next().unwrap_or(url);
    let path = path.split_once("://").map(|(_, rest)| rest).unwrap_or(path);
    let path = path.split_once('/').map(|(_, rest)| rest).unwrap_or(path);
    for suffix in [":getIamPolicy", ":setIamPolicy", "/getIamPolicy", "/setIamPolicy", "/iam"] {
        if let Some(stripped) = path.strip_suffix(suffix) {
            return stripped.to_string();
        }
    }
    path.to_string()
}

fn is_policy_call(url: &str) -> bool {
    let path = url.split('?').next().unwrap_or(url);
    path.ends_with("IamPolicy") || path.ends_with("/iam")
}

fn is_dataset_call(url: &str) -> bool {
    url.contains("bigquery.googleapis.com/bigquery/v2/") && !is_policy_call(url)
}

impl FakeGcp {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Add an externally owned service account.
    pub fn add_account(&self, project: &str, email: &str) {
        self.state().accounts.insert(
            email.to_string(),
            json!({
                "name": format!("projects/{project}/serviceAccounts/{email}"),
                "email": email,
                "projectId": project,
                "uniqueId": Uuid::new_v4().simple().to_string(),
            }),
        );
    }

    pub fn account_exists(&self, email: &str) -> bool {
        self.state().accounts.contains_key(email)
    }

    pub fn accounts(&self) -> Vec<String> {
        self.state().accounts.keys().cloned().collect()
    }

    pub fn accounts_created(&self) -> u32 {
        self.state().accounts_created
    }

    /// Successful deletions of `email`
    pub fn delete_count(&self, email: &str) -> u32 {
        self.state().account_deletes.get(email).copied().unwrap_or(0)
    }

    pub fn keys_for(&self, email: &str) -> Vec<String> {
        self.state()
            .keys
            .iter()
            .filter(|(_, owner)| owner.as_str() == email)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn key_exists(&self, key_name: &str) -> bool {
        self.state().keys.contains_key(key_name)
    }

    /// Seed the policy of `identifier`.
    pub fn set_policy(&self, identifier: &str, policy: Value) {
        let key = Self::key_for(identifier);
        self.state().policies.insert(key, policy);
    }

    /// Seed a BigQuery dataset resource at `projects/{p}/datasets/{d}`.
    pub fn set_dataset(&self, path: &str, dataset: Value) {
        self.state()
            .datasets
            .insert(format!("bigquery/v2/{path}"), dataset);
    }

    pub fn dataset(&self, path: &str) -> Option<Value> {
        self.state()
            .datasets
            .get(&format!("bigquery/v2/{path}"))
            .cloned()
    }

    /// Make `identifier` answer 404 to policy reads and writes.
    pub fn mark_missing(&self, identifier: &str) {
        let key = Self::key_for(identifier);
        self.state().missing.insert(key);
    }

    /// The next `n` policy writes naming a service account created here fail
    /// with the 400 IAM returns before a new account has propagated.
    pub fn propagation_delay(&self, n: u32) {
        self.state().propagation_failures = n;
    }

    /// The next `n` policy and dataset writes fail with an etag conflict.
    pub fn conflicting_writes(&self, n: u32) {
        self.state().stale_etags = n;
    }

    /// Fail the next `times` requests whose URL contains `url_contains`.
    pub fn fail(&self, method: Option<HttpMethod>, url_contains: &str, status: u16, times: u32) {
        self.push_rule(method, UrlPattern::Contains(url_contains.to_string()), status, times);
    }

    /// Fail the next `times` requests whose URL ends with `suffix`.
    pub fn fail_ending(&self, method: Option<HttpMethod>, suffix: &str, status: u16, times: u32) {
        self.push_rule(method, UrlPattern::EndsWith(suffix.to_string()), status, times);
    }

    fn push_rule(&self, method: Option<HttpMethod>, pattern: UrlPattern, status: u16, times: u32) {
        self.state().rules.push(FailRule {
            method,
            message: format!("injected failure for {pattern:?}"),
            pattern,
            status,
            remaining: times,
        });
    }

    /// Fail the next `times` matching requests with `message` in the error body.
    pub fn reject(&self, method: Option<HttpMethod>, url_contains: &str, status: u16, message: &str, times: u32) {
        self.state().rules.push(FailRule {
            method,
            pattern: UrlPattern::Contains(url_contains.to_string()),
            status,
            message: message.to_string(),
            remaining: times,
        });
    }

    pub fn clear_failures(&self) {
        self.state().rules.clear();
    }

    pub fn requests(&self) -> Vec<(HttpMethod, String)> {
        self.state().requests.clone()
    }

    /// Number of policy writes issued so far
    pub fn policy_writes(&self) -> usize {
        self.state()
            .requests
            .iter()
            .filter(|(method, url)| {
                url.contains("setIamPolicy")
                    || (*method == HttpMethod::Put && url.ends_with("/iam"))
                    || (*method == HttpMethod::Patch && is_dataset_call(url))
            })
            .count()
    }

    /// Times a configuration change dropped derived transports
    pub fn invalidations(&self) -> u32 {
        self.state().invalidations
    }

    /// Transports handed out, one per engine operation
    pub fn transports_handed_out(&self) -> u32 {
        self.state().transports_handed_out
    }

    /// Current policy of `identifier`, read through the engine's own policy handle.
    pub async fn policy(&self, identifier: &str) -> Result<Policy> {
        let parsed = Registry::builtin().parse(identifier)?;
        PolicyHandle::new(self).get_policy(&parsed).await
    }

    fn key_for(identifier: &str) -> String {
        match Registry::builtin()
            .parse(identifier)
            .and_then(|parsed| iam_steward::iam::request::get_policy_request(&parsed))
        {
            Ok(request) => policy_key(&request.url),
            Err(_) => identifier.to_string(),
        }
    }

    fn next_etag(state: &mut State) -> String {
        state.etag_counter += 1;
        format!("etag-{}", state.etag_counter)
    }

    fn handle(&self, request: &HttpRequest) -> Result<Value> {
        let mut state = self.state();
        state
            .requests
            .push((request.method, request.url.clone()));

        if let Some(rule) = state.rules.iter_mut().find(|r| {
            r.remaining > 0
                && r.method.is_none_or(|m| m == request.method)
                && r.pattern.matches(&request.url)
        }) {
            rule.remaining -= 1;
            let (status, message) = (rule.status, rule.message.clone());
            let canonical = match status {
                404 => "NOT_FOUND",
                403 => "PERMISSION_DENIED",
                409 => "ABORTED",
                s if s >= 500 => "UNAVAILABLE",
                _ => "INVALID_ARGUMENT",
            };
            return Err(error(status, canonical, &message));
        }

        if let Some(path) = request.url.strip_prefix(IAM_PREFIX) {
            return Self::admin(&mut state, request.method, path, request.body.as_ref());
        }
        if is_dataset_call(&request.url) {
            return Self::dataset_call(&mut state, request);
        }
        if is_policy_call(&request.url) {
            return Self::policy_call(&mut state, request);
        }
        Err(not_found(&request.url))
    }

    fn admin(state: &mut State, method: HttpMethod, path: &str, body: Option<&Value>) -> Result<Value> {
        let segments: Vec<&str> = path.split('/').collect();
        match (method, segments.as_slice()) {
            (HttpMethod::Post, ["projects", project, "serviceAccounts"]) => {
                let account_id = body
                    .and_then(|b| b["accountId"].as_str())
                    .unwrap_or_default();
                let email = format!("{account_id}@{project}.{SERVICE_ACCOUNT_DOMAIN}");
                if state.accounts.contains_key(&email) {
                    return Err(error(409, "ALREADY_EXISTS", "account already exists"));
                }
                let display_name = body
                    .and_then(|b| b["serviceAccount"]["displayName"].as_str())
                    .unwrap_or_default();
                let account = json!({
                    "name": format!("projects/{project}/serviceAccounts/{email}"),
                    "email": email,
                    "projectId": project,
                    "uniqueId": Uuid::new_v4().simple().to_string(),
                    "displayName": display_name,
                });
                state.accounts.insert(email, account.clone());
                state.accounts_created += 1;
                Ok(account)
            }
            (HttpMethod::Get, ["projects", _, "serviceAccounts", email]) => state
                .accounts
                .get(*email)
                .cloned()
                .ok_or_else(|| not_found(email)),
            (HttpMethod::Delete, ["projects", _, "serviceAccounts", email]) => {
                if state.accounts.remove(*email).is_none() {
                    return Err(not_found(email));
                }
                state.keys.retain(|_, owner| owner != email);
                *state.account_deletes.entry(email.to_string()).or_default() += 1;
                Ok(json!({}))
            }
            (HttpMethod::Post, ["projects", project, "serviceAccounts", email, "keys"]) => {
                if !state.accounts.contains_key(*email) {
                    return Err(not_found(email));
                }
                let name = format!(
                    "projects/{project}/serviceAccounts/{email}/keys/{}",
                    Uuid::new_v4().simple()
                );
                state.keys.insert(name.clone(), email.to_string());
                Ok(json!({
                    "name": name,
                    "privateKeyData": "eyJ0eXBlIjoic2VydmljZV9hY2NvdW50In0=",
                    "privateKeyType": "TYPE_GOOGLE_CREDENTIALS_FILE",
                    "keyAlgorithm": "KEY_ALG_RSA_2048",
                }))
            }
            (HttpMethod::Delete, ["projects", _, "serviceAccounts", email, "keys", _]) => {
                if !state.accounts.contains_key(*email) {
                    return Err(error(403, "PERMISSION_DENIED", "account is gone"));
                }
                match state.keys.remove(path) {
                    Some(_) => Ok(json!({})),
                    None => Err(not_found(path)),
                }
            }
            _ => Err(not_found(path)),
        }
    }

    /// Reject writes naming an account that has not "propagated" yet.
    fn check_propagation(state: &mut State, policy: &Value) -> Result<()> {
        if state.propagation_failures == 0 {
            return Ok(());
        }
        let members = policy["bindings"]
            .as_array()
            .into_iter()
            .flatten()
            .flat_map(|b| b["members"].as_array().into_iter().flatten())
            .filter_map(Value::as_str);
        for member in members {
            if let Some(email) = member.strip_prefix("serviceAccount:") {
                if state.accounts.contains_key(email) {
                    state.propagation_failures -= 1;
                    return Err(error(
                        400,
                        "INVALID_ARGUMENT",
                        &format!("Service account {email} does not exist."),
                    ));
                }
            }
        }
        Ok(())
    }

    fn policy_call(state: &mut State, request: &HttpRequest) -> Result<Value> {
        let key = policy_key(&request.url);
        if state.missing.contains(&key) {
            return Err(not_found(&key));
        }
        let is_set = request.url.contains("setIamPolicy")
            || (request.method == HttpMethod::Put && request.url.ends_with("/iam"));

        if !state.policies.contains_key(&key) {
            let etag = Self::next_etag(state);
            state
                .policies
                .insert(key.clone(), json!({ "version": 1, "etag": etag, "bindings": [] }));
        }
        if !is_set {
            return Ok(state.policies[&key].clone());
        }

        let body = request.body.clone().unwrap_or(Value::Null);
        let mut policy = match body.get("policy") {
            Some(policy) => policy.clone(),
            None => body,
        };
        let current_etag = state.policies[&key]["etag"].as_str().unwrap_or_default().to_string();
        let sent_etag = policy["etag"].as_str().unwrap_or_default().to_string();
        if state.stale_etags > 0 || (!sent_etag.is_empty() && sent_etag != current_etag) {
            state.stale_etags = state.stale_etags.saturating_sub(1);
            // Someone else wrote in between
            let etag = Self::next_etag(state);
            if let Some(stored) = state.policies.get_mut(&key) {
                stored["etag"] = json!(etag);
            }
            return Err(error(409, "ABORTED", "There were concurrent policy changes."));
        }
        Self::check_propagation(state, &policy)?;

        policy["etag"] = json!(Self::next_etag(state));
        state.policies.insert(key, policy.clone());
        Ok(policy)
    }

    fn dataset_call(state: &mut State, request: &HttpRequest) -> Result<Value> {
        let key = policy_key(&request.url);
        if state.missing.contains(&key) {
            return Err(not_found(&key));
        }
        if !state.datasets.contains_key(&key) {
            let etag = Self::next_etag(state);
            state
                .datasets
                .insert(key.clone(), json!({ "access": [], "etag": etag }));
        }
        match request.method {
            HttpMethod::Get => Ok(state.datasets[&key].clone()),
            HttpMethod::Patch => {
                let current_etag = state.datasets[&key]["etag"].as_str().unwrap_or_default().to_string();
                let stale = request.header("If-Match").is_some_and(|sent| sent != current_etag);
                if state.stale_etags > 0 || stale {
                    state.stale_etags = state.stale_etags.saturating_sub(1);
                    let etag = Self::next_etag(state);
                    if let Some(stored) = state.datasets.get_mut(&key) {
                        stored["etag"] = json!(etag);
                    }
                    return Err(error(412, "FAILED_PRECONDITION", "Precondition check failed."));
                }
                let access = request
                    .body
                    .as_ref()
                    .map(|b| b["access"].clone())
                    .unwrap_or_else(|| json!([]));
                let etag = Self::next_etag(state);
                let dataset = state
                    .datasets
                    .get_mut(&key)
                    .ok_or_else(|| not_found(&key))?;
                dataset["access"] = access;
                dataset["etag"] = json!(etag);
                Ok(dataset.clone())
            }
            _ => Err(not_found(&key)),
        }
    }
}

impl Transport for FakeGcp {
    async fn execute(&self, request: HttpRequest) -> Result<Value> {
        self.handle(&request)
    }
}

impl Invalidate for FakeGcp {
    fn invalidate(&self) {
        self.state().invalidations += 1;
    }
}

impl TransportProvider for FakeGcp {
    type Transport = FakeGcp;

    fn transport(&self, _config: &StewardConfig) -> Result<FakeGcp> {
        self.state().transports_handed_out += 1;
        Ok(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_keys_ignore_method_and_query() {
        assert_eq!(
            policy_key("https://cloudresourcemanager.googleapis.com/v3/projects/p:getIamPolicy"),
            "v3/projects/p"
        );
        assert_eq!(
            policy_key("https://storage.googleapis.com/storage/v1/b/bucket/iam?optionsRequestedPolicyVersion=3"),
            "storage/v1/b/bucket"
        );
        assert_eq!(
            policy_key("https://bigquery.googleapis.com/bigquery/v2/projects/p/datasets/d"),
            "bigquery/v2/projects/p/datasets/d"
        );
    }

    #[tokio::test]
    async fn policies_round_trip_through_the_engine() {
        let fake = FakeGcp::new();
        fake.set_policy(
            "projects/p",
            json!({ "etag": "seed", "bindings": [{ "role": "roles/owner", "members": ["user:a@example.com"] }] }),
        );
        let policy = fake.policy("projects/p").await.unwrap();
        assert_eq!(policy.bindings.len(), 1);
        assert_eq!(policy.etag, "seed");
    }

    #[tokio::test]
    async fn admin_accounts_and_keys() {
        let fake = FakeGcp::new();
        let created = fake
            .execute(
                HttpRequest::new(HttpMethod::Post, format!("{IAM_PREFIX}projects/p/serviceAccounts"))
                    .with_json(json!({ "accountId": "sa-1" })),
            )
            .await
            .unwrap();
        assert_eq!(created["email"], "sa-1@p.iam.gserviceaccount.com");
        assert!(fake.account_exists("sa-1@p.iam.gserviceaccount.com"));

        let key = fake
            .execute(HttpRequest::new(
                HttpMethod::Post,
                format!("{IAM_PREFIX}projects/p/serviceAccounts/sa-1@p.iam.gserviceaccount.com/keys"),
            ))
            .await
            .unwrap();
        assert!(fake.key_exists(key["name"].as_str().unwrap()));
    }
}
