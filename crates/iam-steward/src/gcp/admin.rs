//! IAM admin API: service accounts and their keys

use super::transport::{HttpMethod, HttpRequest, Transport};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

/// Default IAM admin endpoint
pub const IAM_ENDPOINT: &str = "https://iam.googleapis.com/";

/// Domain suffix of user-managed service account emails
pub const SERVICE_ACCOUNT_EMAIL_DOMAIN: &str = "iam.gserviceaccount.com";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccount {
    /// `projects/{project}/serviceAccounts/{email}`
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub unique_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccountKey {
    /// `projects/{project}/serviceAccounts/{email}/keys/{id}`
    pub name: String,
    /// Base64 encoded credentials file
    #[serde(default)]
    pub private_key_data: String,
    #[serde(default)]
    pub private_key_type: String,
    #[serde(default)]
    pub key_algorithm: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_after_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_before_time: Option<String>,
}

impl ServiceAccountKey {
    /// Trailing key id
    pub fn id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or_default()
    }
}

/// Resource name of a service account in `project`
pub fn service_account_name(project: &str, email: &str) -> String {
    format!("projects/{project}/serviceAccounts/{email}")
}

/// Deterministic email of an account created with `account_id` in `project`
pub fn service_account_email(account_id: &str, project: &str) -> String {
    format!("{account_id}@{project}.{SERVICE_ACCOUNT_EMAIL_DOMAIN}")
}

/// IAM admin calls over a transport.
pub struct IamAdmin<'a, T> {
    transport: &'a T,
    endpoint: &'a str,
}

impl<'a, T: Transport> IamAdmin<'a, T> {
    pub fn new(transport: &'a T, endpoint: &'a str) -> Self {
        Self {
            transport,
            endpoint,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.endpoint.trim_end_matches('/'), path)
    }

    pub async fn create_service_account(
        &self,
        project: &str,
        account_id: &str,
        display_name: &str,
    ) -> Result<ServiceAccount> {
        info!(project, account_id, "Creating service account");
        let request = HttpRequest::new(
            HttpMethod::Post,
            self.url(&format!("projects/{project}/serviceAccounts")),
        )
        .with_json(json!({
            "accountId": account_id,
            "serviceAccount": { "displayName": display_name }
        }));
        let value = self.transport.execute(request).await?;
        serde_json::from_value(value).map_err(Error::codec("service account"))
    }

    /// Look up an account by resource name; `projects/-/serviceAccounts/{email}` works for any project.
    pub async fn get_service_account(&self, name: &str) -> Result<ServiceAccount> {
        let value = self
            .transport
            .execute(HttpRequest::new(HttpMethod::Get, self.url(name)))
            .await?;
        serde_json::from_value(value).map_err(Error::codec("service account"))
    }

    /// Delete an account. An account that is already gone counts as deleted.
    pub async fn delete_service_account(&self, name: &str) -> Result<()> {
        match self
            .transport
            .execute(HttpRequest::new(HttpMethod::Delete, self.url(name)))
            .await
        {
            Ok(_) => {
                info!(service_account = %name, "Deleted service account");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(service_account = %name, "Service account already deleted");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn create_key(&self, service_account: &str) -> Result<ServiceAccountKey> {
        let request = HttpRequest::new(
            HttpMethod::Post,
            self.url(&format!("{service_account}/keys")),
        )
        .with_json(json!({
            "privateKeyType": "TYPE_GOOGLE_CREDENTIALS_FILE",
            "keyAlgorithm": "KEY_ALG_RSA_2048"
        }));
        let value = self.transport.execute(request).await?;
        let key: ServiceAccountKey =
            serde_json::from_value(value).map_err(Error::codec("service account key"))?;
        info!(service_account, key_id = %key.id(), "Created service account key");
        Ok(key)
    }

    /// Delete a key. 404 and 403 both mean the key (or its account) is gone.
    pub async fn delete_key(&self, key_name: &str) -> Result<()> {
        match self
            .transport
            .execute(HttpRequest::new(HttpMethod::Delete, self.url(key_name)))
            .await
        {
            Ok(_) => {
                info!(key = %key_name, "Deleted service account key");
                Ok(())
            }
            Err(e) if e.is_not_found() || e.is_forbidden() => {
                debug!(key = %key_name, error = %e, "Service account key already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
