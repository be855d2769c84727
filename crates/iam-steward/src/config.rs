//! Engine configuration, persisted alongside the managed records

use crate::error::{Error, Result};
use crate::gcp::admin::IAM_ENDPOINT;
use crate::gcp::Invalidate;
use crate::retry::RetryConfig;
use crate::storage::{get_json, put_json, Storage};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

/// Storage key holding the configuration
pub const CONFIG_KEY: &str = "config";

/// Default prefix for generated service account ids
pub const DEFAULT_ACCOUNT_PREFIX: &str = "steward";

/// Default per-request HTTP timeout in seconds
pub const DEFAULT_REQUEST_TIMEOUT: u64 = 60;

/// Longest prefix that still leaves room for a name and the random suffix
const MAX_ACCOUNT_PREFIX_LEN: usize = 12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StewardConfig {
    /// IAM admin API endpoint
    #[serde(default = "default_iam_endpoint")]
    pub iam_endpoint: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Per-request HTTP timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    /// Prefix of generated service account ids
    #[serde(default = "default_account_prefix")]
    pub account_prefix: String,
    #[serde(default)]
    pub retry: RetryConfig,
}

// Serde default functions for struct field defaults

pub fn default_iam_endpoint() -> String {
    IAM_ENDPOINT.to_string()
}

pub fn default_user_agent() -> String {
    format!("iam-steward/{}", env!("CARGO_PKG_VERSION"))
}

pub fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT
}

pub fn default_account_prefix() -> String {
    DEFAULT_ACCOUNT_PREFIX.to_string()
}

impl Default for StewardConfig {
    fn default() -> Self {
        Self {
            iam_endpoint: default_iam_endpoint(),
            user_agent: default_user_agent(),
            request_timeout: default_request_timeout(),
            account_prefix: default_account_prefix(),
            retry: RetryConfig::default(),
        }
    }
}

impl StewardConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn validate(&self) -> Result<()> {
        let prefix = &self.account_prefix;
        if prefix.len() > MAX_ACCOUNT_PREFIX_LEN {
            return Err(Error::InvalidInput(format!(
                "account_prefix must be at most {MAX_ACCOUNT_PREFIX_LEN} characters"
            )));
        }
        if !prefix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(Error::InvalidInput(
                "account_prefix may only contain lowercase letters, digits and hyphens".into(),
            ));
        }
        if prefix.starts_with(|c: char| !c.is_ascii_lowercase()) {
            return Err(Error::InvalidInput(
                "account_prefix must start with a lowercase letter".into(),
            ));
        }
        if self.retry.max_delay < self.retry.initial_delay {
            return Err(Error::InvalidInput(
                "retry.max_delay must not be shorter than retry.initial_delay".into(),
            ));
        }
        Ok(())
    }
}

/// Reads and writes the persisted configuration.
///
/// Every successful write invalidates the dependent client cache.
pub struct ConfigStore<'a, S> {
    storage: &'a S,
    dependents: &'a dyn Invalidate,
}

impl<'a, S: Storage> ConfigStore<'a, S> {
    pub fn new(storage: &'a S, dependents: &'a dyn Invalidate) -> Self {
        Self {
            storage,
            dependents,
        }
    }

    /// Stored configuration, or defaults if none has been written
    pub async fn load(&self) -> Result<StewardConfig> {
        Ok(get_json(self.storage, CONFIG_KEY, "configuration")
            .await?
            .unwrap_or_default())
    }

    pub async fn save(&self, config: &StewardConfig) -> Result<()> {
        config.validate()?;
        put_json(self.storage, CONFIG_KEY, config, "configuration").await?;
        self.dependents.invalidate();
        info!(iam_endpoint = %config.iam_endpoint, "Configuration updated");
        Ok(())
    }

    pub async fn delete(&self) -> Result<()> {
        self.storage.delete(CONFIG_KEY).await?;
        self.dependents.invalidate();
        Ok(())
    }
}
