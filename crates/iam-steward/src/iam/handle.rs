//! Reading and writing policies through a [`Transport`]

use super::dataset::{dataset_as_policy, merged_access, Dataset};
use super::locator::ParsedResource;
use super::policy::{Policy, PolicyDelta};
use super::registry::PolicyShape;
use super::request::{get_policy_request, set_policy_request};
use crate::error::{Error, Result};
use crate::gcp::Transport;
use serde_json::json;
use tracing::debug;

/// Policy operations against one transport.
pub struct PolicyHandle<'a, T> {
    transport: &'a T,
}

impl<'a, T: Transport> PolicyHandle<'a, T> {
    pub fn new(transport: &'a T) -> Self {
        Self { transport }
    }

    pub async fn get_policy(&self, resource: &ParsedResource) -> Result<Policy> {
        match resource.resource.shape {
            PolicyShape::Iam => {
                let value = self.transport.execute(get_policy_request(resource)?).await?;
                serde_json::from_value(value).map_err(Error::codec("IAM policy"))
            }
            PolicyShape::DatasetAcl => Ok(dataset_as_policy(&self.get_dataset(resource).await?)),
        }
    }

    /// Write `policy`, returning the stored policy (with its new etag).
    pub async fn set_policy(&self, resource: &ParsedResource, policy: &Policy) -> Result<Policy> {
        match resource.resource.shape {
            PolicyShape::Iam => {
                let document = serde_json::to_value(policy).map_err(Error::codec("IAM policy"))?;
                let value = self
                    .transport
                    .execute(set_policy_request(resource, document)?)
                    .await?;
                serde_json::from_value(value).map_err(Error::codec("IAM policy"))
            }
            PolicyShape::DatasetAcl => {
                // Re-read so views and other non-member entries are written back
                let current = self.get_dataset(resource).await?;
                let access = merged_access(&current, policy)?;
                // Guard against writes since the read the policy came from
                let etag = if policy.etag.is_empty() {
                    &current.etag
                } else {
                    &policy.etag
                };
                let mut request = set_policy_request(resource, json!({ "access": access }))?;
                if !etag.is_empty() {
                    request = request.with_header("If-Match", etag.as_str());
                }
                let value = self.transport.execute(request).await?;
                let updated: Dataset =
                    serde_json::from_value(value).map_err(Error::codec("BigQuery dataset"))?;
                Ok(dataset_as_policy(&updated))
            }
        }
    }

    /// One read-diff-write pass. Returns whether a write was issued.
    ///
    /// Callers retry the whole pass so an etag conflict re-reads the policy.
    pub async fn update_bindings(
        &self,
        resource: &ParsedResource,
        to_add: Option<&PolicyDelta>,
        to_remove: Option<&PolicyDelta>,
    ) -> Result<bool> {
        let current = self.get_policy(resource).await?;
        let (changed, updated) = current.changed_bindings(to_add, to_remove);
        if !changed {
            debug!(resource = %resource.identifier, "Policy already up to date");
            return Ok(false);
        }
        self.set_policy(resource, &updated).await?;
        debug!(resource = %resource.identifier, "Policy updated");
        Ok(true)
    }

    async fn get_dataset(&self, resource: &ParsedResource) -> Result<Dataset> {
        let value = self.transport.execute(get_policy_request(resource)?).await?;
        serde_json::from_value(value).map_err(Error::codec("BigQuery dataset"))
    }
}
