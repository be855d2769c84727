//! REST templates for every resource type whose IAM policy can be managed.
//!
//! Entries are keyed by type key, then service, then API version.

use crate::gcp::HttpMethod;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// How the `setIamPolicy` body wraps the policy document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFormat {
    /// The document itself is the body
    Bare,
    /// `{"policy": <document>}`
    Wrapped,
}

impl BodyFormat {
    pub fn wrap(self, document: Value) -> Value {
        match self {
            BodyFormat::Bare => document,
            BodyFormat::Wrapped => json!({ "policy": document }),
        }
    }
}

/// What the remote calls a "policy"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyShape {
    Iam,
    /// BigQuery dataset `access` list
    DatasetAcl,
}

/// How to request policy version 3 on `getIamPolicy`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionOption {
    /// Resource type has no conditional bindings
    Unsupported,
    /// Query parameter on a GET
    Query(&'static str),
    /// `{"options": {"requestedPolicyVersion": 3}}` on a POST
    Body,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestMethod {
    pub http_method: HttpMethod,
    pub base_url: &'static str,
    pub path: &'static str,
    pub body_format: BodyFormat,
}

impl RestMethod {
    /// Base URL joined with the unexpanded path; used for self-link prefix matching
    pub fn template_url(&self) -> String {
        format!("{}{}", self.base_url, self.path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestResource {
    pub name: &'static str,
    pub type_key: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub preferred: bool,
    pub shape: PolicyShape,
    pub policy_version: VersionOption,
    pub get: RestMethod,
    pub set: RestMethod,
    /// collection id -> path parameter name
    pub replacement_keys: &'static [(&'static str, &'static str)],
}

impl RestResource {
    pub fn supports_conditions(&self) -> bool {
        self.policy_version != VersionOption::Unsupported
    }

    pub fn is_prerelease(&self) -> bool {
        self.version.contains("alpha") || self.version.contains("beta")
    }
}

type VersionMap = BTreeMap<&'static str, RestResource>;
type ServiceMap = BTreeMap<&'static str, VersionMap>;

/// Immutable lookup table built once at startup.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: BTreeMap<&'static str, ServiceMap>,
}

static BUILTIN: LazyLock<Registry> = LazyLock::new(|| Registry::new(builtin_resources()));

impl Registry {
    pub fn new(resources: impl IntoIterator<Item = RestResource>) -> Self {
        let mut entries: BTreeMap<&'static str, ServiceMap> = BTreeMap::new();
        for r in resources {
            entries
                .entry(r.type_key)
                .or_default()
                .entry(r.service)
                .or_default()
                .insert(r.version, r);
        }
        Self { entries }
    }

    /// Registry of Google Cloud resource types known to this crate
    pub fn builtin() -> &'static Registry {
        &BUILTIN
    }

    pub fn services(&self, type_key: &str) -> Option<&ServiceMap> {
        self.entries.get(type_key)
    }

    pub fn type_keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries
            .values()
            .flat_map(|s| s.values())
            .map(|v| v.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `v1/{+resource}:getIamPolicy` style resources (POST for both calls)
#[allow(clippy::too_many_arguments)]
fn resource_style(
    name: &'static str,
    type_key: &'static str,
    service: &'static str,
    version: &'static str,
    preferred: bool,
    policy_version: VersionOption,
    base_url: &'static str,
    get_path: &'static str,
    set_path: &'static str,
) -> RestResource {
    let get_method = match policy_version {
        VersionOption::Query(_) => HttpMethod::Get,
        _ => HttpMethod::Post,
    };
    RestResource {
        name,
        type_key,
        service,
        version,
        preferred,
        shape: PolicyShape::Iam,
        policy_version,
        get: RestMethod {
            http_method: get_method,
            base_url,
            path: get_path,
            body_format: BodyFormat::Bare,
        },
        set: RestMethod {
            http_method: HttpMethod::Post,
            base_url,
            path: set_path,
            body_format: BodyFormat::Wrapped,
        },
        replacement_keys: &[],
    }
}

/// Compute resources: explicit path parameters, GET with query option, POST set
#[allow(clippy::too_many_arguments)]
fn compute(
    name: &'static str,
    type_key: &'static str,
    version: &'static str,
    preferred: bool,
    base_url: &'static str,
    get_path: &'static str,
    set_path: &'static str,
    replacement_keys: &'static [(&'static str, &'static str)],
) -> RestResource {
    RestResource {
        name,
        type_key,
        service: "compute",
        version,
        preferred,
        shape: PolicyShape::Iam,
        policy_version: VersionOption::Query("optionsRequestedPolicyVersion"),
        get: RestMethod {
            http_method: HttpMethod::Get,
            base_url,
            path: get_path,
            body_format: BodyFormat::Bare,
        },
        set: RestMethod {
            http_method: HttpMethod::Post,
            base_url,
            path: set_path,
            body_format: BodyFormat::Wrapped,
        },
        replacement_keys,
    }
}

const V3_BODY: VersionOption = VersionOption::Body;
const V3_QUERY: VersionOption = VersionOption::Query("options.requestedPolicyVersion");
const NO_CONDITIONS: VersionOption = VersionOption::Unsupported;

const CRM: &str = "https://cloudresourcemanager.googleapis.com/";
const COMPUTE_V1: &str = "https://compute.googleapis.com/compute/v1/";
const COMPUTE_BETA: &str = "https://compute.googleapis.com/compute/beta/";
const COMPUTE_ALPHA: &str = "https://compute.googleapis.com/compute/alpha/";
const INSTANCE_KEYS: &[(&str, &str)] = &[("projects", "project"), ("zones", "zone"), ("instances", "resource")];

fn builtin_resources() -> Vec<RestResource> {
    let mut resources = vec![
        // Resource Manager
        RestResource {
            replacement_keys: &[("projects", "resource")],
            ..resource_style(
                "projects", "projects", "cloudresourcemanager", "v1", false, V3_BODY, CRM,
                "v1/projects/{resource}:getIamPolicy",
                "v1/projects/{resource}:setIamPolicy",
            )
        },
        resource_style(
            "projects", "projects", "cloudresourcemanager", "v3", true, V3_BODY, CRM,
            "v3/{+resource}:getIamPolicy",
            "v3/{+resource}:setIamPolicy",
        ),
        resource_style(
            "folders", "folders", "cloudresourcemanager", "v2", false, V3_BODY, CRM,
            "v2/{+resource}:getIamPolicy",
            "v2/{+resource}:setIamPolicy",
        ),
        resource_style(
            "folders", "folders", "cloudresourcemanager", "v3", true, V3_BODY, CRM,
            "v3/{+resource}:getIamPolicy",
            "v3/{+resource}:setIamPolicy",
        ),
        resource_style(
            "organizations", "organizations", "cloudresourcemanager", "v1", false, V3_BODY, CRM,
            "v1/{+resource}:getIamPolicy",
            "v1/{+resource}:setIamPolicy",
        ),
        resource_style(
            "organizations", "organizations", "cloudresourcemanager", "v3", true, V3_BODY, CRM,
            "v3/{+resource}:getIamPolicy",
            "v3/{+resource}:setIamPolicy",
        ),
        // IAM
        resource_style(
            "serviceAccounts", "projects/serviceAccounts", "iam", "v1", true, V3_BODY,
            "https://iam.googleapis.com/",
            "v1/{+resource}:getIamPolicy",
            "v1/{+resource}:setIamPolicy",
        ),
        // Pub/Sub
        resource_style(
            "topics", "projects/topics", "pubsub", "v1", true, NO_CONDITIONS,
            "https://pubsub.googleapis.com/",
            "v1/{+resource}:getIamPolicy",
            "v1/{+resource}:setIamPolicy",
        ),
        resource_style(
            "topics", "projects/topics", "pubsub", "v1beta2", false, NO_CONDITIONS,
            "https://pubsub.googleapis.com/",
            "v1beta2/{+resource}:getIamPolicy",
            "v1beta2/{+resource}:setIamPolicy",
        ),
        resource_style(
            "subscriptions", "projects/subscriptions", "pubsub", "v1", true, NO_CONDITIONS,
            "https://pubsub.googleapis.com/",
            "v1/{+resource}:getIamPolicy",
            "v1/{+resource}:setIamPolicy",
        ),
        resource_style(
            "snapshots", "projects/snapshots", "pubsub", "v1", true, NO_CONDITIONS,
            "https://pubsub.googleapis.com/",
            "v1/{+resource}:getIamPolicy",
            "v1/{+resource}:setIamPolicy",
        ),
        // Secret Manager
        resource_style(
            "secrets", "projects/secrets", "secretmanager", "v1", true, V3_QUERY,
            "https://secretmanager.googleapis.com/",
            "v1/{+resource}:getIamPolicy",
            "v1/{+resource}:setIamPolicy",
        ),
        resource_style(
            "secrets", "projects/secrets", "secretmanager", "v1beta1", false, V3_QUERY,
            "https://secretmanager.googleapis.com/",
            "v1beta1/{+resource}:getIamPolicy",
            "v1beta1/{+resource}:setIamPolicy",
        ),
        // Cloud KMS
        resource_style(
            "keyRings", "projects/locations/keyRings", "cloudkms", "v1", true, V3_QUERY,
            "https://cloudkms.googleapis.com/",
            "v1/{+resource}:getIamPolicy",
            "v1/{+resource}:setIamPolicy",
        ),
        resource_style(
            "cryptoKeys", "projects/locations/keyRings/cryptoKeys", "cloudkms", "v1", true, V3_QUERY,
            "https://cloudkms.googleapis.com/",
            "v1/{+resource}:getIamPolicy",
            "v1/{+resource}:setIamPolicy",
        ),
        // Spanner and Bigtable share the `projects/instances` type key
        resource_style(
            "instances", "projects/instances", "spanner", "v1", true, V3_BODY,
            "https://spanner.googleapis.com/",
            "v1/{+resource}:getIamPolicy",
            "v1/{+resource}:setIamPolicy",
        ),
        resource_style(
            "databases", "projects/instances/databases", "spanner", "v1", true, V3_BODY,
            "https://spanner.googleapis.com/",
            "v1/{+resource}:getIamPolicy",
            "v1/{+resource}:setIamPolicy",
        ),
        resource_style(
            "instances", "projects/instances", "bigtableadmin", "v2", true, V3_BODY,
            "https://bigtableadmin.googleapis.com/",
            "v2/{+resource}:getIamPolicy",
            "v2/{+resource}:setIamPolicy",
        ),
        resource_style(
            "tables", "projects/instances/tables", "bigtableadmin", "v2", true, V3_BODY,
            "https://bigtableadmin.googleapis.com/",
            "v2/{+resource}:getIamPolicy",
            "v2/{+resource}:setIamPolicy",
        ),
        // Serverless and artifacts
        resource_style(
            "functions", "projects/locations/functions", "cloudfunctions", "v1", false, V3_QUERY,
            "https://cloudfunctions.googleapis.com/",
            "v1/{+resource}:getIamPolicy",
            "v1/{+resource}:setIamPolicy",
        ),
        resource_style(
            "functions", "projects/locations/functions", "cloudfunctions", "v2", true, V3_QUERY,
            "https://cloudfunctions.googleapis.com/",
            "v2/{+resource}:getIamPolicy",
            "v2/{+resource}:setIamPolicy",
        ),
        resource_style(
            "services", "projects/locations/services", "run", "v1", false, V3_QUERY,
            "https://run.googleapis.com/",
            "v1/{+resource}:getIamPolicy",
            "v1/{+resource}:setIamPolicy",
        ),
        resource_style(
            "services", "projects/locations/services", "run", "v2", true, V3_QUERY,
            "https://run.googleapis.com/",
            "v2/{+resource}:getIamPolicy",
            "v2/{+resource}:setIamPolicy",
        ),
        resource_style(
            "repositories", "projects/locations/repositories", "artifactregistry", "v1", true, V3_QUERY,
            "https://artifactregistry.googleapis.com/",
            "v1/{+resource}:getIamPolicy",
            "v1/{+resource}:setIamPolicy",
        ),
        resource_style(
            "repositories", "projects/locations/repositories", "artifactregistry", "v1beta2", false, V3_QUERY,
            "https://artifactregistry.googleapis.com/",
            "v1beta2/{+resource}:getIamPolicy",
            "v1beta2/{+resource}:setIamPolicy",
        ),
        // BigQuery
        RestResource {
            name: "datasets",
            type_key: "projects/datasets",
            service: "bigquery",
            version: "v2",
            preferred: true,
            shape: PolicyShape::DatasetAcl,
            policy_version: NO_CONDITIONS,
            get: RestMethod {
                http_method: HttpMethod::Get,
                base_url: "https://bigquery.googleapis.com",
                path: "bigquery/v2/{+resource}",
                body_format: BodyFormat::Bare,
            },
            set: RestMethod {
                http_method: HttpMethod::Patch,
                base_url: "https://bigquery.googleapis.com",
                path: "bigquery/v2/{+resource}",
                body_format: BodyFormat::Bare,
            },
            replacement_keys: &[],
        },
        resource_style(
            "tables", "projects/datasets/tables", "bigquery", "v2", true, V3_BODY,
            "https://bigquery.googleapis.com/",
            "bigquery/v2/{+resource}:getIamPolicy",
            "bigquery/v2/{+resource}:setIamPolicy",
        ),
        resource_style(
            "routines", "projects/datasets/routines", "bigquery", "v2", true, V3_BODY,
            "https://bigquery.googleapis.com/",
            "bigquery/v2/{+resource}:getIamPolicy",
            "bigquery/v2/{+resource}:setIamPolicy",
        ),
        // Cloud Storage
        RestResource {
            name: "buckets",
            type_key: "buckets",
            service: "storage",
            version: "v1",
            preferred: true,
            shape: PolicyShape::Iam,
            policy_version: VersionOption::Query("optionsRequestedPolicyVersion"),
            get: RestMethod {
                http_method: HttpMethod::Get,
                base_url: "https://storage.googleapis.com/storage/v1/",
                path: "b/{bucket}/iam",
                body_format: BodyFormat::Bare,
            },
            set: RestMethod {
                http_method: HttpMethod::Put,
                base_url: "https://storage.googleapis.com/storage/v1/",
                path: "b/{bucket}/iam",
                body_format: BodyFormat::Bare,
            },
            replacement_keys: &[("buckets", "bucket")],
        },
        RestResource {
            name: "objects",
            type_key: "buckets/objects",
            service: "storage",
            version: "v1",
            preferred: true,
            shape: PolicyShape::Iam,
            policy_version: NO_CONDITIONS,
            get: RestMethod {
                http_method: HttpMethod::Get,
                base_url: "https://storage.googleapis.com/storage/v1/",
                path: "b/{bucket}/o/{object}/iam",
                body_format: BodyFormat::Bare,
            },
            set: RestMethod {
                http_method: HttpMethod::Put,
                base_url: "https://storage.googleapis.com/storage/v1/",
                path: "b/{bucket}/o/{object}/iam",
                body_format: BodyFormat::Bare,
            },
            replacement_keys: &[("buckets", "bucket"), ("objects", "object")],
        },
    ];

    // Compute Engine, one entry per API version
    for (version, preferred, base_url) in [
        ("v1", true, COMPUTE_V1),
        ("beta", false, COMPUTE_BETA),
        ("alpha", false, COMPUTE_ALPHA),
    ] {
        resources.push(compute(
            "instances",
            "projects/zones/instances",
            version,
            preferred,
            base_url,
            "projects/{project}/zones/{zone}/instances/{resource}/getIamPolicy",
            "projects/{project}/zones/{zone}/instances/{resource}/setIamPolicy",
            INSTANCE_KEYS,
        ));
    }
    resources.push(compute(
        "disks",
        "projects/zones/disks",
        "v1",
        true,
        COMPUTE_V1,
        "projects/{project}/zones/{zone}/disks/{resource}/getIamPolicy",
        "projects/{project}/zones/{zone}/disks/{resource}/setIamPolicy",
        &[("projects", "project"), ("zones", "zone"), ("disks", "resource")],
    ));
    resources.push(compute(
        "subnetworks",
        "projects/regions/subnetworks",
        "v1",
        true,
        COMPUTE_V1,
        "projects/{project}/regions/{region}/subnetworks/{resource}/getIamPolicy",
        "projects/{project}/regions/{region}/subnetworks/{resource}/setIamPolicy",
        &[("projects", "project"), ("regions", "region"), ("subnetworks", "resource")],
    ));

    resources
}
