//! Parsing resource identifiers and resolving them to REST templates.
//!
//! Three syntaxes are accepted, checked in order:
//!
//! - self-link: `https://compute.googleapis.com/compute/v1/projects/p/zones/z/instances/i`
//! - full resource name: `//spanner.googleapis.com/projects/p/instances/i`
//! - relative name: `projects/p/topics/t`
//!
//! Resolution is a pure function of the registry and the identifier.

use super::registry::{Registry, RestResource};
use crate::error::{Error, Result};
use url::Url;

/// Ordered `(collection id, resource id)` pairs of a relative resource name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelativeName {
    ids: Vec<(String, String)>,
    type_key: String,
}

impl RelativeName {
    pub fn parse(identifier: &str, path: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidIdentifier {
            identifier: identifier.to_string(),
            reason: reason.to_string(),
        };

        let path = path.trim_matches('/');
        if path.is_empty() {
            return Err(invalid("empty resource name"));
        }
        let segments: Vec<&str> = path.split('/').collect();
        if segments.len() % 2 != 0 {
            return Err(invalid(
                "expected alternating collection and resource ids (odd number of path segments)",
            ));
        }

        let mut ids = Vec::with_capacity(segments.len() / 2);
        for pair in segments.chunks_exact(2) {
            let (collection, id) = (pair[0], pair[1]);
            if collection.is_empty() {
                return Err(invalid("empty collection id"));
            }
            if id.is_empty() {
                return Err(invalid(&format!("empty resource id for collection {collection}")));
            }
            ids.push((collection.to_string(), id.to_string()));
        }

        // Cloud Storage JSON API paths use short collection ids
        let short: Vec<&str> = ids.iter().map(|(c, _)| c.as_str()).collect();
        if short == ["b"] || short == ["b", "o"] {
            for ((collection, _), long) in ids.iter_mut().zip(["buckets", "objects"]) {
                *collection = long.to_string();
            }
        }

        let type_key = ids
            .iter()
            .map(|(c, _)| c.as_str())
            .collect::<Vec<_>>()
            .join("/");
        Ok(Self { ids, type_key })
    }

    /// Collection ids joined by `/`, e.g. `projects/zones/instances`
    pub fn type_key(&self) -> &str {
        &self.type_key
    }

    pub fn ids(&self) -> &[(String, String)] {
        &self.ids
    }

    pub fn id(&self, collection: &str) -> Option<&str> {
        self.ids
            .iter()
            .find(|(c, _)| c == collection)
            .map(|(_, id)| id.as_str())
    }

    /// Id of the innermost resource
    pub fn leaf_id(&self) -> Option<&str> {
        self.ids.last().map(|(_, id)| id.as_str())
    }

    /// Relative name rendered back to `collection/id/...` form
    pub fn path(&self) -> String {
        self.ids
            .iter()
            .flat_map(|(c, id)| [c.as_str(), id.as_str()])
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// How the identifier narrowed down the owning service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceHint {
    None,
    /// Service named by a full resource name host
    Service(String),
    /// Everything in a self-link before the relative name
    Prefix(String),
}

/// An identifier resolved against the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResource {
    pub identifier: String,
    pub name: RelativeName,
    pub resource: RestResource,
}

impl Registry {
    /// Parse an identifier and resolve its REST template.
    pub fn parse(&self, identifier: &str) -> Result<ParsedResource> {
        let (path, hint) = split_identifier(identifier)?;
        let name = RelativeName::parse(identifier, &path)?;
        let resource = *self.resolve(identifier, name.type_key(), &hint)?;
        Ok(ParsedResource {
            identifier: identifier.to_string(),
            name,
            resource,
        })
    }

    /// Pick the template for a type key.
    ///
    /// A self-link prefix selects the entry whose URL it starts. Otherwise the
    /// service must be named or unique, and the version is chosen by
    /// [`pick_version`].
    pub fn resolve(
        &self,
        identifier: &str,
        type_key: &str,
        hint: &ServiceHint,
    ) -> Result<&RestResource> {
        let services = self
            .services(type_key)
            .ok_or_else(|| Error::UnsupportedResourceType {
                identifier: identifier.to_string(),
                type_key: type_key.to_string(),
            })?;

        match hint {
            ServiceHint::Prefix(prefix) => services
                .values()
                .flat_map(|versions| versions.values())
                .find(|r| r.get.template_url().starts_with(prefix.as_str()))
                .ok_or_else(|| Error::UnsupportedService {
                    identifier: identifier.to_string(),
                    service: prefix.clone(),
                    type_key: type_key.to_string(),
                }),
            ServiceHint::Service(service) => {
                let versions =
                    services
                        .get(service.as_str())
                        .ok_or_else(|| Error::UnsupportedService {
                            identifier: identifier.to_string(),
                            service: service.clone(),
                            type_key: type_key.to_string(),
                        })?;
                pick_version(identifier, versions.values())
            }
            ServiceHint::None => {
                let mut iter = services.values();
                match (iter.next(), iter.next()) {
                    (Some(versions), None) => pick_version(identifier, versions.values()),
                    _ => Err(Error::AmbiguousService {
                        identifier: identifier.to_string(),
                    }),
                }
            }
        }
    }
}

/// Preferred version, else the only version, else the only stable version.
fn pick_version<'a>(
    identifier: &str,
    versions: impl Iterator<Item = &'a RestResource> + Clone,
) -> Result<&'a RestResource> {
    if let Some(preferred) = versions.clone().find(|r| r.preferred) {
        return Ok(preferred);
    }

    let all: Vec<&RestResource> = versions.collect();
    if let [only] = all.as_slice() {
        return Ok(*only);
    }

    let stable: Vec<&RestResource> = all.into_iter().filter(|r| !r.is_prerelease()).collect();
    match stable.as_slice() {
        [only] => Ok(*only),
        _ => Err(Error::AmbiguousVersion {
            identifier: identifier.to_string(),
        }),
    }
}

/// Split an identifier into its relative-name path and service hint.
fn split_identifier(identifier: &str) -> Result<(String, ServiceHint)> {
    let invalid = |reason: &str| Error::InvalidIdentifier {
        identifier: identifier.to_string(),
        reason: reason.to_string(),
    };

    if identifier.contains("://") {
        let url = Url::parse(identifier).map_err(|e| invalid(&format!("invalid URI: {e}")))?;
        let host = url.host_str().ok_or_else(|| invalid("self-link has no host"))?;
        let path = url.path();
        let idx = path
            .find("projects/")
            .ok_or_else(|| invalid("self-link does not contain a project-scoped resource name"))?;
        let prefix = normalize_prefix(url.scheme(), host, &path[..idx]);
        return Ok((path[idx..].to_string(), ServiceHint::Prefix(prefix)));
    }

    if let Some(rest) = identifier.strip_prefix("//") {
        let (host, path) = rest
            .split_once('/')
            .ok_or_else(|| invalid("full resource name has no path"))?;
        let service = host
            .split('.')
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| invalid("full resource name has no service host"))?;
        return Ok((path.to_string(), ServiceHint::Service(service.to_string())));
    }

    Ok((identifier.to_string(), ServiceHint::None))
}

/// Self-links from older APIs use `www.googleapis.com/<service>/<version>/`;
/// rewrite them to the per-service host the registry uses.
fn normalize_prefix(scheme: &str, host: &str, path_prefix: &str) -> String {
    if host == "www.googleapis.com" {
        if let Some(service) = path_prefix.trim_start_matches('/').split('/').next() {
            if !service.is_empty() {
                return format!("{scheme}://{service}.googleapis.com{path_prefix}");
            }
        }
    }
    format!("{scheme}://{host}{path_prefix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gcp::HttpMethod;
    use crate::iam::registry::{BodyFormat, PolicyShape, RestMethod, VersionOption};

    fn parse(identifier: &str) -> Result<ParsedResource> {
        Registry::builtin().parse(identifier)
    }

    fn fake(service: &'static str, version: &'static str, preferred: bool) -> RestResource {
        let method = RestMethod {
            http_method: HttpMethod::Post,
            base_url: "https://fake.googleapis.com/",
            path: "{+resource}:getIamPolicy",
            body_format: BodyFormat::Wrapped,
        };
        RestResource {
            name: "widgets",
            type_key: "projects/widgets",
            service,
            version,
            preferred,
            shape: PolicyShape::Iam,
            policy_version: VersionOption::Unsupported,
            get: method,
            set: method,
            replacement_keys: &[],
        }
    }

    #[test]
    fn relative_name_type_key() {
        let name = RelativeName::parse("x", "projects/p/zones/z/instances/i").unwrap();
        assert_eq!(name.type_key(), "projects/zones/instances");
        assert_eq!(name.id("zones"), Some("z"));
        assert_eq!(name.leaf_id(), Some("i"));
        assert_eq!(name.path(), "projects/p/zones/z/instances/i");
    }

    #[test]
    fn relative_name_rejects_malformed() {
        for bad in ["projects/p/zones", "", "projects//zones/z", "/p"] {
            let err = RelativeName::parse(bad, bad).unwrap_err();
            assert!(matches!(err, Error::InvalidIdentifier { .. }), "{bad}: {err}");
        }
    }

    #[test]
    fn storage_short_collections() {
        let name = RelativeName::parse("x", "b/my-bucket/o/dir%2Ffile").unwrap();
        assert_eq!(name.type_key(), "buckets/objects");
        assert_eq!(name.id("buckets"), Some("my-bucket"));
    }

    #[test]
    fn relative_name_uses_unique_service() {
        let parsed = parse("projects/my-project/topics/events").unwrap();
        assert_eq!(parsed.resource.service, "pubsub");
        assert_eq!(parsed.resource.version, "v1");
    }

    #[test]
    fn shared_type_key_requires_service() {
        let err = parse("projects/p/instances/i").unwrap_err();
        assert!(matches!(err, Error::AmbiguousService { .. }));
        assert!(err.to_string().contains("self-link or full resource name"));

        let parsed = parse("//spanner.googleapis.com/projects/p/instances/i").unwrap();
        assert_eq!(parsed.resource.service, "spanner");
        let parsed = parse("//bigtableadmin.googleapis.com/projects/p/instances/i").unwrap();
        assert_eq!(parsed.resource.service, "bigtableadmin");
    }

    #[test]
    fn full_name_with_unknown_service() {
        let err = parse("//pubsub.googleapis.com/projects/p/instances/i").unwrap_err();
        assert!(matches!(err, Error::UnsupportedService { ref service, .. } if service == "pubsub"));
    }

    #[test]
    fn self_link_selects_version() {
        let parsed =
            parse("https://compute.googleapis.com/compute/beta/projects/p/zones/us-east1-b/instances/vm")
                .unwrap();
        assert_eq!(parsed.resource.version, "beta");

        let parsed =
            parse("https://www.googleapis.com/compute/v1/projects/p/zones/us-east1-b/instances/vm").unwrap();
        assert_eq!(parsed.resource.version, "v1");
        assert_eq!(parsed.name.id("instances"), Some("vm"));
    }

    #[test]
    fn self_link_without_project_is_invalid() {
        let err = parse("https://storage.googleapis.com/storage/v1/b/bucket").unwrap_err();
        assert!(matches!(err, Error::InvalidIdentifier { .. }));
    }

    #[test]
    fn unsupported_type() {
        let err = parse("projects/p/widgets/w").unwrap_err();
        assert!(matches!(err, Error::UnsupportedResourceType { ref type_key, .. } if type_key == "projects/widgets"));
    }

    #[test]
    fn preferred_version_wins_regardless_of_order() {
        let a = Registry::new([fake("fake", "v1", false), fake("fake", "v2", true), fake("fake", "v3beta", false)]);
        let b = Registry::new([fake("fake", "v3beta", false), fake("fake", "v2", true), fake("fake", "v1", false)]);
        for registry in [a, b] {
            for _ in 0..3 {
                let r = registry.parse("projects/p/widgets/w").unwrap();
                assert_eq!(r.resource.version, "v2");
            }
        }
    }

    #[test]
    fn single_stable_version_is_chosen() {
        let registry = Registry::new([fake("fake", "v1beta1", false), fake("fake", "v1", false)]);
        assert_eq!(registry.parse("projects/p/widgets/w").unwrap().resource.version, "v1");
    }

    #[test]
    fn multiple_stable_versions_are_ambiguous() {
        let registry = Registry::new([fake("fake", "v1", false), fake("fake", "v2", false)]);
        let err = registry.parse("projects/p/widgets/w").unwrap_err();
        assert!(matches!(err, Error::AmbiguousVersion { .. }));
        assert!(err.to_string().contains("self-link with version"));
    }
}
