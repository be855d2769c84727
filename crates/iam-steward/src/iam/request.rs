//! Building get/set policy requests from a resolved resource

use super::locator::ParsedResource;
use super::registry::{RestMethod, VersionOption};
use crate::error::{Error, Result};
use crate::gcp::{HttpMethod, HttpRequest};
use serde_json::{json, Value};
use url::Url;

/// Policy version that can carry conditional bindings
pub const CONDITIONAL_POLICY_VERSION: i32 = 3;

const RESERVED_RESOURCE: &str = "{+resource}";

/// Request that reads the resource's policy (or dataset, for ACL-shaped resources).
pub fn get_policy_request(parsed: &ParsedResource) -> Result<HttpRequest> {
    let method = &parsed.resource.get;
    let mut url = expand_url(parsed, method)?;

    let body = match (method.http_method, parsed.resource.policy_version) {
        (_, VersionOption::Query(param)) => {
            url.query_pairs_mut()
                .append_pair(param, &CONDITIONAL_POLICY_VERSION.to_string());
            None
        }
        (HttpMethod::Post, VersionOption::Body) => Some(json!({
            "options": { "requestedPolicyVersion": CONDITIONAL_POLICY_VERSION }
        })),
        (HttpMethod::Post, VersionOption::Unsupported) => Some(json!({})),
        _ => None,
    };

    let request = HttpRequest::new(method.http_method, url.as_str());
    Ok(match body {
        Some(body) => request.with_json(body),
        None => request,
    })
}

/// Request that writes `document`, wrapped as the resource's set method expects.
pub fn set_policy_request(parsed: &ParsedResource, document: Value) -> Result<HttpRequest> {
    let method = &parsed.resource.set;
    let url = expand_url(parsed, method)?;
    Ok(HttpRequest::new(method.http_method, url.as_str()).with_json(method.body_format.wrap(document)))
}

/// Substitute the parsed ids into the method's path template.
///
/// `{+resource}` expands to the whole relative name; any other `{param}` is
/// looked up through the replacement keys, falling back to the innermost id
/// for `{resource}`.
fn expand_url(parsed: &ParsedResource, method: &RestMethod) -> Result<Url> {
    let invalid = |reason: String| Error::InvalidIdentifier {
        identifier: parsed.identifier.clone(),
        reason,
    };

    let mut segments: Vec<String> = Vec::new();
    for template in method.path.split('/') {
        if let Some(suffix) = template.strip_prefix(RESERVED_RESOURCE) {
            for (collection, id) in parsed.name.ids() {
                segments.push(collection.clone());
                segments.push(id.clone());
            }
            if let Some(last) = segments.last_mut() {
                last.push_str(suffix);
            }
            continue;
        }
        segments.push(substitute(template, |param| {
            lookup_param(parsed, param)
                .ok_or_else(|| invalid(format!("no value for path parameter {{{param}}}")))
        })?);
    }

    let mut url = Url::parse(method.base_url)
        .map_err(|e| invalid(format!("bad base URL {}: {e}", method.base_url)))?;
    url.path_segments_mut()
        .map_err(|_| invalid(format!("base URL {} cannot have a path", method.base_url)))?
        .pop_if_empty()
        .extend(segments.iter().filter(|s| !s.is_empty()));
    Ok(url)
}

fn lookup_param<'a>(parsed: &'a ParsedResource, param: &str) -> Option<&'a str> {
    let by_key = parsed
        .resource
        .replacement_keys
        .iter()
        .find(|(_, key)| *key == param)
        .and_then(|(collection, _)| parsed.name.id(collection));
    match by_key {
        Some(id) => Some(id),
        None if param == "resource" => parsed.name.leaf_id(),
        None => None,
    }
}

/// Replace each `{name}` in `template` with the value from `lookup`.
fn substitute<'a>(template: &str, mut lookup: impl FnMut(&str) -> Result<&'a str>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let Some(len) = rest[start..].find('}') else {
            out.push_str(&rest[start..]);
            return Ok(out);
        };
        out.push_str(lookup(&rest[start + 1..start + len])?);
        rest = &rest[start + len + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
