//! Error taxonomy and Google API error classification
//!
//! Remote failures are classified from the HTTP status and the structured
//! Google error body (`error.status`, `error.errors[].reason`) rather than by
//! matching on rendered messages.

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// The identifier could not be split into collection/resource pairs
    #[error("invalid resource \"{identifier}\": {reason}")]
    InvalidIdentifier { identifier: String, reason: String },

    /// No registry entry exists for the type key
    #[error("invalid resource \"{identifier}\": unsupported resource type: {type_key}")]
    UnsupportedResourceType { identifier: String, type_key: String },

    /// The caller named a service or self-link prefix the registry does not know
    #[error("invalid resource \"{identifier}\": unsupported service {service} for resource {type_key}")]
    UnsupportedService {
        identifier: String,
        service: String,
        type_key: String,
    },

    #[error("invalid resource \"{identifier}\": please provide a self-link or full resource name for non-service-unique resource type")]
    AmbiguousService { identifier: String },

    #[error("invalid resource \"{identifier}\": please provide a self-link with version instead; only non-preferred versions of this resource have IAM resource")]
    AmbiguousVersion { identifier: String },

    /// Dataset access lists have no equivalent of IAM conditions
    #[error("dataset access control cannot express conditional binding for role {role}")]
    ConditionalBindingUnsupported { role: String },

    /// Remote resource does not exist (success for deletes, failure for reads)
    #[error("remote resource not found: {message}")]
    RemoteNotFound { message: String },

    /// Rate limiting, server errors and etag conflicts
    #[error("transient remote error (HTTP {status}): {message}")]
    RemoteTransient { status: u16, message: String },

    /// A just-created identity is not yet visible to the policy API
    #[error("service account not yet visible to IAM (eventual consistency): {message}")]
    PropagationDelay { message: String },

    #[error("remote API error (HTTP {status}): {message}")]
    RemoteFatal {
        status: u16,
        reason: Option<String>,
        message: String,
    },

    /// Connection-level failure before any HTTP status was received
    #[error("HTTP transport error: {0}")]
    Transport(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("failed to encode or decode {what}: {source}")]
    Codec {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// The service account backing a managed account has disappeared
    #[error("service account {email} does not exist; rotate or recreate {owner} to provision a new one")]
    AccountNotFound { owner: String, email: String },

    #[error("{kind} '{name}' not found")]
    RecordNotFound { kind: String, name: String },

    #[error("secret type {secret_type} is not supported for {kind}")]
    UnsupportedSecretType { kind: String, secret_type: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("operation cancelled while {what}")]
    Cancelled { what: String },

    #[error("timed out after {elapsed:?} ({attempts} attempts) while {what}{}", last_error_suffix(.last))]
    Timeout {
        what: String,
        attempts: u32,
        elapsed: Duration,
        last: Option<Box<Error>>,
    },
}

fn last_error_suffix(last: &Option<Box<Error>>) -> String {
    last.as_ref()
        .map(|e| format!(": last error: {e}"))
        .unwrap_or_default()
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::RemoteNotFound { .. })
    }

    /// Check if the Backoff Retrier should try again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::RemoteTransient { .. } | Error::PropagationDelay { .. } | Error::Transport(_)
        )
    }

    /// 403 responses; deleting a key that was already removed with its account yields this
    pub fn is_forbidden(&self) -> bool {
        matches!(self, Error::RemoteFatal { status: 403, .. })
    }

    pub(crate) fn codec(what: &'static str) -> impl FnOnce(serde_json::Error) -> Error {
        move |source| Error::Codec { what, source }
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

/// Google API error envelope: `{"error": {"code", "message", "status", "errors": [...]}}`
#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: ErrorBody,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    reason: Option<String>,
}

/// HTTP statuses that are always worth retrying
const TRANSIENT_STATUSES: &[u16] = &[429, 500, 502, 503, 504];

/// Canonical codes reported when a read-modify-write lost an etag race
const CONFLICT_STATUSES: &[&str] = &["ABORTED", "FAILED_PRECONDITION"];

/// Legacy per-error reasons with the same meaning
const CONFLICT_REASONS: &[&str] = &["conditionNotMet", "conflict"];

/// IAM rejects a binding for an account it cannot see yet with
/// "Service account <email> does not exist." Other missing things (roles,
/// principals) report the same status and are permanent.
fn is_unpropagated_account(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("service account") && message.contains("does not exist")
}

/// Classify a non-2xx Google API response.
pub fn classify_api_error(status: u16, body: &[u8]) -> Error {
    let envelope: ErrorEnvelope = serde_json::from_slice(body).unwrap_or_default();
    let error = envelope.error;
    let message = if error.message.is_empty() {
        String::from_utf8_lossy(body).trim().to_string()
    } else {
        error.message
    };
    let reason = error.errors.into_iter().find_map(|d| d.reason);
    let canonical = error.status.as_deref();

    match status {
        404 => Error::RemoteNotFound { message },
        s if TRANSIENT_STATUSES.contains(&s) => Error::RemoteTransient { status, message },
        409 | 412
            if canonical.is_some_and(|c| CONFLICT_STATUSES.contains(&c))
                || reason.as_deref().is_some_and(|r| CONFLICT_REASONS.contains(&r))
                || status == 412 =>
        {
            Error::RemoteTransient { status, message }
        }
        400 if is_unpropagated_account(&message) => Error::PropagationDelay { message },
        _ => Error::RemoteFatal {
            status,
            reason: reason.or_else(|| canonical.map(str::to_string)),
            message,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(code: u16, status: &str, message: &str) -> Vec<u8> {
        serde_json::json!({
            "error": { "code": code, "message": message, "status": status }
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn not_found() {
        let err = classify_api_error(404, &body(404, "NOT_FOUND", "gone"));
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
    }

    #[test]
    fn transient_statuses() {
        for status in TRANSIENT_STATUSES {
            let err = classify_api_error(*status, &body(*status, "UNAVAILABLE", "try later"));
            assert!(err.is_retryable(), "Expected retryable for status: {status}");
        }
    }

    #[test]
    fn etag_conflicts_are_retryable() {
        let err = classify_api_error(409, &body(409, "ABORTED", "There were concurrent policy changes"));
        assert!(err.is_retryable());

        let err = classify_api_error(412, b"precondition failed");
        assert!(err.is_retryable());

        // A plain 409 (e.g. account already exists) is not a conflict we retry
        let err = classify_api_error(409, &body(409, "ALREADY_EXISTS", "exists"));
        assert!(matches!(err, Error::RemoteFatal { status: 409, .. }));
    }

    #[test]
    fn propagation_delay() {
        let err = classify_api_error(
            400,
            &body(400, "INVALID_ARGUMENT", "Service account foo@p.iam.gserviceaccount.com does not exist."),
        );
        assert!(matches!(err, Error::PropagationDelay { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn missing_role_is_not_retried() {
        let err = classify_api_error(
            400,
            &body(
                400,
                "INVALID_ARGUMENT",
                "Role (projects/my-project/roles/typo) does not exist in the resource's hierarchy.",
            ),
        );
        assert!(!err.is_retryable());
        match err {
            Error::RemoteFatal { status, reason, .. } => {
                assert_eq!(status, 400);
                assert_eq!(reason.as_deref(), Some("INVALID_ARGUMENT"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn forbidden_keeps_reason() {
        let raw = serde_json::json!({
            "error": {
                "code": 403,
                "message": "denied",
                "errors": [{ "reason": "forbidden" }]
            }
        })
        .to_string();
        let err = classify_api_error(403, raw.as_bytes());
        assert!(err.is_forbidden());
        match err {
            Error::RemoteFatal { reason, .. } => assert_eq!(reason.as_deref(), Some("forbidden")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn non_json_body() {
        let err = classify_api_error(502, b"<html>bad gateway</html>");
        match err {
            Error::RemoteTransient { status, message } => {
                assert_eq!(status, 502);
                assert!(message.contains("bad gateway"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
