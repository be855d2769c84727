//! Tests for the reqwest transport against a local mock server
//!
//! Run with: cargo nextest run --test http_transport

use anyhow::Result;
use httpmock::prelude::*;
use iam_steward::config::StewardConfig;
use iam_steward::gcp::{HttpMethod, HttpRequest, HttpTransport, IamAdmin, StaticToken, Transport};
use iam_steward::Error;
use serde_json::{json, Value};

fn transport() -> Result<HttpTransport<StaticToken>> {
    Ok(HttpTransport::new(
        &StewardConfig::default(),
        StaticToken("test-token".into()),
    )?)
}

#[tokio::test]
async fn test_requests_carry_auth_and_json() -> Result<()> {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/projects/my-project/serviceAccounts")
                .header("authorization", "Bearer test-token")
                .header("content-type", "application/json")
                .json_body(json!({
                    "accountId": "steward-app-1a2b3c4d",
                    "serviceAccount": { "displayName": "app" }
                }));
            then.status(200).json_body(json!({
                "name": "projects/my-project/serviceAccounts/steward-app-1a2b3c4d@my-project.iam.gserviceaccount.com",
                "email": "steward-app-1a2b3c4d@my-project.iam.gserviceaccount.com",
                "projectId": "my-project",
                "uniqueId": "1234"
            }));
        })
        .await;

    let transport = transport()?;
    let endpoint = server.base_url();
    let admin = IamAdmin::new(&transport, &endpoint);
    let account = admin
        .create_service_account("my-project", "steward-app-1a2b3c4d", "app")
        .await?;

    mock.assert_async().await;
    assert_eq!(account.email, "steward-app-1a2b3c4d@my-project.iam.gserviceaccount.com");
    assert_eq!(account.project_id, "my-project");
    Ok(())
}

#[tokio::test]
async fn test_empty_body_is_null_and_deletes_are_idempotent() -> Result<()> {
    let server = MockServer::start_async().await;
    let gone = server
        .mock_async(|when, then| {
            when.method(DELETE).path("/v1/projects/p/serviceAccounts/gone@p.iam.gserviceaccount.com");
            then.status(404).json_body(json!({
                "error": { "code": 404, "message": "Unknown service account", "status": "NOT_FOUND" }
            }));
        })
        .await;
    let empty = server
        .mock_async(|when, then| {
            when.method(DELETE).path("/v1/projects/p/serviceAccounts/a@p.iam.gserviceaccount.com");
            then.status(200);
        })
        .await;

    let transport = transport()?;
    let value = transport
        .execute(HttpRequest::new(
            HttpMethod::Delete,
            server.url("/v1/projects/p/serviceAccounts/a@p.iam.gserviceaccount.com"),
        ))
        .await?;
    assert_eq!(value, Value::Null);

    let endpoint = server.base_url();
    let admin = IamAdmin::new(&transport, &endpoint);
    admin
        .delete_service_account("projects/p/serviceAccounts/gone@p.iam.gserviceaccount.com")
        .await?;

    gone.assert_async().await;
    empty.assert_async().await;
    Ok(())
}

#[tokio::test]
async fn test_error_bodies_are_classified() -> Result<()> {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.path("/conflict");
            then.status(409).json_body(json!({
                "error": { "code": 409, "message": "There were concurrent policy changes.", "status": "ABORTED" }
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.path("/denied");
            then.status(403).json_body(json!({
                "error": {
                    "code": 403,
                    "message": "Permission denied",
                    "status": "PERMISSION_DENIED",
                    "errors": [{ "reason": "forbidden" }]
                }
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.path("/propagating");
            then.status(400).json_body(json!({
                "error": {
                    "code": 400,
                    "message": "Service account new@p.iam.gserviceaccount.com does not exist.",
                    "status": "INVALID_ARGUMENT"
                }
            }));
        })
        .await;

    let transport = transport()?;
    let request = |path: &str| HttpRequest::new(HttpMethod::Post, server.url(path));

    let conflict = transport.execute(request("/conflict")).await.unwrap_err();
    assert!(matches!(conflict, Error::RemoteTransient { status: 409, .. }), "{conflict}");

    let denied = transport.execute(request("/denied")).await.unwrap_err();
    assert!(denied.is_forbidden());
    assert!(matches!(denied, Error::RemoteFatal { reason: Some(ref r), .. } if r == "forbidden"));

    let propagating = transport.execute(request("/propagating")).await.unwrap_err();
    assert!(matches!(propagating, Error::PropagationDelay { .. }));
    assert!(propagating.is_retryable());
    Ok(())
}
