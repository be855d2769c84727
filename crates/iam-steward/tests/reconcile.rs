//! Integration tests for the compensation log reconciliation sweep
//!
//! Run with: cargo nextest run --test reconcile

use anyhow::Result;
use chrono::Duration;
use iam_steward::account::{AccountKind, AccountManager};
use iam_steward::gcp::HttpMethod;
use iam_steward::wal::{Compensation, CompensationLog, ReconcileConfig};
use iam_steward::Error;
use iam_steward_test_utils::{
    fast_config, fields, init_tracing, test_storage, FakeGcp, FaultyStorage,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const PROJECT: &str = "my-project";

type Manager = AccountManager<FaultyStorage, Arc<FakeGcp>>;

async fn setup() -> Result<(Arc<FakeGcp>, Manager)> {
    init_tracing();
    let gcp = Arc::new(FakeGcp::new());
    let storage = FaultyStorage::new(test_storage().await?);
    let manager = AccountManager::new(storage, Arc::clone(&gcp));
    manager.save_config(&fast_config()).await?;
    Ok((gcp, manager))
}

fn role_set_input() -> Value {
    json!({
        "project": PROJECT,
        "token_scopes": ["https://www.googleapis.com/auth/cloud-platform"],
        "bindings": { "projects/my-project": ["roles/viewer"] }
    })
}

fn immediately() -> ReconcileConfig {
    ReconcileConfig {
        min_age: Duration::zero(),
        dry_run: false,
    }
}

/// Service accounts currently holding any role on the project
async fn project_members(gcp: &FakeGcp) -> Result<Vec<String>> {
    let policy = gcp.policy("projects/my-project").await?;
    Ok(policy
        .bindings
        .into_iter()
        .flat_map(|b| b.members)
        .collect())
}

/// The commit fails after the account, binding and key were created; the
/// sweep removes all of it exactly once.
#[tokio::test]
async fn test_wal_guarantees_cleanup() -> Result<()> {
    let (gcp, manager) = setup().await?;
    let cancel = CancellationToken::new();

    manager.storage().fail_puts("roleset/");
    let err = manager
        .write(AccountKind::RoleSet, "app", &fields(role_set_input()), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Storage(_)), "{err}");
    manager.storage().heal();

    assert!(manager.read(AccountKind::RoleSet, "app").await?.is_none());
    let orphans = gcp.accounts();
    assert_eq!(orphans.len(), 1);
    let orphan = orphans[0].clone();
    assert_eq!(gcp.keys_for(&orphan).len(), 1);
    assert!(!project_members(&gcp).await?.is_empty());

    let log = CompensationLog::new(manager.storage());
    let mut kinds: Vec<&str> = log
        .list()
        .await?
        .iter()
        .map(|e| e.action.kind())
        .collect();
    kinds.sort_unstable();
    assert_eq!(kinds, vec!["delete_account", "delete_key", "remove_binding"]);

    let report = manager.reconcile(&immediately(), &cancel).await?;
    assert_eq!(report.total, 3);
    assert_eq!(report.executed, 3);
    assert_eq!(report.failed, 0);
    assert_eq!(gcp.delete_count(&orphan), 1);
    assert!(gcp.accounts().is_empty());
    assert!(project_members(&gcp).await?.is_empty());
    assert!(log.list().await?.is_empty());

    // Nothing left to do
    let again = manager.reconcile(&immediately(), &cancel).await?;
    assert_eq!(again.total, 0);
    assert_eq!(gcp.delete_count(&orphan), 1);
    Ok(())
}

/// After a failed update the sweep keeps the committed generation and removes
/// the half-built one.
#[tokio::test]
async fn test_failed_update_keeps_committed_generation() -> Result<()> {
    let (gcp, manager) = setup().await?;
    let cancel = CancellationToken::new();
    let created = manager
        .write(AccountKind::RoleSet, "app", &fields(role_set_input()), &cancel)
        .await?;
    let committed = created.account.email().to_string();

    gcp.fail(Some(HttpMethod::Post), "projects/other:setIamPolicy", 403, 1);
    manager
        .write(
            AccountKind::RoleSet,
            "app",
            &fields(json!({ "bindings": { "projects/other": ["roles/viewer"] } })),
            &cancel,
        )
        .await
        .unwrap_err();
    assert_eq!(gcp.accounts().len(), 2);

    let report = manager.reconcile(&immediately(), &cancel).await?;
    assert_eq!(report.failed, 0);
    // Previous generation: binding, key and account are all still in use
    assert_eq!(report.discharged_obsolete, 3);
    // New generation: the account and its (never applied) binding
    assert_eq!(report.executed, 2);

    assert_eq!(gcp.accounts(), vec![committed.clone()]);
    let record = manager.read(AccountKind::RoleSet, "app").await?.expect("record");
    assert_eq!(record.email(), committed);
    let token_key = record.token_gen.expect("token key");
    assert!(gcp.key_exists(&token_key.key_name));
    assert_eq!(project_members(&gcp).await?, vec![format!("serviceAccount:{committed}")]);
    Ok(())
}

#[tokio::test]
async fn test_young_entries_and_dry_runs_are_skipped() -> Result<()> {
    let (gcp, manager) = setup().await?;
    let cancel = CancellationToken::new();
    manager.storage().fail_puts("roleset/");
    manager
        .write(AccountKind::RoleSet, "app", &fields(role_set_input()), &cancel)
        .await
        .unwrap_err();
    manager.storage().heal();

    let report = manager.reconcile(&ReconcileConfig::default(), &cancel).await?;
    assert_eq!(report.skipped, 3);
    assert_eq!(report.executed, 0);

    let dry_run = ReconcileConfig {
        dry_run: true,
        ..immediately()
    };
    let report = manager.reconcile(&dry_run, &cancel).await?;
    assert_eq!(report.skipped, 3);
    assert_eq!(gcp.accounts().len(), 1);
    assert_eq!(CompensationLog::new(manager.storage()).list().await?.len(), 3);
    Ok(())
}

/// Entries that fail stay in the log for the next sweep
#[tokio::test]
async fn test_failures_are_retried_next_sweep() -> Result<()> {
    let (gcp, manager) = setup().await?;
    let cancel = CancellationToken::new();
    gcp.add_account(PROJECT, "orphan@my-project.iam.gserviceaccount.com");

    let log = CompensationLog::new(manager.storage());
    log.record(
        &iam_steward::wal::Owner::new(AccountKind::RoleSet, "gone"),
        Compensation::DeleteAccount {
            account: iam_steward::account::ServiceAccountId::new(
                PROJECT,
                "orphan@my-project.iam.gserviceaccount.com",
            ),
        },
    )
    .await?;

    gcp.fail(Some(HttpMethod::Delete), "orphan@", 403, 1);
    let first = manager.reconcile(&immediately(), &cancel).await?;
    assert_eq!(first.failed, 1);
    assert_eq!(log.list().await?.len(), 1);

    let second = manager.reconcile(&immediately(), &cancel).await?;
    assert_eq!(second.executed, 1);
    assert!(log.list().await?.is_empty());
    assert!(!gcp.account_exists("orphan@my-project.iam.gserviceaccount.com"));
    Ok(())
}

/// Deferred cleanup during delete surfaces as a warning, then the sweep finishes it
#[tokio::test]
async fn test_delete_cleanup_failure_is_a_warning() -> Result<()> {
    let (gcp, manager) = setup().await?;
    let cancel = CancellationToken::new();
    let created = manager
        .write(AccountKind::RoleSet, "app", &fields(role_set_input()), &cancel)
        .await?;
    let email = created.account.email().to_string();

    gcp.fail_ending(Some(HttpMethod::Delete), &email, 403, 1);
    let warnings = manager.delete(AccountKind::RoleSet, "app", &cancel).await?;
    assert_eq!(warnings.len(), 1, "{warnings:?}");
    assert!(warnings[0].contains("delete service account"), "{}", warnings[0]);
    assert!(manager.read(AccountKind::RoleSet, "app").await?.is_none());
    assert!(gcp.account_exists(&email));

    let report = manager.reconcile(&immediately(), &cancel).await?;
    assert_eq!(report.executed, 1);
    assert!(!gcp.account_exists(&email));
    Ok(())
}
