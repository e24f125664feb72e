// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

#[tokio::test]
async fn resolve_completes_waiter() -> anyhow::Result<()> {
    let broker = PermissionBroker::new();
    let (info, rx) = broker.open("demo", "Write", json!({"file_path": "a.txt"}));

    broker.resolve(&info.request_id, Decision::Allow).map_err(|e| anyhow::anyhow!("{e}"))?;
    assert_eq!(rx.await?, Decision::Allow);
    Ok(())
}

#[tokio::test]
async fn duplicate_resolution_is_unknown() -> anyhow::Result<()> {
    let broker = PermissionBroker::new();
    let (info, rx) = broker.open("demo", "Bash", json!({"command": "ls"}));

    broker.resolve(&info.request_id, Decision::Deny).map_err(|e| anyhow::anyhow!("{e}"))?;
    assert_eq!(broker.resolve(&info.request_id, Decision::Allow), Err(UnknownRequest));
    // The original decision stands.
    assert_eq!(rx.await?, Decision::Deny);
    Ok(())
}

#[test]
fn unknown_request_id_is_an_error() {
    let broker = PermissionBroker::new();
    assert_eq!(broker.resolve("nope", Decision::Allow), Err(UnknownRequest));
}

#[tokio::test]
async fn resolution_racing_open_is_honored() -> anyhow::Result<()> {
    let broker = std::sync::Arc::new(PermissionBroker::new());
    let (info, rx) = broker.open("demo", "Write", json!({}));

    // Resolve from another task before the waiter is polled.
    let b = std::sync::Arc::clone(&broker);
    let id = info.request_id.clone();
    tokio::spawn(async move {
        let _ = b.resolve(&id, Decision::Allow);
    });

    assert_eq!(rx.await?, Decision::Allow);
    Ok(())
}

#[tokio::test]
async fn fail_all_denies_every_pending() -> anyhow::Result<()> {
    let broker = PermissionBroker::new();
    let (_, rx1) = broker.open("demo", "Write", json!({}));
    let (_, rx2) = broker.open("demo", "Bash", json!({}));
    let (other, rx3) = broker.open("other", "Edit", json!({}));

    assert_eq!(broker.fail_all("demo"), 2);
    assert_eq!(rx1.await?, Decision::Deny);
    assert_eq!(rx2.await?, Decision::Deny);

    // Unrelated session is untouched.
    assert_eq!(broker.pending_count("other"), 1);
    broker.resolve(&other.request_id, Decision::Allow).map_err(|e| anyhow::anyhow!("{e}"))?;
    assert_eq!(rx3.await?, Decision::Allow);

    assert_eq!(broker.fail_all("demo"), 0);
    Ok(())
}

#[test]
fn pending_for_lists_oldest_first() {
    let broker = PermissionBroker::new();
    let (first, _rx1) = broker.open("demo", "Write", json!({"n": 1}));
    let (second, _rx2) = broker.open("demo", "Bash", json!({"n": 2}));

    let pending = broker.pending_for("demo");
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].request_id, first.request_id);
    assert_eq!(pending[1].request_id, second.request_id);
    assert!(broker.pending_for("missing").is_empty());
}

#[test]
fn resolved_requests_leave_the_pending_set() {
    let broker = PermissionBroker::new();
    let (info, _rx) = broker.open("demo", "Write", json!({}));
    assert_eq!(broker.pending_count("demo"), 1);

    let _ = broker.resolve(&info.request_id, Decision::Allow);
    assert_eq!(broker.pending_count("demo"), 0);
    assert!(broker.pending_for("demo").is_empty());
}
