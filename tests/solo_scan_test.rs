//! Solo scan lifecycle tests
//!
//! A solo instance degenerates to a plain local scan: run, audit, done, with
//! no grid sections in the progress payload.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{boot_instance, issue, wait_until, CannedAuditor};
use gridscan::scan::progress::ProgressOptions;
use gridscan::scan::state::RunState;

#[tokio::test]
async fn test_solo_scan_runs_to_done() {
    let canned = vec![issue("solo-1"), issue("solo-2")];
    let node = boot_instance("tok", Vec::new(), Arc::new(CannedAuditor(canned)), 0).await;
    let c = node.coordinator.clone();

    assert!(c.run().await);
    assert!(!c.run().await, "second run must be rejected");

    let done = wait_until(Duration::from_secs(5), || {
        let c = c.clone();
        async move { !c.busy() }
    })
    .await;
    assert!(done, "solo scan never finished");

    assert_eq!(c.status().await, RunState::Done);
    assert!(!c.busy());

    let report = c.progress(ProgressOptions::default()).await;
    assert_eq!(report.status, RunState::Done);
    assert!(!report.busy);
    assert!(report.instances.is_empty());

    let issues = report.issues.unwrap();
    assert_eq!(issues.len(), 2);
}

#[tokio::test]
async fn test_solo_issues_survive_into_report() {
    let canned = vec![issue("r-1")];
    let node = boot_instance("tok", Vec::new(), Arc::new(CannedAuditor(canned)), 0).await;
    let c = node.coordinator.clone();

    c.run().await;
    wait_until(Duration::from_secs(5), || {
        let c = c.clone();
        async move { !c.busy() }
    })
    .await;

    let bytes = c.serialized_report().await.unwrap();
    let rendered: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    let issues = rendered["issues"].as_array().unwrap();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0]["unique_id"], "r-1");
}

#[tokio::test]
async fn test_clean_up_idempotence_after_done() {
    let node = boot_instance("tok", Vec::new(), Arc::new(CannedAuditor(Vec::new())), 0).await;
    let c = node.coordinator.clone();

    c.run().await;
    wait_until(Duration::from_secs(5), || {
        let c = c.clone();
        async move { !c.busy() }
    })
    .await;

    assert!(c.clean_up().await);
    assert!(!c.clean_up().await, "second clean_up must return false");
}

#[tokio::test]
async fn test_done_state_is_stable() {
    let node = boot_instance("tok", Vec::new(), Arc::new(CannedAuditor(Vec::new())), 0).await;
    let c = node.coordinator.clone();

    c.run().await;
    wait_until(Duration::from_secs(5), || {
        let c = c.clone();
        async move { !c.busy() }
    })
    .await;

    // Completion is terminal: state and busy stay put.
    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(c.status().await, RunState::Done);
        assert!(!c.busy());
    }
}
