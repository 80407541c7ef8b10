//! Contract Test: Reconcile Cycle
//!
//! Verifies what a single fetch → patch → apply cycle may and may not touch.
//!
//! Constraints verified:
//! - Only the owned backend section changes
//! - Failed or empty fetches never touch the filesystem
//! - A missing section never reaches the applier
//! - Unchanged membership does not re-apply
//! - A failed reload is retried even though the file was already installed
//! - A fresh engine applies once even when the file is already patched
//! - Apply failures are contained to the cycle

mod common;

use common::*;
use lbsync_core::traits::Node;
use lbsync_core::{CycleOutcome, CycleStage, EngineEvent, ReconcileEngine};
use tempfile::tempdir;

const EXPECTED_SECTION: &str = "backend ws_nodes\n    balance roundrobin\n    option forwardfor\n    option http-server-close\n    option forceclose\n    stick-table type ip size 200k expire 30m\n    stick on src\n    server n1 10.0.0.2:8080 check\n";

#[tokio::test]
async fn cycle_rewrites_only_the_owned_section() {
    let dir = tempdir().unwrap();
    let path = write_config(dir.path(), SCENARIO_CONFIG);

    let source = ScriptedNodeSource::fixed(vec![Node::new("n1", "http://10.0.0.2:8080")]);
    let (applier, log) = RecordingApplier::new();
    let (engine, _event_rx) =
        ReconcileEngine::new(Box::new(source), Box::new(applier), minimal_config(&path))
            .expect("engine construction succeeds");

    let outcome = engine.run_cycle().await;

    assert!(matches!(outcome, CycleOutcome::Applied { servers: 1, skipped: 0, .. }));
    assert_eq!(log.apply_count(), 1);

    let on_disk = std::fs::read_to_string(&path).unwrap();
    assert_eq!(
        on_disk,
        format!(
            "global\n    daemon\n\n{}backend other\n    server x 10.0.0.9:80\n",
            EXPECTED_SECTION
        )
    );
}

#[tokio::test]
async fn fetch_failure_makes_no_filesystem_changes() {
    let dir = tempdir().unwrap();
    let path = write_config(dir.path(), SCENARIO_CONFIG);

    let (applier, log) = RecordingApplier::new();
    let (engine, mut event_rx) = ReconcileEngine::new(
        Box::new(ScriptedNodeSource::failing()),
        Box::new(applier),
        minimal_config(&path),
    )
    .unwrap();

    let outcome = engine.run_cycle().await;

    assert!(matches!(outcome, CycleOutcome::Failed { stage: CycleStage::Fetch, .. }));
    assert_eq!(log.apply_count(), 0);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), SCENARIO_CONFIG);

    let mut saw_failure = false;
    while let Ok(event) = event_rx.try_recv() {
        if let EngineEvent::CycleFailed { stage, .. } = event {
            assert_eq!(stage, CycleStage::Fetch);
            saw_failure = true;
        }
    }
    assert!(saw_failure, "fetch failure is reported as an event");
}

#[tokio::test]
async fn empty_node_list_is_skipped() {
    let dir = tempdir().unwrap();
    let path = write_config(dir.path(), SCENARIO_CONFIG);

    let (applier, log) = RecordingApplier::new();
    let (engine, _event_rx) = ReconcileEngine::new(
        Box::new(ScriptedNodeSource::fixed(Vec::new())),
        Box::new(applier),
        minimal_config(&path),
    )
    .unwrap();

    assert_eq!(engine.run_cycle().await, CycleOutcome::NoNodes);
    assert_eq!(log.apply_count(), 0);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), SCENARIO_CONFIG);
}

#[tokio::test]
async fn missing_section_never_reaches_applier() {
    let dir = tempdir().unwrap();
    let original = "global\n    daemon\nbackend other\n    server x 10.0.0.9:80\n";
    let path = write_config(dir.path(), original);

    let (applier, log) = RecordingApplier::new();
    let (engine, _event_rx) = ReconcileEngine::new(
        Box::new(ScriptedNodeSource::fixed(vec![Node::new("n1", "http://10.0.0.2:8080")])),
        Box::new(applier),
        minimal_config(&path),
    )
    .unwrap();

    let outcome = engine.run_cycle().await;

    assert!(matches!(outcome, CycleOutcome::Failed { stage: CycleStage::Patch, .. }));
    assert_eq!(log.apply_count(), 0);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), original);
}

#[tokio::test]
async fn missing_config_file_fails_read_stage() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("absent.cfg");

    let (applier, log) = RecordingApplier::new();
    let (engine, _event_rx) = ReconcileEngine::new(
        Box::new(ScriptedNodeSource::fixed(vec![Node::new("n1", "http://10.0.0.2:8080")])),
        Box::new(applier),
        minimal_config(&path),
    )
    .unwrap();

    let outcome = engine.run_cycle().await;

    assert!(matches!(outcome, CycleOutcome::Failed { stage: CycleStage::Read, .. }));
    assert_eq!(log.apply_count(), 0);
    assert!(!path.exists());
}

#[tokio::test]
async fn unchanged_membership_is_not_reapplied() {
    let dir = tempdir().unwrap();
    let path = write_config(dir.path(), SCENARIO_CONFIG);

    let nodes = vec![
        Node::new("n1", "http://10.0.0.2:8080"),
        Node::new("n2", "http://10.0.0.3:8080"),
    ];
    let reordered: Vec<Node> = nodes.iter().rev().cloned().collect();
    let source = ScriptedNodeSource::new(vec![Ok(nodes), Ok(reordered)]);

    let (applier, log) = RecordingApplier::new();
    let (engine, _event_rx) =
        ReconcileEngine::new(Box::new(source), Box::new(applier), minimal_config(&path)).unwrap();

    assert!(matches!(engine.run_cycle().await, CycleOutcome::Applied { servers: 2, .. }));
    assert_eq!(engine.run_cycle().await, CycleOutcome::Unchanged { servers: 2 });
    assert_eq!(log.apply_count(), 1);
}

#[tokio::test]
async fn unparseable_nodes_are_skipped_and_reported() {
    let dir = tempdir().unwrap();
    let path = write_config(dir.path(), SCENARIO_CONFIG);

    let source = ScriptedNodeSource::fixed(vec![
        Node::new("bad", "not-a-url"),
        Node::new("n1", "http://10.0.0.2:8080"),
    ]);
    let (applier, log) = RecordingApplier::new();
    let (engine, mut event_rx) =
        ReconcileEngine::new(Box::new(source), Box::new(applier), minimal_config(&path)).unwrap();

    let outcome = engine.run_cycle().await;

    assert!(matches!(outcome, CycleOutcome::Applied { servers: 1, skipped: 1, .. }));
    let applied = log.last_applied().unwrap();
    assert!(applied.contains("    server n1 10.0.0.2:8080 check\n"));
    assert!(!applied.contains("server bad"));

    let mut skipped = Vec::new();
    while let Ok(event) = event_rx.try_recv() {
        if let EngineEvent::NodeSkipped { node, .. } = event {
            skipped.push(node);
        }
    }
    assert_eq!(skipped, vec!["bad".to_string()]);
}

#[tokio::test]
async fn apply_failure_is_contained_to_the_cycle() {
    let dir = tempdir().unwrap();
    let path = write_config(dir.path(), SCENARIO_CONFIG);

    let source = ScriptedNodeSource::fixed(vec![Node::new("n1", "http://10.0.0.2:8080")]);
    let fetches = source.fetch_counter();
    let (applier, _log) = RecordingApplier::rejecting("[ALERT] parsing error");
    let (engine, _event_rx) =
        ReconcileEngine::new(Box::new(source), Box::new(applier), minimal_config(&path)).unwrap();

    for _ in 0..3 {
        let outcome = engine.run_cycle().await;
        match outcome {
            CycleOutcome::Failed { stage, error } => {
                assert_eq!(stage, CycleStage::Apply);
                assert!(error.contains("parsing error"));
            }
            other => panic!("expected apply failure, got {:?}", other),
        }
    }

    assert_eq!(fetches.load(std::sync::atomic::Ordering::SeqCst), 3);
    assert_eq!(engine.cycles(), 3);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), SCENARIO_CONFIG);
}

#[tokio::test]
async fn recovers_after_discovery_outage() {
    let dir = tempdir().unwrap();
    let path = write_config(dir.path(), SCENARIO_CONFIG);

    let source = ScriptedNodeSource::new(vec![
        Err("connection refused".to_string()),
        Ok(vec![Node::new("n1", "http://10.0.0.2:8080")]),
    ]);
    let (applier, log) = RecordingApplier::new();
    let (engine, _event_rx) =
        ReconcileEngine::new(Box::new(source), Box::new(applier), minimal_config(&path)).unwrap();

    assert!(matches!(engine.run_cycle().await, CycleOutcome::Failed { .. }));
    assert!(matches!(engine.run_cycle().await, CycleOutcome::Applied { .. }));
    assert_eq!(log.apply_count(), 1);
}

#[tokio::test]
async fn failed_reload_is_retried_next_cycle() {
    let dir = tempdir().unwrap();
    let path = write_config(dir.path(), SCENARIO_CONFIG);

    let source = ScriptedNodeSource::fixed(vec![Node::new("n1", "http://10.0.0.2:8080")]);
    let (applier, log) = RecordingApplier::failing_reload(1);
    let (engine, _event_rx) =
        ReconcileEngine::new(Box::new(source), Box::new(applier), minimal_config(&path)).unwrap();

    let first = engine.run_cycle().await;
    assert!(matches!(first, CycleOutcome::Failed { stage: CycleStage::Apply, .. }));
    // The new section is on disk even though the proxy never picked it up
    assert!(std::fs::read_to_string(&path).unwrap().contains(EXPECTED_SECTION));

    assert!(matches!(engine.run_cycle().await, CycleOutcome::Applied { servers: 1, .. }));
    assert_eq!(engine.run_cycle().await, CycleOutcome::Unchanged { servers: 1 });
    assert_eq!(log.call_count(), 2);
    assert_eq!(log.apply_count(), 1);
}

#[tokio::test]
async fn fresh_engine_applies_already_patched_file() {
    let dir = tempdir().unwrap();
    let path = write_config(dir.path(), SCENARIO_CONFIG);
    let nodes = vec![Node::new("n1", "http://10.0.0.2:8080")];

    let (applier, _log) = RecordingApplier::new();
    let (engine, _event_rx) = ReconcileEngine::new(
        Box::new(ScriptedNodeSource::fixed(nodes.clone())),
        Box::new(applier),
        minimal_config(&path),
    )
    .unwrap();
    assert!(matches!(engine.run_cycle().await, CycleOutcome::Applied { .. }));
    drop(engine);

    // A restart between install and reload must not leave the proxy stale
    let (applier, log) = RecordingApplier::new();
    let (restarted, _event_rx) = ReconcileEngine::new(
        Box::new(ScriptedNodeSource::fixed(nodes)),
        Box::new(applier),
        minimal_config(&path),
    )
    .unwrap();
    assert!(matches!(restarted.run_cycle().await, CycleOutcome::Applied { .. }));
    assert_eq!(restarted.run_cycle().await, CycleOutcome::Unchanged { servers: 1 });
    assert_eq!(log.apply_count(), 1);
}
