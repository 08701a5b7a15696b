mod common;

use std::time::Instant;

use serde_json::{json, Value};

use dagcore::{EngineError, Event, EventPayload, NodeStatus, ValidationError};
use common::test_engine;

async fn run_and_collect(document: Value) -> (Result<dagcore::RunSummary, EngineError>, Vec<Event>) {
    let engine = test_engine();
    let session = engine.create_session();
    let outcome = engine.execute_workflow(session, document, None).await;
    let events = engine.subscribe(session).unwrap().collect().await;
    (outcome, events)
}

fn node_results(events: &[Event]) -> Vec<(String, NodeStatus)> {
    events
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::NodeResult(result) => Some((result.node_id.clone(), result.status)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn chained_nodes_pass_data_downstream() {
    let (outcome, events) = run_and_collect(json!({
        "nodes": [
            {"id": "a", "type": "echo", "params": {"value": {"result": 30}}},
            {"id": "b", "type": "echo", "params": {"value": "$a.result"}}
        ],
        "edges": [{"from": "a", "to": "b"}]
    }))
    .await;

    let summary = outcome.unwrap();
    assert_eq!(summary.completed, 2);
    assert!(summary.is_success());

    let transitions = node_results(&events);
    assert_eq!(
        transitions,
        vec![
            ("a".to_string(), NodeStatus::Running),
            ("a".to_string(), NodeStatus::Completed),
            ("b".to_string(), NodeStatus::Running),
            ("b".to_string(), NodeStatus::Completed),
        ]
    );

    let b_data = events
        .iter()
        .find_map(|e| match &e.payload {
            EventPayload::NodeResult(result)
                if result.node_id == "b" && result.status == NodeStatus::Completed =>
            {
                result.data.clone()
            }
            _ => None,
        })
        .unwrap();
    assert_eq!(b_data, json!(30));

    assert_eq!(events.last().unwrap().payload.kind(), "complete");
}

#[tokio::test]
async fn cycle_is_rejected_before_execution() {
    let (outcome, events) = run_and_collect(json!({
        "nodes": [
            {"id": "a", "type": "echo", "params": {"value": 1}},
            {"id": "b", "type": "echo", "params": {"value": 2}}
        ],
        "edges": [{"from": "a", "to": "b"}, {"from": "b", "to": "a"}]
    }))
    .await;

    assert!(matches!(
        outcome,
        Err(EngineError::Validation(ValidationError::Cycle(_)))
    ));

    // A single error event naming both offenders; nothing ran.
    let terminal = events.last().unwrap();
    match &terminal.payload {
        EventPayload::Error { error } => {
            assert!(error.contains("a") && error.contains("b"), "{error}");
        }
        other => panic!("expected error event, got {}", other.kind()),
    }
    assert!(node_results(&events).is_empty());
}

#[tokio::test]
async fn independent_nodes_run_in_parallel() {
    let document = json!({
        "nodes": [
            {"id": "a", "type": "sleep", "params": {"millis": 200}},
            {"id": "b", "type": "sleep", "params": {"millis": 200}},
            {"id": "c", "type": "sleep", "params": {"millis": 200}}
        ],
        "edges": []
    });

    let started = Instant::now();
    let (outcome, events) = run_and_collect(document).await;
    let elapsed = started.elapsed();

    assert!(outcome.unwrap().is_success());
    assert!(
        elapsed.as_millis() >= 200 && elapsed.as_millis() < 400,
        "expected parallel fan-out, took {elapsed:?}"
    );

    // All running events precede any completion.
    let transitions = node_results(&events);
    let last_running = transitions
        .iter()
        .rposition(|(_, s)| *s == NodeStatus::Running)
        .unwrap();
    let first_completed = transitions
        .iter()
        .position(|(_, s)| *s == NodeStatus::Completed)
        .unwrap();
    assert!(last_running < first_completed);
}

#[tokio::test]
async fn failure_fails_the_forward_reachable_set() {
    let (outcome, events) = run_and_collect(json!({
        "nodes": [
            {"id": "a", "type": "fail", "params": {"message": "boom"}},
            {"id": "b", "type": "echo", "params": {"value": 1}},
            {"id": "c", "type": "echo", "params": {"value": 2}}
        ],
        "edges": [{"from": "a", "to": "b"}, {"from": "b", "to": "c"}]
    }))
    .await;

    let summary = outcome.unwrap();
    assert_eq!(summary.completed, 0);
    assert_eq!(summary.failed, 3);

    let failures: Vec<_> = events
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::NodeResult(result) if result.status == NodeStatus::Failed => {
                Some((result.node_id.clone(), result.error.clone().unwrap()))
            }
            _ => None,
        })
        .collect();
    assert_eq!(failures.len(), 3);
    assert_eq!(failures[0].0, "a");
    assert!(failures[1].1.contains("dependency failed: a"));
    assert!(failures[2].1.contains("dependency"));
}

#[tokio::test]
async fn failure_in_one_branch_leaves_independent_branch_alone() {
    let (outcome, events) = run_and_collect(json!({
        "nodes": [
            {"id": "bad", "type": "fail", "params": {}},
            {"id": "bad_child", "type": "echo", "params": {"value": "$bad.x"}},
            {"id": "good", "type": "sleep", "params": {"millis": 50}},
            {"id": "good_child", "type": "echo", "params": {"value": 7}}
        ],
        "edges": [
            {"from": "bad", "to": "bad_child"},
            {"from": "good", "to": "good_child"}
        ]
    }))
    .await;

    let summary = outcome.unwrap();
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.completed, 2);

    let statuses = node_results(&events);
    assert!(statuses
        .iter()
        .any(|(id, s)| id == "good_child" && *s == NodeStatus::Completed));
}

#[tokio::test]
async fn retry_recovers_transient_failures() {
    let (outcome, events) = run_and_collect(json!({
        "nodes": [{"id": "f", "type": "flaky", "params": {"fail_times": 2}}],
        "edges": []
    }))
    .await;

    assert!(outcome.unwrap().is_success());

    let retries: Vec<u32> = events
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::ToolRetry { attempt, .. } => Some(*attempt),
            _ => None,
        })
        .collect();
    assert_eq!(retries, vec![1, 2]);

    let data = events
        .iter()
        .find_map(|e| match &e.payload {
            EventPayload::NodeResult(result) if result.status == NodeStatus::Completed => {
                result.data.clone()
            }
            _ => None,
        })
        .unwrap();
    assert_eq!(data["attempts"], 3);
}

#[tokio::test]
async fn retries_exhaust_into_failure() {
    let (outcome, events) = run_and_collect(json!({
        "nodes": [{"id": "f", "type": "flaky", "params": {"fail_times": 10}}],
        "edges": []
    }))
    .await;

    let summary = outcome.unwrap();
    assert_eq!(summary.failed, 1);

    let retries = events
        .iter()
        .filter(|e| matches!(e.payload, EventPayload::ToolRetry { .. }))
        .count();
    assert_eq!(retries, 2);
}

#[tokio::test]
async fn timeout_fails_the_node() {
    let (outcome, events) = run_and_collect(json!({
        "nodes": [{"id": "slow", "type": "sleep", "params": {"millis": 5000, "timeout": 0.1}}],
        "edges": []
    }))
    .await;

    let summary = outcome.unwrap();
    assert_eq!(summary.failed, 1);

    let error = events
        .iter()
        .find_map(|e| match &e.payload {
            EventPayload::NodeResult(result) if result.status == NodeStatus::Failed => {
                result.error.clone()
            }
            _ => None,
        })
        .unwrap();
    assert!(error.contains("timed out"), "{error}");
}

#[tokio::test]
async fn resolution_failure_skips_executor() {
    let (outcome, events) = run_and_collect(json!({
        "nodes": [
            {"id": "a", "type": "echo", "params": {"value": {"x": 1}}},
            {"id": "b", "type": "echo", "params": {"value": "$a.missing_field"}}
        ],
        "edges": []
    }))
    .await;

    let summary = outcome.unwrap();
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failed, 1);

    let b_failure = events
        .iter()
        .find_map(|e| match &e.payload {
            EventPayload::NodeResult(result)
                if result.node_id == "b" && result.status == NodeStatus::Failed =>
            {
                result.error.clone()
            }
            _ => None,
        })
        .unwrap();
    assert!(b_failure.contains("resolution"), "{b_failure}");
}

#[tokio::test]
async fn global_params_resolve_under_reserved_id() {
    let engine = test_engine();
    let session = engine.create_session();
    let globals = json!({"region": "eu"}).as_object().cloned().unwrap();
    let summary = engine
        .execute_workflow(
            session,
            json!({
                "nodes": [{"id": "a", "type": "echo", "params": {"value": "$global.region"}}],
                "edges": []
            }),
            Some(globals),
        )
        .await
        .unwrap();
    assert!(summary.is_success());

    let events = engine.subscribe(session).unwrap().collect().await;
    let data = events
        .iter()
        .find_map(|e| match &e.payload {
            EventPayload::NodeResult(result) if result.status == NodeStatus::Completed => {
                result.data.clone()
            }
            _ => None,
        })
        .unwrap();
    assert_eq!(data, json!("eu"));
}

#[tokio::test]
async fn happens_before_along_edges() {
    let (_, events) = run_and_collect(json!({
        "nodes": [
            {"id": "a", "type": "sleep", "params": {"millis": 30}},
            {"id": "b", "type": "echo", "params": {"value": 1}}
        ],
        "edges": [{"from": "a", "to": "b"}]
    }))
    .await;

    let a_terminal = events
        .iter()
        .find(|e| match &e.payload {
            EventPayload::NodeResult(result) => {
                result.node_id == "a" && result.status.is_terminal()
            }
            _ => false,
        })
        .unwrap();
    for event in &events {
        if let EventPayload::NodeResult(result) = &event.payload {
            if result.node_id == "b" {
                assert!(event.timestamp >= a_terminal.timestamp);
            }
        }
    }
}
