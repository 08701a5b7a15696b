mod common;

use serde_json::{json, Value};

use common::test_engine;
use dagcore::{Event, EventPayload, NodeStatus};

fn loop_output(events: &[Event]) -> Value {
    events
        .iter()
        .find_map(|e| match &e.payload {
            EventPayload::NodeResult(result)
                if result.node_id == "l" && result.status == NodeStatus::Completed =>
            {
                result.data.clone()
            }
            _ => None,
        })
        .expect("loop node completed")
}

#[tokio::test]
async fn loop_expands_child_workflow_per_item() {
    let engine = test_engine();
    let session = engine.create_session();
    let summary = engine
        .execute_workflow(
            session,
            json!({
                "nodes": [{
                    "id": "l",
                    "type": "loop_node",
                    "params": {
                        "array": ["x", "y", "z"],
                        "workflow_json": {
                            "nodes": [{"id": "say", "type": "echo", "params": {"value": "$loop.item"}}],
                            "edges": []
                        }
                    }
                }],
                "edges": []
            }),
            None,
        )
        .await
        .unwrap();
    assert!(summary.is_success());

    let events = engine.subscribe(session).unwrap().collect().await;
    let output = loop_output(&events);
    assert_eq!(output["results"], json!(["x", "y", "z"]));
    assert_eq!(output["total"], 3);
    assert_eq!(output["success"], true);

    // Per-iteration node events are tagged with the iteration index.
    let iterations: Vec<u32> = events
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::NodeResult(result)
                if result.node_id == "say" && result.status == NodeStatus::Completed =>
            {
                result.iteration
            }
            _ => None,
        })
        .collect();
    assert_eq!(iterations, vec![0, 1, 2]);
}

#[tokio::test]
async fn loop_context_exposes_position_bindings() {
    let engine = test_engine();
    let session = engine.create_session();
    engine
        .execute_workflow(
            session,
            json!({
                "nodes": [{
                    "id": "l",
                    "type": "loop_node",
                    "params": {
                        "array": [10, 20],
                        "workflow_json": {
                            "nodes": [{"id": "ctx", "type": "echo", "params": {"value": {
                                "index": "$loop.index",
                                "length": "$loop.length",
                                "first": "$loop.first",
                                "last": "$loop.last"
                            }}}],
                            "edges": []
                        }
                    }
                }],
                "edges": []
            }),
            None,
        )
        .await
        .unwrap();

    let events = engine.subscribe(session).unwrap().collect().await;
    let output = loop_output(&events);
    assert_eq!(
        output["results"],
        json!([
            {"index": 0, "length": 2, "first": true, "last": false},
            {"index": 1, "length": 2, "first": false, "last": true}
        ])
    );
}

#[tokio::test]
async fn loop_fails_fast_across_iterations() {
    let engine = test_engine();
    let session = engine.create_session();
    engine
        .execute_workflow(
            session,
            json!({
                "nodes": [{
                    "id": "l",
                    "type": "loop_node",
                    "params": {
                        "array": [1, 2, 3],
                        "workflow_json": {
                            "nodes": [{"id": "f", "type": "fail", "params": {}}],
                            "edges": []
                        }
                    }
                }],
                "edges": []
            }),
            None,
        )
        .await
        .unwrap();

    let events = engine.subscribe(session).unwrap().collect().await;
    let output = loop_output(&events);
    assert_eq!(output["success"], false);
    assert_eq!(output["results"].as_array().unwrap().len(), 1);
    assert_eq!(output["total"], 3);
}

#[tokio::test]
async fn continue_on_error_runs_every_iteration() {
    let engine = test_engine();
    let session = engine.create_session();
    engine
        .execute_workflow(
            session,
            json!({
                "nodes": [{
                    "id": "l",
                    "type": "loop_node",
                    "params": {
                        "array": [1, 2, 3],
                        "continue_on_error": true,
                        "workflow_json": {
                            "nodes": [{"id": "f", "type": "fail", "params": {}}],
                            "edges": []
                        }
                    }
                }],
                "edges": []
            }),
            None,
        )
        .await
        .unwrap();

    let events = engine.subscribe(session).unwrap().collect().await;
    let output = loop_output(&events);
    assert_eq!(output["success"], false);
    assert_eq!(output["results"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn scalar_array_is_wrapped_and_nested_loops_shadow() {
    let engine = test_engine();
    let session = engine.create_session();
    engine
        .execute_workflow(
            session,
            json!({
                "nodes": [{
                    "id": "l",
                    "type": "loop_node",
                    "params": {
                        "array": [["a", "b"]],
                        "workflow_json": {
                            "nodes": [{
                                "id": "inner",
                                "type": "loop_node",
                                "params": {
                                    "array": "$loop.item",
                                    "workflow_json": {
                                        "nodes": [{"id": "say", "type": "echo",
                                                   "params": {"value": "$loop.item"}}],
                                        "edges": []
                                    }
                                }
                            }],
                            "edges": []
                        }
                    }
                }],
                "edges": []
            }),
            None,
        )
        .await
        .unwrap();

    let events = engine.subscribe(session).unwrap().collect().await;
    let output = loop_output(&events);
    // The inner loop iterated over the outer item; `$loop` inside the
    // innermost child referred to the inner loop's context.
    assert_eq!(output["results"][0]["results"], json!(["a", "b"]));
}

#[tokio::test]
async fn iteration_cap_limits_the_loop() {
    let engine = test_engine();
    let session = engine.create_session();
    engine
        .execute_workflow(
            session,
            json!({
                "nodes": [{
                    "id": "l",
                    "type": "loop_node",
                    "params": {
                        "array": [1, 2, 3, 4, 5],
                        "max_iterations": 2,
                        "workflow_json": {
                            "nodes": [{"id": "say", "type": "echo", "params": {"value": "$loop.index"}}],
                            "edges": []
                        }
                    }
                }],
                "edges": []
            }),
            None,
        )
        .await
        .unwrap();

    let events = engine.subscribe(session).unwrap().collect().await;
    let output = loop_output(&events);
    assert_eq!(output["results"], json!([0, 1]));
    assert_eq!(output["total"], 5);
}
