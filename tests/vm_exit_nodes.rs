//! Protocol VM semantics: branch routing and exit-node recording, CALL
//! result binding, input validation, and the fuel/cycle guards.

use chora::core::engine::{DispatchOptions, Engine};
use chora::core::store::Store;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

fn open_engine() -> (TempDir, Engine) {
    let tmp = TempDir::new().expect("tempdir");
    let store = Store::open(tmp.path().join("chora.db")).expect("open store");
    (tmp, Engine::new(store))
}

fn manifest_protocol(engine: &Engine, id: &str, data: Value) {
    let map = data.as_object().expect("protocol data is an object").clone();
    engine
        .store()
        .save_entity(id, "protocol", map, None)
        .expect("save protocol");
}

fn branch_protocol() -> Value {
    json!({
        "description": "route on the sign of x",
        "inputs_schema": { "required": ["x"] },
        "graph": {
            "start": "start",
            "nodes": [
                { "id": "start", "kind": "START" },
                {
                    "id": "sign",
                    "kind": "BRANCH",
                    "predicate": { "op": "gt", "path": "$.inputs.x", "value": 0 }
                },
                { "id": "return-a", "kind": "RETURN", "outputs": { "which": "a", "x": "$.inputs.x" } },
                { "id": "return-b", "kind": "RETURN", "outputs": { "which": "b", "x": "$.inputs.x" } }
            ],
            "edges": [
                { "from": "start", "to": "sign" },
                { "from": "sign", "to": "return-a", "label": true },
                { "from": "sign", "to": "return-b", "default": true }
            ]
        }
    })
}

#[test]
fn default_branch_records_its_exit_node() {
    let (_tmp, engine) = open_engine();
    manifest_protocol(&engine, "protocol-route", branch_protocol());

    let result = engine.dispatch("route", json!({ "x": -1 }), DispatchOptions::default());
    assert!(result.ok, "{:?}", result.error_message);
    assert_eq!(result.exit_node.as_deref(), Some("return-b"));
    assert_eq!(result.data["which"], json!("b"));
    assert_eq!(result.data["x"], json!(-1));
}

#[test]
fn matching_label_wins_over_default() {
    let (_tmp, engine) = open_engine();
    manifest_protocol(&engine, "protocol-route", branch_protocol());

    let result = engine.dispatch("route", json!({ "x": 7 }), DispatchOptions::default());
    assert!(result.ok);
    assert_eq!(result.exit_node.as_deref(), Some("return-a"));
    assert_eq!(result.data["which"], json!("a"));
}

#[test]
fn missing_required_input_is_invalid_inputs() {
    let (_tmp, engine) = open_engine();
    manifest_protocol(&engine, "protocol-route", branch_protocol());

    let result = engine.dispatch("route", json!({}), DispatchOptions::default());
    assert!(!result.ok);
    assert_eq!(result.error_kind.unwrap().as_str(), "invalid_inputs");
}

#[test]
fn call_stores_the_primitive_response_under_out() {
    let (_tmp, engine) = open_engine();
    manifest_protocol(
        &engine,
        "protocol-echo",
        json!({
            "graph": {
                "start": "start",
                "nodes": [
                    { "id": "start", "kind": "START" },
                    {
                        "id": "echo",
                        "kind": "CALL",
                        "ref": "primitive-identity",
                        "inputs": { "value": "$.inputs.payload" },
                        "out": "echoed"
                    },
                    { "id": "done", "kind": "RETURN", "outputs": { "payload": "$.echoed" } }
                ],
                "edges": [
                    { "from": "start", "to": "echo" },
                    { "from": "echo", "to": "done" }
                ]
            }
        }),
    );

    let result = engine.dispatch(
        "echo",
        json!({ "payload": { "deep": [1, 2, 3] } }),
        DispatchOptions::default(),
    );
    assert!(result.ok, "{:?}", result.error_message);
    assert_eq!(result.data["payload"], json!({ "deep": [1, 2, 3] }));
}

#[test]
fn set_computes_bindings_and_interpolates() {
    let (_tmp, engine) = open_engine();
    manifest_protocol(
        &engine,
        "protocol-greet",
        json!({
            "graph": {
                "start": "start",
                "nodes": [
                    { "id": "start", "kind": "START" },
                    {
                        "id": "compose",
                        "kind": "SET",
                        "bindings": { "greeting": "hello {$.inputs.name}" }
                    },
                    { "id": "done", "kind": "RETURN", "outputs": { "text": "$.greeting" } }
                ],
                "edges": [
                    { "from": "start", "to": "compose" },
                    { "from": "compose", "to": "done" }
                ]
            }
        }),
    );

    let result = engine.dispatch("greet", json!({ "name": "loom" }), DispatchOptions::default());
    assert!(result.ok);
    assert_eq!(result.data["text"], json!("hello loom"));
}

#[test]
fn unknown_primitive_fails_with_primitive_not_found() {
    let (_tmp, engine) = open_engine();
    manifest_protocol(
        &engine,
        "protocol-broken",
        json!({
            "graph": {
                "start": "start",
                "nodes": [
                    { "id": "start", "kind": "START" },
                    { "id": "call", "kind": "CALL", "ref": "primitive-does-not-exist" }
                ],
                "edges": [ { "from": "start", "to": "call" } ]
            }
        }),
    );

    let result = engine.dispatch("broken", json!({}), DispatchOptions::default());
    assert!(!result.ok);
    assert_eq!(result.error_kind.unwrap().as_str(), "primitive_not_found");
}

#[test]
fn unconditional_cycle_is_detected() {
    let (_tmp, engine) = open_engine();
    manifest_protocol(
        &engine,
        "protocol-loop",
        json!({
            "graph": {
                "start": "start",
                "nodes": [
                    { "id": "start", "kind": "START" },
                    { "id": "a", "kind": "SET", "bindings": { "tick": 1 } },
                    { "id": "b", "kind": "SET", "bindings": { "tock": 2 } }
                ],
                "edges": [
                    { "from": "start", "to": "a" },
                    { "from": "a", "to": "b" },
                    { "from": "b", "to": "a" }
                ]
            }
        }),
    );

    let result = engine.dispatch("loop", json!({}), DispatchOptions::default());
    assert!(!result.ok);
    assert_eq!(result.error_kind.unwrap().as_str(), "execution_error");
    assert_eq!(result.error_message.as_deref(), Some("cycle_detected"));
}

#[test]
fn fuel_exhaustion_is_reported() {
    let tmp = TempDir::new().expect("tempdir");
    let store = Store::open(tmp.path().join("chora.db")).expect("open store");
    let engine = Engine::new(Arc::clone(&store)).with_fuel(2);
    manifest_protocol(
        &engine,
        "protocol-long",
        json!({
            "graph": {
                "start": "start",
                "nodes": [
                    { "id": "start", "kind": "START" },
                    { "id": "s1", "kind": "SET", "bindings": { "a": 1 } },
                    { "id": "s2", "kind": "SET", "bindings": { "b": 2 } },
                    { "id": "done", "kind": "RETURN", "outputs": {} }
                ],
                "edges": [
                    { "from": "start", "to": "s1" },
                    { "from": "s1", "to": "s2" },
                    { "from": "s2", "to": "done" }
                ]
            }
        }),
    );

    let result = engine.dispatch("long", json!({}), DispatchOptions::default());
    assert!(!result.ok);
    assert_eq!(result.error_message.as_deref(), Some("step_budget_exhausted"));
}

#[test]
fn merge_joins_branch_arms() {
    let (_tmp, engine) = open_engine();
    manifest_protocol(
        &engine,
        "protocol-join",
        json!({
            "graph": {
                "start": "start",
                "nodes": [
                    { "id": "start", "kind": "START" },
                    {
                        "id": "pick",
                        "kind": "BRANCH",
                        "predicate": { "op": "eq", "path": "$.inputs.mode", "value": "fast" }
                    },
                    { "id": "fast", "kind": "SET", "bindings": { "speed": "fast" } },
                    { "id": "slow", "kind": "SET", "bindings": { "speed": "slow" } },
                    { "id": "join", "kind": "MERGE" },
                    { "id": "done", "kind": "RETURN", "outputs": { "speed": "$.speed" } }
                ],
                "edges": [
                    { "from": "start", "to": "pick" },
                    { "from": "pick", "to": "fast", "label": true },
                    { "from": "pick", "to": "slow", "default": true },
                    { "from": "fast", "to": "join" },
                    { "from": "slow", "to": "join" },
                    { "from": "join", "to": "done" }
                ]
            }
        }),
    );

    let result = engine.dispatch("join", json!({ "mode": "fast" }), DispatchOptions::default());
    assert!(result.ok);
    assert_eq!(result.data["speed"], json!("fast"));

    let result = engine.dispatch("join", json!({ "mode": "other" }), DispatchOptions::default());
    assert!(result.ok);
    assert_eq!(result.data["speed"], json!("slow"));
}

#[test]
fn trace_is_persisted_with_the_state() {
    let (_tmp, engine) = open_engine();
    manifest_protocol(&engine, "protocol-route", branch_protocol());

    let result = engine.dispatch(
        "route",
        json!({ "x": 2 }),
        DispatchOptions {
            state_id: Some("state-traced".into()),
            ..Default::default()
        },
    );
    assert!(result.ok);

    let state = engine
        .store()
        .load_state("state-traced")
        .expect("load state")
        .expect("state persisted");
    assert_eq!(state.data.trace, vec!["start", "sign", "return-a"]);
    assert_eq!(state.data.exit_node.as_deref(), Some("return-a"));
}
