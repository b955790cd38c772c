//! Dispatch contract: intent normalization, the closed error taxonomy,
//! capability listing, and the output membrane.

use chora::core::context::BufferSink;
use chora::core::engine::{DispatchOptions, Engine};
use chora::core::model::CapabilityKind;
use chora::core::store::Store;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn open_engine() -> (TempDir, Engine) {
    let tmp = TempDir::new().expect("tempdir");
    let store = Store::open(tmp.path().join("chora.db")).expect("open store");
    (tmp, Engine::new(store))
}

#[test]
fn intent_spellings_route_to_the_same_primitive() {
    let (_tmp, engine) = open_engine();

    for (intent, id) in [
        ("manifest_entity", "inquiry-one"),
        ("primitive-manifest-entity", "inquiry-two"),
        ("manifest-entity", "inquiry-three"),
    ] {
        let result = engine.dispatch(
            intent,
            json!({ "type": "inquiry", "id": id, "data": { "title": id } }),
            DispatchOptions::default(),
        );
        assert!(result.ok, "intent {} failed: {:?}", intent, result.error_message);
    }

    assert!(engine.store().get_entity("inquiry-one").unwrap().is_some());
    assert!(engine.store().get_entity("inquiry-two").unwrap().is_some());
    assert!(engine.store().get_entity("inquiry-three").unwrap().is_some());
}

#[test]
fn unresolvable_intent_is_intent_not_found() {
    let (_tmp, engine) = open_engine();
    let result = engine.dispatch("no-such-thing", json!({}), DispatchOptions::default());
    assert!(!result.ok);
    assert_eq!(result.error_kind.unwrap().as_str(), "intent_not_found");
}

#[test]
fn missing_required_primitive_input_is_invalid_inputs() {
    let (_tmp, engine) = open_engine();
    let result = engine.dispatch(
        "manage-bond",
        json!({ "verb": "yields" }),
        DispatchOptions::default(),
    );
    assert!(!result.ok);
    assert_eq!(result.error_kind.unwrap().as_str(), "invalid_inputs");
}

#[test]
fn missing_entity_is_not_found() {
    let (_tmp, engine) = open_engine();
    let result = engine.dispatch(
        "entity-get",
        json!({ "id": "tool-ghost" }),
        DispatchOptions::default(),
    );
    assert!(!result.ok);
    assert_eq!(result.error_kind.unwrap().as_str(), "not_found");
}

#[test]
fn protocol_beats_primitive_on_a_tie() {
    let (_tmp, engine) = open_engine();
    // A protocol that shadows the builtin timestamp primitive by name.
    engine
        .store()
        .save_entity(
            "protocol-timestamp-now",
            "protocol",
            json!({
                "graph": {
                    "start": "start",
                    "nodes": [
                        { "id": "start", "kind": "START" },
                        { "id": "done", "kind": "RETURN", "outputs": { "shadowed": true } }
                    ],
                    "edges": [ { "from": "start", "to": "done" } ]
                }
            })
            .as_object()
            .unwrap()
            .clone(),
            None,
        )
        .expect("save protocol");

    let (kind, id) = engine
        .resolve_intent("timestamp-now")
        .expect("resolve")
        .expect("resolves");
    assert_eq!(kind, CapabilityKind::Protocol);
    assert_eq!(id, "protocol-timestamp-now");

    let result = engine.dispatch("timestamp-now", json!({}), DispatchOptions::default());
    assert!(result.ok);
    assert_eq!(result.data["shadowed"], json!(true));
}

#[test]
fn capabilities_enumerate_both_kinds() {
    let (_tmp, engine) = open_engine();
    engine
        .store()
        .save_entity(
            "protocol-noop",
            "protocol",
            json!({
                "description": "do nothing",
                "interface": { "required": [], "optional": [] },
                "graph": {
                    "start": "start",
                    "nodes": [ { "id": "start", "kind": "START" } ],
                    "edges": []
                }
            })
            .as_object()
            .unwrap()
            .clone(),
            None,
        )
        .expect("save protocol");

    let capabilities = engine.capabilities().expect("capabilities");
    let protocol = capabilities
        .iter()
        .find(|c| c.id == "protocol-noop")
        .expect("protocol listed");
    assert_eq!(protocol.kind, CapabilityKind::Protocol);

    let primitive = capabilities
        .iter()
        .find(|c| c.id == "primitive-manage-bond")
        .expect("primitive listed");
    assert_eq!(primitive.kind, CapabilityKind::Primitive);
    assert!(primitive.interface.required.contains(&"verb".to_string()));
}

#[test]
fn dispatch_returns_exactly_one_outcome_shape() {
    let (_tmp, engine) = open_engine();

    let ok = engine.dispatch("timestamp-now", json!({}), DispatchOptions::default());
    let envelope = ok.to_value();
    assert_eq!(envelope["ok"], json!(true));
    assert!(envelope.get("error_kind").is_none());

    let err = engine.dispatch("nope", json!({}), DispatchOptions::default());
    let envelope = err.to_value();
    assert_eq!(envelope["ok"], json!(false));
    assert!(envelope.get("error_kind").is_some());
    assert!(envelope.get("error_message").is_some());
}

#[test]
fn primitive_output_flows_through_the_sink() {
    let (_tmp, engine) = open_engine();
    let sink = Arc::new(BufferSink::new());
    let result = engine.dispatch(
        "render",
        json!({ "text": "through the membrane" }),
        DispatchOptions {
            sink: Some(sink.clone()),
            ..Default::default()
        },
    );
    assert!(result.ok);
    assert_eq!(sink.take(), vec!["through the membrane".to_string()]);
}

#[test]
fn non_object_inputs_are_rejected() {
    let (_tmp, engine) = open_engine();
    let result = engine.dispatch("timestamp-now", json!([1, 2]), DispatchOptions::default());
    assert!(!result.ok);
    assert_eq!(result.error_kind.unwrap().as_str(), "invalid_inputs");
}
