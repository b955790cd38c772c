//! Focus lifecycle and the background execution recorder.

use chora::core::engine::{DispatchOptions, Engine};
use chora::core::store::Store;
use chora::worker;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn open_engine() -> (TempDir, Arc<Store>, Arc<Engine>) {
    let tmp = TempDir::new().expect("tempdir");
    let store = Store::open(tmp.path().join("chora.db")).expect("open store");
    let engine = Arc::new(Engine::new(Arc::clone(&store)));
    (tmp, store, engine)
}

#[test]
fn focus_opens_from_a_signal_and_resolves_into_a_learning() {
    let (_tmp, store, engine) = open_engine();
    store
        .emit_signal("Something needs doing", None, "attention", "normal", None, Default::default())
        .expect("signal");
    let signal_id = store
        .query_entities(&chora::core::model::QueryFilter {
            entity_type: Some("signal".into()),
            ..Default::default()
        })
        .unwrap()[0]
        .id
        .clone();

    let created = engine.dispatch(
        "focus-create",
        json!({ "title": "Do the thing", "signal_id": signal_id }),
        DispatchOptions::default(),
    );
    assert!(created.ok, "{:?}", created.error_message);
    let focus_id = created.data["id"].as_str().unwrap().to_string();
    assert!(created.data["bond_id"].as_str().is_some(), "signal triggers focus");

    let resolved = engine.dispatch(
        "focus-resolve",
        json!({ "focus_id": focus_id, "outcome": "completed", "learning": "the thing was easy" }),
        DispatchOptions::default(),
    );
    assert!(resolved.ok);
    let learning_id = resolved.data["learning_id"].as_str().unwrap();
    let learning = store.require_entity(learning_id).expect("learning exists");
    assert_eq!(learning.entity_type, "learning");

    // Provenance: the learning crystallized from the focus.
    let bonds = store.bonds_from(learning_id).unwrap();
    assert!(bonds.iter().any(|b| b.verb == "crystallized-from" && b.to_id == focus_id));

    // Resolving twice fails with already_resolved.
    let again = engine.dispatch(
        "focus-resolve",
        json!({ "focus_id": focus_id, "outcome": "abandoned" }),
        DispatchOptions::default(),
    );
    assert!(!again.ok);
    assert_eq!(again.error_kind.unwrap().as_str(), "already_resolved");
}

#[test]
fn resolving_a_resolved_signal_is_already_resolved() {
    let (_tmp, store, engine) = open_engine();
    let signal_id = store
        .emit_signal("One shot", None, "attention", "normal", None, Default::default())
        .expect("signal");

    let first = engine.dispatch(
        "signal-resolve",
        json!({ "signal_id": signal_id }),
        DispatchOptions::default(),
    );
    assert!(first.ok);

    let second = engine.dispatch(
        "signal-resolve",
        json!({ "signal_id": signal_id }),
        DispatchOptions::default(),
    );
    assert!(!second.ok);
    assert_eq!(second.error_kind.unwrap().as_str(), "already_resolved");
}

#[test]
fn background_execution_closes_its_outcome_before_returning() {
    let (_tmp, store, engine) = open_engine();
    store
        .save_entity(
            "protocol-pong",
            "protocol",
            json!({
                "graph": {
                    "start": "start",
                    "nodes": [
                        { "id": "start", "kind": "START" },
                        { "id": "done", "kind": "RETURN", "outputs": { "pong": true } }
                    ],
                    "edges": [ { "from": "start", "to": "done" } ]
                }
            })
            .as_object()
            .unwrap()
            .clone(),
            None,
        )
        .expect("protocol");
    store
        .emit_signal("Async ping", None, "attention", "normal", None, Default::default())
        .expect("signal");
    let signal_id = store
        .query_entities(&chora::core::model::QueryFilter {
            entity_type: Some("signal".into()),
            ..Default::default()
        })
        .unwrap()[0]
        .id
        .clone();

    let handle = worker::spawn_protocol(
        Arc::clone(&engine),
        signal_id.clone(),
        "protocol-pong".to_string(),
        json!({}),
    );
    let result = handle.join().expect("worker thread");
    assert!(result.ok);

    // The record was terminal before the join returned.
    let outcomes = store.outcomes_for_signal(&signal_id).expect("outcomes");
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0]["status"], json!("completed"));
    assert!(outcomes[0]["ended_at"].as_str().is_some());
}

#[test]
fn failed_execution_records_exactly_one_terminal_outcome() {
    let (_tmp, store, engine) = open_engine();
    store
        .emit_signal("Doomed run", None, "attention", "normal", None, Default::default())
        .expect("signal");
    let signal_id = store
        .query_entities(&chora::core::model::QueryFilter {
            entity_type: Some("signal".into()),
            ..Default::default()
        })
        .unwrap()[0]
        .id
        .clone();

    let result = worker::execute_recorded(
        &engine,
        &signal_id,
        "protocol-nonexistent",
        json!({}),
        DispatchOptions::default(),
    );
    assert!(!result.ok);

    let outcomes = store.outcomes_for_signal(&signal_id).expect("outcomes");
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0]["status"], json!("failed"));
    let error: serde_json::Value =
        serde_json::from_str(outcomes[0]["error"].as_str().unwrap()).unwrap();
    assert_eq!(error["kind"], json!("intent_not_found"));
}
