//! Bond physics: the closed verb table gates every bond write, confidence
//! is clamped, and epistemic signals fire on tentative creation and
//! downward revision.

use chora::core::engine::{DispatchOptions, Engine};
use chora::core::model::QueryFilter;
use chora::core::store::Store;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn open_store() -> (TempDir, Arc<Store>) {
    let tmp = TempDir::new().expect("tempdir");
    let store = Store::open(tmp.path().join("chora.db")).expect("open store");
    (tmp, store)
}

fn manifest(store: &Store, entity_type: &str, id: &str, title: &str) {
    let mut data = serde_json::Map::new();
    data.insert("title".into(), json!(title));
    store.save_entity(id, entity_type, data, None).expect("save entity");
}

#[test]
fn tentative_bond_emits_signal_with_source() {
    let (_tmp, store) = open_store();
    manifest(&store, "learning", "learning-l", "L");
    manifest(&store, "principle", "principle-p", "P");

    let outcome = store
        .manage_bond("surfaces", "learning-l", "principle-p", Some(0.7), None)
        .expect("bond commits");
    assert!((outcome.bond.confidence - 0.7).abs() < 1e-9);
    assert!(outcome.created);

    let signal_id = outcome.signal_id.expect("tentative bond emits a signal");
    let signal = store.require_entity(&signal_id).expect("signal exists");
    assert_eq!(signal.entity_type, "signal");
    assert!(signal.title().starts_with("Tentative bond created"));
    assert_eq!(
        signal.data.get("source_id").and_then(|v| v.as_str()),
        Some(outcome.bond.id.as_str())
    );
    assert_eq!(signal.data.get("urgency").and_then(|v| v.as_str()), Some("normal"));
}

#[test]
fn full_confidence_bond_is_quiet() {
    let (_tmp, store) = open_store();
    manifest(&store, "inquiry", "inquiry-q", "Q");
    manifest(&store, "learning", "learning-l", "L");

    let outcome = store
        .manage_bond("yields", "inquiry-q", "learning-l", None, None)
        .expect("bond commits");
    assert_eq!(outcome.bond.confidence, 1.0);
    assert!(outcome.signal_id.is_none());
}

#[test]
fn physics_violation_leaves_no_bond_row() {
    let (_tmp, store) = open_store();
    manifest(&store, "story", "story-x", "X");
    manifest(&store, "tool", "tool-y", "Y");

    let err = store
        .manage_bond("verifies", "story-x", "tool-y", None, None)
        .expect_err("verifies requires tool -> behavior");
    assert_eq!(err.kind().as_str(), "physics_violation");
    assert!(store.bonds_from("story-x").expect("query").is_empty());
}

#[test]
fn physics_violation_surfaces_through_dispatch() {
    let (_tmp, store) = open_store();
    manifest(&store, "story", "story-x", "X");
    manifest(&store, "tool", "tool-y", "Y");
    let engine = Engine::new(Arc::clone(&store));

    let result = engine.dispatch(
        "manage-bond",
        json!({ "verb": "verifies", "from": "story-x", "to": "tool-y" }),
        DispatchOptions::default(),
    );
    assert!(!result.ok);
    assert_eq!(result.error_kind.unwrap().as_str(), "physics_violation");
}

#[test]
fn unknown_verb_is_a_physics_violation() {
    let (_tmp, store) = open_store();
    manifest(&store, "tool", "tool-a", "A");
    manifest(&store, "behavior", "behavior-b", "B");
    let err = store
        .manage_bond("entangles", "tool-a", "behavior-b", None, None)
        .expect_err("unknown verb");
    assert_eq!(err.kind().as_str(), "physics_violation");
}

#[test]
fn confidence_is_clamped_at_write() {
    let (_tmp, store) = open_store();
    manifest(&store, "learning", "learning-a", "A");
    manifest(&store, "principle", "principle-b", "B");
    manifest(&store, "pattern", "pattern-c", "C");

    let high = store
        .manage_bond("surfaces", "learning-a", "principle-b", Some(1.7), None)
        .expect("bond commits");
    assert_eq!(high.bond.confidence, 1.0);

    let low = store
        .manage_bond("induces", "learning-a", "pattern-c", Some(-0.4), None)
        .expect("bond commits");
    assert_eq!(low.bond.confidence, 0.0);
}

#[test]
fn confidence_drop_signals_scale_with_the_drop() {
    let (_tmp, store) = open_store();
    manifest(&store, "tool", "tool-t", "T");
    manifest(&store, "behavior", "behavior-b", "B");

    let created = store
        .manage_bond("verifies", "tool-t", "behavior-b", Some(1.0), None)
        .expect("bond commits");
    assert!(created.signal_id.is_none());

    // Large drop: high urgency.
    let dropped = store
        .update_bond_confidence(&created.bond.id, 0.4)
        .expect("update commits");
    let signal = store
        .require_entity(&dropped.signal_id.expect("drop emits"))
        .expect("signal exists");
    assert_eq!(signal.data.get("urgency").and_then(|v| v.as_str()), Some("high"));
    assert_eq!(
        signal.data.get("category").and_then(|v| v.as_str()),
        Some("bond-confidence-dropped")
    );

    // Small drop: normal urgency.
    let nudged = store
        .update_bond_confidence(&created.bond.id, 0.35)
        .expect("update commits");
    let signal = store
        .require_entity(&nudged.signal_id.expect("drop emits"))
        .expect("signal exists");
    assert_eq!(signal.data.get("urgency").and_then(|v| v.as_str()), Some("normal"));

    // Raising confidence is quiet.
    let raised = store
        .update_bond_confidence(&created.bond.id, 0.9)
        .expect("update commits");
    assert!(raised.signal_id.is_none());
}

#[test]
fn bond_writes_land_in_the_event_log() {
    let (_tmp, store) = open_store();
    manifest(&store, "inquiry", "inquiry-q", "Q");
    manifest(&store, "learning", "learning-l", "L");
    store
        .manage_bond("yields", "inquiry-q", "learning-l", None, None)
        .expect("bond commits");

    let events = store.recent_events(10).expect("events");
    assert!(events
        .iter()
        .any(|e| e["op"].as_str() == Some("bond.create")));
}

#[test]
fn signals_are_queryable_by_category() {
    let (_tmp, store) = open_store();
    manifest(&store, "learning", "learning-l", "L");
    manifest(&store, "principle", "principle-p", "P");
    store
        .manage_bond("surfaces", "learning-l", "principle-p", Some(0.3), None)
        .expect("bond commits");

    let signals = store
        .query_entities(&QueryFilter {
            entity_type: Some("signal".into()),
            data_eq: vec![("category".into(), json!("tentative-bond"))],
            ..Default::default()
        })
        .expect("query");
    assert_eq!(signals.len(), 1);
}
